//! Discovery Supervisor (spec §4.7).
//!
//! Holds a `path -> Verifier` map. Spawns a verifier on `add`, stops and
//! drops one on `remove`, and on `DeviceVerified` registers the record with
//! the Physical Device Tracker — emitting `DeviceAdded` only when the
//! record represents the elected primary path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::PackageConfig;
use crate::model::DeviceRecord;
use crate::store::DeviceStateStore;
use crate::tracker::PhysicalTracker;
use crate::verifier::{VerifiedEvent, Verifier};
use crate::watcher::HotplugEvent;

/// Lifecycle events fanned out to the RPC layer (spec §4.7, §4.10).
#[derive(Clone, Debug)]
pub enum SupervisorEvent {
    DeviceAdded(DeviceRecord),
    DeviceRemoved { device_path: String, timestamp: String },
}

/// Process-wide singleton supervising one verifier per active path.
pub struct DiscoverySupervisor {
    config: Arc<PackageConfig>,
    store: Arc<DeviceStateStore>,
    tracker: Arc<PhysicalTracker>,
    verifiers: Mutex<HashMap<String, Verifier>>,
    events: std::sync::mpsc::Sender<SupervisorEvent>,
}

impl DiscoverySupervisor {
    /// Creates a supervisor. `events` receives `DeviceAdded`/`DeviceRemoved`
    /// for the RPC layer to fan out.
    pub fn new(
        config: Arc<PackageConfig>,
        store: Arc<DeviceStateStore>,
        tracker: Arc<PhysicalTracker>,
        events: std::sync::mpsc::Sender<SupervisorEvent>,
    ) -> Arc<Self> {
        Arc::new(Self { config, store, tracker, verifiers: Mutex::new(HashMap::new()), events })
    }

    /// Routes a hot-plug event to [`DiscoverySupervisor::add`] or
    /// [`DiscoverySupervisor::remove`].
    pub fn handle_hotplug(self: &Arc<Self>, event: HotplugEvent) {
        match event {
            HotplugEvent::Add(path) => self.add(path),
            HotplugEvent::Remove(path) => self.remove(&path),
        }
    }

    /// Starts a verifier for `path` iff one is not already tracked.
    pub fn add(self: &Arc<Self>, path: String) {
        let mut verifiers = self.verifiers.lock().expect("supervisor mutex poisoned");
        if verifiers.contains_key(&path) {
            log::debug!("{path} already has an active verifier, ignoring duplicate add");
            return;
        }

        self.store.add(&path);

        let supervisor = self.clone();
        let verifier = Verifier::start(path.clone(), self.config.clone(), self.store.clone(), move |event| {
            supervisor.on_verified(event);
        });

        verifiers.insert(path, verifier);
    }

    /// Stops and drops the verifier (if any) for `path`, removes it from
    /// the tracker, and emits `DeviceRemoved`. Per spec §5, the event is
    /// emitted after the verifier has been *asked* to stop, but not
    /// necessarily after it has exited: the bounded join happens on a
    /// detached reaper thread so this call does not block the hot-plug
    /// watcher's event loop.
    pub fn remove(self: &Arc<Self>, path: &str) {
        let verifier = {
            let mut verifiers = self.verifiers.lock().expect("supervisor mutex poisoned");
            verifiers.remove(path)
        };

        if let Some(verifier) = verifier {
            verifier.request_stop();
            thread::spawn(move || verifier.join_with_grace());
        }

        self.tracker.remove(path);
        self.store.remove(path);

        let _ = self.events.send(SupervisorEvent::DeviceRemoved {
            device_path: path.to_string(),
            timestamp: crate::model::now_iso8601(),
        });
    }

    /// Restarts verification for `path` even if a record already exists,
    /// per `device_verify`'s resolved open question (spec §4.9): stops any
    /// in-flight verifier for the path, clears its store entry, and starts
    /// fresh.
    pub fn force_verify(self: &Arc<Self>, path: String) {
        {
            let verifier = {
                let mut verifiers = self.verifiers.lock().expect("supervisor mutex poisoned");
                verifiers.remove(&path)
            };
            if let Some(verifier) = verifier {
                verifier.request_stop();
                thread::spawn(move || verifier.join_with_grace());
            }
        }

        self.tracker.remove(&path);
        self.store.remove(&path);
        self.add(path);
    }

    fn on_verified(self: &Arc<Self>, event: VerifiedEvent) {
        // The verifier already wrote the terminal record to the store
        // before invoking this callback (spec §5 ordering: store write
        // precedes tracker update precedes event emission).
        {
            let mut verifiers = self.verifiers.lock().expect("supervisor mutex poisoned");
            verifiers.remove(&event.path);
        }

        use crate::model::DeviceState;
        if event.record.state != DeviceState::Verified {
            log::info!("{} finished scan as {}", event.path, event.record.state);
            return;
        }

        let outcome = self.tracker.register(&event.path, event.record.clone());

        if outcome.is_primary {
            let _ = self.events.send(SupervisorEvent::DeviceAdded(event.record));
        } else {
            log::info!(
                "secondary path {} collapsed into physical device {}, no DeviceAdded emitted",
                event.path,
                outcome.physical_id
            );
        }
    }

    /// Stops every active verifier, blocking until each has exited or been
    /// force-terminated. Used during full daemon shutdown (spec §9).
    pub fn shutdown(&self) {
        let verifiers: Vec<Verifier> = {
            let mut verifiers = self.verifiers.lock().expect("supervisor mutex poisoned");
            verifiers.drain().map(|(_, v)| v).collect()
        };
        for verifier in verifiers {
            verifier.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn hot_unplug_during_verification_emits_removed_no_added() {
        // spec §8 scenario 3: add then remove within 50ms.
        let config = Arc::new(PackageConfig { baudrates: vec![57600, 115200], ..Default::default() });
        let store = Arc::new(DeviceStateStore::new());
        let tracker = Arc::new(PhysicalTracker::new());
        let (tx, rx) = mpsc::channel();
        let supervisor = DiscoverySupervisor::new(config, store.clone(), tracker, tx);

        supervisor.add("/dev/ttyUSB0-test".to_string());
        thread::sleep(Duration::from_millis(50));
        supervisor.remove("/dev/ttyUSB0-test");

        let mut saw_removed = false;
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(6)) {
            match event {
                SupervisorEvent::DeviceRemoved { device_path, .. } => {
                    assert_eq!(device_path, "/dev/ttyUSB0-test");
                    saw_removed = true;
                    break;
                }
                SupervisorEvent::DeviceAdded(_) => panic!("no DeviceAdded expected for an unplugged-before-verify device"),
            }
        }
        assert!(saw_removed);
        assert!(store.get("/dev/ttyUSB0-test").is_none());
    }

    #[test]
    fn dual_path_collapse_reelects_primary_on_each_verification() {
        // spec §8 scenario 2, driven through the supervisor's on_verified path
        // directly: ACM1 verifies first and becomes primary (DeviceAdded),
        // then ACM0 verifies and outranks it, taking over as primary
        // (another DeviceAdded) — on_verified emits once per winning
        // election, not once per physical device.
        let config = Arc::new(PackageConfig::default());
        let store = Arc::new(DeviceStateStore::new());
        let tracker = Arc::new(PhysicalTracker::new());
        let (tx, rx) = mpsc::channel();
        let supervisor = DiscoverySupervisor::new(config, store, tracker, tx);

        let mut record_1 = DeviceRecord::new("/dev/ttyACM1");
        record_1.state = crate::model::DeviceState::Verified;
        record_1.usb.physical_device_id = "001:26ac:0011:ABC".to_string();
        supervisor.on_verified(VerifiedEvent { path: "/dev/ttyACM1".to_string(), record: record_1 });

        let mut record_0 = DeviceRecord::new("/dev/ttyACM0");
        record_0.state = crate::model::DeviceState::Verified;
        record_0.usb.physical_device_id = "001:26ac:0011:ABC".to_string();
        supervisor.on_verified(VerifiedEvent { path: "/dev/ttyACM0".to_string(), record: record_0 });

        let mut added_paths = Vec::new();
        while let Ok(SupervisorEvent::DeviceAdded(record)) = rx.try_recv() {
            added_paths.push(record.path);
        }
        assert_eq!(added_paths, vec!["/dev/ttyACM1", "/dev/ttyACM0"]);
    }
}
