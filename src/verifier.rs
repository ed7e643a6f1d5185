//! Verifier (spec §4.5): one-shot per-path baud-scan and metadata capture.
//!
//! Lifecycle: `start -> verifying -> (verified | non-mavlink) -> stop`. Each
//! verifier owns exactly one OS thread and is driven entirely by the
//! Discovery Supervisor; the serial-open pattern is grounded on
//! `maviola/src/sync/io/transport/serial/serial.rs` (`serialport::new(path,
//! baud).timeout(..).open()`), generalized here to scan a list of baud
//! rates rather than connect at one fixed rate.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::PackageConfig;
use crate::frame::FrameRecognizer;
use crate::model::{now_iso8601, DeviceRecord, DeviceState, MavlinkFrameInfo};
use crate::store::DeviceStateStore;
use crate::usb_probe;

const STOP_WAIT: Duration = Duration::from_secs(5);
const FORCE_JOIN_WAIT: Duration = Duration::from_secs(2);

/// Outcome reported by a verifier to the Discovery Supervisor on
/// completion, carrying the final record so it can be registered with the
/// Physical Device Tracker (spec §4.7).
#[derive(Clone, Debug)]
pub struct VerifiedEvent {
    pub path: String,
    pub record: DeviceRecord,
}

/// A running (or recently finished) one-shot verifier for a single path.
pub struct Verifier {
    path: String,
    stop: Arc<crate::util::Closer>,
    handle: Option<JoinHandle<()>>,
    done_rx: mpsc::Receiver<()>,
}

impl Verifier {
    /// Spawns and starts a verifier for `path`. `on_verified` is invoked
    /// exactly once, from the verifier's own thread, when the scan
    /// concludes (either `Verified` or `NonMavlink`).
    pub fn start(
        path: String,
        config: Arc<PackageConfig>,
        store: Arc<DeviceStateStore>,
        on_verified: impl Fn(VerifiedEvent) + Send + 'static,
    ) -> Self {
        let stop = Arc::new(crate::util::Closer::new());
        let stop_for_thread = stop.clone();
        let (done_tx, done_rx) = mpsc::channel();
        let thread_path = path.clone();

        let handle = thread::Builder::new()
            .name(path.clone())
            .spawn(move || {
                run(&thread_path, &config, &store, &stop_for_thread, &on_verified);
                let _ = done_tx.send(());
            })
            .expect("failed to spawn verifier thread");

        Self { path, stop, handle: Some(handle), done_rx }
    }

    /// The path this verifier is scanning.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Signals the verifier's thread to stop, without waiting for it to
    /// exit. Per spec §5, a `DeviceRemoved` event may be emitted "not
    /// necessarily after [the verifier] has exited" — callers that need to
    /// emit an event promptly should call this and hand the instance to
    /// [`Verifier::join_with_grace`] on a separate thread.
    pub fn request_stop(&self) {
        self.stop.close();
    }

    /// Waits for the thread to exit, per the §4.5 stop contract: exit
    /// within 5s of [`Verifier::request_stop`], else force-terminate and
    /// join for a further 2s. Rust offers no true thread-kill primitive, so
    /// "force termination" here means: stop waiting and detach the thread,
    /// which will still run to completion in the background but is no
    /// longer joined by the caller. This is the documented last-resort
    /// policy from spec §5 ("implementations should prefer prompt
    /// cooperative shutdown").
    pub fn join_with_grace(mut self) {
        if self.done_rx.recv_timeout(STOP_WAIT).is_ok() {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            return;
        }

        log::warn!("verifier for {} did not stop within 5s, forcing termination", self.path);
        if self.done_rx.recv_timeout(FORCE_JOIN_WAIT).is_ok() {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        } else {
            log::error!("verifier for {} still running after forced-termination grace period, detaching", self.path);
        }
    }

    /// Convenience for callers that want the old synchronous stop behavior
    /// (request + wait in one call) — used by full shutdown where blocking
    /// is acceptable.
    pub fn stop(self) {
        self.request_stop();
        self.join_with_grace();
    }
}

fn run(
    path: &str,
    config: &PackageConfig,
    store: &DeviceStateStore,
    stop: &crate::util::Closer,
    on_verified: &(impl Fn(VerifiedEvent) + Send + 'static),
) {
    store.add(path);

    let mut record = DeviceRecord::new(path);
    record.state = DeviceState::Verifying;
    record.timestamp = now_iso8601();
    store.update(record.clone());

    let baudrates = config.baudrates.clone();
    let mut found: Option<(u32, MavlinkFrameInfo)> = None;

    for &baud in &baudrates {
        if stop.is_closed() {
            break;
        }

        match scan_baud(path, baud, config, stop) {
            Some(frame) => {
                found = Some((baud, frame));
                break;
            }
            None => continue,
        }
    }

    record.timestamp = now_iso8601();
    match found {
        Some((baud, frame)) => {
            record.baudrate = baud;
            record.frame = Some(frame);
            record.messages.insert(frame.msgid);
            record.usb = usb_probe::probe(path);
            record.state = DeviceState::Verified;
            if let Some(runtime_device_file) = &config.runtime_device_file {
                write_runtime_device_file(runtime_device_file, &record.to_record_json());
            }
        }
        None => {
            record.state = DeviceState::NonMavlink;
        }
    }

    store.update(record.clone());
    on_verified(VerifiedEvent { path: path.to_string(), record });
}

/// Atomically overwrites `path` with a pretty-printed JSON record (spec
/// §6): the new content is written to a sibling `.tmp` file first, then
/// renamed over the target, so a concurrent reader never observes a
/// partial write.
fn write_runtime_device_file(path: &str, record: &crate::model::RecordJson) {
    let Ok(text) = serde_json::to_string_pretty(record) else {
        log::error!("failed to serialize runtime device file payload");
        return;
    };

    let target = Path::new(path);
    let tmp_path = target.with_extension("tmp");

    if let Err(e) = fs::write(&tmp_path, text) {
        log::warn!("failed to write runtime device file temp at {}: {e}", tmp_path.display());
        return;
    }

    if let Err(e) = fs::rename(&tmp_path, target) {
        log::warn!("failed to atomically install runtime device file {path}: {e}");
    }
}

/// Scans a single baud rate until a frame is found, the packet timeout
/// elapses, or a stop is observed (spec §4.5 step 2).
fn scan_baud(path: &str, baud: u32, config: &PackageConfig, stop: &crate::util::Closer) -> Option<MavlinkFrameInfo> {
    let mut port = match serialport::new(path, baud)
        .timeout(Duration::from_millis(config.read_timeout_ms))
        .open()
    {
        Ok(port) => port,
        Err(e) => {
            log::debug!("failed to open {path} at {baud} baud: {e}");
            return None;
        }
    };

    let deadline = Instant::now() + Duration::from_millis(config.packet_timeout_ms);
    let mut recognizer = FrameRecognizer::new();
    let mut buffer = vec![0u8; config.max_packet_size];

    while Instant::now() < deadline {
        if stop.is_closed() {
            return None;
        }

        match port.read(&mut buffer) {
            Ok(0) => continue,
            Ok(n) => {
                if let Some(frame) = recognizer.feed(&buffer[..n]) {
                    return Some(frame);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                log::debug!("read error on {path} at {baud} baud: {e}");
                return None;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[test]
    fn empty_baud_list_transitions_directly_to_non_mavlink() {
        // spec §8 boundary behavior: "A verifier given an empty baud list
        // transitions directly to NonMavlink."
        let store = Arc::new(DeviceStateStore::new());
        let config = Arc::new(PackageConfig { baudrates: vec![], ..Default::default() });
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let seen_state = Arc::new(Mutex::new(None));
        let seen_state_clone = seen_state.clone();

        let verifier = Verifier::start(
            "/dev/ttyACM99-test".to_string(),
            config,
            store.clone(),
            move |event| {
                *seen_state_clone.lock().unwrap() = Some(event.record.state);
                fired_clone.store(true, Ordering::SeqCst);
            },
        );

        // Give the thread a moment to run its (instant) baud scan.
        for _ in 0..50 {
            if fired.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        verifier.stop();

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(*seen_state.lock().unwrap(), Some(DeviceState::NonMavlink));
        assert_eq!(store.state_of("/dev/ttyACM99-test"), Some(DeviceState::NonMavlink));
    }
}
