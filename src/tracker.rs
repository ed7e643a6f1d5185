//! Physical Device Tracker (spec §4.3).
//!
//! Collapses the many OS paths that can expose a single physical hardware
//! unit (e.g. a flight controller enumerating both `/dev/ttyACM0` and
//! `/dev/ttyACM1` across reboots) into one elected "primary" path. Both
//! internal maps (`physicalId -> PhysicalDevice`, `path -> physicalId`) are
//! guarded by a single mutex so they are always updated in one critical
//! section, per the §5 "kept mutually consistent" contract.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::{DeviceRecord, PhysicalDevice};

/// Process-wide singleton tracker of physical devices.
#[derive(Default)]
pub struct PhysicalTracker {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    by_physical_id: HashMap<String, PhysicalDevice>,
    physical_id_of_path: HashMap<String, String>,
}

impl PhysicalTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` with its just-captured `record`.
    ///
    /// Returns the `physicalId` the path was registered under, and whether
    /// `path` became (or remained) the primary path for that physical
    /// device — callers use this to decide whether to emit `DeviceAdded`
    /// (spec §4.7).
    pub fn register(&self, path: &str, record: DeviceRecord) -> RegisterOutcome {
        let mut inner = self.inner.lock().expect("tracker mutex poisoned");

        if inner.physical_id_of_path.contains_key(path) {
            log::info!("path {path} already tracked, ignoring duplicate registration");
            let physical_id = inner.physical_id_of_path.get(path).cloned().unwrap_or_default();
            let is_primary = inner
                .by_physical_id
                .get(&physical_id)
                .map(|p| p.primary_path == path)
                .unwrap_or(false);
            return RegisterOutcome { physical_id, is_primary };
        }

        let mut physical_id = record.usb.physical_device_id.clone();
        if physical_id.is_empty() {
            physical_id = format!("serial:{}", record.usb.serial_number);
            log::warn!(
                "path {path} has no physicalDeviceId, falling back to serial-keyed id {physical_id}"
            );
        }

        inner.physical_id_of_path.insert(path.to_string(), physical_id.clone());

        let is_primary = match inner.by_physical_id.get_mut(&physical_id) {
            None => {
                inner.by_physical_id.insert(
                    physical_id.clone(),
                    PhysicalDevice {
                        physical_id: physical_id.clone(),
                        primary_path: path.to_string(),
                        paths: vec![path.to_string()],
                        snapshot: record,
                    },
                );
                true
            }
            Some(entity) => {
                entity.paths.push(path.to_string());
                if outranks(path, &entity.primary_path) {
                    entity.primary_path = path.to_string();
                    entity.snapshot = record;
                    true
                } else {
                    log::info!(
                        "secondary path {path} collapsed into existing physical device {physical_id} (primary: {})",
                        entity.primary_path
                    );
                    false
                }
            }
        };

        RegisterOutcome { physical_id, is_primary }
    }

    /// Drops `path` from its physical device. If it was the primary and
    /// other paths remain, re-elects a new primary among them (the
    /// snapshot is *not* refreshed — spec §4.3).
    pub fn remove(&self, path: &str) {
        let mut inner = self.inner.lock().expect("tracker mutex poisoned");

        let Some(physical_id) = inner.physical_id_of_path.remove(path) else {
            return;
        };

        let mut delete_entity = false;
        if let Some(entity) = inner.by_physical_id.get_mut(&physical_id) {
            entity.paths.retain(|p| p != path);

            if entity.paths.is_empty() {
                delete_entity = true;
            } else if entity.primary_path == path {
                entity.primary_path = elect_primary(&entity.paths);
            }
        }

        if delete_entity {
            inner.by_physical_id.remove(&physical_id);
        }
    }

    /// `true` if `path` is its physical device's current primary path.
    pub fn is_primary(&self, path: &str) -> bool {
        let inner = self.inner.lock().expect("tracker mutex poisoned");
        let Some(physical_id) = inner.physical_id_of_path.get(path) else {
            return false;
        };
        inner
            .by_physical_id
            .get(physical_id)
            .map(|entity| entity.primary_path == path)
            .unwrap_or(false)
    }

    /// The current primary path for `physical_id`, if the entity exists.
    pub fn primary_of(&self, physical_id: &str) -> Option<String> {
        let inner = self.inner.lock().expect("tracker mutex poisoned");
        inner.by_physical_id.get(physical_id).map(|e| e.primary_path.clone())
    }

    /// All known paths for `physical_id`. Empty iff the tracker has no
    /// entry for it (spec §8 invariant).
    pub fn paths_of(&self, physical_id: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("tracker mutex poisoned");
        inner.by_physical_id.get(physical_id).map(|e| e.paths.clone()).unwrap_or_default()
    }

    /// The physical id `path` is currently registered under, if any.
    pub fn physical_id_of(&self, path: &str) -> Option<String> {
        let inner = self.inner.lock().expect("tracker mutex poisoned");
        inner.physical_id_of_path.get(path).cloned()
    }

    /// Value-copy snapshots of every tracked physical device.
    pub fn all_physical(&self) -> Vec<PhysicalDevice> {
        let inner = self.inner.lock().expect("tracker mutex poisoned");
        inner.by_physical_id.values().cloned().collect()
    }
}

/// Outcome of [`PhysicalTracker::register`].
pub struct RegisterOutcome {
    pub physical_id: String,
    pub is_primary: bool,
}

/// `true` if `candidate` should replace `current` as primary, per the
/// election rule in spec §4.3.
fn outranks(candidate: &str, current: &str) -> bool {
    match (acm_number(candidate), acm_number(current)) {
        (Some(a), Some(b)) => a < b,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        // Neither matches the ACM pattern: first-registered wins, so a
        // later registration never outranks it.
        (None, None) => false,
    }
}

/// Elects a primary among `paths` using the same rule as `outranks`,
/// falling back to the first path in insertion order when none match the
/// ACM pattern.
fn elect_primary(paths: &[String]) -> String {
    let mut best: Option<&str> = None;
    let mut best_num: Option<u32> = None;

    for path in paths {
        if let Some(num) = acm_number(path) {
            if best_num.is_none() || num < best_num.unwrap() {
                best_num = Some(num);
                best = Some(path);
            }
        }
    }

    best.map(str::to_string).unwrap_or_else(|| paths[0].clone())
}

/// Extracts the trailing decimal number from a `/dev/ttyACM<n>` path.
fn acm_number(path: &str) -> Option<u32> {
    const PREFIX: &str = "/dev/ttyACM";
    let suffix = path.strip_prefix(PREFIX)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceRecord;

    fn record_with_physical_id(path: &str, physical_id: &str) -> DeviceRecord {
        let mut record = DeviceRecord::new(path);
        record.usb.physical_device_id = physical_id.to_string();
        record
    }

    #[test]
    fn first_registration_becomes_primary() {
        let tracker = PhysicalTracker::new();
        let outcome = tracker.register("/dev/ttyACM0", record_with_physical_id("/dev/ttyACM0", "001:26ac:0011:ABC"));
        assert!(outcome.is_primary);
        assert_eq!(tracker.primary_of(&outcome.physical_id).as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn dual_path_collapse_prefers_lower_acm_number() {
        // spec §8 scenario 2: ACM1 registered first, then ACM0 takes over primary.
        let tracker = PhysicalTracker::new();
        let first = tracker.register("/dev/ttyACM1", record_with_physical_id("/dev/ttyACM1", "001:26ac:0011:ABC"));
        assert!(first.is_primary);

        let second = tracker.register("/dev/ttyACM0", record_with_physical_id("/dev/ttyACM0", "001:26ac:0011:ABC"));
        assert!(second.is_primary, "lower-numbered ACM path must win primary");
        assert_eq!(tracker.primary_of(&second.physical_id).as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn non_acm_paths_keep_first_registered_primary() {
        let tracker = PhysicalTracker::new();
        let first = tracker.register("/dev/ttyUSB1", record_with_physical_id("/dev/ttyUSB1", "001:1546:01a8:XYZ"));
        assert!(first.is_primary);
        let second = tracker.register("/dev/ttyUSB0", record_with_physical_id("/dev/ttyUSB0", "001:1546:01a8:XYZ"));
        assert!(!second.is_primary);
        assert_eq!(tracker.primary_of(&first.physical_id).as_deref(), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn duplicate_path_registration_is_noop() {
        let tracker = PhysicalTracker::new();
        let first = tracker.register("/dev/ttyACM0", record_with_physical_id("/dev/ttyACM0", "001:26ac:0011:ABC"));
        let again = tracker.register("/dev/ttyACM0", record_with_physical_id("/dev/ttyACM0", "001:26ac:0011:ABC"));
        assert_eq!(tracker.paths_of(&first.physical_id).len(), 1);
        assert!(again.is_primary);
    }

    #[test]
    fn remove_reelects_primary_among_remaining_paths() {
        let tracker = PhysicalTracker::new();
        tracker.register("/dev/ttyACM0", record_with_physical_id("/dev/ttyACM0", "001:26ac:0011:ABC"));
        let outcome = tracker.register("/dev/ttyACM2", record_with_physical_id("/dev/ttyACM2", "001:26ac:0011:ABC"));
        assert!(!outcome.is_primary);

        tracker.remove("/dev/ttyACM0");
        assert_eq!(tracker.primary_of(&outcome.physical_id).as_deref(), Some("/dev/ttyACM2"));
    }

    #[test]
    fn remove_last_path_deletes_entity() {
        let tracker = PhysicalTracker::new();
        let outcome = tracker.register("/dev/ttyACM0", record_with_physical_id("/dev/ttyACM0", "001:26ac:0011:ABC"));
        tracker.remove("/dev/ttyACM0");
        assert!(tracker.paths_of(&outcome.physical_id).is_empty());
        assert_eq!(tracker.primary_of(&outcome.physical_id), None);
    }

    #[test]
    fn empty_physical_device_id_falls_back_to_serial_key() {
        let tracker = PhysicalTracker::new();
        let mut record = DeviceRecord::new("/dev/ttyACM0");
        record.usb.serial_number = "XYZ".to_string();
        let outcome = tracker.register("/dev/ttyACM0", record);
        assert_eq!(outcome.physical_id, "serial:XYZ");
    }

    #[test]
    fn is_primary_reflects_current_election() {
        let tracker = PhysicalTracker::new();
        tracker.register("/dev/ttyACM1", record_with_physical_id("/dev/ttyACM1", "001:26ac:0011:ABC"));
        tracker.register("/dev/ttyACM0", record_with_physical_id("/dev/ttyACM0", "001:26ac:0011:ABC"));
        assert!(tracker.is_primary("/dev/ttyACM0"));
        assert!(!tracker.is_primary("/dev/ttyACM1"));
    }
}
