//! Device State Store (spec §4.4).
//!
//! A process-wide `path -> DeviceRecord` map guarded by a single mutex, per
//! the §5 concurrency contract ("each is guarded by a single mutex; their
//! operations must not be composed under a caller-held lock"). Reads
//! always return value copies — the store never hands out live references.
//!
//! `state` is additionally tracked in a side `path -> Arc<AtomicU8>` map
//! (spec §5, §9 "atomic state on a record shared across threads"): every
//! write that changes a record's state updates its cell in the same
//! critical section as the `records` write, so [`DeviceStateStore::state_of`]
//! can hand back a snapshot by just loading the atomic — no full-record
//! clone, and no contention with `get`/`all` callers holding the records
//! lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::model::{DeviceRecord, DeviceState};

/// Process-wide singleton store of device records, keyed by OS path.
#[derive(Default)]
pub struct DeviceStateStore {
    records: Mutex<HashMap<String, DeviceRecord>>,
    states: Mutex<HashMap<String, Arc<AtomicU8>>>,
}

impl DeviceStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self { records: Mutex::new(HashMap::new()), states: Mutex::new(HashMap::new()) }
    }

    /// Inserts a default `Unknown` record iff `path` is absent. No-op otherwise.
    pub fn add(&self, path: &str) {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if records.contains_key(path) {
            return;
        }
        records.insert(path.to_string(), DeviceRecord::new(path));

        let mut states = self.states.lock().expect("states mutex poisoned");
        states.insert(path.to_string(), Arc::new(AtomicU8::new(DeviceState::Unknown.as_u8())));
    }

    /// Merge-overwrites `record`'s fields onto the existing entry for its
    /// path. No-op if the path is absent.
    pub fn update(&self, record: DeviceRecord) {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if records.contains_key(&record.path) {
            let path = record.path.clone();
            let new_state = record.state;
            records.insert(path.clone(), record);
            self.set_state_cell(&path, new_state);
        }
    }

    /// Sets `state = Removed` and erases the entry, in one critical section.
    pub fn remove(&self, path: &str) {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if let Some(slot) = records.get_mut(path) {
            slot.state = DeviceState::Removed;
        }
        records.remove(path);

        let mut states = self.states.lock().expect("states mutex poisoned");
        states.remove(path);
    }

    /// Returns a value-copy snapshot of the record at `path`, if present.
    pub fn get(&self, path: &str) -> Option<DeviceRecord> {
        let records = self.records.lock().expect("store mutex poisoned");
        records.get(path).cloned()
    }

    /// Returns value-copy snapshots of every known record.
    pub fn all(&self) -> Vec<DeviceRecord> {
        let records = self.records.lock().expect("store mutex poisoned");
        records.values().cloned().collect()
    }

    /// Cheap state snapshot: loads the path's atomic state cell rather than
    /// locking the (heavier) records map and cloning a full `DeviceRecord`.
    pub fn state_of(&self, path: &str) -> Option<DeviceState> {
        let states = self.states.lock().expect("states mutex poisoned");
        states.get(path).map(|cell| DeviceState::from_u8(cell.load(Ordering::Acquire)))
    }

    fn set_state_cell(&self, path: &str, state: DeviceState) {
        let states = self.states.lock().expect("states mutex poisoned");
        if let Some(cell) = states.get(path) {
            cell.store(state.as_u8(), Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let store = DeviceStateStore::new();
        store.add("/dev/ttyACM0");
        let mut record = store.get("/dev/ttyACM0").unwrap();
        record.baudrate = 115200;
        store.update(record);

        store.add("/dev/ttyACM0");
        let record = store.get("/dev/ttyACM0").unwrap();
        assert_eq!(record.baudrate, 115200, "add must not clobber an existing record");
    }

    #[test]
    fn update_is_noop_when_absent() {
        let store = DeviceStateStore::new();
        let record = DeviceRecord::new("/dev/ttyACM0");
        store.update(record);
        assert!(store.get("/dev/ttyACM0").is_none());
    }

    #[test]
    fn remove_erases_entry() {
        let store = DeviceStateStore::new();
        store.add("/dev/ttyACM0");
        store.remove("/dev/ttyACM0");
        assert!(store.get("/dev/ttyACM0").is_none());
    }

    #[test]
    fn all_returns_value_copies() {
        let store = DeviceStateStore::new();
        store.add("/dev/ttyACM0");
        store.add("/dev/ttyUSB0");
        let mut all = store.all();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].path, "/dev/ttyACM0");
    }

    #[test]
    fn state_of_tracks_updates_and_clears_on_remove() {
        let store = DeviceStateStore::new();
        assert_eq!(store.state_of("/dev/ttyACM0"), None);

        store.add("/dev/ttyACM0");
        assert_eq!(store.state_of("/dev/ttyACM0"), Some(DeviceState::Unknown));

        let mut record = store.get("/dev/ttyACM0").unwrap();
        record.state = DeviceState::Verified;
        store.update(record);
        assert_eq!(store.state_of("/dev/ttyACM0"), Some(DeviceState::Verified));

        store.remove("/dev/ttyACM0");
        assert_eq!(store.state_of("/dev/ttyACM0"), None);
    }
}
