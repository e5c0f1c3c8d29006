//! A thread-safe in-memory storage for the current flag data. [`SnapshotStore`] provides concurrent
//! access for readers (flag evaluation) and a writer (the data system thread).
use std::sync::{Arc, RwLock};

use super::FlagData;

/// `SnapshotStore` holds the current [`FlagData`] snapshot.
///
/// Snapshots are immutable and only ever replaced completely, so readers never observe a
/// partially applied update.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshot: RwLock<Option<Arc<FlagData>>>,
}

impl SnapshotStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        SnapshotStore::default()
    }

    /// Get the current snapshot. Returns `None` if no data has been stored yet.
    pub fn get(&self) -> Option<Arc<FlagData>> {
        // self.snapshot.read() should always return Ok(). Err() is possible only if the lock is
        // poisoned (writer panicked while holding the lock), which should never happen.
        let snapshot = self
            .snapshot
            .read()
            .expect("thread holding snapshot lock should not panic");

        snapshot.clone()
    }

    /// Replace the current snapshot.
    pub fn set(&self, data: Arc<FlagData>) {
        let mut slot = self
            .snapshot
            .write()
            .expect("thread holding snapshot lock should not panic");

        *slot = Some(data);
    }

    /// Apply `update` to a copy of the current snapshot and publish the copy if `update` returns
    /// `true`. Does nothing if no snapshot has been stored yet.
    pub fn update(&self, update: impl FnOnce(&mut FlagData) -> bool) -> bool {
        let mut slot = self
            .snapshot
            .write()
            .expect("thread holding snapshot lock should not panic");

        let Some(current) = slot.as_ref() else {
            return false;
        };
        let mut next = FlagData::clone(current);
        if !update(&mut next) {
            return false;
        }
        *slot = Some(Arc::new(next));
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::SnapshotStore;
    use crate::data::{FlagData, TryParse};

    #[test]
    fn can_set_snapshot_from_another_thread() {
        let store = Arc::new(SnapshotStore::new());

        assert!(store.get().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || store.set(Arc::new(FlagData::default()))).join();
        }

        assert!(store.get().is_some());
    }

    #[test]
    fn updates_are_copy_on_write() {
        let store = SnapshotStore::new();
        assert!(!store.update(|_| true));

        store.set(Arc::new(FlagData::default()));
        let before = store.get().unwrap();

        assert!(store.update(|data| {
            data.flags
                .insert("f".to_owned(), TryParse::ParseFailed(serde_json::json!({})));
            true
        }));

        assert!(before.flags.is_empty());
        assert_eq!(store.get().unwrap().flags.len(), 1);
        assert!(!store.update(|_| false));
    }
}
