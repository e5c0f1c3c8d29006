use indexmap::IndexSet;

/// Least-recently-used set of canonical context keys, used to send one index event per context.
#[derive(Debug)]
pub(crate) struct ContextKeys {
    capacity: usize,
    /// Oldest first.
    keys: IndexSet<String>,
}

impl ContextKeys {
    pub(crate) fn new(capacity: usize) -> ContextKeys {
        ContextKeys {
            capacity,
            keys: IndexSet::with_capacity(capacity),
        }
    }

    /// Remember `key` as the most recently seen. Returns `true` if it was already known.
    pub(crate) fn notice(&mut self, key: &str) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.keys.shift_remove(key) {
            self.keys.insert(key.to_owned());
            return true;
        }
        if self.keys.len() >= self.capacity {
            self.keys.shift_remove_index(0);
        }
        self.keys.insert(key.to_owned());
        false
    }

    pub(crate) fn clear(&mut self) {
        self.keys.clear();
    }
}
