//! Lazy-load data system: a read-through cache over a persistent store.
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use super::{DataSystem, FlagData};
use crate::{logging::Logger, Result};

/// A store that holds the full data set, populated by some other process.
pub trait PersistentStore: Send + Sync {
    /// Load the full data set. `Ok(None)` means the store has not been populated yet.
    ///
    /// # Errors
    ///
    /// Implementations should report unreachable stores as
    /// [`Error::StoreUnavailable`](crate::Error::StoreUnavailable).
    fn load(&self) -> Result<Option<FlagData>>;
}

struct Cached {
    loaded_at: Instant,
    data: Option<Arc<FlagData>>,
}

/// Serves flag data loaded from a [`PersistentStore`] on demand.
///
/// Loaded data is served until it is older than the refresh interval. A failed refresh keeps
/// serving the previous data until the next interval.
pub struct LazyLoadDataSystem {
    store: Arc<dyn PersistentStore>,
    refresh_interval: Duration,
    logger: Logger,
    cache: Mutex<Option<Cached>>,
}

impl LazyLoadDataSystem {
    #[allow(missing_docs)]
    pub fn new(
        store: Arc<dyn PersistentStore>,
        refresh_interval: Duration,
        logger: Logger,
    ) -> LazyLoadDataSystem {
        LazyLoadDataSystem {
            store,
            refresh_interval,
            logger,
            cache: Mutex::new(None),
        }
    }
}

impl DataSystem for LazyLoadDataSystem {
    /// Loads once. Nothing runs in the background, so `timeout` is not used.
    fn start(&self, _timeout: Duration) -> bool {
        self.initialized()
    }

    fn initialized(&self) -> bool {
        self.snapshot().is_some()
    }

    fn snapshot(&self) -> Option<Arc<FlagData>> {
        // Loads happen under the lock so concurrent callers share one load.
        let mut cache = self
            .cache
            .lock()
            .expect("thread holding lazy load cache should not panic");

        if let Some(cached) = &*cache {
            if cached.loaded_at.elapsed() < self.refresh_interval {
                return cached.data.clone();
            }
        }

        let previous = cache.take().and_then(|cached| cached.data);
        let data = match self.store.load() {
            Ok(Some(data)) => {
                ld_debug!(self.logger, "loaded {} flags from persistent store", data.flags.len());
                Some(Arc::new(data))
            }
            Ok(None) => {
                ld_debug!(self.logger, "persistent store is not initialized");
                previous
            }
            Err(err) => {
                ld_warn!(self.logger, "cannot load flag data from persistent store: {err}");
                previous
            }
        };

        *cache = Some(Cached {
            loaded_at: Instant::now(),
            data: data.clone(),
        });
        data
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::Error;

    #[derive(Default)]
    struct InMemoryStore {
        data: Mutex<Option<FlagData>>,
        failing: AtomicBool,
        loads: AtomicUsize,
    }

    impl InMemoryStore {
        fn populate(&self, keys: &[&str]) {
            let data = serde_json::json!({
                "flags": keys
                    .iter()
                    .map(|key| (key.to_string(), serde_json::json!({"key": key, "version": 1})))
                    .collect::<serde_json::Map<_, _>>(),
            });
            *self.data.lock().unwrap() = Some(serde_json::from_value(data).unwrap());
        }
    }

    impl PersistentStore for InMemoryStore {
        fn load(&self) -> Result<Option<FlagData>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::StoreUnavailable("connection refused".to_owned()));
            }
            Ok(self.data.lock().unwrap().clone())
        }
    }

    #[test]
    fn empty_store_is_not_initialized() {
        let store = Arc::new(InMemoryStore::default());
        let data_system = LazyLoadDataSystem::new(store, Duration::ZERO, Logger::disabled());

        assert!(!data_system.start(Duration::from_secs(1)));
        assert!(data_system.snapshot().is_none());
    }

    #[test]
    fn data_is_cached_until_refresh_interval() {
        let store = Arc::new(InMemoryStore::default());
        store.populate(&["a"]);
        let data_system =
            LazyLoadDataSystem::new(store.clone(), Duration::from_secs(60), Logger::disabled());

        assert!(data_system.start(Duration::ZERO));
        store.populate(&["a", "b"]);
        assert!(data_system.snapshot().unwrap().flag("b").is_none());
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_data_is_reloaded() {
        let store = Arc::new(InMemoryStore::default());
        store.populate(&["a"]);
        let data_system = LazyLoadDataSystem::new(store.clone(), Duration::ZERO, Logger::disabled());

        assert!(data_system.initialized());
        store.populate(&["a", "b"]);
        assert!(data_system.snapshot().unwrap().flag("b").is_some());
    }

    #[test]
    fn failed_refresh_serves_stale_data() {
        let store = Arc::new(InMemoryStore::default());
        store.populate(&["a"]);
        let data_system = LazyLoadDataSystem::new(store.clone(), Duration::ZERO, Logger::disabled());
        assert!(data_system.initialized());

        store.failing.store(true, Ordering::SeqCst);
        assert!(data_system.snapshot().unwrap().flag("a").is_some());
        assert!(data_system.initialized());
        assert!(store.loads.load(Ordering::SeqCst) >= 3);
    }
}
