//! Flag data and the data systems that keep it up to date.
//!
//! A [`DataSystem`] owns the current [`FlagData`] snapshot. Built-in data systems synchronize it
//! in the background (streaming or polling), load it on demand from a [`PersistentStore`], or
//! serve a fixed data set (offline and disabled clients). Hosts can plug their own through a
//! [`DataSystemFactory`].
mod lazy_load;
mod model;
mod polling;
mod store;
mod streaming;
mod thread;

use std::{sync::Arc, time::Duration};

use crate::{
    config::{BackgroundSyncConfig, DataSystemConfig, StoreSource},
    Configuration,
};

pub use lazy_load::{LazyLoadDataSystem, PersistentStore};
pub use model::{Flag, FlagData, Target, TryParse, VariationOrRollout};
pub use polling::PollingDataSystem;
pub use store::SnapshotStore;
pub use streaming::StreamingDataSystem;

/// Source of flag data for a client.
///
/// All methods may be called concurrently from evaluation callers.
pub trait DataSystem: Send + Sync {
    /// Start synchronizing and block up to `timeout` for the first data set.
    ///
    /// Returns whether the data system is initialized. A zero timeout returns immediately while
    /// initialization continues in the background. Calling `start` again only waits.
    fn start(&self, timeout: Duration) -> bool;

    /// Whether flag data is available.
    fn initialized(&self) -> bool;

    /// The current flag data, or `None` if none is available.
    fn snapshot(&self) -> Option<Arc<FlagData>>;

    /// Stop background work. Does not wait for background threads to exit.
    fn stop(&self);
}

/// Creates the data system of a client from its configuration.
pub trait DataSystemFactory: Send + Sync {
    #[allow(missing_docs)]
    fn create(&self, config: &Configuration) -> Box<dyn DataSystem>;
}

/// Factory for the built-in data systems.
///
/// Offline clients and clients with a disabled data system get an empty [`StaticDataSystem`].
/// Redis sources cannot be connected by this factory: a host factory is required for them, and
/// this one logs an error and returns a data system that never initializes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDataSystemFactory;

impl DataSystemFactory for DefaultDataSystemFactory {
    fn create(&self, config: &Configuration) -> Box<dyn DataSystem> {
        let logger = config.logger();
        if config.offline() {
            ld_info!(logger, "client is offline; all flags evaluate to their fallback values");
            return Box::new(StaticDataSystem::new(FlagData::default()));
        }
        match config.data_system() {
            DataSystemConfig::Disabled => {
                ld_info!(logger, "data system is disabled; all flags evaluate to their fallback values");
                Box::new(StaticDataSystem::new(FlagData::default()))
            }
            DataSystemConfig::BackgroundSync(sync) => {
                let result = match *sync {
                    BackgroundSyncConfig::Streaming {
                        initial_reconnect_delay,
                    } => StreamingDataSystem::new(config, initial_reconnect_delay)
                        .map(|it| Box::new(it) as Box<dyn DataSystem>),
                    BackgroundSyncConfig::Polling { interval } => {
                        PollingDataSystem::new(config, interval)
                            .map(|it| Box::new(it) as Box<dyn DataSystem>)
                    }
                };
                result.unwrap_or_else(|err| {
                    ld_error!(logger, "cannot create data system: {err}");
                    Box::new(UnavailableDataSystem)
                })
            }
            DataSystemConfig::LazyLoad(lazy_load) => match &lazy_load.source {
                StoreSource::Custom(store) => Box::new(LazyLoadDataSystem::new(
                    store.clone(),
                    lazy_load.refresh_interval,
                    logger.clone(),
                )),
                StoreSource::Redis(redis) => {
                    ld_error!(
                        logger,
                        "redis store at {}:{} requires a data system factory that supports it; \
                         the client will not initialize",
                        redis.host,
                        redis.port
                    );
                    Box::new(UnavailableDataSystem)
                }
            },
        }
    }
}

/// Serves a fixed data set. Always initialized.
#[derive(Debug)]
pub struct StaticDataSystem {
    data: Arc<FlagData>,
}

impl StaticDataSystem {
    #[allow(missing_docs)]
    pub fn new(data: FlagData) -> StaticDataSystem {
        StaticDataSystem {
            data: Arc::new(data),
        }
    }
}

impl DataSystem for StaticDataSystem {
    fn start(&self, _timeout: Duration) -> bool {
        true
    }

    fn initialized(&self) -> bool {
        true
    }

    fn snapshot(&self) -> Option<Arc<FlagData>> {
        Some(self.data.clone())
    }

    fn stop(&self) {}
}

/// A data system that never initializes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UnavailableDataSystem;

impl DataSystem for UnavailableDataSystem {
    fn start(&self, _timeout: Duration) -> bool {
        false
    }

    fn initialized(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Option<Arc<FlagData>> {
        None
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        logging::{tests::RecordingBackend, LogLevel},
        ConfigBuilder, LazyLoadBuilder, LoggingBuilder, RedisSourceBuilder,
    };

    #[test]
    fn offline_configuration_gets_empty_static_data() {
        let config = ConfigBuilder::new("sdk-key").offline(true).build().unwrap();
        let data_system = DefaultDataSystemFactory.create(&config);

        assert!(data_system.start(Duration::ZERO));
        assert!(data_system.initialized());
        assert!(data_system.snapshot().unwrap().flags.is_empty());
    }

    #[test]
    fn disabled_data_system_is_initialized() {
        let config = ConfigBuilder::new("sdk-key")
            .disable_data_system()
            .build()
            .unwrap();
        assert!(DefaultDataSystemFactory.create(&config).initialized());
    }

    #[test]
    fn redis_without_host_factory_never_initializes() {
        let backend = Arc::new(RecordingBackend::default());
        let config = ConfigBuilder::new("sdk-key")
            .lazy_load(
                LazyLoadBuilder::new()
                    .source(StoreSource::Redis(RedisSourceBuilder::new().build().unwrap()))
                    .clone(),
            )
            .logging(LoggingBuilder::Custom(backend.clone()))
            .build()
            .unwrap();

        let data_system = DefaultDataSystemFactory.create(&config);
        assert!(!data_system.start(Duration::from_millis(10)));
        assert!(data_system.snapshot().is_none());
        assert!(backend
            .lines()
            .iter()
            .any(|(level, line)| *level == LogLevel::Error && line.contains("localhost:6379")));
    }
}
