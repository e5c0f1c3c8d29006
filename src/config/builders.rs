//! Child builders and the sealed sub-configurations they produce.
use std::{fmt, sync::Arc, time::Duration};

use url::Url;

use crate::{
    data::PersistentStore,
    logging::{BasicLogBackend, LogBackend, LogLevel, Logger},
    Error, Result,
};

/// Holds at most one of several mutually exclusive variants and remembers if a second, different
/// variant was supplied.
pub(crate) struct Exclusive<T> {
    chosen: Option<(&'static str, T)>,
    conflict: Option<(&'static str, &'static str)>,
}

impl<T> Default for Exclusive<T> {
    fn default() -> Self {
        Exclusive {
            chosen: None,
            conflict: None,
        }
    }
}

impl<T: Clone> Clone for Exclusive<T> {
    fn clone(&self) -> Self {
        Exclusive {
            chosen: self.chosen.clone(),
            conflict: self.conflict,
        }
    }
}

impl<T> fmt::Debug for Exclusive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exclusive")
            .field("chosen", &self.chosen.as_ref().map(|(name, _)| name))
            .field("conflict", &self.conflict)
            .finish()
    }
}

impl<T> Exclusive<T> {
    pub(crate) fn set(&mut self, name: &'static str, value: T) {
        if let Some((previous, _)) = &self.chosen {
            if *previous != name && self.conflict.is_none() {
                self.conflict = Some((*previous, name));
            }
        }
        self.chosen = Some((name, value));
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.chosen.as_ref().map(|(_, value)| value)
    }

    pub(crate) fn seal(&self) -> Result<Option<&T>> {
        if let Some((first, second)) = self.conflict {
            return Err(Error::MutuallyExclusiveFields {
                first: first.to_owned(),
                second: second.to_owned(),
            });
        }
        Ok(self.get())
    }
}

/// Base URLs of the services the SDK talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    polling: String,
    streaming: String,
    events: String,
}

impl ServiceEndpoints {
    /// Default polling base URL.
    pub const DEFAULT_POLLING_BASE_URL: &'static str = "https://sdk.launchdarkly.com";
    /// Default streaming base URL.
    pub const DEFAULT_STREAMING_BASE_URL: &'static str = "https://stream.launchdarkly.com";
    /// Default events base URL.
    pub const DEFAULT_EVENTS_BASE_URL: &'static str = "https://events.launchdarkly.com";

    #[allow(missing_docs)]
    pub fn polling_base_url(&self) -> &str {
        &self.polling
    }

    #[allow(missing_docs)]
    pub fn streaming_base_url(&self) -> &str {
        &self.streaming
    }

    #[allow(missing_docs)]
    pub fn events_base_url(&self) -> &str {
        &self.events
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        ServiceEndpoints {
            polling: Self::DEFAULT_POLLING_BASE_URL.to_owned(),
            streaming: Self::DEFAULT_STREAMING_BASE_URL.to_owned(),
            events: Self::DEFAULT_EVENTS_BASE_URL.to_owned(),
        }
    }
}

/// Overrides the service endpoints. Either none or all three URLs must be set.
#[derive(Debug, Clone, Default)]
pub struct ServiceEndpointsBuilder {
    polling: Option<String>,
    streaming: Option<String>,
    events: Option<String>,
}

impl ServiceEndpointsBuilder {
    #[allow(missing_docs)]
    pub fn new() -> ServiceEndpointsBuilder {
        ServiceEndpointsBuilder::default()
    }

    /// Route all traffic through a Relay Proxy.
    pub fn relay_proxy(&mut self, base_url: impl Into<String>) -> &mut ServiceEndpointsBuilder {
        let base_url = base_url.into();
        self.polling = Some(base_url.clone());
        self.streaming = Some(base_url.clone());
        self.events = Some(base_url);
        self
    }

    #[allow(missing_docs)]
    pub fn polling_base_url(&mut self, url: impl Into<String>) -> &mut ServiceEndpointsBuilder {
        self.polling = Some(url.into());
        self
    }

    #[allow(missing_docs)]
    pub fn streaming_base_url(&mut self, url: impl Into<String>) -> &mut ServiceEndpointsBuilder {
        self.streaming = Some(url.into());
        self
    }

    #[allow(missing_docs)]
    pub fn events_base_url(&mut self, url: impl Into<String>) -> &mut ServiceEndpointsBuilder {
        self.events = Some(url.into());
        self
    }

    /// # Errors
    ///
    /// [`Error::ConfigurationInvalid`] if only some URLs were set or a URL does not parse.
    pub fn build(&self) -> Result<ServiceEndpoints> {
        match (&self.polling, &self.streaming, &self.events) {
            (None, None, None) => Ok(ServiceEndpoints::default()),
            (Some(polling), Some(streaming), Some(events)) => Ok(ServiceEndpoints {
                polling: base_url("polling", polling)?,
                streaming: base_url("streaming", streaming)?,
                events: base_url("events", events)?,
            }),
            (polling, streaming, events) => {
                let missing = [("polling", polling), ("streaming", streaming), ("events", events)]
                    .into_iter()
                    .filter(|(_, url)| url.is_none())
                    .map(|(name, _)| name)
                    .collect::<Vec<_>>();
                Err(Error::ConfigurationInvalid(format!(
                    "service endpoints must be overridden together; missing {} base URL",
                    missing.join(" and ")
                )))
            }
        }
    }
}

fn base_url(name: &str, raw: &str) -> Result<String> {
    let url = Url::parse(raw).map_err(|err| {
        Error::ConfigurationInvalid(format!("invalid {name} base URL '{raw}': {err}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::ConfigurationInvalid(format!(
            "{name} base URL '{raw}' must use http or https"
        )));
    }
    Ok(raw.trim_end_matches('/').to_owned())
}

/// How flag data is kept up to date in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundSyncConfig {
    /// Server-sent events, reconnecting with exponential backoff.
    Streaming {
        #[allow(missing_docs)]
        initial_reconnect_delay: Duration,
    },
    /// Periodic requests.
    Polling {
        #[allow(missing_docs)]
        interval: Duration,
    },
}

impl Default for BackgroundSyncConfig {
    fn default() -> Self {
        BackgroundSyncConfig::Streaming {
            initial_reconnect_delay: StreamingBuilder::DEFAULT_INITIAL_RECONNECT_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StreamingBuilder {
    initial_reconnect_delay: Duration,
}

impl StreamingBuilder {
    /// Default value for [`StreamingBuilder::initial_reconnect_delay`].
    pub const DEFAULT_INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
    /// Smaller initial reconnect delays are raised to this value.
    pub const MIN_INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(100);

    #[allow(missing_docs)]
    pub fn new() -> StreamingBuilder {
        StreamingBuilder::default()
    }

    /// Delay before the first reconnection attempt. Later attempts back off exponentially.
    pub fn initial_reconnect_delay(&mut self, delay: Duration) -> &mut StreamingBuilder {
        self.initial_reconnect_delay = delay;
        self
    }
}

impl Default for StreamingBuilder {
    fn default() -> Self {
        StreamingBuilder {
            initial_reconnect_delay: StreamingBuilder::DEFAULT_INITIAL_RECONNECT_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct PollingBuilder {
    interval: Duration,
}

impl PollingBuilder {
    /// Default and minimum polling interval. Smaller intervals are raised to this value.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(30);

    #[allow(missing_docs)]
    pub fn new() -> PollingBuilder {
        PollingBuilder::default()
    }

    #[allow(missing_docs)]
    pub fn interval(&mut self, interval: Duration) -> &mut PollingBuilder {
        self.interval = interval;
        self
    }
}

impl Default for PollingBuilder {
    fn default() -> Self {
        PollingBuilder {
            interval: PollingBuilder::MIN_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
enum SyncMode {
    Streaming(StreamingBuilder),
    Polling(PollingBuilder),
}

/// Selects streaming or polling. Streaming is used if neither is selected.
#[derive(Debug, Clone, Default)]
pub struct BackgroundSyncBuilder {
    mode: Exclusive<SyncMode>,
}

impl BackgroundSyncBuilder {
    #[allow(missing_docs)]
    pub fn new() -> BackgroundSyncBuilder {
        BackgroundSyncBuilder::default()
    }

    #[allow(missing_docs)]
    pub fn streaming(&mut self, streaming: StreamingBuilder) -> &mut BackgroundSyncBuilder {
        self.mode
            .set("dataSystem.backgroundSync.streaming", SyncMode::Streaming(streaming));
        self
    }

    #[allow(missing_docs)]
    pub fn polling(&mut self, polling: PollingBuilder) -> &mut BackgroundSyncBuilder {
        self.mode
            .set("dataSystem.backgroundSync.polling", SyncMode::Polling(polling));
        self
    }

    /// # Errors
    ///
    /// [`Error::MutuallyExclusiveFields`] if both streaming and polling were selected.
    pub fn build(&self) -> Result<BackgroundSyncConfig> {
        Ok(match self.mode.seal()? {
            None => BackgroundSyncConfig::default(),
            Some(SyncMode::Streaming(streaming)) => BackgroundSyncConfig::Streaming {
                initial_reconnect_delay: streaming.initial_reconnect_delay,
            },
            Some(SyncMode::Polling(polling)) => BackgroundSyncConfig::Polling {
                interval: polling.interval,
            },
        })
    }
}

/// Connection descriptor for a Redis persistent store.
///
/// The descriptor is opaque to this crate: connecting to Redis is left to a host-provided
/// [`DataSystemFactory`](crate::data::DataSystemFactory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSource {
    #[allow(missing_docs)]
    pub host: String,
    #[allow(missing_docs)]
    pub port: u16,
    /// Key prefix for SDK values.
    pub prefix: String,
    /// Number of connections to maintain.
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct RedisSourceBuilder {
    host: String,
    port: u64,
    prefix: String,
    pool_size: u64,
}

impl RedisSourceBuilder {
    #[allow(missing_docs)]
    pub const DEFAULT_HOST: &'static str = "localhost";
    #[allow(missing_docs)]
    pub const DEFAULT_PORT: u16 = 6379;
    #[allow(missing_docs)]
    pub const DEFAULT_PREFIX: &'static str = "launchdarkly";
    #[allow(missing_docs)]
    pub const DEFAULT_POOL_SIZE: u32 = 3;

    #[allow(missing_docs)]
    pub fn new() -> RedisSourceBuilder {
        RedisSourceBuilder::default()
    }

    #[allow(missing_docs)]
    pub fn host(&mut self, host: impl Into<String>) -> &mut RedisSourceBuilder {
        self.host = host.into();
        self
    }

    #[allow(missing_docs)]
    pub fn port(&mut self, port: u16) -> &mut RedisSourceBuilder {
        self.port = port.into();
        self
    }

    #[allow(missing_docs)]
    pub fn prefix(&mut self, prefix: impl Into<String>) -> &mut RedisSourceBuilder {
        self.prefix = prefix.into();
        self
    }

    #[allow(missing_docs)]
    pub fn pool_size(&mut self, pool_size: u32) -> &mut RedisSourceBuilder {
        self.pool_size = pool_size.into();
        self
    }

    pub(crate) fn raw_port(&mut self, port: u64) {
        self.port = port;
    }

    pub(crate) fn raw_pool_size(&mut self, pool_size: u64) {
        self.pool_size = pool_size;
    }

    /// # Errors
    ///
    /// [`Error::ConfigurationInvalid`] for an empty host, a port outside `1..=65535` or an empty
    /// pool.
    pub fn build(&self) -> Result<RedisSource> {
        let invalid = |message: String| Error::ConfigurationInvalid(message);
        if self.host.is_empty() {
            return Err(invalid("redis host must not be empty".to_owned()));
        }
        let port = u16::try_from(self.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| invalid(format!("redis port {} is out of range", self.port)))?;
        let pool_size = u32::try_from(self.pool_size)
            .ok()
            .filter(|size| *size != 0)
            .ok_or_else(|| invalid(format!("redis pool size {} is out of range", self.pool_size)))?;
        Ok(RedisSource {
            host: self.host.clone(),
            port,
            prefix: self.prefix.clone(),
            pool_size,
        })
    }
}

impl Default for RedisSourceBuilder {
    fn default() -> Self {
        RedisSourceBuilder {
            host: Self::DEFAULT_HOST.to_owned(),
            port: Self::DEFAULT_PORT.into(),
            prefix: Self::DEFAULT_PREFIX.to_owned(),
            pool_size: Self::DEFAULT_POOL_SIZE.into(),
        }
    }
}

/// Where lazy-loaded flag data comes from.
#[derive(Clone)]
pub enum StoreSource {
    /// A Redis store, connected by a host-provided data system factory.
    Redis(RedisSource),
    /// A store implemented by the host.
    Custom(Arc<dyn PersistentStore>),
}

impl fmt::Debug for StoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSource::Redis(redis) => f.debug_tuple("Redis").field(redis).finish(),
            StoreSource::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Cache eviction policy of the lazy-load data system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Cached data is only replaced by refreshes, never evicted.
    #[default]
    Disabled,
}

impl EvictionPolicy {
    pub(crate) const NAMES: &'static [&'static str] = &["disabled"];
}

/// Sealed lazy-load settings.
#[derive(Debug, Clone)]
pub struct LazyLoadConfig {
    #[allow(missing_docs)]
    pub source: StoreSource,
    /// How long loaded data is served before it is reloaded from the source.
    pub refresh_interval: Duration,
    #[allow(missing_docs)]
    pub eviction_policy: EvictionPolicy,
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct LazyLoadBuilder {
    source: Option<StoreSource>,
    refresh_interval: Duration,
    eviction_policy: EvictionPolicy,
}

impl LazyLoadBuilder {
    #[allow(missing_docs)]
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

    #[allow(missing_docs)]
    pub fn new() -> LazyLoadBuilder {
        LazyLoadBuilder::default()
    }

    #[allow(missing_docs)]
    pub fn source(&mut self, source: StoreSource) -> &mut LazyLoadBuilder {
        self.source = Some(source);
        self
    }

    #[allow(missing_docs)]
    pub fn refresh_interval(&mut self, interval: Duration) -> &mut LazyLoadBuilder {
        self.refresh_interval = interval;
        self
    }

    #[allow(missing_docs)]
    pub fn eviction_policy(&mut self, policy: EvictionPolicy) -> &mut LazyLoadBuilder {
        self.eviction_policy = policy;
        self
    }

    /// # Errors
    ///
    /// [`Error::ConfigurationInvalid`] if no source was given.
    pub fn build(&self) -> Result<LazyLoadConfig> {
        let source = self.source.clone().ok_or_else(|| {
            Error::ConfigurationInvalid("lazy load data system requires a source".to_owned())
        })?;
        Ok(LazyLoadConfig {
            source,
            refresh_interval: self.refresh_interval,
            eviction_policy: self.eviction_policy,
        })
    }
}

impl Default for LazyLoadBuilder {
    fn default() -> Self {
        LazyLoadBuilder {
            source: None,
            refresh_interval: LazyLoadBuilder::DEFAULT_REFRESH_INTERVAL,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

/// Sealed data system selection.
#[derive(Debug, Clone)]
pub enum DataSystemConfig {
    #[allow(missing_docs)]
    BackgroundSync(BackgroundSyncConfig),
    #[allow(missing_docs)]
    LazyLoad(LazyLoadConfig),
    /// No flag data is ever fetched. Evaluations return fallback values.
    Disabled,
}

impl Default for DataSystemConfig {
    fn default() -> Self {
        DataSystemConfig::BackgroundSync(BackgroundSyncConfig::default())
    }
}

/// Sealed logging selection.
#[derive(Clone)]
pub enum LoggingConfig {
    /// Forward to the `log` crate facade, using `tag` as the record target.
    Basic {
        #[allow(missing_docs)]
        level: LogLevel,
        #[allow(missing_docs)]
        tag: String,
    },
    /// Forward to a host backend.
    Custom(Arc<dyn LogBackend>),
    #[allow(missing_docs)]
    Disabled,
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingConfig::Basic { level, tag } => f
                .debug_struct("Basic")
                .field("level", level)
                .field("tag", tag)
                .finish(),
            LoggingConfig::Custom(_) => f.write_str("Custom(..)"),
            LoggingConfig::Disabled => f.write_str("Disabled"),
        }
    }
}

impl LoggingConfig {
    pub(crate) fn logger(&self) -> Logger {
        match self {
            LoggingConfig::Basic { level, tag } => {
                Logger::new(Arc::new(BasicLogBackend::new(*level, tag.clone())))
            }
            LoggingConfig::Custom(backend) => Logger::new(backend.clone()),
            LoggingConfig::Disabled => Logger::disabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        BasicLoggingBuilder::default().build()
    }
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct BasicLoggingBuilder {
    level: LogLevel,
    tag: String,
}

impl BasicLoggingBuilder {
    #[allow(missing_docs)]
    pub const DEFAULT_LEVEL: LogLevel = LogLevel::Info;
    /// Default record target.
    pub const DEFAULT_TAG: &'static str = "ld_server_core";

    #[allow(missing_docs)]
    pub fn new() -> BasicLoggingBuilder {
        BasicLoggingBuilder::default()
    }

    /// Minimum level forwarded to the `log` facade.
    pub fn level(&mut self, level: LogLevel) -> &mut BasicLoggingBuilder {
        self.level = level;
        self
    }

    /// Target of the emitted records.
    pub fn tag(&mut self, tag: impl Into<String>) -> &mut BasicLoggingBuilder {
        self.tag = tag.into();
        self
    }

    #[allow(missing_docs)]
    pub fn build(&self) -> LoggingConfig {
        LoggingConfig::Basic {
            level: self.level,
            tag: self.tag.clone(),
        }
    }
}

impl Default for BasicLoggingBuilder {
    fn default() -> Self {
        BasicLoggingBuilder {
            level: BasicLoggingBuilder::DEFAULT_LEVEL,
            tag: BasicLoggingBuilder::DEFAULT_TAG.to_owned(),
        }
    }
}

/// One of the mutually exclusive logging variants.
#[derive(Clone)]
pub enum LoggingBuilder {
    #[allow(missing_docs)]
    Basic(BasicLoggingBuilder),
    #[allow(missing_docs)]
    Custom(Arc<dyn LogBackend>),
    #[allow(missing_docs)]
    Disabled,
}

impl LoggingBuilder {
    /// Use a host backend.
    pub fn custom(backend: impl LogBackend + 'static) -> LoggingBuilder {
        LoggingBuilder::Custom(Arc::new(backend))
    }

    pub(crate) fn field_name(&self) -> &'static str {
        match self {
            LoggingBuilder::Basic(_) => "logging.basic",
            LoggingBuilder::Custom(_) => "logging.custom",
            LoggingBuilder::Disabled => "logging.disabled",
        }
    }

    #[allow(missing_docs)]
    pub fn build(&self) -> LoggingConfig {
        match self {
            LoggingBuilder::Basic(basic) => basic.build(),
            LoggingBuilder::Custom(backend) => LoggingConfig::Custom(backend.clone()),
            LoggingBuilder::Disabled => LoggingConfig::Disabled,
        }
    }
}

impl From<BasicLoggingBuilder> for LoggingBuilder {
    fn from(basic: BasicLoggingBuilder) -> Self {
        LoggingBuilder::Basic(basic)
    }
}

impl fmt::Debug for LoggingBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.build(), f)
    }
}
