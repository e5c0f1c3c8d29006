//! SDK configuration.
//!
//! A [`Configuration`] is assembled with a [`ConfigBuilder`], either programmatically or from a
//! [`Value`] tree with [`ConfigBuilder::from_value`]. Once built it is immutable and can be shared
//! freely between threads.
mod builders;
mod schema;
mod tree;

use std::{sync::OnceLock, time::Duration};

use regex::Regex;

use crate::{
    context::AttributeReference,
    logging::Logger,
    Error, Result, Value,
};

use builders::Exclusive;
pub use builders::{
    BackgroundSyncBuilder, BackgroundSyncConfig, BasicLoggingBuilder, DataSystemConfig,
    EvictionPolicy, LazyLoadBuilder, LazyLoadConfig, LoggingBuilder, LoggingConfig,
    PollingBuilder, RedisSource, RedisSourceBuilder, ServiceEndpoints, ServiceEndpointsBuilder,
    StoreSource, StreamingBuilder,
};

/// Analytics events settings.
// Not implementing `Copy` as private attributes are heap-allocated.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsConfig {
    /// Whether analytics events are sent at all.
    pub enabled: bool,
    /// Maximum number of events buffered between flushes. Events beyond it are dropped.
    pub capacity: usize,
    /// Interval between automatic flushes.
    pub flush_interval: Duration,
    /// Redact every attribute except `key`, `kind` and `anonymous`.
    pub all_attributes_private: bool,
    /// Attributes redacted from every context.
    pub private_attributes: Vec<AttributeReference>,
    /// Number of context keys remembered to avoid repeating index events.
    pub context_keys_capacity: usize,
    /// Interval at which remembered context keys are forgotten.
    pub context_keys_flush_interval: Duration,
}

impl EventsConfig {
    /// Default value for [`EventsConfig::capacity`].
    pub const DEFAULT_CAPACITY: usize = 10_000;
    /// Default value for [`EventsConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
    /// Default value for [`EventsConfig::context_keys_capacity`].
    pub const DEFAULT_CONTEXT_KEYS_CAPACITY: usize = 1000;
    /// Default value for [`EventsConfig::context_keys_flush_interval`].
    pub const DEFAULT_CONTEXT_KEYS_FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Smaller flush intervals of either kind are raised to this value.
    pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

    #[allow(missing_docs)]
    pub fn new() -> EventsConfig {
        EventsConfig::default()
    }

    #[allow(missing_docs)]
    pub fn with_enabled(mut self, enabled: bool) -> EventsConfig {
        self.enabled = enabled;
        self
    }

    #[allow(missing_docs)]
    pub fn with_capacity(mut self, capacity: usize) -> EventsConfig {
        self.capacity = capacity;
        self
    }

    #[allow(missing_docs)]
    pub fn with_flush_interval(mut self, interval: Duration) -> EventsConfig {
        self.flush_interval = interval;
        self
    }

    #[allow(missing_docs)]
    pub fn with_all_attributes_private(mut self, all_private: bool) -> EventsConfig {
        self.all_attributes_private = all_private;
        self
    }

    #[allow(missing_docs)]
    pub fn with_private_attribute(
        mut self,
        reference: impl Into<AttributeReference>,
    ) -> EventsConfig {
        self.private_attributes.push(reference.into());
        self
    }
}

impl Default for EventsConfig {
    fn default() -> EventsConfig {
        EventsConfig {
            enabled: true,
            capacity: EventsConfig::DEFAULT_CAPACITY,
            flush_interval: EventsConfig::DEFAULT_FLUSH_INTERVAL,
            all_attributes_private: false,
            private_attributes: Vec::new(),
            context_keys_capacity: EventsConfig::DEFAULT_CONTEXT_KEYS_CAPACITY,
            context_keys_flush_interval: EventsConfig::DEFAULT_CONTEXT_KEYS_FLUSH_INTERVAL,
        }
    }
}

/// Identifies the application using the SDK. Sent to the service as tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInfo {
    #[allow(missing_docs)]
    pub identifier: Option<String>,
    #[allow(missing_docs)]
    pub version: Option<String>,
}

/// HTTP timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpConfig {
    #[allow(missing_docs)]
    pub connect_timeout: Duration,
    /// Timeout of polling and event requests. The streaming connection is long-lived and has no
    /// timeout.
    pub read_timeout: Duration,
}

impl HttpConfig {
    #[allow(missing_docs)]
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    #[allow(missing_docs)]
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for HttpConfig {
    fn default() -> HttpConfig {
        HttpConfig {
            connect_timeout: HttpConfig::DEFAULT_CONNECT_TIMEOUT,
            read_timeout: HttpConfig::DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Name and version reported to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperInfo {
    #[allow(missing_docs)]
    pub name: &'static str,
    #[allow(missing_docs)]
    pub version: &'static str,
}

impl WrapperInfo {
    const SDK: WrapperInfo = WrapperInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    };
}

#[derive(Debug, Clone)]
enum DataSystemChoice {
    BackgroundSync(BackgroundSyncBuilder),
    LazyLoad(LazyLoadBuilder),
    Disabled,
}

/// Accumulates configuration and seals it into a [`Configuration`].
///
/// ```
/// # use std::time::Duration;
/// # use ld_server_core::{BackgroundSyncBuilder, ConfigBuilder, PollingBuilder};
/// # fn main() -> ld_server_core::Result<()> {
/// let config = ConfigBuilder::new("sdk-key")
///     .background_sync(
///         BackgroundSyncBuilder::new()
///             .polling(*PollingBuilder::new().interval(Duration::from_secs(60)))
///             .clone(),
///     )
///     .build()?;
/// assert!(!config.offline());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    sdk_key: String,
    offline: bool,
    service_endpoints: ServiceEndpointsBuilder,
    data_system: Exclusive<DataSystemChoice>,
    events: EventsConfig,
    app_info: AppInfo,
    http: HttpConfig,
    logging: Exclusive<LoggingBuilder>,
}

impl ConfigBuilder {
    /// Create a builder with default settings.
    pub fn new(sdk_key: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            sdk_key: sdk_key.into(),
            offline: false,
            service_endpoints: ServiceEndpointsBuilder::default(),
            data_system: Exclusive::default(),
            events: EventsConfig::default(),
            app_info: AppInfo::default(),
            http: HttpConfig::default(),
            logging: Exclusive::default(),
        }
    }

    /// Create a builder from a configuration tree.
    ///
    /// ```
    /// # use ld_server_core::{ConfigBuilder, Value};
    /// # fn main() -> ld_server_core::Result<()> {
    /// let tree = Value::from(serde_json::json!({
    ///     "dataSystem": {"backgroundSync": {"polling": {"intervalSeconds": 60}}},
    ///     "events": {"capacity": 500},
    ///     "logging": {"basic": {"level": "warn"}},
    /// }));
    /// let config = ConfigBuilder::from_value("sdk-key", &tree)?.build()?;
    /// assert_eq!(config.events().capacity, 500);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// [`Error::SchemaType`], [`Error::UnrecognizedField`], [`Error::FieldType`],
    /// [`Error::NegativeValue`], [`Error::InvalidChoice`] or [`Error::ConfigurationInvalid`],
    /// naming the dotted path of the offending node.
    pub fn from_value(sdk_key: impl Into<String>, value: &Value) -> Result<ConfigBuilder> {
        let mut builder = ConfigBuilder::new(sdk_key);
        tree::apply(&mut builder, value)?;
        Ok(builder)
    }

    /// Offline clients never connect to the service and evaluate every flag to its fallback.
    pub fn offline(&mut self, offline: bool) -> &mut ConfigBuilder {
        self.offline = offline;
        self
    }

    #[allow(missing_docs)]
    pub fn service_endpoints(&mut self, endpoints: ServiceEndpointsBuilder) -> &mut ConfigBuilder {
        self.service_endpoints = endpoints;
        self
    }

    /// Keep all flag data in memory, synchronized in the background.
    pub fn background_sync(&mut self, sync: BackgroundSyncBuilder) -> &mut ConfigBuilder {
        self.data_system
            .set("dataSystem.backgroundSync", DataSystemChoice::BackgroundSync(sync));
        self
    }

    /// Load flag data on demand from a persistent store.
    pub fn lazy_load(&mut self, lazy_load: LazyLoadBuilder) -> &mut ConfigBuilder {
        self.data_system
            .set("dataSystem.lazyLoad", DataSystemChoice::LazyLoad(lazy_load));
        self
    }

    /// Never fetch flag data.
    pub fn disable_data_system(&mut self) -> &mut ConfigBuilder {
        self.data_system
            .set("dataSystem.enabled", DataSystemChoice::Disabled);
        self
    }

    #[allow(missing_docs)]
    pub fn events(&mut self, events: EventsConfig) -> &mut ConfigBuilder {
        self.events = events;
        self
    }

    #[allow(missing_docs)]
    pub fn app_info(&mut self, app_info: AppInfo) -> &mut ConfigBuilder {
        self.app_info = app_info;
        self
    }

    #[allow(missing_docs)]
    pub fn http(&mut self, http: HttpConfig) -> &mut ConfigBuilder {
        self.http = http;
        self
    }

    /// Select basic, custom or disabled logging. Basic logging at `info` is used by default.
    pub fn logging(&mut self, logging: impl Into<LoggingBuilder>) -> &mut ConfigBuilder {
        let logging = logging.into();
        self.logging.set(logging.field_name(), logging);
        self
    }

    /// Seal the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::MutuallyExclusiveFields`] if exclusive data system or logging variants were both
    ///   selected.
    /// - [`Error::ConfigurationInvalid`] for partially overridden or unparsable endpoints, a
    ///   missing lazy-load source, out-of-range store settings or an empty SDK key on an online
    ///   configuration.
    pub fn build(&self) -> Result<Configuration> {
        let logging = self
            .logging
            .seal()?
            .map(LoggingBuilder::build)
            .unwrap_or_default();
        let logger = logging.logger();

        let data_system = match self.data_system.seal()? {
            None => DataSystemConfig::default(),
            Some(DataSystemChoice::BackgroundSync(sync)) => {
                DataSystemConfig::BackgroundSync(sync.build()?)
            }
            Some(DataSystemChoice::LazyLoad(lazy_load)) => {
                DataSystemConfig::LazyLoad(lazy_load.build()?)
            }
            Some(DataSystemChoice::Disabled) => DataSystemConfig::Disabled,
        };

        let service_endpoints = self.service_endpoints.build()?;

        if self.sdk_key.is_empty() && !self.offline {
            return Err(Error::ConfigurationInvalid(
                "sdk key must not be empty unless the client is offline".to_owned(),
            ));
        }

        let app_info = AppInfo {
            identifier: tag_value(&logger, "appInfo.identifier", &self.app_info.identifier),
            version: tag_value(&logger, "appInfo.version", &self.app_info.version),
        };

        Ok(Configuration {
            sdk_key: self.sdk_key.clone(),
            offline: self.offline,
            service_endpoints,
            data_system,
            events: self.events.clone(),
            app_info,
            http: self.http,
            logging,
            logger,
            wrapper: WrapperInfo::SDK,
        })
    }
}

/// Application tags that the service would reject are dropped with a warning.
/// `value` raised to `min`, with a warning naming `setting` if it was lower.
pub(crate) fn at_least(
    logger: &Logger,
    setting: &str,
    value: Duration,
    min: Duration,
) -> Duration {
    if value < min {
        ld_warn!(logger, "{setting} {value:?} is below the minimum; using {min:?}");
        min
    } else {
        value
    }
}

fn tag_value(logger: &Logger, field: &str, value: &Option<String>) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let value = value.as_ref()?;
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]{1,64}$").expect("tag pattern should compile"));
    if pattern.is_match(value) {
        Some(value.clone())
    } else {
        ld_warn!(logger, "ignoring {field} '{value}': expected 1 to 64 characters of [A-Za-z0-9._-]");
        None
    }
}

/// Immutable SDK configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    sdk_key: String,
    offline: bool,
    service_endpoints: ServiceEndpoints,
    data_system: DataSystemConfig,
    events: EventsConfig,
    app_info: AppInfo,
    http: HttpConfig,
    logging: LoggingConfig,
    logger: Logger,
    wrapper: WrapperInfo,
}

impl Configuration {
    #[allow(missing_docs)]
    pub fn sdk_key(&self) -> &str {
        &self.sdk_key
    }

    #[allow(missing_docs)]
    pub fn offline(&self) -> bool {
        self.offline
    }

    #[allow(missing_docs)]
    pub fn service_endpoints(&self) -> &ServiceEndpoints {
        &self.service_endpoints
    }

    #[allow(missing_docs)]
    pub fn data_system(&self) -> &DataSystemConfig {
        &self.data_system
    }

    #[allow(missing_docs)]
    pub fn events(&self) -> &EventsConfig {
        &self.events
    }

    #[allow(missing_docs)]
    pub fn app_info(&self) -> &AppInfo {
        &self.app_info
    }

    #[allow(missing_docs)]
    pub fn http(&self) -> &HttpConfig {
        &self.http
    }

    #[allow(missing_docs)]
    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    /// Handle used by every component for internal diagnostics.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// SDK name and version attached to the configuration when it was built.
    pub fn wrapper(&self) -> WrapperInfo {
        self.wrapper
    }

    /// Whether analytics events should be produced at all.
    pub(crate) fn send_events(&self) -> bool {
        self.events.enabled && !self.offline
    }

    pub(crate) fn user_agent(&self) -> String {
        format!("{}/{}", self.wrapper.name, self.wrapper.version)
    }

    /// Value of the application tags header, if any tag is set.
    pub(crate) fn tags_header(&self) -> Option<String> {
        let tags = [
            ("application-id", &self.app_info.identifier),
            ("application-version", &self.app_info.version),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|value| format!("{name}/{value}")))
        .collect::<Vec<_>>();
        (!tags.is_empty()).then(|| tags.join(" "))
    }
}
