//! Core of a server-side feature flag SDK for LaunchDarkly-compatible services.
//!
//! # Overview
//!
//! A [`Client`] evaluates feature flags for a [`Context`]: one or more kinds of entity (a user,
//! an organization, a device) each identified by a key and carrying arbitrary [`Value`]
//! attributes. Contexts are assembled with a [`ContextBuilder`].
//!
//! The client is configured with a [`Configuration`] built by a [`ConfigBuilder`], either through
//! typed setters or from a [`Value`] tree (for example parsed from a JSON or YAML file). Flag data
//! comes from the data system selected by the configuration: a streaming or polling connection,
//! a persistent store read lazily, or nothing when the client is offline.
//!
//! # Error Handling
//!
//! Fallible setup operations return the [`Error`] enum. Flag evaluation never fails: the fallback
//! value is returned and the reason is available through the `*_detail` variation methods as an
//! [`ErrorKind`].
//!
//! # Logging
//!
//! By default messages go through the [`log`](https://docs.rs/log/latest/log/) crate facade.
//! A custom [`LogBackend`] can be installed with [`LoggingBuilder::custom`], and logging can be
//! disabled altogether.
//!
//! # Examples
//!
//! ```
//! # use std::time::Duration;
//! # use ld_server_core::{Client, ConfigBuilder, ContextBuilder};
//! # fn main() -> ld_server_core::Result<()> {
//! let config = ConfigBuilder::new("sdk-key").offline(true).build()?;
//! let client = Client::new(config);
//! client.start(Duration::from_secs(5));
//!
//! let mut context = ContextBuilder::new();
//! context.add_kind("user", "user-key-123")?;
//! context.set_name("user", "Sandy")?;
//! let context = context.build();
//!
//! let show_feature = client.bool_variation(&context, "new-checkout", false);
//! # assert!(!show_feature);
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

#[macro_use]
mod logging;

mod client;
mod config;
mod context;
mod data;
mod error;
mod eval;
mod events;
mod http;
mod value;

pub use client::{Client, ClientBuilder, ClientState};
pub use config::{
    AppInfo, BackgroundSyncBuilder, BackgroundSyncConfig, BasicLoggingBuilder, ConfigBuilder,
    Configuration, DataSystemConfig, EventsConfig, EvictionPolicy, HttpConfig, LazyLoadBuilder,
    LazyLoadConfig, LoggingBuilder, LoggingConfig, PollingBuilder, RedisSource,
    RedisSourceBuilder, ServiceEndpoints, ServiceEndpointsBuilder, StoreSource, StreamingBuilder,
    WrapperInfo,
};
pub use context::{
    AttributeReference, AttributeReferenceError, Context, ContextBuilder, KindEntry, DEFAULT_KIND,
};
pub use data::{
    DataSystem, DataSystemFactory, DefaultDataSystemFactory, Flag, FlagData, LazyLoadDataSystem,
    PersistentStore, PollingDataSystem, SnapshotStore, StaticDataSystem, StreamingDataSystem,
    Target, TryParse, VariationOrRollout,
};
pub use error::{Error, Result};
pub use eval::{BasicEvaluator, ErrorKind, EvaluationDetail, Evaluator, Reason, ReasonKind};
pub use events::{
    DefaultEventProcessor, EventProcessor, EventSender, FeatureRequestEvent, HttpEventSender,
    InputEvent, NullEventProcessor,
};
pub use logging::{FnLogBackend, LogBackend, LogLevel, Logger, UnknownLogLevel};
pub use value::{ArrayBuilder, Object, ObjectBuilder, Value, ValueKind};
