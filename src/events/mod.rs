//! Analytics events.
//!
//! The client reports evaluations, identifications and custom events to an [`EventProcessor`].
//! The default processor summarizes evaluations, redacts private attributes and delivers batches
//! through an [`EventSender`] from a background thread.
mod context_keys;
mod processor;
mod redaction;
mod sender;
mod summary;

use std::sync::Arc;

use crate::{eval::Reason, Configuration, Context, Value};

pub use processor::DefaultEventProcessor;
pub use sender::{EventSender, HttpEventSender};

/// One flag evaluation.
#[derive(Debug, Clone)]
pub struct FeatureRequestEvent {
    /// Unix timestamp in milliseconds.
    pub creation_date: i64,
    #[allow(missing_docs)]
    pub context: Context,
    /// Flag key.
    pub key: String,
    /// Flag version. `None` if the flag was not found.
    pub version: Option<u64>,
    /// Index of the served variation. `None` if the fallback was served.
    pub variation: Option<usize>,
    /// The served value.
    pub value: Value,
    /// The fallback value supplied by the caller.
    pub default: Value,
    /// Reason, included when the caller asked for evaluation details.
    pub reason: Option<Reason>,
    /// Send a full feature event in addition to the summary counters.
    pub track_events: bool,
}

/// An event produced by the client.
#[derive(Debug, Clone)]
pub enum InputEvent {
    #[allow(missing_docs)]
    FeatureRequest(FeatureRequestEvent),
    /// The host application reported a context.
    Identify {
        #[allow(missing_docs)]
        creation_date: i64,
        #[allow(missing_docs)]
        context: Context,
    },
    /// An application-defined event.
    Custom {
        #[allow(missing_docs)]
        creation_date: i64,
        #[allow(missing_docs)]
        context: Context,
        /// Event key.
        key: String,
        /// Optional payload.
        data: Option<Value>,
        /// Optional numeric metric.
        metric_value: Option<f64>,
    },
}

/// Receives the events produced by a client.
///
/// Methods are called from evaluation callers and must not block on delivery.
pub trait EventProcessor: Send + Sync {
    /// Queue an event. Events that cannot be queued are dropped.
    fn send(&self, event: InputEvent);

    /// Ask for queued events to be delivered soon.
    fn flush(&self);

    /// Deliver queued events and stop. Later events are dropped.
    fn close(&self);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventProcessor;

impl EventProcessor for NullEventProcessor {
    fn send(&self, _event: InputEvent) {}

    fn flush(&self) {}

    fn close(&self) {}
}

/// Current time as a Unix timestamp in milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Processor for a configuration: the default processor posting to the events service, or a
/// null processor if the client is offline or events are disabled.
pub(crate) fn processor_for(config: &Configuration) -> Arc<dyn EventProcessor> {
    if !config.send_events() {
        return Arc::new(NullEventProcessor);
    }
    let processor = HttpEventSender::new(config)
        .and_then(|sender| DefaultEventProcessor::new(config, Box::new(sender)));
    match processor {
        Ok(processor) => Arc::new(processor),
        Err(err) => {
            ld_error!(config.logger(), "cannot start event processor: {err}; events are disabled");
            Arc::new(NullEventProcessor)
        }
    }
}
