//! The default event processor: a worker thread fed by a bounded channel.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError},
        Mutex,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::Value as Json;

use super::{
    context_keys::ContextKeys,
    redaction::Redactor,
    sender::EventSender,
    summary::{Summarizer, Summary},
    FeatureRequestEvent, InputEvent,
};
use crate::{
    config::{self, EventsConfig},
    eval::Reason,
    logging::Logger,
    Configuration, Context, Error, Result, Value,
};

/// Events as sent to the events service.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum OutputEvent {
    Index {
        creation_date: i64,
        context: Json,
    },
    Feature {
        creation_date: i64,
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        variation: Option<usize>,
        value: Value,
        default: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<Reason>,
        context_keys: BTreeMap<String, String>,
    },
    Identify {
        creation_date: i64,
        context: Json,
    },
    Custom {
        creation_date: i64,
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metric_value: Option<f64>,
        context_keys: BTreeMap<String, String>,
    },
    Summary(Summary),
}

fn context_keys(context: &Context) -> BTreeMap<String, String> {
    context
        .kinds()
        .map(|entry| (entry.kind().to_owned(), entry.key().to_owned()))
        .collect()
}

enum Message {
    Event(InputEvent),
    Flush,
    Close,
}

/// State owned by the worker thread.
struct Worker {
    outbox: Vec<OutputEvent>,
    capacity: usize,
    /// Set when the outbox overflowed, so the warning is logged once per flush.
    dropping: bool,
    summarizer: Summarizer,
    context_keys: ContextKeys,
    redactor: Redactor,
    sender: Box<dyn EventSender>,
    /// Set once the service rejected the SDK key. Nothing is sent afterwards.
    disabled: bool,
    logger: Logger,
}

impl Worker {
    fn new(config: &EventsConfig, sender: Box<dyn EventSender>, logger: Logger) -> Worker {
        Worker {
            outbox: Vec::new(),
            capacity: config.capacity,
            dropping: false,
            summarizer: Summarizer::default(),
            context_keys: ContextKeys::new(config.context_keys_capacity),
            redactor: Redactor::new(config),
            sender,
            disabled: false,
            logger,
        }
    }

    fn process(&mut self, event: InputEvent) {
        match event {
            InputEvent::FeatureRequest(event) => {
                self.summarizer.summarize(&event);
                self.index(event.creation_date, &event.context);
                if event.track_events {
                    self.push(feature_event(event));
                }
            }
            InputEvent::Identify {
                creation_date,
                context,
            } => {
                // The identify event carries the context itself.
                self.context_keys.notice(context.canonical_key());
                let context = self.redactor.redact(&context);
                self.push(OutputEvent::Identify {
                    creation_date,
                    context,
                });
            }
            InputEvent::Custom {
                creation_date,
                context,
                key,
                data,
                metric_value,
            } => {
                self.index(creation_date, &context);
                self.push(OutputEvent::Custom {
                    creation_date,
                    key,
                    data,
                    metric_value,
                    context_keys: context_keys(&context),
                });
            }
        }
    }

    /// Queue an index event for contexts not seen recently.
    fn index(&mut self, creation_date: i64, context: &Context) {
        if self.context_keys.notice(context.canonical_key()) {
            return;
        }
        let context = self.redactor.redact(context);
        self.push(OutputEvent::Index {
            creation_date,
            context,
        });
    }

    fn push(&mut self, event: OutputEvent) {
        if self.outbox.len() >= self.capacity {
            if !self.dropping {
                ld_warn!(
                    self.logger,
                    "exceeded event capacity of {}; dropping events until the next flush",
                    self.capacity
                );
                self.dropping = true;
            }
            return;
        }
        self.outbox.push(event);
    }

    fn flush(&mut self) {
        let mut events = std::mem::take(&mut self.outbox);
        self.dropping = false;
        if let Some(summary) = self.summarizer.take() {
            events.push(OutputEvent::Summary(summary));
        }
        if events.is_empty() || self.disabled {
            return;
        }

        let payload = events
            .iter()
            .filter_map(|event| match serde_json::to_value(event) {
                Ok(json) => Some(json),
                Err(err) => {
                    ld_warn!(self.logger, "dropping event that cannot be serialized: {err}");
                    None
                }
            })
            .collect::<Vec<_>>();

        match self.sender.send(&payload) {
            Ok(()) => ld_debug!(self.logger, "delivered {} events", payload.len()),
            Err(Error::Unauthorized) => {
                ld_error!(
                    self.logger,
                    "events service rejected the SDK key; no more events will be sent"
                );
                self.disabled = true;
            }
            Err(err) => ld_warn!(
                self.logger,
                "dropping {} events that could not be delivered: {err}",
                payload.len()
            ),
        }
    }

    fn run(
        mut self,
        receiver: Receiver<Message>,
        flush_interval: Duration,
        context_keys_flush_interval: Duration,
    ) {
        let mut next_flush = Instant::now() + flush_interval;
        let mut next_keys_reset = Instant::now() + context_keys_flush_interval;
        loop {
            let now = Instant::now();
            if now >= next_flush {
                self.flush();
                next_flush = now + flush_interval;
            }
            if now >= next_keys_reset {
                self.context_keys.clear();
                next_keys_reset = now + context_keys_flush_interval;
            }

            let timeout = next_flush.min(next_keys_reset).saturating_duration_since(now);
            match receiver.recv_timeout(timeout) {
                Ok(Message::Event(event)) => self.process(event),
                Ok(Message::Flush) => self.flush(),
                Ok(Message::Close) | Err(RecvTimeoutError::Disconnected) => {
                    self.flush();
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

fn feature_event(event: FeatureRequestEvent) -> OutputEvent {
    OutputEvent::Feature {
        creation_date: event.creation_date,
        context_keys: context_keys(&event.context),
        key: event.key,
        version: event.version,
        variation: event.variation,
        value: event.value,
        default: event.default,
        reason: event.reason,
    }
}

/// Summarizes and delivers events from a background thread.
///
/// [`send`](crate::EventProcessor::send) and [`flush`](crate::EventProcessor::flush) never block.
/// [`close`](crate::EventProcessor::close) blocks until the final delivery finished.
pub struct DefaultEventProcessor {
    sender: SyncSender<Message>,
    closed: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    logger: Logger,
}

impl DefaultEventProcessor {
    /// Start the worker thread.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the thread cannot be spawned.
    pub fn new(config: &Configuration, sender: Box<dyn EventSender>) -> Result<Self> {
        let events = config.events();
        let logger = config.logger().clone();
        let (channel, receiver) = std::sync::mpsc::sync_channel(events.capacity.max(1));

        let worker = Worker::new(events, sender, logger.clone());
        let (flush_interval, keys_interval) = worker_intervals(events, &logger);
        let thread = std::thread::Builder::new()
            .name("ld-events".to_owned())
            .spawn(move || worker.run(receiver, flush_interval, keys_interval))?;

        Ok(DefaultEventProcessor {
            sender: channel,
            closed: AtomicBool::new(false),
            thread: Mutex::new(Some(thread)),
            logger,
        })
    }
}

/// Flush and context key reset intervals, raised to [`EventsConfig::MIN_FLUSH_INTERVAL`].
fn worker_intervals(events: &EventsConfig, logger: &Logger) -> (Duration, Duration) {
    (
        config::at_least(
            logger,
            "flush interval",
            events.flush_interval,
            EventsConfig::MIN_FLUSH_INTERVAL,
        ),
        config::at_least(
            logger,
            "context keys flush interval",
            events.context_keys_flush_interval,
            EventsConfig::MIN_FLUSH_INTERVAL,
        ),
    )
}

impl super::EventProcessor for DefaultEventProcessor {
    fn send(&self, event: InputEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.sender.try_send(Message::Event(event)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                ld_warn!(self.logger, "event queue is full; dropping event");
            }
        }
    }

    fn flush(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        // A full queue already has a pending wake-up for the worker.
        let _ = self.sender.try_send(Message::Flush);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Error means that the worker has exited already.
        let _ = self.sender.send(Message::Close);

        let thread = self
            .thread
            .lock()
            .expect("thread holding event thread lock should not panic")
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                ld_error!(self.logger, "event thread panicked");
            }
        }
    }
}

impl Drop for DefaultEventProcessor {
    fn drop(&mut self) {
        super::EventProcessor::close(self);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::{
        events::EventProcessor,
        logging::{tests::RecordingBackend, LogLevel},
        ConfigBuilder, ContextBuilder, EventsConfig, LoggingBuilder,
    };

    #[derive(Clone, Default)]
    struct RecordingSender {
        payloads: Arc<Mutex<Vec<Vec<Json>>>>,
        unauthorized: bool,
    }

    impl EventSender for RecordingSender {
        fn send(&self, events: &[Json]) -> Result<()> {
            self.payloads.lock().unwrap().push(events.to_vec());
            if self.unauthorized {
                Err(Error::Unauthorized)
            } else {
                Ok(())
            }
        }
    }

    fn processor(events: EventsConfig, sender: RecordingSender) -> DefaultEventProcessor {
        let config = ConfigBuilder::new("sdk-key")
            .events(events.with_flush_interval(Duration::from_secs(3600)))
            .build()
            .unwrap();
        DefaultEventProcessor::new(&config, Box::new(sender)).unwrap()
    }

    fn user(key: &str) -> Context {
        let mut builder = ContextBuilder::new();
        builder
            .add_kind("user", key)
            .unwrap()
            .set_attribute("user", "email", "u@example.com")
            .unwrap();
        builder.build()
    }

    fn feature(context: Context, track_events: bool) -> InputEvent {
        InputEvent::FeatureRequest(FeatureRequestEvent {
            creation_date: 1000,
            context,
            key: "f".to_owned(),
            version: Some(2),
            variation: Some(1),
            value: Value::from(true),
            default: Value::from(false),
            reason: None,
            track_events,
        })
    }

    #[test]
    fn evaluations_produce_index_feature_and_summary_events() {
        let sender = RecordingSender::default();
        let processor = processor(
            EventsConfig::new().with_private_attribute("email"),
            sender.clone(),
        );

        processor.send(feature(user("alice"), true));
        processor.send(feature(user("alice"), false));
        processor.close();

        let payloads = sender.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            payloads[0],
            [
                json!({
                    "kind": "index",
                    "creationDate": 1000,
                    "context": {"kind": "user", "key": "alice",
                                "_meta": {"redactedAttributes": ["email"]}},
                }),
                json!({
                    "kind": "feature",
                    "creationDate": 1000,
                    "key": "f",
                    "version": 2,
                    "variation": 1,
                    "value": true,
                    "default": false,
                    "contextKeys": {"user": "alice"},
                }),
                json!({
                    "kind": "summary",
                    "startDate": 1000,
                    "endDate": 1000,
                    "features": {"f": {
                        "default": false,
                        "contextKinds": ["user"],
                        "counters": [{"value": true, "variation": 1, "version": 2, "count": 2}],
                    }},
                }),
            ]
        );
    }

    #[test]
    fn identify_and_custom_events() {
        let sender = RecordingSender::default();
        let processor = processor(EventsConfig::new(), sender.clone());

        processor.send(InputEvent::Identify {
            creation_date: 5,
            context: user("bob"),
        });
        processor.send(InputEvent::Custom {
            creation_date: 6,
            context: user("bob"),
            key: "checkout".to_owned(),
            data: Some(Value::from("cart")),
            metric_value: Some(9.5),
        });
        processor.close();

        let payloads = sender.payloads.lock().unwrap();
        let kinds: Vec<_> = payloads[0]
            .iter()
            .map(|event| event["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, ["identify", "custom"]);
        assert_eq!(payloads[0][0]["context"]["email"], "u@example.com");
        assert_eq!(payloads[0][1]["metricValue"], 9.5);
        assert_eq!(payloads[0][1]["data"], "cart");
        assert_eq!(payloads[0][1]["contextKeys"], json!({"user": "bob"}));
    }

    #[test]
    fn outbox_is_bounded() {
        let sender = RecordingSender::default();
        let processor = processor(
            EventsConfig::new().with_capacity(2).with_enabled(true),
            sender.clone(),
        );

        for i in 0..5 {
            processor.send(InputEvent::Identify {
                creation_date: i,
                context: user(&format!("user-{i}")),
            });
        }
        processor.close();

        let payloads = sender.payloads.lock().unwrap();
        assert!(payloads[0].len() <= 2);
    }

    #[test]
    fn unauthorized_disables_delivery() {
        let sender = RecordingSender {
            unauthorized: true,
            ..Default::default()
        };
        let processor = processor(EventsConfig::new(), sender.clone());

        processor.send(feature(user("a"), false));
        processor.flush();
        processor.send(feature(user("b"), false));
        processor.close();

        assert_eq!(sender.payloads.lock().unwrap().len(), 1);
    }

    #[test]
    fn close_is_idempotent_and_drops_later_events() {
        let sender = RecordingSender::default();
        let processor = processor(EventsConfig::new(), sender.clone());

        processor.close();
        processor.close();
        processor.send(feature(user("a"), true));
        processor.flush();

        assert!(sender.payloads.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_intervals_are_raised() {
        let backend = Arc::new(RecordingBackend::default());
        let config = ConfigBuilder::new("sdk-key")
            .logging(LoggingBuilder::Custom(backend.clone()))
            .build()
            .unwrap();
        let mut events = EventsConfig::new().with_flush_interval(Duration::ZERO);
        events.context_keys_flush_interval = Duration::ZERO;

        let intervals = worker_intervals(&events, config.logger());

        assert_eq!(
            intervals,
            (EventsConfig::MIN_FLUSH_INTERVAL, EventsConfig::MIN_FLUSH_INTERVAL)
        );
        let warnings: Vec<_> = backend
            .lines()
            .into_iter()
            .filter(|(level, _)| *level == LogLevel::Warn)
            .map(|(_, line)| line)
            .collect();
        assert!(warnings.iter().any(|line| line.starts_with("flush interval")));
        assert!(warnings.iter().any(|line| line.starts_with("context keys flush interval")));
    }

    #[test]
    fn zero_flush_interval_still_delivers() {
        let sender = RecordingSender::default();
        let config = ConfigBuilder::new("sdk-key")
            .events(EventsConfig::new().with_flush_interval(Duration::ZERO))
            .build()
            .unwrap();
        let processor = DefaultEventProcessor::new(&config, Box::new(sender.clone())).unwrap();

        processor.send(feature(user("a"), true));
        processor.close();

        assert_eq!(sender.payloads.lock().unwrap().len(), 1);
    }
}
