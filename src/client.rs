use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    data::{DataSystem, DataSystemFactory, DefaultDataSystemFactory, Flag, FlagData},
    eval::{BasicEvaluator, ErrorKind, EvaluationDetail, Evaluator, Reason},
    events::{self, now_millis, EventProcessor, FeatureRequestEvent, InputEvent},
    value::Object,
    Configuration, Context, Value,
};

/// Lifecycle state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Constructed, [`Client::start`] not called yet.
    Created,
    /// Waiting for the data system.
    Starting,
    /// Flag data is available.
    Initialized,
    /// The start timeout elapsed first. The data system keeps trying in the background and the
    /// client becomes initialized once it succeeds.
    InitializationTimedOut,
    /// [`Client::close`] was called.
    Closed,
}

/// Assembles a [`Client`] with optional replacements for its collaborators.
///
/// ```
/// # use ld_server_core::{ClientBuilder, ConfigBuilder};
/// # fn main() -> ld_server_core::Result<()> {
/// let config = ConfigBuilder::new("sdk-key").offline(true).build()?;
/// let client = ClientBuilder::new(config).build();
/// assert!(client.start(std::time::Duration::ZERO));
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: Configuration,
    evaluator: Option<Arc<dyn Evaluator>>,
    data_system_factory: Option<Arc<dyn DataSystemFactory>>,
    event_processor: Option<Arc<dyn EventProcessor>>,
}

impl ClientBuilder {
    #[allow(missing_docs)]
    pub fn new(config: Configuration) -> ClientBuilder {
        ClientBuilder {
            config,
            evaluator: None,
            data_system_factory: None,
            event_processor: None,
        }
    }

    /// Replace the built-in [`BasicEvaluator`].
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> ClientBuilder {
        self.evaluator = Some(evaluator);
        self
    }

    /// Replace the built-in data systems, e.g. to connect a Redis store.
    pub fn data_system_factory(mut self, factory: Arc<dyn DataSystemFactory>) -> ClientBuilder {
        self.data_system_factory = Some(factory);
        self
    }

    /// Replace the event processor selected from the configuration.
    pub fn event_processor(mut self, processor: Arc<dyn EventProcessor>) -> ClientBuilder {
        self.event_processor = Some(processor);
        self
    }

    /// Create the client. Nothing is fetched until [`Client::start`] is called.
    pub fn build(self) -> Client {
        let config = self.config;
        let data_system = self
            .data_system_factory
            .unwrap_or_else(|| Arc::new(DefaultDataSystemFactory))
            .create(&config);
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(BasicEvaluator::new(config.logger().clone())));
        let events = self
            .event_processor
            .unwrap_or_else(|| events::processor_for(&config));

        Client {
            config,
            data_system,
            evaluator,
            events,
            state: Mutex::new(ClientState::Created),
            not_ready_warned: AtomicBool::new(false),
        }
    }
}

/// A feature flag client.
///
/// All methods take `&self` and can be called concurrently. Evaluation never fails: every problem
/// is reported through the fallback value and the [`ErrorKind`] of the evaluation detail.
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use ld_server_core::{Client, ConfigBuilder, ContextBuilder};
/// # fn main() -> ld_server_core::Result<()> {
/// let client = Client::new(ConfigBuilder::new("sdk-key").offline(true).build()?);
/// client.start(Duration::ZERO);
///
/// let mut context = ContextBuilder::new();
/// context.add_kind("user", "alice-123")?;
/// let context = context.build();
///
/// assert!(!client.bool_variation(&context, "my-flag", false));
/// assert!(client.all_flags(&context).is_empty());
/// client.close();
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Configuration,
    data_system: Box<dyn DataSystem>,
    evaluator: Arc<dyn Evaluator>,
    events: Arc<dyn EventProcessor>,
    state: Mutex<ClientState>,
    /// Set once a not-ready evaluation was logged at warn level. Cleared on close.
    not_ready_warned: AtomicBool,
}

impl Client {
    /// Create a client with the built-in collaborators.
    pub fn new(config: Configuration) -> Client {
        ClientBuilder::new(config).build()
    }

    /// Start the data system and block up to `timeout` for flag data.
    ///
    /// Returns whether the client is initialized. A zero timeout returns immediately and
    /// initialization continues in the background. Calling `start` again only waits; calling it
    /// after [`Client::close`] returns `false`.
    pub fn start(&self, timeout: Duration) -> bool {
        {
            let mut state = self.lock_state();
            match *state {
                ClientState::Closed => return false,
                ClientState::Created => *state = ClientState::Starting,
                _ => {}
            }
        }
        ld_info!(self.config.logger(), "starting client");

        let initialized = self.data_system.start(timeout);

        let mut state = self.lock_state();
        if *state == ClientState::Closed {
            // `close` may have stopped the data system before it spawned its thread.
            drop(state);
            self.data_system.stop();
            return false;
        }
        if initialized {
            *state = ClientState::Initialized;
        } else if *state == ClientState::Starting {
            ld_warn!(
                self.config.logger(),
                "client did not initialize within {timeout:?}; serving fallback values until it does"
            );
            *state = ClientState::InitializationTimedOut;
        }
        *state == ClientState::Initialized
    }

    /// Current lifecycle state.
    ///
    /// The data system is queried without holding the state lock, so a slow store never blocks
    /// [`Client::close`].
    pub fn state(&self) -> ClientState {
        let waiting = |state: ClientState| {
            matches!(state, ClientState::Starting | ClientState::InitializationTimedOut)
        };

        let state = *self.lock_state();
        if !waiting(state) || !self.data_system.initialized() {
            return state;
        }

        let mut state = self.lock_state();
        if waiting(*state) {
            *state = ClientState::Initialized;
        }
        *state
    }

    #[allow(missing_docs)]
    pub fn is_initialized(&self) -> bool {
        self.state() == ClientState::Initialized
    }

    #[allow(missing_docs)]
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state
            .lock()
            .expect("thread holding client state lock should not panic")
    }

    /// Stop the data system and deliver pending events. Blocks until delivery finished.
    ///
    /// Afterwards evaluations return the fallback with [`ErrorKind::ClientNotReady`] and events
    /// are dropped. Closing twice is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.lock_state();
            if *state == ClientState::Closed {
                return;
            }
            *state = ClientState::Closed;
        }
        self.not_ready_warned.store(false, Ordering::Relaxed);
        ld_info!(self.config.logger(), "closing client");
        self.data_system.stop();
        self.events.close();
    }

    #[allow(missing_docs)]
    pub fn bool_variation(&self, context: &Context, flag_key: &str, fallback: bool) -> bool {
        self.typed_variation(context, flag_key, fallback, Value::as_bool, false)
            .value
    }

    #[allow(missing_docs)]
    pub fn bool_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: bool,
    ) -> EvaluationDetail<bool> {
        self.typed_variation(context, flag_key, fallback, Value::as_bool, true)
    }

    /// Numbers are truncated towards zero.
    pub fn int_variation(&self, context: &Context, flag_key: &str, fallback: i64) -> i64 {
        self.typed_variation(context, flag_key, fallback, Value::as_i64, false)
            .value
    }

    #[allow(missing_docs)]
    pub fn int_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: i64,
    ) -> EvaluationDetail<i64> {
        self.typed_variation(context, flag_key, fallback, Value::as_i64, true)
    }

    #[allow(missing_docs)]
    pub fn double_variation(&self, context: &Context, flag_key: &str, fallback: f64) -> f64 {
        self.typed_variation(context, flag_key, fallback, Value::as_f64, false)
            .value
    }

    #[allow(missing_docs)]
    pub fn double_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: f64,
    ) -> EvaluationDetail<f64> {
        self.typed_variation(context, flag_key, fallback, Value::as_f64, true)
    }

    #[allow(missing_docs)]
    pub fn string_variation(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: impl Into<String>,
    ) -> String {
        self.typed_variation(context, flag_key, fallback.into(), as_string, false)
            .value
    }

    #[allow(missing_docs)]
    pub fn string_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: impl Into<String>,
    ) -> EvaluationDetail<String> {
        self.typed_variation(context, flag_key, fallback.into(), as_string, true)
    }

    /// Any value type is accepted.
    pub fn json_variation(&self, context: &Context, flag_key: &str, fallback: Value) -> Value {
        self.json_variation_detail_inner(context, flag_key, fallback, false)
            .value
    }

    #[allow(missing_docs)]
    pub fn json_variation_detail(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: Value,
    ) -> EvaluationDetail<Value> {
        self.json_variation_detail_inner(context, flag_key, fallback, true)
    }

    fn json_variation_detail_inner(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: Value,
        with_reasons: bool,
    ) -> EvaluationDetail<Value> {
        self.evaluate(context, flag_key, &fallback, &|_| true, with_reasons)
            .map(|value| value.unwrap_or(fallback))
    }

    fn typed_variation<T: Clone + Into<Value>>(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: T,
        convert: impl Fn(&Value) -> Option<T>,
        with_reasons: bool,
    ) -> EvaluationDetail<T> {
        let detail = self.evaluate(
            context,
            flag_key,
            &fallback.clone().into(),
            &|value| convert(value).is_some(),
            with_reasons,
        );
        // The fallback is handed back as given; a round trip through `Value` may lose precision.
        detail.map(|value| value.as_ref().and_then(&convert).unwrap_or(fallback))
    }

    /// Evaluate and report the evaluation to the event processor.
    ///
    /// The value is `None` when the fallback was served.
    fn evaluate(
        &self,
        context: &Context,
        flag_key: &str,
        fallback: &Value,
        accepts: &dyn Fn(&Value) -> bool,
        with_reasons: bool,
    ) -> EvaluationDetail<Option<Value>> {
        let snapshot = self.ready_snapshot();
        let detail = match &snapshot {
            None => {
                self.log_not_ready(flag_key);
                EvaluationDetail::error(ErrorKind::ClientNotReady, None)
            }
            Some(data) => self.evaluate_flag(data, context, flag_key, fallback, accepts),
        };

        if context.valid() && self.state() != ClientState::Closed {
            let flag = snapshot
                .as_deref()
                .and_then(|data| Option::<&Flag>::from(data.flag(flag_key)?));
            self.events.send(InputEvent::FeatureRequest(feature_event(
                context,
                flag_key,
                flag,
                &detail,
                fallback.clone(),
                with_reasons,
            )));
        }
        detail
    }

    fn log_not_ready(&self, flag_key: &str) {
        let logger = self.config.logger();
        if self.not_ready_warned.swap(true, Ordering::Relaxed) {
            ld_debug!(logger, "flag {flag_key} evaluated before the client is ready");
        } else {
            ld_warn!(
                logger,
                "flag {flag_key} evaluated before the client is ready; returning fallback values \
                 until it is"
            );
        }
    }

    fn evaluate_flag(
        &self,
        data: &FlagData,
        context: &Context,
        flag_key: &str,
        fallback: &Value,
        accepts: &dyn Fn(&Value) -> bool,
    ) -> EvaluationDetail<Option<Value>> {
        if let Some(errors) = context.errors() {
            ld_warn!(
                self.config.logger(),
                "flag {flag_key} evaluated with an invalid context: {errors}"
            );
            return EvaluationDetail::error(ErrorKind::UserNotSpecified, None);
        }

        let evaluated = catch_unwind(AssertUnwindSafe(|| {
            self.evaluator.evaluate(data, context, flag_key, fallback)
        }));
        let detail = match evaluated {
            Ok(detail) => detail,
            Err(_) => {
                ld_error!(self.config.logger(), "evaluator panicked while evaluating {flag_key}");
                return EvaluationDetail::error(ErrorKind::Exception, None);
            }
        };

        if detail.error_kind().is_some() || detail.value.is_null() {
            return detail.map(|_| None);
        }
        if !accepts(&detail.value) {
            ld_warn!(
                self.config.logger(),
                "flag {flag_key} served a {} value, which does not match the requested type",
                detail.value.kind()
            );
            return EvaluationDetail::error(ErrorKind::WrongType, None);
        }
        detail.map(Some)
    }

    fn ready_snapshot(&self) -> Option<Arc<FlagData>> {
        if !self.is_initialized() {
            return None;
        }
        self.data_system.snapshot()
    }

    /// Values of every flag for `context`, keyed by flag key in sorted order.
    ///
    /// Flags that cannot be evaluated map to [`Value::Null`]. Returns an empty object if the
    /// client is not initialized or the context is invalid. No events are produced.
    pub fn all_flags(&self, context: &Context) -> Object {
        let Some(data) = self.ready_snapshot() else {
            return Object::new();
        };
        if !context.valid() {
            ld_warn!(self.config.logger(), "all_flags called with an invalid context");
            return Object::new();
        }

        let mut keys: Vec<_> = data.flag_keys().collect();
        keys.sort_unstable();
        keys.into_iter()
            .map(|key| {
                let detail = self.evaluate_flag(&data, context, key, &Value::Null, &|_| true);
                (key.to_owned(), detail.value.unwrap_or(Value::Null))
            })
            .collect()
    }

    /// Report a custom event.
    pub fn track(
        &self,
        context: &Context,
        event_key: &str,
        data: Option<Value>,
        metric_value: Option<f64>,
    ) {
        if !self.accepts_event(context, "track") {
            return;
        }
        self.events.send(InputEvent::Custom {
            creation_date: now_millis(),
            context: context.clone(),
            key: event_key.to_owned(),
            data,
            metric_value,
        });
    }

    /// Report a context to the service.
    pub fn identify(&self, context: &Context) {
        if !self.accepts_event(context, "identify") {
            return;
        }
        self.events.send(InputEvent::Identify {
            creation_date: now_millis(),
            context: context.clone(),
        });
    }

    /// Ask for pending events to be delivered. Does not wait for delivery.
    pub fn flush(&self) {
        if self.state() != ClientState::Closed {
            self.events.flush();
        }
    }

    fn accepts_event(&self, context: &Context, operation: &str) -> bool {
        if self.state() == ClientState::Closed {
            return false;
        }
        if let Some(errors) = context.errors() {
            ld_warn!(self.config.logger(), "{operation} called with an invalid context: {errors}");
            return false;
        }
        true
    }
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn feature_event(
    context: &Context,
    flag_key: &str,
    flag: Option<&Flag>,
    detail: &EvaluationDetail<Option<Value>>,
    default: Value,
    with_reasons: bool,
) -> FeatureRequestEvent {
    let track_reason = detail.in_experiment()
        || flag.is_some_and(|flag| {
            flag.track_events_fallthrough && matches!(detail.reason, Reason::Fallthrough { .. })
        });
    FeatureRequestEvent {
        creation_date: now_millis(),
        context: context.clone(),
        key: flag_key.to_owned(),
        version: flag.map(|flag| flag.version),
        variation: detail.variation_index,
        value: detail.value.clone().unwrap_or_else(|| default.clone()),
        default,
        reason: (with_reasons || detail.in_experiment()).then(|| detail.reason.clone()),
        track_events: track_reason || flag.is_some_and(|flag| flag.track_events),
    }
}
