//! Streaming data system: receives the data set and incremental updates as server-sent events.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;

use super::{
    thread::{backoff, Readiness, StopSignal, SyncThread},
    DataSystem, Flag, FlagData, SnapshotStore, TryParse,
};
use crate::{
    config::{self, StreamingBuilder},
    http,
    logging::Logger,
    Configuration, Error, Result,
};

const STREAM_ENDPOINT: &str = "/all";
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// How long a quiet stream may hold the thread before it checks for a stop command.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Deserialize)]
struct PutEvent {
    data: FlagData,
}

#[derive(Deserialize)]
struct PatchEvent {
    path: String,
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct DeleteEvent {
    path: String,
    version: u64,
}

enum ItemPath<'a> {
    Flag(&'a str),
    Segment(&'a str),
}

fn item_path(path: &str) -> Option<ItemPath<'_>> {
    if let Some(key) = path.strip_prefix("/flags/") {
        Some(ItemPath::Flag(key))
    } else {
        path.strip_prefix("/segments/").map(ItemPath::Segment)
    }
}

/// What applying an event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    /// A full data set replaced the store.
    Replaced,
    /// An incremental update was applied or ignored.
    Updated,
}

/// Apply one event to `store`.
///
/// # Errors
///
/// [`Error::InvalidPayload`] if the event data cannot be interpreted. The stream should be
/// restarted to get a consistent data set.
pub(crate) fn apply_event(
    store: &SnapshotStore,
    event: &Event,
    logger: &Logger,
) -> Result<Applied> {
    let invalid = |err: serde_json::Error| {
        Error::InvalidPayload(format!("malformed {} event: {err}", event.event))
    };

    match event.event.as_str() {
        "put" => {
            let put: PutEvent = serde_json::from_str(&event.data).map_err(invalid)?;
            ld_debug!(logger, "received {} flags", put.data.flags.len());
            store.set(Arc::new(put.data));
            Ok(Applied::Replaced)
        }
        "patch" => {
            let patch: PatchEvent = serde_json::from_str(&event.data).map_err(invalid)?;
            match item_path(&patch.path) {
                Some(ItemPath::Flag(key)) => {
                    let flag: TryParse<Flag> =
                        serde_json::from_value(patch.data).map_err(invalid)?;
                    store.update(|data| data.upsert_flag(key, flag));
                }
                Some(ItemPath::Segment(key)) => {
                    store.update(|data| data.upsert_segment(key, patch.data));
                }
                None => ld_debug!(logger, "ignoring patch for unknown path {}", patch.path),
            }
            Ok(Applied::Updated)
        }
        "delete" => {
            let delete: DeleteEvent = serde_json::from_str(&event.data).map_err(invalid)?;
            match item_path(&delete.path) {
                Some(ItemPath::Flag(key)) => {
                    store.update(|data| data.delete_flag(key, delete.version));
                }
                Some(ItemPath::Segment(key)) => {
                    let tombstone =
                        serde_json::json!({"key": key, "version": delete.version, "deleted": true});
                    store.update(|data| data.upsert_segment(key, tombstone));
                }
                None => ld_debug!(logger, "ignoring delete for unknown path {}", delete.path),
            }
            Ok(Applied::Updated)
        }
        other => {
            ld_debug!(logger, "ignoring unknown stream event {other}");
            Ok(Applied::Updated)
        }
    }
}

fn stream_error(err: EventStreamError<reqwest::Error>) -> Error {
    match err {
        EventStreamError::Transport(err) => err.into(),
        err => Error::InvalidPayload(format!("malformed event stream: {err}")),
    }
}

struct StreamConnection {
    client: reqwest::Client,
    url: String,
    initial_reconnect_delay: Duration,
    logger: Logger,
}

impl StreamConnection {
    fn run(&self, store: &SnapshotStore, readiness: &Readiness, signal: &StopSignal) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                ld_error!(self.logger, "cannot start stream runtime: {err}");
                readiness.set(Err(err.into()));
                return;
            }
        };

        let mut attempt = 0;
        loop {
            let result = runtime.block_on(self.read_stream(store, readiness, signal, &mut attempt));
            match result {
                Ok(()) if signal.is_stopped() => return,
                Ok(()) => ld_info!(self.logger, "stream closed by the service; reconnecting"),
                Err(Error::Unauthorized) => {
                    ld_error!(self.logger, "client is not authorized. Check your SDK key");
                    readiness.set(Err(Error::Unauthorized));
                    // Unauthorized is not recoverable. Stop the stream thread.
                    return;
                }
                Err(err) => ld_warn!(self.logger, "stream error: {err}; reconnecting"),
            }

            let delay = backoff(self.initial_reconnect_delay, MAX_RECONNECT_DELAY, attempt);
            attempt = attempt.saturating_add(1);
            if signal.wait(delay) {
                ld_debug!(self.logger, "stream thread received stop command");
                return;
            }
        }
    }

    /// Read one connection until it ends. Resets `attempt` once a full data set arrives.
    async fn read_stream(
        &self,
        store: &SnapshotStore,
        readiness: &Readiness,
        signal: &StopSignal,
        attempt: &mut u32,
    ) -> Result<()> {
        ld_debug!(self.logger, "connecting to stream at {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        if http::is_unauthorized(response.status()) {
            return Err(Error::Unauthorized);
        }
        let mut events = response.error_for_status()?.bytes_stream().eventsource();

        loop {
            if signal.is_stopped() {
                return Ok(());
            }
            let event = match tokio::time::timeout(STOP_CHECK_INTERVAL, events.next()).await {
                Err(_elapsed) => continue,
                Ok(None) => return Ok(()),
                Ok(Some(event)) => event.map_err(stream_error)?,
            };
            ld_trace!(self.logger, "received {} event", event.event);
            if apply_event(store, &event, &self.logger)? == Applied::Replaced {
                readiness.set(Ok(()));
                *attempt = 0;
            }
        }
    }
}

/// Keeps flag data in memory, updated over a long-lived streaming connection.
///
/// Lost connections are re-established with exponential backoff starting at the configured
/// initial reconnect delay.
pub struct StreamingDataSystem {
    store: Arc<SnapshotStore>,
    readiness: Arc<Readiness>,
    logger: Logger,
    /// Taken by the first call to `start`.
    connection: Mutex<Option<StreamConnection>>,
    thread: Mutex<Option<SyncThread>>,
}

impl StreamingDataSystem {
    /// # Errors
    ///
    /// [`Error::ConfigurationInvalid`] if the SDK key or application tags cannot be sent as
    /// headers, [`Error::Network`] if the HTTP client cannot be created.
    pub fn new(
        config: &Configuration,
        initial_reconnect_delay: Duration,
    ) -> Result<StreamingDataSystem> {
        let initial_reconnect_delay = config::at_least(
            config.logger(),
            "initial reconnect delay",
            initial_reconnect_delay,
            StreamingBuilder::MIN_INITIAL_RECONNECT_DELAY,
        );
        let connection = StreamConnection {
            client: http::streaming_client(config)?,
            url: format!(
                "{}{STREAM_ENDPOINT}",
                config.service_endpoints().streaming_base_url()
            ),
            initial_reconnect_delay,
            logger: config.logger().clone(),
        };

        Ok(StreamingDataSystem {
            store: Arc::new(SnapshotStore::new()),
            readiness: Arc::new(Readiness::new()),
            logger: config.logger().clone(),
            connection: Mutex::new(Some(connection)),
            thread: Mutex::new(None),
        })
    }

    fn spawn(&self, connection: StreamConnection) {
        let store = self.store.clone();
        let readiness = self.readiness.clone();

        let thread = SyncThread::spawn(
            "ld-stream",
            self.logger.clone(),
            self.readiness.clone(),
            move |signal| connection.run(&store, &readiness, signal),
        );

        match thread {
            Ok(thread) => {
                *self.thread.lock().expect("thread holding stream lock should not panic") =
                    Some(thread);
            }
            Err(err) => {
                ld_error!(self.logger, "cannot spawn stream thread: {err}");
                self.readiness.set(Err(err.into()));
            }
        }
    }
}

impl DataSystem for StreamingDataSystem {
    fn start(&self, timeout: Duration) -> bool {
        let connection = self
            .connection
            .lock()
            .expect("thread holding stream lock should not panic")
            .take();
        if let Some(connection) = connection {
            self.spawn(connection);
        }
        matches!(self.readiness.wait(timeout), Some(Ok(())))
    }

    fn initialized(&self) -> bool {
        self.readiness.is_ready()
    }

    fn snapshot(&self) -> Option<Arc<FlagData>> {
        self.store.get()
    }

    /// Signals the stream thread. A thread reading the stream notices within a fraction of a
    /// second.
    fn stop(&self) {
        self.connection
            .lock()
            .expect("thread holding stream lock should not panic")
            .take();
        if let Some(thread) = &*self
            .thread
            .lock()
            .expect("thread holding stream lock should not panic")
        {
            thread.stop();
        }
    }
}
