//! Polling data system: fetches the full data set at a fixed interval.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use reqwest::{
    header::{ETAG, IF_NONE_MATCH},
    StatusCode,
};

use super::{
    thread::{jitter, Readiness, SyncThread},
    DataSystem, FlagData, SnapshotStore,
};
use crate::{
    config::{self, PollingBuilder},
    http,
    logging::Logger,
    Configuration, Error, Result,
};

const LATEST_ALL_ENDPOINT: &str = "/sdk/latest-all";

/// A client that fetches the full data set from the service.
pub(crate) struct FlagFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    url: String,
    etag: Option<String>,
    /// If we receive a 401 Unauthorized error during a request, it means the SDK key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: bool,
    logger: Logger,
}

impl FlagFetcher {
    pub(crate) fn new(config: &Configuration) -> Result<FlagFetcher> {
        Ok(FlagFetcher {
            client: http::client(config, config.http().read_timeout)?,
            url: format!(
                "{}{LATEST_ALL_ENDPOINT}",
                config.service_endpoints().polling_base_url()
            ),
            etag: None,
            unauthorized: false,
            logger: config.logger().clone(),
        })
    }

    /// Fetch the data set. Returns `None` if it has not changed since the previous fetch.
    pub(crate) fn fetch(&mut self) -> Result<Option<FlagData>> {
        if self.unauthorized {
            return Err(Error::Unauthorized);
        }

        ld_debug!(self.logger, "fetching flag data from {}", self.url);
        let mut request = self.client.get(&self.url);
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        let response = request.send()?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            ld_debug!(self.logger, "flag data not modified");
            return Ok(None);
        }
        if http::is_unauthorized(status) {
            ld_error!(self.logger, "client is not authorized. Check your SDK key");
            self.unauthorized = true;
            return Err(Error::Unauthorized);
        }
        let response = response.error_for_status()?;

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes()?;
        let data =
            FlagData::from_json(&body).map_err(|err| Error::InvalidPayload(err.to_string()))?;
        self.etag = etag;

        ld_debug!(self.logger, "successfully fetched {} flags", data.flags.len());
        Ok(Some(data))
    }
}

/// Keeps flag data in memory, refreshed by a background thread at a fixed interval.
pub struct PollingDataSystem {
    store: Arc<SnapshotStore>,
    readiness: Arc<Readiness>,
    interval: Duration,
    logger: Logger,
    /// Taken by the first call to `start`.
    fetcher: Mutex<Option<FlagFetcher>>,
    thread: Mutex<Option<SyncThread>>,
}

impl PollingDataSystem {
    /// # Errors
    ///
    /// [`Error::ConfigurationInvalid`] if the SDK key or application tags cannot be sent as
    /// headers, [`Error::Network`] if the HTTP client cannot be created.
    pub fn new(config: &Configuration, interval: Duration) -> Result<PollingDataSystem> {
        let logger = config.logger().clone();
        let interval = config::at_least(
            &logger,
            "polling interval",
            interval,
            PollingBuilder::MIN_INTERVAL,
        );

        Ok(PollingDataSystem {
            store: Arc::new(SnapshotStore::new()),
            readiness: Arc::new(Readiness::new()),
            interval,
            logger,
            fetcher: Mutex::new(Some(FlagFetcher::new(config)?)),
            thread: Mutex::new(None),
        })
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> PollingDataSystem {
        self.interval = interval;
        self
    }

    fn spawn(&self, mut fetcher: FlagFetcher) {
        let store = self.store.clone();
        let readiness = self.readiness.clone();
        let interval = self.interval;
        let logger = self.logger.clone();

        let thread = SyncThread::spawn(
            "ld-poller",
            self.logger.clone(),
            self.readiness.clone(),
            move |signal| loop {
                match fetcher.fetch() {
                    Ok(Some(data)) => {
                        store.set(Arc::new(data));
                        readiness.set(Ok(()));
                    }
                    Ok(None) => {}
                    Err(Error::Unauthorized) => {
                        readiness.set(Err(Error::Unauthorized));
                        // Unauthorized is not recoverable. Stop the poller thread.
                        return;
                    }
                    Err(err) => {
                        // Ignore other errors, we'll try another request later.
                        ld_warn!(logger, "error while fetching flag data: {err}");
                    }
                }

                if signal.wait(jitter(interval, interval / 10)) {
                    ld_debug!(logger, "poller thread received stop command");
                    return;
                }
            },
        );

        match thread {
            Ok(thread) => {
                *self.thread.lock().expect("thread holding poller lock should not panic") =
                    Some(thread);
            }
            Err(err) => {
                ld_error!(self.logger, "cannot spawn poller thread: {err}");
                self.readiness.set(Err(err.into()));
            }
        }
    }
}

impl DataSystem for PollingDataSystem {
    fn start(&self, timeout: Duration) -> bool {
        let fetcher = self
            .fetcher
            .lock()
            .expect("thread holding poller lock should not panic")
            .take();
        if let Some(fetcher) = fetcher {
            self.spawn(fetcher);
        }
        matches!(self.readiness.wait(timeout), Some(Ok(())))
    }

    fn initialized(&self) -> bool {
        self.readiness.is_ready()
    }

    fn snapshot(&self) -> Option<Arc<FlagData>> {
        self.store.get()
    }

    fn stop(&self) {
        // A data system stopped before it was started never starts.
        self.fetcher
            .lock()
            .expect("thread holding poller lock should not panic")
            .take();
        if let Some(thread) = &*self
            .thread
            .lock()
            .expect("thread holding poller lock should not panic")
        {
            thread.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockito::Matcher;

    use super::*;
    use crate::{
        logging::{tests::RecordingBackend, LogLevel},
        ConfigBuilder, LoggingBuilder, ServiceEndpointsBuilder,
    };

    const DATA: &str = r#"{"flags": {"f": {"key": "f", "version": 1, "on": true,
        "variations": [true], "fallthrough": {"variation": 0}}}, "segments": {}}"#;

    fn config(base_url: &str) -> Configuration {
        ConfigBuilder::new("sdk-key")
            .service_endpoints(ServiceEndpointsBuilder::new().relay_proxy(base_url).clone())
            .build()
            .unwrap()
    }

    #[test]
    fn fetches_and_sends_headers() {
        let mut server = mockito::Server::new();
        let first = server
            .mock("GET", "/sdk/latest-all")
            .match_header("authorization", "sdk-key")
            .match_header("user-agent", Matcher::Regex("^ld-server-core/".to_owned()))
            .match_header("if-none-match", Matcher::Missing)
            .with_header("etag", "\"v1\"")
            .with_body(DATA)
            .expect(1)
            .create();
        let not_modified = server
            .mock("GET", "/sdk/latest-all")
            .match_header("if-none-match", "\"v1\"")
            .with_status(304)
            .expect(1)
            .create();
        let mut fetcher = FlagFetcher::new(&config(&server.url())).unwrap();

        let data = fetcher.fetch().unwrap().unwrap();
        assert!(data.flag("f").is_some());
        assert!(fetcher.fetch().unwrap().is_none());

        first.assert();
        not_modified.assert();
    }

    #[test]
    fn unauthorized_is_cached() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/sdk/latest-all")
            .with_status(401)
            .expect(1)
            .create();
        let mut fetcher = FlagFetcher::new(&config(&server.url())).unwrap();

        assert!(matches!(fetcher.fetch(), Err(Error::Unauthorized)));
        assert!(matches!(fetcher.fetch(), Err(Error::Unauthorized)));
        mock.assert();
    }

    #[test]
    fn malformed_body_is_reported() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/sdk/latest-all")
            .with_body("[1, 2")
            .create();
        let mut fetcher = FlagFetcher::new(&config(&server.url())).unwrap();
        assert!(matches!(fetcher.fetch(), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn data_system_initializes_from_first_poll() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/sdk/latest-all")
            .with_body(DATA)
            .create();
        let data_system = PollingDataSystem::new(&config(&server.url()), Duration::from_secs(60))
            .unwrap()
            .with_interval(Duration::from_millis(20));

        assert!(!data_system.initialized());
        assert!(data_system.start(Duration::from_secs(5)));
        assert!(data_system.initialized());
        assert!(data_system.snapshot().unwrap().flag("f").is_some());
        data_system.stop();
    }

    #[test]
    fn unauthorized_data_system_gives_up() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/sdk/latest-all")
            .with_status(403)
            .create();
        let data_system =
            PollingDataSystem::new(&config(&server.url()), Duration::from_secs(60)).unwrap();

        assert!(!data_system.start(Duration::from_secs(5)));
        assert!(!data_system.initialized());
        assert!(data_system.snapshot().is_none());
    }

    #[test]
    fn short_intervals_are_raised() {
        let backend = Arc::new(RecordingBackend::default());
        let config = ConfigBuilder::new("sdk-key")
            .logging(LoggingBuilder::Custom(backend.clone()))
            .build()
            .unwrap();

        let data_system = PollingDataSystem::new(&config, Duration::from_secs(1)).unwrap();

        assert_eq!(data_system.interval, PollingBuilder::MIN_INTERVAL);
        assert!(backend
            .lines()
            .iter()
            .any(|(level, line)| *level == LogLevel::Warn && line.contains("polling interval")));
    }

    #[test]
    fn stopped_before_start_never_fetches() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/sdk/latest-all")
            .with_body(DATA)
            .expect(0)
            .create();
        let data_system =
            PollingDataSystem::new(&config(&server.url()), Duration::from_secs(60)).unwrap();

        data_system.stop();
        assert!(!data_system.start(Duration::from_millis(50)));
        mock.assert();
    }
}
