//! Delivery of event payloads.
use std::time::Duration;

use reqwest::StatusCode;

use crate::{http, logging::Logger, Configuration, Error, Result};

const BULK_ENDPOINT: &str = "/bulk";
const SCHEMA_HEADER: &str = "x-launchdarkly-event-schema";
const PAYLOAD_ID_HEADER: &str = "x-launchdarkly-payload-id";
const SCHEMA_VERSION: &str = "4";
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delivers a batch of output events.
pub trait EventSender: Send {
    /// Deliver `events` as one payload.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthorized`] stops all further deliveries. Other errors drop the payload.
    fn send(&self, events: &[serde_json::Value]) -> Result<()>;
}

/// Posts payloads to the events service, retrying a failed delivery once.
pub struct HttpEventSender {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    url: String,
    logger: Logger,
}

impl HttpEventSender {
    /// # Errors
    ///
    /// [`Error::ConfigurationInvalid`] if the SDK key or application tags cannot be sent as
    /// headers, [`Error::Network`] if the HTTP client cannot be created.
    pub fn new(config: &Configuration) -> Result<HttpEventSender> {
        Ok(HttpEventSender {
            client: http::client(config, config.http().read_timeout)?,
            url: format!(
                "{}{BULK_ENDPOINT}",
                config.service_endpoints().events_base_url()
            ),
            logger: config.logger().clone(),
        })
    }

    fn post(&self, events: &[serde_json::Value], payload_id: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(SCHEMA_HEADER, SCHEMA_VERSION)
            .header(PAYLOAD_ID_HEADER, payload_id)
            .json(events)
            .send()?;
        if http::is_unauthorized(response.status()) {
            return Err(Error::Unauthorized);
        }
        response.error_for_status()?;
        Ok(())
    }
}

impl EventSender for HttpEventSender {
    fn send(&self, events: &[serde_json::Value]) -> Result<()> {
        let payload_id = format!("{:032x}", rand::random::<u128>());
        ld_debug!(self.logger, "sending {} events", events.len());

        match self.post(events, &payload_id) {
            Err(Error::Network(err)) if err.status().map_or(true, is_recoverable) => {
                ld_warn!(self.logger, "error sending events: {err}; retrying");
                std::thread::sleep(RETRY_DELAY);
                self.post(events, &payload_id)
            }
            result => result,
        }
    }
}

/// Statuses worth a retry. Other client errors would fail again.
fn is_recoverable(status: StatusCode) -> bool {
    !status.is_client_error()
        || matches!(
            status,
            StatusCode::BAD_REQUEST
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
        )
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mockito::Matcher;

    use super::*;
    use crate::{ConfigBuilder, ServiceEndpointsBuilder};

    fn sender(base_url: &str) -> HttpEventSender {
        let config = ConfigBuilder::new("sdk-key")
            .service_endpoints(ServiceEndpointsBuilder::new().relay_proxy(base_url).clone())
            .build()
            .unwrap();
        HttpEventSender::new(&config).unwrap()
    }

    #[test]
    fn posts_payload_with_schema_header() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/bulk")
            .match_header("x-launchdarkly-event-schema", "4")
            .match_header("authorization", "sdk-key")
            .match_header(
                "x-launchdarkly-payload-id",
                Matcher::Regex("^[0-9a-f]{32}$".to_owned()),
            )
            .match_body(r#"[{"kind":"identify"}]"#)
            .with_status(202)
            .expect(1)
            .create();
        let events = [serde_json::json!({"kind": "identify"})];

        sender(&server.url()).send(&events).unwrap();

        mock.assert();
    }

    #[test]
    fn server_errors_are_retried_once_with_the_same_payload_id() {
        let payload_ids = Arc::new(Mutex::new(Vec::new()));
        let record = |payload_ids: Arc<Mutex<Vec<String>>>| {
            move |request: &mockito::Request| {
                let ids = request.header("x-launchdarkly-payload-id");
                let id = ids.first().and_then(|id| id.to_str().ok()).unwrap_or_default();
                payload_ids.lock().unwrap().push(id.to_owned());
                Vec::new()
            }
        };
        let mut server = mockito::Server::new();
        let unavailable = server
            .mock("POST", "/bulk")
            .with_status(503)
            .with_body_from_request(record(payload_ids.clone()))
            .expect(1)
            .create();
        let accepted = server
            .mock("POST", "/bulk")
            .with_status(202)
            .with_body_from_request(record(payload_ids.clone()))
            .expect(1)
            .create();

        sender(&server.url()).send(&[]).unwrap();

        unavailable.assert();
        accepted.assert();
        let payload_ids = payload_ids.lock().unwrap();
        assert_eq!(payload_ids.len(), 2);
        assert_eq!(payload_ids[0].len(), 32);
        assert_eq!(payload_ids[0], payload_ids[1]);
    }

    #[test]
    fn unauthorized_is_not_retried() {
        let mut server = mockito::Server::new();
        let mock = server.mock("POST", "/bulk").with_status(401).expect(1).create();

        assert!(matches!(
            sender(&server.url()).send(&[]),
            Err(Error::Unauthorized)
        ));
        mock.assert();
    }
}
