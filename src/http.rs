//! HTTP client setup shared by the data systems and the event sender.
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};

use crate::{Configuration, Error, Result};

const TAGS_HEADER: &str = "x-launchdarkly-tags";

/// Build a blocking client carrying the SDK key, user agent and application tags.
///
/// `timeout` bounds whole requests.
pub(crate) fn client(
    config: &Configuration,
    timeout: Duration,
) -> Result<reqwest::blocking::Client> {
    // Client holds a connection pool internally, so callers reuse it between requests.
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(config.http().connect_timeout)
        .timeout(timeout)
        .default_headers(default_headers(config)?)
        .build()?;
    Ok(client)
}

/// Build an async client for the long-lived stream connection. Only connecting is bounded.
pub(crate) fn streaming_client(config: &Configuration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.http().connect_timeout)
        .default_headers(default_headers(config)?)
        .build()?;
    Ok(client)
}

fn default_headers(config: &Configuration) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, header_value("sdk key", config.sdk_key())?);
    headers.insert(USER_AGENT, header_value("user agent", &config.user_agent())?);
    if let Some(tags) = config.tags_header() {
        headers.insert(TAGS_HEADER, header_value("application tags", &tags)?);
    }
    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::ConfigurationInvalid(format!("{name} is not a valid header value")))
}

/// Whether a status means the SDK key was rejected. Such errors are never retried.
pub(crate) fn is_unauthorized(status: reqwest::StatusCode) -> bool {
    matches!(
        status,
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigBuilder;

    #[test]
    fn rejects_sdk_keys_that_cannot_be_sent() {
        let config = ConfigBuilder::new("bad\nkey").build().unwrap();
        assert!(matches!(
            client(&config, Duration::from_secs(1)),
            Err(Error::ConfigurationInvalid(message)) if message.contains("sdk key")
        ));
        assert!(matches!(
            streaming_client(&config),
            Err(Error::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn builds_client_for_valid_configuration() {
        let config = ConfigBuilder::new("sdk-key").build().unwrap();
        assert!(client(&config, Duration::from_secs(1)).is_ok());
        assert!(streaming_client(&config).is_ok());
    }

    #[test]
    fn unauthorized_statuses() {
        assert!(is_unauthorized(reqwest::StatusCode::UNAUTHORIZED));
        assert!(is_unauthorized(reqwest::StatusCode::FORBIDDEN));
        assert!(!is_unauthorized(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    }
}
