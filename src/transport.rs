//! HTTP transport used to fetch configuration from the server.
use std::time::Duration;

use reqwest::{StatusCode, Url};

use crate::{Error, Result};

/// Fetches raw JSON payloads from the configuration server.
///
/// Implementations must map a 401 response to [`Error::Unauthorized`], other non-success
/// responses to [`Error::HttpStatus`], and connection failures or timeouts to
/// [`Error::Network`]. [`Error::is_recoverable`] decides whether a failure is retried with backoff.
pub trait Transport {
    /// Request `endpoint` (a path relative to the base URL) and return the decoded JSON body.
    fn fetch(&self, endpoint: &str) -> Result<serde_json::Value>;
}

/// Default [`Transport`] implementation on top of a blocking `reqwest` client.
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<HttpTransport> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(HttpTransport {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        Url::parse_with_params(
            &format!("{}{}", self.base_url, endpoint),
            &[
                ("apiKey", &*self.api_key),
                ("sdkName", "rust"),
                ("sdkVersion", env!("CARGO_PKG_VERSION")),
            ],
        )
        .map_err(Error::InvalidBaseUrl)
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, endpoint: &str) -> Result<serde_json::Value> {
        let url = self.url(endpoint)?;

        let response = self.client.get(url).send()?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                log::warn!(target: "eppo", "client is not authorized. Check your API key");
                Err(Error::Unauthorized)
            }
            status if !status.is_success() => {
                log::warn!(target: "eppo", "received non-200 response while fetching new configuration: {:?}", status);
                Err(Error::HttpStatus(status.as_u16()))
            }
            _ => Ok(response.json()?),
        }
    }
}
