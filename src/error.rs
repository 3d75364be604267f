use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching configuration or computing assignments.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A blank subject/experiment key, or targeting rules that cannot be applied to the subject
    /// attributes (e.g., a numeric operator against a string attribute).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server rejected the API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The server responded with a non-success status other than 401.
    #[error("received unexpected http status {0}")]
    HttpStatus(u16),

    /// Network or timeout error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Configuration payload could not be parsed.
    #[error("error parsing configuration: {0}")]
    ConfigurationParseError(String),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,
}

impl Error {
    /// Returns `true` if a configuration refresh that failed with this error is retried with
    /// backoff. Other failures wait for the next regular poll.
    ///
    /// Client errors (4xx) are not recoverable, except for request timeout (408) and rate
    /// limiting (429).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Unauthorized | Error::InvalidBaseUrl(_) | Error::InvalidArgument(_) => false,
            Error::HttpStatus(status) if (400..500).contains(status) => {
                *status == 408 || *status == 429
            }
            _ => true,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        // Strip the url as it contains the api key.
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParseError(value.to_string())
    }
}
