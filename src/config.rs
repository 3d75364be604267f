use std::time::Duration;

use crate::{
    assignment_logger::NoopAssignmentLogger, poller::PollerConfig, transport::Transport,
    AssignmentLogger, Client, Result,
};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use eppo_rac::ClientConfig;
/// let client = ClientConfig::from_api_key("api-key")
///     .assignment_logger(|event: eppo_rac::AssignmentEvent| {
///         println!("{:?}", event);
///     })
///     .poll_interval(Duration::from_secs(60))
///     .to_client()
///     .unwrap();
/// ```
pub struct ClientConfig<'a> {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) assignment_logger: Box<dyn AssignmentLogger + Send + Sync + 'a>,
    pub(crate) poller: PollerConfig,
    pub(crate) max_cache_entries: usize,
    pub(crate) request_timeout: Duration,
    pub(crate) transport: Option<Box<dyn Transport + Send + Sync>>,
}

impl<'a> ClientConfig<'a> {
    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use eppo_rac::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            assignment_logger: Box::new(NoopAssignmentLogger),
            poller: PollerConfig::default(),
            max_cache_entries: ClientConfig::DEFAULT_MAX_CACHE_ENTRIES,
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
            transport: None,
        }
    }

    /// Set assignment logger to pass variation assignments to your data warehouse.
    ///
    /// ```
    /// # use eppo_rac::{AssignmentEvent, ClientConfig};
    /// let config = ClientConfig::from_api_key("api-key").assignment_logger(|event: AssignmentEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn assignment_logger(
        mut self,
        assignment_logger: impl AssignmentLogger + Send + Sync + 'a,
    ) -> Self {
        self.assignment_logger = Box::new(assignment_logger);
        self
    }

    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://eppo.cloud/api";

    /// Default value for [`ClientConfig::max_cache_entries`].
    pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 1000;

    /// Default value for [`ClientConfig::request_timeout`].
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Interval between configuration refreshes.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poller.interval = interval;
        self
    }

    /// Maximum random delay added to every refresh interval.
    pub fn poll_jitter(mut self, jitter: Duration) -> Self {
        self.poller.jitter = jitter;
        self
    }

    /// Number of exponential-backoff retries after a failed refresh.
    pub fn max_poll_retries(mut self, max_retries: u32) -> Self {
        self.poller.max_retries = max_retries;
        self
    }

    /// Maximum number of experiment configurations kept in memory. Must be greater than zero.
    pub fn max_cache_entries(mut self, max_cache_entries: usize) -> Self {
        self.max_cache_entries = max_cache_entries;
        self
    }

    /// Timeout for a single configuration request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use a custom transport to fetch configuration instead of the default HTTP client.
    /// `base_url`, `api_key` and `request_timeout` are ignored in that case.
    pub fn transport(mut self, transport: impl Transport + Send + Sync + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use eppo_rac::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client().unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client<'a>> {
        Client::new(self)
    }
}
