use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{
    configuration_requestor::ConfigurationRequestor,
    configuration_store::ConfigurationStore,
    poller::{PollerConfig, PollerState, PollerThread},
    sharder::Md5Sharder,
    transport::{HttpTransport, Transport},
    AssignmentEvent, AssignmentLogger, ClientConfig, Error, Result,
};

/// A client that assigns subjects to experiment variations.
///
/// Assignment is computed locally from the configuration kept in memory, so
/// [`Client::get_assignment`] never blocks on the network. Configuration is refreshed by the
/// poller thread started with [`Client::start_poller_thread`].
///
/// # Examples
/// ```
/// # use eppo_rac::{Client, ClientConfig};
/// let client = Client::new(ClientConfig::from_api_key("api-key")).unwrap();
/// ```
pub struct Client<'a> {
    requestor: Arc<ConfigurationRequestor>,
    assignment_logger: Box<dyn AssignmentLogger + Send + Sync + 'a>,
    poller_config: PollerConfig,
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `max_cache_entries` is zero.
    /// - [`Error::Network`] if the HTTP client cannot be initialized.
    pub fn new(config: ClientConfig<'a>) -> Result<Self> {
        let max_entries = NonZeroUsize::new(config.max_cache_entries).ok_or_else(|| {
            Error::InvalidArgument("max_cache_entries must be greater than zero".to_owned())
        })?;
        let store = Arc::new(ConfigurationStore::new(max_entries));

        let transport: Box<dyn Transport + Send + Sync> = match config.transport {
            Some(transport) => transport,
            None => Box::new(HttpTransport::new(
                config.base_url,
                config.api_key,
                config.request_timeout,
            )?),
        };

        Ok(Client {
            requestor: Arc::new(ConfigurationRequestor::new(transport, store)),
            assignment_logger: config.assignment_logger,
            poller_config: config.poller,
        })
    }

    /// Get the variation assigned to `subject_key` in `experiment_key`.
    ///
    /// Returns `Ok(None)` if the subject is not part of the experiment, the experiment is
    /// disabled, or its configuration has not been fetched yet.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if a key is blank or the experiment's targeting rules cannot
    ///   be applied to `subject_attributes`.
    /// - [`Error::Unauthorized`] if the server rejected the API key on the last refresh.
    pub fn get_assignment(
        &self,
        subject_key: &str,
        experiment_key: &str,
        subject_attributes: &SubjectAttributes,
    ) -> Result<Option<String>> {
        if subject_key.trim().is_empty() {
            return Err(Error::InvalidArgument("subject_key must not be blank".to_owned()));
        }
        if experiment_key.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "experiment_key must not be blank".to_owned(),
            ));
        }

        let Some(configuration) = self.requestor.get_configuration(experiment_key)? else {
            log::trace!(target: "eppo", experiment_key, subject_key; "no configuration for experiment");
            return Ok(None);
        };

        let evaluation = configuration
            .eval(experiment_key, subject_key, subject_attributes, &Md5Sharder)
            .inspect_err(|err| {
                log::warn!(target: "eppo",
                    experiment_key,
                    subject_key,
                    subject_attributes:serde;
                    "error occurred while evaluating an experiment: {:?}", err,
                );
            })?;

        log::trace!(target: "eppo",
                    experiment_key,
                    subject_key,
                    subject_attributes:serde,
                    assignment:serde = evaluation.as_ref().map(|(value, _event)| value);
                    "evaluated an experiment");

        let Some((value, event)) = evaluation else {
            return Ok(None);
        };

        if let Some(event) = event {
            self.log_assignment(event);
        }

        Ok(Some(value))
    }

    /// Start a poller thread to fetch configuration from the server.
    ///
    /// The first fetch happens before this function returns; its outcome is available through
    /// [`PollerThread::wait_for_configuration`]. If it failed for any reason other than a
    /// rejected API key, the thread keeps retrying in the background and assignments return
    /// `None` until a fetch succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the server rejected the API key on the first fetch. No thread
    ///   is started in this case.
    /// - [`Error::Io`] if the thread could not be spawned.
    pub fn start_poller_thread(&self) -> Result<PollerThread> {
        let requestor = Arc::clone(&self.requestor);
        let mut poller = PollerThread::new(
            move || requestor.fetch_and_store().map(|_| ()),
            self.poller_config.clone(),
        );

        match poller.start() {
            Err(err) if poller.state() != PollerState::Running => Err(err),
            _ => Ok(poller),
        }
    }

    fn log_assignment(&self, event: AssignmentEvent) {
        log::trace!(target: "eppo", event:serde; "logging assignment");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.assignment_logger.log_assignment(event)
        }));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!(target: "eppo", "assignment logger failed: {}", err);
            }
            Err(_) => {
                log::warn!(target: "eppo", "assignment logger panicked");
            }
        }
    }
}

pub type SubjectAttributes = HashMap<String, AttributeValue>;

/// Value of a subject attribute. Targeting rules only look at numbers and strings.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Boolean(bool),
    List(Vec<AttributeValue>),
    Map(HashMap<String, AttributeValue>),
    Null,
}
impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}
