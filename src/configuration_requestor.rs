use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    configuration_store::ConfigurationStore,
    rac::{ExperimentConfiguration, RandomizedAssignmentConfig, TryParse},
    transport::Transport,
    Error, Result,
};

pub(crate) const RAC_ENDPOINT: &str = "/randomized_assignment/v2/config";

/// Fetches configuration snapshots through a [`Transport`] and stores them in the
/// [`ConfigurationStore`].
pub struct ConfigurationRequestor {
    transport: Box<dyn Transport + Send + Sync>,
    store: Arc<ConfigurationStore>,
    /// Set when a fetch is rejected with 401 and cleared only by the next successful fetch.
    /// Failures of other kinds in between leave it set. While set, configuration reads fail with
    /// [`Error::Unauthorized`] instead of serving stale data.
    unauthorized: AtomicBool,
    last_error: Mutex<Option<Error>>,
}

impl ConfigurationRequestor {
    pub fn new(
        transport: Box<dyn Transport + Send + Sync>,
        store: Arc<ConfigurationStore>,
    ) -> ConfigurationRequestor {
        ConfigurationRequestor {
            transport,
            store,
            unauthorized: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Fetch a new configuration snapshot and upsert it into the store.
    ///
    /// Experiments that fail to parse are skipped; the rest of the snapshot is still stored.
    pub fn fetch_and_store(&self) -> Result<HashMap<String, ExperimentConfiguration>> {
        log::debug!(target: "eppo", "fetching new configuration");
        let result = self.fetch();
        self.record(&result);

        let configurations = result?;
        self.store.set_many(configurations.clone());
        log::debug!(target: "eppo", experiments = configurations.len(); "successfully fetched configuration");

        Ok(configurations)
    }

    /// Read configuration for `experiment_key` from the store.
    ///
    /// Fails with [`Error::Unauthorized`] if the server rejected the API key and no fetch has
    /// succeeded since.
    pub fn get_configuration(
        &self,
        experiment_key: &str,
    ) -> Result<Option<Arc<ExperimentConfiguration>>> {
        if self.unauthorized.load(Ordering::Acquire) {
            return Err(Error::Unauthorized);
        }
        Ok(self.store.get(experiment_key))
    }

    /// Error of the most recent fetch, if it failed.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn fetch(&self) -> Result<HashMap<String, ExperimentConfiguration>> {
        let payload = self.transport.fetch(RAC_ENDPOINT)?;
        let rac: RandomizedAssignmentConfig = serde_json::from_value(payload)?;

        let mut configurations = HashMap::with_capacity(rac.flags.len());
        for (key, experiment) in rac.flags {
            match experiment {
                TryParse::Parsed(experiment) => {
                    let invalid = experiment.invalid_allocations();
                    if !invalid.is_empty() {
                        log::warn!(target: "eppo",
                                   experiment_key:display = key,
                                   allocations:serde = invalid;
                                   "configuration has invalid allocations");
                    }
                    configurations.insert(key, experiment);
                }
                TryParse::ParseFailed(_) => {
                    log::warn!(target: "eppo", experiment_key:display = key; "failed to parse experiment configuration, skipping");
                }
            }
        }
        Ok(configurations)
    }

    fn record<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.unauthorized.store(false, Ordering::Release),
            Err(Error::Unauthorized) => self.unauthorized.store(true, Ordering::Release),
            Err(_) => {}
        }

        let mut last_error = self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last_error = result.as_ref().err().cloned();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        num::NonZeroUsize,
        sync::{Arc, Mutex},
    };

    use serde_json::json;

    use crate::{configuration_store::ConfigurationStore, transport::Transport, Error, Result};

    use super::{ConfigurationRequestor, RAC_ENDPOINT};

    /// Transport replaying canned responses. Repeats the last response once the queue is drained.
    pub(crate) struct FakeTransport {
        responses: Mutex<VecDeque<Result<serde_json::Value>>>,
    }

    impl FakeTransport {
        pub(crate) fn new(responses: Vec<Result<serde_json::Value>>) -> FakeTransport {
            FakeTransport {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    impl Transport for FakeTransport {
        fn fetch(&self, endpoint: &str) -> Result<serde_json::Value> {
            assert_eq!(endpoint, RAC_ENDPOINT);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap()
            }
        }
    }

    pub(crate) fn payload() -> serde_json::Value {
        json!({
            "flags": {
                "experiment-1": {
                    "name": "experiment-1",
                    "enabled": true,
                    "subjectShards": 10000,
                    "overrides": {},
                    "rules": [{"allocationKey": "allocation-1", "type": "AND", "conditions": []}],
                    "allocations": {
                        "allocation-1": {
                            "percentExposure": 1.0,
                            "variations": [
                                {"name": "control", "value": "control", "shardRange": {"start": 0, "end": 4999}},
                                {"name": "treatment", "value": "treatment", "shardRange": {"start": 5000, "end": 9999}}
                            ]
                        }
                    }
                },
                "broken": {"name": "broken", "enabled": 7}
            }
        })
    }

    fn requestor(responses: Vec<Result<serde_json::Value>>) -> ConfigurationRequestor {
        ConfigurationRequestor::new(
            Box::new(FakeTransport::new(responses)),
            Arc::new(ConfigurationStore::new(NonZeroUsize::new(10).unwrap())),
        )
    }

    #[test]
    fn stores_parsed_experiments() {
        let requestor = requestor(vec![Ok(payload())]);

        let configurations = requestor.fetch_and_store().unwrap();

        assert_eq!(configurations.len(), 1);
        assert!(requestor
            .get_configuration("experiment-1")
            .unwrap()
            .is_some());
        assert!(requestor.get_configuration("broken").unwrap().is_none());
        assert!(requestor.last_error().is_none());
    }

    #[test]
    fn unauthorized_fails_reads_until_next_success() {
        let requestor = requestor(vec![Ok(payload()), Err(Error::Unauthorized), Ok(payload())]);

        requestor.fetch_and_store().unwrap();
        assert!(matches!(
            requestor.fetch_and_store(),
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            requestor.get_configuration("experiment-1"),
            Err(Error::Unauthorized)
        ));
        assert!(matches!(requestor.last_error(), Some(Error::Unauthorized)));

        requestor.fetch_and_store().unwrap();
        assert!(requestor
            .get_configuration("experiment-1")
            .unwrap()
            .is_some());
    }

    #[test]
    fn unauthorized_survives_later_network_errors() {
        let requestor = requestor(vec![
            Ok(payload()),
            Err(Error::Unauthorized),
            Err(Error::HttpStatus(503)),
        ]);

        requestor.fetch_and_store().unwrap();
        assert!(requestor.fetch_and_store().is_err());
        assert!(requestor.fetch_and_store().is_err());

        assert!(matches!(requestor.last_error(), Some(Error::HttpStatus(503))));
        assert!(matches!(
            requestor.get_configuration("experiment-1"),
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn out_of_bounds_shard_range_is_stored_with_warning() {
        let requestor = requestor(vec![Ok(json!({
            "flags": {
                "experiment-1": {
                    "name": "experiment-1",
                    "enabled": true,
                    "subjectShards": 10000,
                    "overrides": {},
                    "rules": [{"allocationKey": "allocation-1", "type": "AND", "conditions": []}],
                    "allocations": {
                        "allocation-1": {
                            "percentExposure": 1.0,
                            "variations": [
                                {"name": "control", "value": "control", "shardRange": {"start": 0, "end": u64::MAX}}
                            ]
                        }
                    }
                }
            }
        }))]);

        let configurations = requestor.fetch_and_store().unwrap();
        assert_eq!(configurations.len(), 1);
        assert!(!configurations["experiment-1"].allocations["allocation-1"].is_valid(10_000));
    }

    #[test]
    fn network_errors_keep_last_known_good() {
        let requestor = requestor(vec![Ok(payload()), Err(Error::HttpStatus(503))]);

        requestor.fetch_and_store().unwrap();
        assert!(matches!(
            requestor.fetch_and_store(),
            Err(Error::HttpStatus(503))
        ));

        assert!(requestor
            .get_configuration("experiment-1")
            .unwrap()
            .is_some());
        assert!(matches!(requestor.last_error(), Some(Error::HttpStatus(503))));
    }

    #[test]
    fn malformed_payload_is_parse_error() {
        let requestor = requestor(vec![Ok(json!({"unexpected": true}))]);
        assert!(matches!(
            requestor.fetch_and_store(),
            Err(Error::ConfigurationParseError(_))
        ));
    }
}
