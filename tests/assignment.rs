use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use eppo_rac::{
    hash_subject_key, AssignmentEvent, AttributeValue, ClientConfig, Error, PollerState,
    Transport,
};
use serde_json::json;

/// Serves a fixed payload, or a fixed error, and counts requests.
#[derive(Clone)]
struct StaticTransport {
    response: Arc<Mutex<eppo_rac::Result<serde_json::Value>>>,
    requests: Arc<AtomicUsize>,
}

impl StaticTransport {
    fn new(response: eppo_rac::Result<serde_json::Value>) -> StaticTransport {
        StaticTransport {
            response: Arc::new(Mutex::new(response)),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn respond_with(&self, response: eppo_rac::Result<serde_json::Value>) {
        *self.response.lock().unwrap() = response;
    }
}

impl Transport for StaticTransport {
    fn fetch(&self, _endpoint: &str) -> eppo_rac::Result<serde_json::Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }
}

fn configuration() -> serde_json::Value {
    json!({
        "flags": {
            "pricing-page": {
                "name": "pricing-page",
                "enabled": true,
                "subjectShards": 10000,
                "overrides": {
                    hash_subject_key("subject-10"): "variant-2"
                },
                "rules": [
                    {
                        "allocationKey": "big-spenders",
                        "type": "AND",
                        "conditions": [
                            {"operator": "GTE", "attribute": "totalSales", "value": 10},
                            {"operator": "LTE", "attribute": "totalSales", "value": 100}
                        ]
                    },
                    {
                        "allocationKey": "employees",
                        "type": "OR",
                        "conditions": [
                            {"operator": "MATCHES", "attribute": "email", "value": "@example\\.com$"}
                        ]
                    }
                ],
                "allocations": {
                    "big-spenders": {
                        "percentExposure": 0.4,
                        "variations": [
                            {"name": "control", "value": "control", "shardRange": {"start": 0, "end": 3332}},
                            {"name": "variant-1", "value": "variant-1", "shardRange": {"start": 3333, "end": 6665}},
                            {"name": "variant-2", "value": "variant-2", "shardRange": {"start": 6666, "end": 9999}}
                        ]
                    },
                    "employees": {
                        "percentExposure": 1.0,
                        "variations": [
                            {"name": "variant-1", "value": "variant-1", "shardRange": {"start": 0, "end": 9999}}
                        ]
                    }
                }
            },
            "disabled-experiment": {
                "name": "disabled-experiment",
                "enabled": false,
                "subjectShards": 10000,
                "overrides": {
                    hash_subject_key("subject-10"): "variant-2"
                },
                "rules": [{"allocationKey": "everyone", "type": "OR", "conditions": []}],
                "allocations": {
                    "everyone": {
                        "percentExposure": 1.0,
                        "variations": [
                            {"name": "on", "value": "on", "shardRange": {"start": 0, "end": 9999}}
                        ]
                    }
                }
            }
        }
    })
}

fn sales(total_sales: f64) -> HashMap<String, AttributeValue> {
    HashMap::from([("totalSales".to_owned(), total_sales.into())])
}

#[test]
fn assigns_subjects_after_initial_fetch() {
    let transport = StaticTransport::new(Ok(configuration()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let client = {
        let events = events.clone();
        ClientConfig::from_api_key("api-key")
            .transport(transport.clone())
            .assignment_logger(move |event: AssignmentEvent| events.lock().unwrap().push(event))
            .to_client()
            .unwrap()
    };

    let poller = client.start_poller_thread().unwrap();
    poller.wait_for_configuration().unwrap();
    assert_eq!(transport.requests.load(Ordering::SeqCst), 1);

    // Overrides bypass the disabled flag and every rule, and are not logged.
    assert_eq!(
        client
            .get_assignment("subject-10", "disabled-experiment", &HashMap::new())
            .unwrap()
            .as_deref(),
        Some("variant-2")
    );
    assert_eq!(
        client
            .get_assignment("subject-11", "disabled-experiment", &HashMap::new())
            .unwrap(),
        None
    );
    assert!(events.lock().unwrap().is_empty());

    // Subjects without matching attributes are not part of the experiment.
    assert_eq!(
        client
            .get_assignment("subject-1", "pricing-page", &sales(500.0))
            .unwrap(),
        None
    );

    let email = HashMap::from([("email".to_owned(), AttributeValue::from("bob@example.com"))]);
    assert_eq!(
        client
            .get_assignment("bob", "pricing-page", &email)
            .unwrap()
            .as_deref(),
        Some("variant-1")
    );
    assert_eq!(events.lock().unwrap().len(), 1);

    // Unknown experiments are not an error.
    assert_eq!(
        client
            .get_assignment("bob", "unknown-experiment", &email)
            .unwrap(),
        None
    );

    poller.shutdown().unwrap();
}

#[test]
fn exposure_and_determinism() {
    let client = ClientConfig::from_api_key("api-key")
        .transport(StaticTransport::new(Ok(configuration())))
        .to_client()
        .unwrap();
    let poller = client.start_poller_thread().unwrap();

    let attributes = sales(100.0);
    let assignments: Vec<Option<String>> = (0..10_000)
        .map(|i| {
            client
                .get_assignment(&format!("user-{i}"), "pricing-page", &attributes)
                .unwrap()
        })
        .collect();

    let exposed = assignments.iter().filter(|a| a.is_some()).count() as f64 / 10_000.0;
    assert!((exposed - 0.4).abs() < 0.05, "exposed = {exposed}");

    for i in (0..10_000).step_by(97) {
        let again = client
            .get_assignment(&format!("user-{i}"), "pricing-page", &attributes)
            .unwrap();
        assert_eq!(again, assignments[i]);
    }

    poller.shutdown().unwrap();
}

#[test]
fn rule_type_mismatch_is_reported() {
    let client = ClientConfig::from_api_key("api-key")
        .transport(StaticTransport::new(Ok(configuration())))
        .to_client()
        .unwrap();
    let poller = client.start_poller_thread().unwrap();

    let attributes = HashMap::from([("totalSales".to_owned(), AttributeValue::from("x"))]);
    assert!(matches!(
        client.get_assignment("subject-1", "pricing-page", &attributes),
        Err(Error::InvalidArgument(_))
    ));

    poller.shutdown().unwrap();
}

#[test]
fn unauthorized_refresh_fails_assignments() {
    let transport = StaticTransport::new(Ok(configuration()));
    let client = ClientConfig::from_api_key("api-key")
        .transport(transport.clone())
        .poll_interval(Duration::from_millis(10))
        .poll_jitter(Duration::ZERO)
        .to_client()
        .unwrap();

    let poller = client.start_poller_thread().unwrap();
    assert!(client
        .get_assignment("bob", "pricing-page", &sales(50.0))
        .is_ok());

    transport.respond_with(Err(Error::Unauthorized));
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(poller.state(), PollerState::Stopped);
    assert!(matches!(
        client.get_assignment("bob", "pricing-page", &sales(50.0)),
        Err(Error::Unauthorized)
    ));
}

#[test]
fn transient_failures_keep_last_known_configuration() {
    let transport = StaticTransport::new(Ok(configuration()));
    let client = ClientConfig::from_api_key("api-key")
        .transport(transport.clone())
        .poll_interval(Duration::from_millis(5))
        .poll_jitter(Duration::ZERO)
        .max_poll_retries(2)
        .to_client()
        .unwrap();

    let poller = client.start_poller_thread().unwrap();
    let email = HashMap::from([("email".to_owned(), AttributeValue::from("bob@example.com"))]);

    transport.respond_with(Err(Error::HttpStatus(503)));
    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(poller.state(), PollerState::Running);
    assert!(matches!(poller.last_error(), Some(Error::HttpStatus(503))));
    assert_eq!(
        client
            .get_assignment("bob", "pricing-page", &email)
            .unwrap()
            .as_deref(),
        Some("variant-1")
    );

    poller.shutdown().unwrap();
}

#[test]
fn client_errors_keep_polling_with_last_known_configuration() {
    let transport = StaticTransport::new(Ok(configuration()));
    let client = ClientConfig::from_api_key("api-key")
        .transport(transport.clone())
        .poll_interval(Duration::from_millis(10))
        .poll_jitter(Duration::ZERO)
        .to_client()
        .unwrap();

    let poller = client.start_poller_thread().unwrap();
    let email = HashMap::from([("email".to_owned(), AttributeValue::from("bob@example.com"))]);

    transport.respond_with(Err(Error::HttpStatus(403)));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(poller.state(), PollerState::Running);
    assert!(matches!(poller.last_error(), Some(Error::HttpStatus(403))));

    transport.respond_with(Err(Error::HttpStatus(404)));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(poller.state(), PollerState::Running);
    assert_eq!(
        client
            .get_assignment("bob", "pricing-page", &email)
            .unwrap()
            .as_deref(),
        Some("variant-1")
    );

    let requests = transport.requests.load(Ordering::SeqCst);
    transport.respond_with(Ok(configuration()));
    std::thread::sleep(Duration::from_millis(100));
    assert!(transport.requests.load(Ordering::SeqCst) > requests);
    assert!(poller.last_error().is_none());

    poller.shutdown().unwrap();
}
