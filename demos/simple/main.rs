use std::collections::HashMap;

use eppo_rac::AttributeValue;

pub fn main() -> eppo_rac::Result<()> {
    env_logger::init();

    let api_key = std::env::var("EPPO_API_KEY").unwrap_or_default();
    let client = eppo_rac::ClientConfig::from_api_key(api_key)
        .assignment_logger(|event: eppo_rac::AssignmentEvent| {
            println!("Assignment event: {:?}", event);
        })
        .to_client()?;

    // Fetch the first configuration before starting the background poller.
    let poller = client.start_poller_thread()?;

    // Proceed with an empty configuration if the first fetch failed.
    if let Err(err) = poller.wait_for_configuration() {
        eprintln!("Configuration is not available yet: {}", err);
    }

    let attributes = HashMap::from([("country".to_owned(), AttributeValue::from("US"))]);
    let assignment = client
        .get_assignment("test-subject", "test-experiment", &attributes)?
        // default assignment
        .unwrap_or_else(|| "control".to_owned());

    println!("Assignment: {:?}", assignment);

    poller.shutdown()
}
