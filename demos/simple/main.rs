use std::{collections::HashMap, sync::mpsc, time::Duration};

use serde_json::json;

pub fn main() -> beacon::Result<()> {
    // Configure env_logger to see SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("beacon")).init();

    let project_token = std::env::var("BEACON_PROJECT_TOKEN")
        .expect("BEACON_PROJECT_TOKEN env variable should contain a project token");
    let mut project = beacon::Project::new(project_token);
    if let Ok(authorization) = std::env::var("BEACON_AUTHORIZATION") {
        project = project.with_authorization(authorization);
    }

    let data_dir = std::env::temp_dir().join("beacon-demo");
    let mut config = beacon::ClientConfig::new(project);
    config
        .storage(beacon::StorageConfig::sqlite(data_dir.join("events.db")))
        .preferences_path(data_dir.join("preferences.json"))
        .telemetry(|context: &str, error: &beacon::Error| {
            println!("telemetry: {context}: {error}");
        });
    let client = config.to_client();

    // Decide which in-app message to show with server-delivered rules.
    let rules = beacon::RuleSet::from_json(
        &json!([{
            "type": "purchase",
            "filter": [{
                "attribute": { "type": "property", "property": "price" },
                "constraint": {
                    "type": "number",
                    "operator": "greater than",
                    "operands": [{ "type": "constant", "value": "100" }]
                }
            }]
        }])
        .to_string(),
    )?;
    let properties = HashMap::from([("price".to_owned(), json!(150))]);
    let purchase = beacon::EventFilterEvent::new("purchase", properties.clone(), None);
    println!("matching rule: {:?}", rules.first_match(&purchase));

    client.identify_customer(
        HashMap::from([("registered".to_owned(), "demo@example.com".to_owned())]),
        HashMap::new(),
    );
    client.track_event("purchase", properties, None);

    let (sender, receiver) = mpsc::channel();
    client.flush(Some(Box::new(move |report: &beacon::FlushReport| {
        let _ = sender.send(*report);
    })));
    match receiver.recv_timeout(Duration::from_secs(60)) {
        Ok(report) => println!("flush finished: {:?}", report),
        Err(err) => println!("flush did not finish: {:?}", err),
    }

    Ok(())
}
