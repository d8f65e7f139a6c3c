mod common;

use common::{FakeHub, FakeTransport, Logs};
use nspanelpro_bridge::publish::{self, StateOutcome};
use serde_json::json;

const BASE: &str = "domodreams/nspanelpro";

#[tokio::test]
async fn state_snapshot_is_published_retained() {
    let hub = FakeHub::default();
    let transport = FakeTransport::default();
    hub.set_state("light.kitchen", "on", json!({"brightness": 180, "friendly_name": "Kitchen"}));

    let outcome = publish::publish_state(
        &hub,
        &transport,
        BASE,
        &"p1".parse().unwrap(),
        &"light.kitchen".parse().unwrap(),
    )
    .await
    .unwrap();

    let topic = "domodreams/nspanelpro/state/p1/light/kitchen";
    assert_eq!(outcome, StateOutcome::Published { topic: topic.to_string() });
    let publishes = transport.publishes();
    assert_eq!(publishes.len(), 1);
    let (published_topic, payload, retain) = &publishes[0];
    assert_eq!(published_topic, topic);
    assert!(retain);
    assert_eq!(payload["entity_id"], "light.kitchen");
    assert_eq!(payload["state"], "on");
    assert_eq!(payload["attributes"], json!({"brightness": 180, "friendly_name": "Kitchen"}));
    let last_updated = payload["last_updated"].as_str().unwrap().parse::<jiff::Timestamp>();
    assert_eq!(last_updated.unwrap(), "2024-05-01T10:00:01Z".parse::<jiff::Timestamp>().unwrap());
}

#[tokio::test]
async fn unknown_entity_publishes_nothing() {
    let hub = FakeHub::default();
    let transport = FakeTransport::default();
    let (logs, _guard) = Logs::capture();

    let outcome = publish::publish_state(
        &hub,
        &transport,
        BASE,
        &"panelA".parse().unwrap(),
        &"light.kitchen".parse().unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, StateOutcome::UnknownEntity);
    assert!(transport.calls().is_empty());
    let warnings = logs.warnings();
    assert_eq!(warnings.len(), 1, "{warnings:#?}");
    assert!(warnings[0].contains("entity not found") && warnings[0].contains("light.kitchen"));
}

#[tokio::test]
async fn publish_failure_is_reported() {
    let hub = FakeHub::default();
    let transport = FakeTransport::default();
    hub.set_state("cover.garage", "open", json!({}));
    transport.reject("domodreams/nspanelpro/state/p1/cover/garage");

    let result = publish::publish_state(
        &hub,
        &transport,
        BASE,
        &"p1".parse().unwrap(),
        &"cover.garage".parse().unwrap(),
    )
    .await;

    assert!(matches!(result, Err(publish::Error::Publish(_, topic)) if topic.ends_with("garage")));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn config_is_published_verbatim_and_retained() {
    let transport = FakeTransport::default();
    let config = json!({"rooms": [{"name": "Kitchen", "entities": ["light.kitchen"]}], "x": null});
    let serde_json::Value::Object(config) = config else { unreachable!() };

    let topic = publish::send_config(&transport, BASE, &"p1".parse().unwrap(), &config)
        .await
        .unwrap();

    assert_eq!(topic, "domodreams/nspanelpro/config/p1");
    assert_eq!(
        transport.publishes(),
        vec![(topic, serde_json::Value::Object(config), true)]
    );
}
