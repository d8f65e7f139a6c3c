//! Outbound publishes towards the panel: entity state snapshots and panel configuration.
//!
//! Both are retained, so a panel that (re)connects picks up the latest values straight away.

use crate::hub::{self, EntityId, Hub};
use crate::mqtt::Transport;
use crate::panel::PanelId;
use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not look up the state of `{1}`")]
    EntityState(#[source] hub::Error, EntityId),
    #[error("could not serialize the payload for `{1}`")]
    Serialize(#[source] serde_json::Error, String),
    #[error("could not publish to `{1}`")]
    Publish(#[source] Box<dyn std::error::Error + Send + Sync>, String),
}

/// `<base>/state/<panel>/<entity domain>/<object id>`
pub fn state_topic(base: &str, panel: &PanelId, entity: &EntityId) -> String {
    format!("{base}/state/{panel}/{}", entity.as_str().replace('.', "/"))
}

pub fn config_topic(base: &str, panel: &PanelId) -> String {
    format!("{base}/config/{panel}")
}

#[derive(Debug, serde::Serialize)]
pub struct StateSnapshot<'a> {
    pub entity_id: &'a str,
    pub state: &'a str,
    pub attributes: &'a Map<String, Value>,
    pub last_updated: jiff::Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOutcome {
    Published { topic: String },
    UnknownEntity,
}

/// Publish the hub's current state of `entity` for `panel`.
///
/// An entity the hub does not know about is reported with a warning and nothing is published.
pub async fn publish_state<H: Hub, T: Transport>(
    hub: &H,
    transport: &T,
    base: &str,
    panel: &PanelId,
    entity: &EntityId,
) -> Result<StateOutcome, Error> {
    let state = hub.entity_state(entity).await.map_err(|e| Error::EntityState(e, entity.clone()))?;
    let Some(state) = state else {
        warn!(entity_id = %entity, panel.id = %panel, "entity not found, not publishing state");
        return Ok(StateOutcome::UnknownEntity);
    };
    let topic = state_topic(base, panel, entity);
    let snapshot = StateSnapshot {
        entity_id: entity.as_str(),
        state: &state.state,
        attributes: &state.attributes,
        last_updated: state.last_updated,
    };
    let payload = serde_json::to_vec(&snapshot).map_err(|e| Error::Serialize(e, topic.clone()))?;
    transport
        .publish(&topic, payload, true)
        .await
        .map_err(|e| Error::Publish(Box::new(e), topic.clone()))?;
    debug!(entity_id = %entity, topic = %topic, "published state");
    Ok(StateOutcome::Published { topic })
}

/// Publish `config` verbatim as the retained configuration of `panel`. Returns the topic.
pub async fn send_config<T: Transport>(
    transport: &T,
    base: &str,
    panel: &PanelId,
    config: &Map<String, Value>,
) -> Result<String, Error> {
    let topic = config_topic(base, panel);
    let payload = serde_json::to_vec(config).map_err(|e| Error::Serialize(e, topic.clone()))?;
    transport
        .publish(&topic, payload, true)
        .await
        .map_err(|e| Error::Publish(Box::new(e), topic.clone()))?;
    debug!(topic = %topic, "published config");
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics() {
        let panel = "p1".parse().unwrap();
        let entity = "light.kitchen".parse().unwrap();
        assert_eq!(
            state_topic("domodreams/nspanelpro", &panel, &entity),
            "domodreams/nspanelpro/state/p1/light/kitchen"
        );
        assert_eq!(config_topic("domodreams/nspanelpro", &panel), "domodreams/nspanelpro/config/p1");
    }
}
