//! In-memory stand-ins for the hub and the MQTT broker.

#![allow(dead_code)]

use nspanelpro_bridge::hub::{self, EntityId, EntityState, Hub};
use nspanelpro_bridge::mqtt::{InboundMessage, Transport};
use nspanelpro_bridge::translate::Invocation;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct FakeHub {
    invocations: Mutex<Vec<Invocation>>,
    states: Mutex<BTreeMap<String, EntityState>>,
    failing: AtomicBool,
}

impl FakeHub {
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn set_state(&self, entity_id: &str, state: &str, attributes: serde_json::Value) {
        let serde_json::Value::Object(attributes) = attributes else {
            panic!("attributes must be an object");
        };
        self.states.lock().unwrap().insert(
            entity_id.to_string(),
            EntityState {
                entity_id: entity_id.to_string(),
                state: state.to_string(),
                attributes,
                last_updated: "2024-05-01T10:00:01Z".parse().unwrap(),
            },
        );
    }

    pub fn fail_invocations(&self) {
        self.failing.store(true, Ordering::Relaxed);
    }
}

impl Hub for FakeHub {
    async fn invoke(&self, invocation: &Invocation) -> Result<(), hub::Error> {
        self.invocations.lock().unwrap().push(invocation.clone());
        if self.failing.load(Ordering::Relaxed) {
            return Err(hub::Error::Status(
                reqwest::StatusCode::BAD_REQUEST,
                "http://hub.invalid/api/services".parse().unwrap(),
            ));
        }
        Ok(())
    }

    async fn entity_state(&self, entity_id: &EntityId) -> Result<Option<EntityState>, hub::Error> {
        Ok(self.states.lock().unwrap().get(entity_id.as_str()).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: Vec<u8>, retain: bool },
}

#[derive(thiserror::Error, Debug)]
#[error("broker rejected a request for `{0}`")]
pub struct Rejected(String);

/// Records every request; requests for topics in the rejection list are recorded and then fail.
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<Call>>,
    rejected: Mutex<BTreeSet<String>>,
}

impl FakeTransport {
    pub fn reject(&self, topic: &str) {
        self.rejected.lock().unwrap().insert(topic.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<(String, serde_json::Value, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish { topic, payload, retain } => {
                    Some((topic, serde_json::from_slice(&payload).unwrap(), retain))
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call, topic: &str) -> Result<(), Rejected> {
        self.calls.lock().unwrap().push(call);
        if self.rejected.lock().unwrap().contains(topic) {
            return Err(Rejected(topic.to_string()));
        }
        Ok(())
    }
}

impl Transport for FakeTransport {
    type Error = Rejected;

    async fn subscribe(&self, filter: &str) -> Result<(), Rejected> {
        self.record(Call::Subscribe(filter.to_string()), filter)
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), Rejected> {
        self.record(Call::Unsubscribe(filter.to_string()), filter)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), Rejected> {
        self.record(Call::Publish { topic: topic.to_string(), payload, retain }, topic)
    }
}

pub fn message(topic: &str, payload: &str) -> InboundMessage {
    InboundMessage { topic: topic.to_string(), payload: payload.as_bytes().to_vec() }
}

/// Formatted log output of the current thread, for as long as the guard is held.
#[derive(Clone, Default)]
pub struct Logs(Arc<Mutex<Vec<u8>>>);

impl Logs {
    pub fn capture() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn warnings(&self) -> Vec<String> {
        let output = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
        output.lines().filter(|line| line.contains(" WARN ")).map(str::to_string).collect()
    }
}

impl std::io::Write for Logs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
