//! Translation of panel command payloads into hub service calls.
//!
//! Grammars here are syntactic only. Mode and preset values are forwarded as-is, leaving it to
//! the hub to reject values the device does not support. Numeric commands fail closed.

use crate::topic::{Command, Domain, Route, TopicTemplate};
use serde_json::{Map, Value};
use std::num::{ParseFloatError, ParseIntError};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Action {
    TurnOn,
    TurnOff,
    OpenCover,
    CloseCover,
    StopCover,
    SetCoverPosition,
    SetHvacMode,
    SetPresetMode,
    SetTemperature,
}

impl Action {
    /// The actions a message on `template` may end up invoking.
    pub fn for_template(template: &TopicTemplate) -> &'static [Action] {
        match (template.domain, template.command) {
            (Domain::Light, Command::Set) => &[Action::TurnOn, Action::TurnOff],
            (Domain::Light, Command::Brightness) => &[Action::TurnOn],
            (Domain::Cover, Command::Set) => {
                &[Action::OpenCover, Action::CloseCover, Action::StopCover]
            }
            (Domain::Cover, Command::Position) => &[Action::SetCoverPosition],
            (Domain::Climate, Command::Mode) => &[Action::SetHvacMode],
            (Domain::Climate, Command::Preset) => &[Action::SetPresetMode],
            (Domain::Climate, Command::Temperature) => &[Action::SetTemperature],
            _ => &[],
        }
    }
}

/// A service call to be made against the hub.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Invocation {
    pub domain: Domain,
    pub action: Action,
    pub entity_id: String,
    pub parameters: Map<String, Value>,
}

impl Invocation {
    fn new(route: &Route, action: Action) -> Self {
        Self {
            domain: route.domain(),
            action,
            entity_id: route.entity_id(),
            parameters: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("{0} payload is not valid UTF-8")]
    NotUtf8(Command, #[source] std::str::Utf8Error),
    #[error("invalid {1} value `{2}`")]
    InvalidInteger(#[source] ParseIntError, Command, String),
    #[error("invalid {1} value `{2}`")]
    InvalidFloat(#[source] ParseFloatError, Command, String),
    #[error("{0} value `{1}` is not a finite number")]
    NotFinite(Command, String),
}

/// Translate a routed command message into a hub invocation.
///
/// `Ok(None)` means the payload was well-formed but names nothing the bridge acts on (e.g. a
/// light `set` to `toggle`), which is not worth a warning.
pub fn translate(route: &Route, payload: &[u8]) -> Result<Option<Invocation>, Error> {
    let command = route.command();
    let payload = match std::str::from_utf8(payload) {
        Ok(payload) => payload,
        // Not one of the keywords either.
        Err(_) if command == Command::Set => return Ok(None),
        Err(e) => return Err(Error::NotUtf8(command, e)),
    };
    let invocation = match (route.domain(), command) {
        (Domain::Light, Command::Set) => match payload.to_lowercase().as_str() {
            "on" => Invocation::new(route, Action::TurnOn),
            "off" => Invocation::new(route, Action::TurnOff),
            _ => return Ok(None),
        },
        (Domain::Light, Command::Brightness) => {
            Invocation::new(route, Action::TurnOn).with("brightness", integer(command, payload)?)
        }
        (Domain::Cover, Command::Set) => match payload.to_lowercase().as_str() {
            "open" => Invocation::new(route, Action::OpenCover),
            "close" => Invocation::new(route, Action::CloseCover),
            "stop" => Invocation::new(route, Action::StopCover),
            _ => return Ok(None),
        },
        (Domain::Cover, Command::Position) => Invocation::new(route, Action::SetCoverPosition)
            .with("position", integer(command, payload)?),
        (Domain::Climate, Command::Mode) => {
            Invocation::new(route, Action::SetHvacMode).with("hvac_mode", payload.to_lowercase())
        }
        (Domain::Climate, Command::Preset) => {
            Invocation::new(route, Action::SetPresetMode).with("preset_mode", payload)
        }
        (Domain::Climate, Command::Temperature) => Invocation::new(route, Action::SetTemperature)
            .with("temperature", float(command, payload)?),
        // The router never produces a route outside of `COMMAND_TEMPLATES`.
        _ => return Ok(None),
    };
    Ok(Some(invocation))
}

fn integer(command: Command, payload: &str) -> Result<i64, Error> {
    payload
        .trim()
        .parse::<i64>()
        .map_err(|e| Error::InvalidInteger(e, command, payload.to_string()))
}

fn float(command: Command, payload: &str) -> Result<f64, Error> {
    let value = payload
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::InvalidFloat(e, command, payload.to_string()))?;
    if !value.is_finite() {
        return Err(Error::NotFinite(command, payload.to_string()));
    }
    Ok(value)
}
