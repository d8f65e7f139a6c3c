//! Command topic templates and the router that maps inbound topics back onto them.
//!
//! Every command topic has the shape `<base>/cmd/<domain>/<entity>/<command>`. The broker only
//! ever delivers topics matching one of the [`COMMAND_TEMPLATES`] filters, so routing is a
//! matter of validating the shape and pulling out the wildcard segment.

pub const DEFAULT_BASE: &str = "domodreams/nspanelpro";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Light,
    Cover,
    Climate,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Set,
    Brightness,
    Position,
    Mode,
    Preset,
    Temperature,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TopicTemplate {
    pub domain: Domain,
    pub command: Command,
}

/// All the command topics the panel publishes to, in subscription order.
pub static COMMAND_TEMPLATES: [TopicTemplate; 7] = [
    TopicTemplate { domain: Domain::Light, command: Command::Set },
    TopicTemplate { domain: Domain::Light, command: Command::Brightness },
    TopicTemplate { domain: Domain::Cover, command: Command::Set },
    TopicTemplate { domain: Domain::Cover, command: Command::Position },
    TopicTemplate { domain: Domain::Climate, command: Command::Mode },
    TopicTemplate { domain: Domain::Climate, command: Command::Preset },
    TopicTemplate { domain: Domain::Climate, command: Command::Temperature },
];

impl TopicTemplate {
    pub fn find(domain: Domain, command: Command) -> Option<&'static TopicTemplate> {
        COMMAND_TEMPLATES.iter().find(|t| t.domain == domain && t.command == command)
    }

    /// The MQTT subscription filter for this template under `base`.
    pub fn filter(&self, base: &str) -> String {
        format!("{base}/cmd/{}/+/{}", self.domain, self.command)
    }
}

#[derive(clap::Parser, Clone)]
#[group(id = "topic::Args")]
pub struct Args {
    /// The topic prefix under which the panel publishes commands and receives state.
    #[arg(long, default_value = DEFAULT_BASE)]
    pub base_topic: String,
}

impl Args {
    pub fn router(&self) -> Result<Router, InvalidBase> {
        Router::new(&self.base_topic)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InvalidBase {
    #[error("base topic must not be empty")]
    Empty,
    #[error("base topic `{0}` must not end with `/`")]
    TrailingSlash(String),
    #[error("base topic `{0}` must not contain MQTT wildcards")]
    Wildcard(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    #[error("topic `{topic}` has {segments} segments, expected {expected}")]
    MalformedTopic { topic: String, segments: usize, expected: usize },
    #[error("topic `{0}` is not a command topic under the configured base")]
    ForeignTopic(String),
    #[error("topic `{0}` does not match any known command template")]
    UnknownTemplate(String),
    #[error("topic `{0}` has an empty entity name")]
    EmptyEntity(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub template: &'static TopicTemplate,
    pub entity_name: String,
}

impl Route {
    pub fn domain(&self) -> Domain {
        self.template.domain
    }

    pub fn command(&self) -> Command {
        self.template.command
    }

    /// `<domain>.<entity_name>`, the hub's identifier for the targeted entity.
    pub fn entity_id(&self) -> String {
        format!("{}.{}", self.template.domain, self.entity_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    base: String,
    base_segments: usize,
}

impl Router {
    pub fn new(base: &str) -> Result<Self, InvalidBase> {
        if base.is_empty() {
            return Err(InvalidBase::Empty);
        }
        if base.ends_with('/') {
            return Err(InvalidBase::TrailingSlash(base.to_string()));
        }
        if base.contains(['+', '#']) {
            return Err(InvalidBase::Wildcard(base.to_string()));
        }
        Ok(Self { base: base.to_string(), base_segments: base.split('/').count() })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn filters(&self) -> impl Iterator<Item = (&'static TopicTemplate, String)> + '_ {
        COMMAND_TEMPLATES.iter().map(|t| (t, t.filter(&self.base)))
    }

    pub fn route(&self, topic: &str) -> Result<Route, RouteError> {
        let segments = topic.split('/').collect::<Vec<_>>();
        let expected = self.base_segments + 4;
        let malformed = || RouteError::MalformedTopic {
            topic: topic.to_string(),
            segments: segments.len(),
            expected,
        };
        if segments.len() != expected {
            return Err(malformed());
        }
        let &[ref base @ .., cmd, domain, entity_name, command] = segments.as_slice() else {
            return Err(malformed());
        };
        if cmd != "cmd" || !base.iter().copied().eq(self.base.split('/')) {
            return Err(RouteError::ForeignTopic(topic.to_string()));
        }
        let template = domain
            .parse::<Domain>()
            .ok()
            .zip(command.parse::<Command>().ok())
            .and_then(|(domain, command)| TopicTemplate::find(domain, command))
            .ok_or_else(|| RouteError::UnknownTemplate(topic.to_string()))?;
        if entity_name.is_empty() {
            return Err(RouteError::EmptyEntity(topic.to_string()));
        }
        Ok(Route { template, entity_name: entity_name.to_string() })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self { base: DEFAULT_BASE.to_string(), base_segments: 2 }
    }
}
