use crate::translate::Invocation;
use reqwest::{StatusCode, Url};
use serde_json::{Map, Value};
use std::future::Future;
use std::str::FromStr;
use tracing::{debug, trace};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not construct the HTTP client")]
    CreateClient(#[source] reqwest::Error),
    #[error("hub URL `{0}` cannot have paths appended to it")]
    BaseUrl(Url),
    #[error("request to `{1}` failed")]
    Request(#[source] reqwest::Error, Url),
    #[error("hub responded to `{1}` with status {0}")]
    Status(StatusCode, Url),
    #[error("hub returned malformed entity state from `{1}`")]
    Decode(#[source] reqwest::Error, Url),
}

/// The slice of the hub the bridge depends on.
///
/// Implementations must be cheap to share: the bridge calls [`Hub::invoke`] from tasks spawned
/// per inbound message.
pub trait Hub: Send + Sync + 'static {
    /// Call a service on the hub. The outcome of the service itself is not observed.
    fn invoke(&self, invocation: &Invocation) -> impl Future<Output = Result<(), Error>> + Send;

    /// Current state of the entity, or `None` if the hub does not know it.
    fn entity_state(
        &self,
        entity_id: &EntityId,
    ) -> impl Future<Output = Result<Option<EntityState>, Error>> + Send;
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub last_updated: jiff::Timestamp,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("`{0}` is not a valid entity ID (expected `<domain>.<object_id>`)")]
pub struct InvalidEntityId(String);

/// A validated `<domain>.<object_id>` entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EntityId {
    type Err = InvalidEntityId;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn valid_part(part: &str) -> bool {
            !part.is_empty()
                && !part.starts_with('_')
                && !part.ends_with('_')
                && !part.contains("__")
                && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        }
        match s.split_once('.') {
            Some((domain, object_id)) if valid_part(domain) && valid_part(object_id) => {
                Ok(Self(s.to_string()))
            }
            _ => Err(InvalidEntityId(s.to_string())),
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(clap::Parser, Clone)]
#[group(id = "hub::Args")]
pub struct Args {
    /// Base URL of the hub's REST API.
    #[arg(long, default_value = "http://localhost:8123")]
    hub_url: Url,

    /// Long-lived access token used to authenticate against the hub.
    #[arg(long, env = "NSPANELPRO_HUB_TOKEN", hide_env_values = true)]
    hub_token: String,

    /// Give up on a hub request that has not completed in this amount of time.
    #[arg(long, default_value = "10s")]
    hub_timeout: humantime::Duration,
}

/// [`Hub`] backed by a Home Assistant compatible REST API.
pub struct RestHub {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl RestHub {
    pub fn new(args: Args) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(*args.hub_timeout)
            .build()
            .map_err(Error::CreateClient)?;
        if args.hub_url.cannot_be_a_base() {
            return Err(Error::BaseUrl(args.hub_url));
        }
        Ok(Self { client, base: args.hub_url, token: args.hub_token })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::BaseUrl(self.base.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl Hub for RestHub {
    async fn invoke(&self, invocation: &Invocation) -> Result<(), Error> {
        let url = self.endpoint(&[
            "api",
            "services",
            invocation.domain.into(),
            invocation.action.into(),
        ])?;
        let mut body = invocation.parameters.clone();
        body.insert("entity_id".to_string(), Value::from(invocation.entity_id.as_str()));
        trace!(%url, ?body, "calling hub service");
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Request(e, url.clone()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status, url));
        }
        debug!(
            entity_id = %invocation.entity_id,
            action = %invocation.action,
            "hub service called"
        );
        Ok(())
    }

    async fn entity_state(&self, entity_id: &EntityId) -> Result<Option<EntityState>, Error> {
        let url = self.endpoint(&["api", "states", entity_id.as_str()])?;
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Request(e, url.clone()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::Status(status, url));
        }
        let state = response.json::<EntityState>().await.map_err(|e| Error::Decode(e, url))?;
        Ok(Some(state))
    }
}
