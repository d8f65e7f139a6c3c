fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}

pub mod bridge {
    use crate::bridge::{self, Bridge};
    use crate::hub::{self, RestHub};
    use crate::mqtt::{self, Connection, Inbound};
    use crate::topic::InvalidBase;
    use std::sync::Arc;
    use tracing::info;

    /// Forward panel commands from MQTT to the hub until interrupted.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        panel: crate::panel::Args,
        #[clap(flatten)]
        topic: crate::topic::Args,
        #[clap(flatten)]
        mqtt: mqtt::Args,
        #[clap(flatten)]
        hub: hub::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("invalid base topic")]
        Base(#[source] InvalidBase),
        #[error("could not set up the hub client")]
        Hub(#[source] hub::Error),
        #[error("could not activate the bridge")]
        Activate(#[source] bridge::Error),
        #[error("could not listen for the interrupt signal")]
        Signal(#[source] std::io::Error),
        #[error("the MQTT event loop stopped unexpectedly")]
        ConnectionLost,
        #[error("could not cleanly disconnect from the MQTT broker")]
        Disconnect(#[source] mqtt::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        super::runtime().map_err(Error::Runtime)?.block_on(serve(args))
    }

    async fn serve(args: Args) -> Result<(), Error> {
        let router = args.topic.router().map_err(Error::Base)?;
        let hub = Arc::new(RestHub::new(args.hub).map_err(Error::Hub)?);
        let mut connection = Connection::new(&args.mqtt);
        let transport = Arc::new(connection.client());
        let bridge = Bridge::new(router, args.panel.into(), hub, transport);
        bridge.activate().await.map_err(Error::Activate)?;

        let mut interrupt = std::pin::pin!(tokio::signal::ctrl_c());
        let outcome = loop {
            tokio::select! {
                inbound = connection.inbound.recv() => match inbound {
                    Some(Inbound::Message(message)) => {
                        // The hub call, if any, runs detached.
                        let _ = bridge.dispatch(&message);
                    }
                    Some(Inbound::Reconnected) => {
                        bridge.resubscribe().await;
                    }
                    None => break Err(Error::ConnectionLost),
                },
                result = &mut interrupt => {
                    info!("interrupted, shutting down");
                    break result.map_err(Error::Signal);
                }
            }
        };
        bridge.deactivate().await;
        let disconnected = connection.disconnect().await;
        outcome?;
        disconnected.map_err(Error::Disconnect)
    }
}

pub mod publish_state {
    use crate::hub::{self, EntityId, RestHub};
    use crate::mqtt::{self, Connection};
    use crate::panel::PanelId;
    use crate::publish::{self, StateOutcome};
    use crate::topic::InvalidBase;
    use tracing::info;

    /// Publish the current state of an entity to a panel's state topic.
    ///
    /// The message is retained by the broker.
    #[derive(clap::Parser)]
    pub struct Args {
        /// The panel to publish the state for.
        #[arg(long)]
        panel_id: PanelId,
        /// The entity whose state to publish, e.g. `light.kitchen`.
        #[arg(long)]
        entity_id: EntityId,
        #[clap(flatten)]
        topic: crate::topic::Args,
        #[clap(flatten)]
        mqtt: mqtt::Args,
        #[clap(flatten)]
        hub: hub::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("invalid base topic")]
        Base(#[source] InvalidBase),
        #[error("could not set up the hub client")]
        Hub(#[source] hub::Error),
        #[error("could not publish the entity state")]
        Publish(#[source] publish::Error),
        #[error("could not cleanly disconnect from the MQTT broker")]
        Disconnect(#[source] mqtt::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        super::runtime().map_err(Error::Runtime)?.block_on(async move {
            let router = args.topic.router().map_err(Error::Base)?;
            let hub = RestHub::new(args.hub).map_err(Error::Hub)?;
            let connection = Connection::new(&args.mqtt);
            let outcome = publish::publish_state(
                &hub,
                &connection.client(),
                router.base(),
                &args.panel_id,
                &args.entity_id,
            )
            .await;
            let disconnected = connection.disconnect().await;
            match outcome.map_err(Error::Publish)? {
                StateOutcome::Published { topic } => {
                    info!(entity_id = %args.entity_id, topic = %topic, "state published")
                }
                StateOutcome::UnknownEntity => {}
            }
            disconnected.map_err(Error::Disconnect)
        })
    }
}

pub mod send_config {
    use crate::mqtt::{self, Connection};
    use crate::panel::PanelId;
    use crate::publish;
    use crate::topic::InvalidBase;
    use serde_json::{Map, Value};
    use std::path::PathBuf;
    use tracing::info;

    /// Publish a configuration object to a panel's config topic.
    ///
    /// The message is retained by the broker.
    #[derive(clap::Parser)]
    pub struct Args {
        /// The panel to configure.
        #[arg(long)]
        panel_id: PanelId,
        #[clap(flatten)]
        source: ConfigSource,
        #[clap(flatten)]
        topic: crate::topic::Args,
        #[clap(flatten)]
        mqtt: mqtt::Args,
    }

    #[derive(clap::Parser)]
    #[group(required = true, multiple = false)]
    pub struct ConfigSource {
        /// The configuration, as a JSON object.
        #[arg(long)]
        config: Option<String>,
        /// Read the configuration JSON object from this file.
        #[arg(long)]
        config_file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not read the configuration from {1:?}")]
        ReadConfig(#[source] std::io::Error, PathBuf),
        #[error("the configuration is not a JSON object")]
        ParseConfig(#[source] serde_json::Error),
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("invalid base topic")]
        Base(#[source] InvalidBase),
        #[error("could not publish the configuration")]
        Publish(#[source] publish::Error),
        #[error("could not cleanly disconnect from the MQTT broker")]
        Disconnect(#[source] mqtt::Error),
    }

    impl ConfigSource {
        fn load(&self) -> Result<Map<String, Value>, Error> {
            let text = match (&self.config, &self.config_file) {
                (Some(text), _) => text.clone(),
                (None, Some(path)) => {
                    std::fs::read_to_string(path).map_err(|e| Error::ReadConfig(e, path.clone()))?
                }
                (None, None) => unreachable!("clap requires one of the config sources"),
            };
            parse_config(&text)
        }
    }

    pub(crate) fn parse_config(text: &str) -> Result<Map<String, Value>, Error> {
        serde_json::from_str(text).map_err(Error::ParseConfig)
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let config = args.source.load()?;
        let router = args.topic.router().map_err(Error::Base)?;
        super::runtime().map_err(Error::Runtime)?.block_on(async move {
            let connection = Connection::new(&args.mqtt);
            let outcome =
                publish::send_config(&connection.client(), router.base(), &args.panel_id, &config)
                    .await;
            let disconnected = connection.disconnect().await;
            let topic = outcome.map_err(Error::Publish)?;
            info!(panel.id = %args.panel_id, topic = %topic, "config published");
            disconnected.map_err(Error::Disconnect)
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn config_must_be_an_object() {
            let config = parse_config(r#"{"rooms": [{"name": "Kitchen"}], "theme": "dark"}"#);
            assert_eq!(config.unwrap()["theme"], "dark");
            assert!(matches!(parse_config("[1, 2]"), Err(Error::ParseConfig(_))));
            assert!(matches!(parse_config("\"dark\""), Err(Error::ParseConfig(_))));
            assert!(matches!(parse_config("{"), Err(Error::ParseConfig(_))));
        }
    }
}

pub mod topics {
    use crate::topic::{Command, Domain, InvalidBase, TopicTemplate};
    use crate::translate::Action;
    use std::io::Write as _;

    #[derive(clap::ValueEnum, Clone, Debug)]
    pub enum Format {
        Table,
        Json,
    }

    /// List the command topics the bridge subscribes to.
    #[derive(clap::Parser)]
    pub struct Args {
        #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
        format: Format,
        #[clap(flatten)]
        topic: crate::topic::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("invalid base topic")]
        Base(#[source] InvalidBase),
        #[error("could not write data to the terminal")]
        WriteStdout(#[source] std::io::Error),
        #[error("could not serialize topics to JSON")]
        SerializeJson(#[source] serde_json::Error),
    }

    #[derive(serde::Serialize)]
    pub struct TopicSchema {
        pub filter: String,
        pub domain: Domain,
        pub command: Command,
        pub actions: &'static [Action],
        pub payload: &'static str,
    }

    fn payload_grammar(template: &TopicTemplate) -> &'static str {
        match (template.domain, template.command) {
            (Domain::Light, Command::Set) => "on | off",
            (Domain::Cover, Command::Set) => "open | close | stop",
            (_, Command::Brightness | Command::Position) => "integer",
            (_, Command::Temperature) => "number",
            (_, Command::Mode) => "HVAC mode",
            (_, Command::Preset) => "preset name",
            _ => "",
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let router = args.topic.router().map_err(Error::Base)?;
        let schemas = router.filters().map(|(template, filter)| TopicSchema {
            filter,
            domain: template.domain,
            command: template.command,
            actions: Action::for_template(template),
            payload: payload_grammar(template),
        });
        let data = match args.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table
                    .set_header(vec!["Filter", "Domain", "Command", "Payload", "Actions"])
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                for schema in schemas {
                    let actions =
                        schema.actions.iter().map(|a| a.to_string()).collect::<Vec<_>>();
                    table.add_row(vec![
                        schema.filter,
                        schema.domain.to_string(),
                        schema.command.to_string(),
                        schema.payload.to_string(),
                        actions.join(", "),
                    ]);
                }
                format!("{table}\n").into_bytes()
            }
            Format::Json => {
                let value = schemas.collect::<Vec<_>>();
                serde_json::to_vec(&value).map_err(Error::SerializeJson)?
            }
        };
        std::io::stdout().lock().write_all(&data).map_err(Error::WriteStdout)
    }
}
