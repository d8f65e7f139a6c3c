use futures::{Stream, StreamExt as _};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, ClientError, Event, EventLoop, MqttOptions};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not subscribe to `{1}`")]
    Subscribe(#[source] ClientError, String),
    #[error("could not unsubscribe from `{1}`")]
    Unsubscribe(#[source] ClientError, String),
    #[error("could not publish to `{1}`")]
    Publish(#[source] ClientError, String),
    #[error("could not request a disconnect from the broker")]
    Disconnect(#[source] ClientError),
    #[error("outstanding requests were not flushed to the broker within {0:?}")]
    FlushTimeout(Duration),
    #[error("the MQTT event loop task failed")]
    Driver(#[source] tokio::task::JoinError),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum Qos {
    #[value(name = "0")]
    AtMostOnce,
    #[value(name = "1")]
    AtLeastOnce,
    #[value(name = "2")]
    ExactlyOnce,
}

pub fn convert_qos(qos: Qos) -> rumqttc::v5::mqttbytes::QoS {
    match qos {
        Qos::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
        Qos::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
        Qos::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
    }
}

#[derive(clap::Parser, Clone)]
#[group(id = "mqtt::Args")]
pub struct Args {
    /// Hostname or address of the MQTT broker.
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Client identifier to present to the broker. Must be unique per broker.
    #[arg(long, default_value = "nspanelpro-bridge")]
    mqtt_client_id: String,

    #[arg(long)]
    mqtt_username: Option<String>,

    #[arg(
        long,
        env = "NSPANELPRO_MQTT_PASSWORD",
        hide_env_values = true,
        requires = "mqtt_username"
    )]
    mqtt_password: Option<String>,

    /// Quality of service used for both subscriptions and publishes.
    #[arg(long, value_enum, default_value_t = Qos::AtMostOnce)]
    mqtt_qos: Qos,

    #[arg(long, default_value = "30s")]
    mqtt_keep_alive: humantime::Duration,

    /// Time to wait before polling the connection again after it failed.
    ///
    /// The MQTT client reconnects on its own as long as it is being polled.
    #[arg(long, default_value = "5s")]
    mqtt_reconnect_delay: humantime::Duration,

    /// When disconnecting, give up on flushing outstanding requests after this amount of time.
    #[arg(long, default_value = "5s")]
    mqtt_flush_timeout: humantime::Duration,
}

/// The subset of an MQTT client the bridge and the publishers rely on.
pub trait Transport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn subscribe(&self, filter: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn unsubscribe(&self, filter: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Clone)]
pub struct Client {
    inner: AsyncClient,
    qos: rumqttc::v5::mqttbytes::QoS,
}

impl Transport for Client {
    type Error = Error;

    async fn subscribe(&self, filter: &str) -> Result<(), Error> {
        trace!(filter, "subscribing");
        self.inner
            .subscribe(filter, self.qos)
            .await
            .map_err(|e| Error::Subscribe(e, filter.to_string()))
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), Error> {
        trace!(filter, "unsubscribing");
        self.inner.unsubscribe(filter).await.map_err(|e| Error::Unsubscribe(e, filter.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), Error> {
        trace!(topic, retain, bytes = payload.len(), "publishing");
        self.inner
            .publish(topic, self.qos, retain, payload)
            .await
            .map_err(|e| Error::Publish(e, topic.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(InboundMessage),
    /// The broker accepted a connection again without resuming the previous session, so none of
    /// the earlier subscriptions are in effect anymore.
    Reconnected,
}

/// A broker connection with its event loop running in a background task.
pub struct Connection {
    client: Client,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
    driver: AbortOnDropHandle<()>,
    flush_timeout: Duration,
}

impl Connection {
    /// Must be called from within a tokio runtime.
    pub fn new(args: &Args) -> Self {
        let mut options =
            MqttOptions::new(args.mqtt_client_id.clone(), args.mqtt_host.clone(), args.mqtt_port);
        // rumqttc does not accept keep-alive intervals shorter than this.
        options.set_keep_alive((*args.mqtt_keep_alive).max(Duration::from_secs(5)));
        if let Some(username) = &args.mqtt_username {
            options.set_credentials(
                username.clone(),
                args.mqtt_password.clone().unwrap_or_default(),
            );
        }
        let (inner, eventloop) = AsyncClient::new(options, 16);
        let (sender, inbound) = mpsc::unbounded_channel();
        info!(host = %args.mqtt_host, port = args.mqtt_port, "connecting to the MQTT broker");
        let driver = AbortOnDropHandle::new(tokio::spawn(drive(
            events(eventloop, *args.mqtt_reconnect_delay),
            sender,
        )));
        Self {
            client: Client { inner, qos: convert_qos(args.mqtt_qos) },
            inbound,
            driver,
            flush_timeout: *args.mqtt_flush_timeout,
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Disconnect from the broker once everything requested so far has been sent out.
    pub async fn disconnect(self) -> Result<(), Error> {
        let Self { client, inbound, driver, flush_timeout } = self;
        drop(inbound);
        client.inner.disconnect().await.map_err(Error::Disconnect)?;
        match tokio::time::timeout(flush_timeout, driver).await {
            Err(_) => Err(Error::FlushTimeout(flush_timeout)),
            Ok(Err(e)) => Err(Error::Driver(e)),
            Ok(Ok(())) => Ok(()),
        }
    }
}

/// Poll the event loop forever, pausing after connection errors.
fn events(mut eventloop: EventLoop, reconnect_delay: Duration) -> impl Stream<Item = Event> {
    async_stream::stream! {
        loop {
            match eventloop.poll().await {
                Ok(event) => yield event,
                Err(e) => {
                    warn!(
                        message = "MQTT connection failed, will reconnect",
                        error = (&e as &dyn std::error::Error),
                        delay = ?reconnect_delay
                    );
                    tokio::time::sleep(reconnect_delay).await;
                }
            }
        }
    }
}

async fn drive(events: impl Stream<Item = Event>, inbound: mpsc::UnboundedSender<Inbound>) {
    let mut events = std::pin::pin!(events);
    let mut connected_before = false;
    while let Some(event) = events.next().await {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                let Ok(topic) = String::from_utf8(publish.topic.to_vec()) else {
                    warn!(topic = ?publish.topic, "dropping a message with a non UTF-8 topic");
                    continue;
                };
                let message = InboundMessage { topic, payload: publish.payload.to_vec() };
                if inbound.send(Inbound::Message(message)).is_err() {
                    debug!("nobody is listening for inbound messages");
                }
            }
            Event::Incoming(Packet::ConnAck(ack)) => {
                if !connected_before {
                    info!("connected to the MQTT broker");
                    connected_before = true;
                } else if ack.session_present {
                    info!("reconnected to the MQTT broker, session resumed");
                } else {
                    info!("reconnected to the MQTT broker");
                    if inbound.send(Inbound::Reconnected).is_err() {
                        debug!("nobody is listening for reconnects");
                    }
                }
            }
            Event::Outgoing(rumqttc::Outgoing::Disconnect) => {
                debug!("disconnected from the MQTT broker");
                return;
            }
            event => trace!(?event, "MQTT event"),
        }
    }
}
