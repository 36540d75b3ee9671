use crate::models::Credentials;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, error, info, warn};

pub const BROKER_PORT: u16 = 1883;
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);
/// rumqttc has no ping-timeout knob; a missing PINGRESP surfaces as an event
/// loop error at the next keep-alive tick instead.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Retry forever, waiting [`RETRY_INTERVAL`] between attempts.
pub fn fixed_retry() -> FixedInterval {
    FixedInterval::new(RETRY_INTERVAL)
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("MQTT connection error: {0}")]
    Broker(#[from] ConnectionError),
    #[error("Broker refused the connection: {0:?}")]
    Refused(ConnectReturnCode),
    #[error("No CONNACK from broker within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to hand message to the MQTT client: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Not connected to the MQTT broker")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Fixed connection policy derived from stored credentials. The ping timeout
/// is [`PING_TIMEOUT`] and is not configurable on the rumqttc side.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    pub fn from_credentials(creds: &Credentials) -> Self {
        Self {
            host: creds.host.clone(),
            port: BROKER_PORT,
            client_id: creds.client_id.clone(),
            username: creds.client_id.clone(),
            password: creds.secret.clone(),
            keep_alive: KEEP_ALIVE,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn broker_url(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(&self.client_id, &self.host, self.port);
        mqtt_options.set_keep_alive(self.keep_alive);
        mqtt_options.set_clean_session(true);
        mqtt_options.set_credentials(&self.username, &self.password);
        mqtt_options
    }
}

/// Something telemetry can be published through.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Performs a single connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Publisher + 'static;

    async fn connect(&self) -> Result<Self::Session, ConnectError>;
}

/// Drives `Disconnected → Connecting → Connected`, retrying sequentially with
/// the delays produced by `retry` until an attempt succeeds.
pub struct ConnectionManager<C, R> {
    connector: C,
    retry: R,
    state: watch::Sender<ConnectionState>,
}

impl<C, R> ConnectionManager<C, R>
where
    C: Connector,
    R: IntoIterator<Item = Duration> + Clone,
{
    pub fn new(connector: C, retry: R) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            retry,
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Resolves once connected. Only returns an error if `retry` runs out of
    /// delays, which the production strategy never does.
    pub async fn connect(&self) -> Result<Arc<C::Session>, ConnectError> {
        self.state.send_replace(ConnectionState::Connecting);
        info!("Connecting to MQTT broker...");

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let connector = &self.connector;

        let outcome = Retry::start(self.retry.clone(), move || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                debug!("Connect attempt {}.", attempt);
                connector.connect().await.map_err(|e| {
                    warn!("Connect attempt {} failed: {}", attempt, e);
                    e
                })
            }
        })
        .await;

        match outcome {
            Ok(session) => {
                self.state.send_replace(ConnectionState::Connected);
                info!(
                    "Connected to MQTT broker after {} attempt(s).",
                    attempts.load(Ordering::SeqCst)
                );
                Ok(Arc::new(session))
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                error!("Giving up on MQTT broker: {}", e);
                Err(e)
            }
        }
    }
}

/// Connects to a real broker with rumqttc.
pub struct MqttConnector {
    settings: ConnectionSettings,
    retry_interval: Duration,
}

impl MqttConnector {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            retry_interval: RETRY_INTERVAL,
        }
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Session = MqttSession;

    async fn connect(&self) -> Result<MqttSession, ConnectError> {
        debug!("Configuring MQTT broker at {}...", self.settings.broker_url());

        let (client, mut eventloop) = AsyncClient::new(self.settings.mqtt_options(), 10);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            return Ok(());
                        }
                        return Err(ConnectError::Refused(ack.code));
                    }
                    Ok(event) => debug!("Event before CONNACK: {:?}", event),
                    Err(ConnectionError::ConnectionRefused(code)) => {
                        return Err(ConnectError::Refused(code))
                    }
                    Err(e) => return Err(ConnectError::Broker(e)),
                }
            }
        };

        match timeout(self.settings.connect_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectError::Timeout(self.settings.connect_timeout)),
        }

        info!("Connected to MQTT broker at {}.", self.settings.broker_url());
        let link_up = Arc::new(AtomicBool::new(true));
        let driver = tokio::spawn(drive_event_loop(
            eventloop,
            link_up.clone(),
            self.retry_interval,
        ));
        Ok(MqttSession {
            client,
            link_up,
            driver,
        })
    }
}

/// Keeps the rumqttc event loop polled so outgoing publishes and pings are
/// flushed, and tracks whether the link is up in `link_up`. The driver task is
/// aborted when the session is dropped.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    link_up: Arc<AtomicBool>,
    retry_interval: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                link_up.store(true, Ordering::SeqCst);
                info!("Reconnected to MQTT broker.");
            }
            Ok(event) => handle_event(event),
            Err(e) => {
                if link_up.swap(false, Ordering::SeqCst) {
                    warn!("Lost connection to MQTT broker.");
                }
                // rumqttc reconnects on the next poll.
                error!("Error in MQTT event loop: {:?}", e);
                sleep(retry_interval).await;
            }
        }
    }
}

fn handle_event(event: Event) {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            debug!(
                "TOPIC: {} MSG: {}",
                publish.topic,
                String::from_utf8_lossy(&publish.payload)
            );
        }
        Event::Outgoing(_) => {}
        _ => {
            debug!("Unhandled event: {:?}", event);
        }
    }
}

/// A live broker session.
pub struct MqttSession {
    client: AsyncClient,
    link_up: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl Publisher for MqttSession {
    /// Fails immediately while the link is down or the request queue is full;
    /// nothing is held back for later delivery.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(PublishError::Disconnected);
        }
        self.client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
