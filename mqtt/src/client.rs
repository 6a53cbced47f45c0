//! MQTT client implementation using rumqttc.
//!
//! Provides a client for connecting to MQTT brokers with:
//! - Connect that waits for the broker's CONNACK
//! - Subscribe that waits for the SUBACK and reports the granted QoS
//! - Message routing via [`Router`]
//!
//! A connection does not reconnect. When the event loop fails it stops and
//! the connection reports itself as disconnected.

use crate::error::{Error, Result};
use crate::router::{Handler, Message, Router, handler_func};
use crate::types::QoS;
use parking_lot::Mutex;
use rumqttc::mqttbytes::v4::SubscribeReasonCode;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_KEEP_ALIVE_SECS: u16 = 20;
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PORT: u16 = 1883;

/// Options for publishing a message.
pub enum WriteOption {
    /// Set QoS level.
    Qos(QoS),
    /// Set retain flag.
    Retain,
}

/// MQTT client dialer.
///
/// Contains all options to establish an MQTT connection.
#[derive(Default)]
pub struct Dialer {
    /// Keep-alive interval in seconds.
    pub keep_alive: Option<u16>,
    /// How long to wait for the broker's CONNACK and SUBACK.
    pub ack_timeout: Option<Duration>,
    /// Client ID (defaults to random UUID).
    pub id: Option<String>,
    /// Message router.
    pub router: Option<Arc<Router>>,
}

impl Dialer {
    /// Create a new dialer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the keep-alive interval.
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = Some(seconds);
        self
    }

    /// Set the message router.
    ///
    /// Messages on topics without a subscription route go to the router's
    /// fallback handler.
    pub fn with_router(mut self, router: Arc<Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Set how long connect and subscribe wait for the broker to acknowledge.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    /// Connect to the MQTT broker at the given address.
    ///
    /// Address format: `mqtt://host[:port]` (`tcp://` is accepted as an
    /// alias).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mqttsensor_mqtt::{Dialer, QoS};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let conn = Dialer::new().dial("mqtt://127.0.0.1:1883").await?;
    ///     conn.subscribe_func("test/topic", QoS::AtLeastOnce, |msg| {
    ///         println!("{:?}", msg.payload);
    ///         Ok(())
    ///     })
    ///     .await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn dial(self, addr: &str) -> Result<Conn> {
        let broker = BrokerAddr::parse(addr)?;
        self.dial_host(&broker.host, broker.port).await
    }

    /// Connect to `host:port`.
    pub async fn dial_host(self, host: &str, port: u16) -> Result<Conn> {
        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let keep_alive = self.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE_SECS);
        let timeout = self.ack_timeout.unwrap_or(DEFAULT_ACK_TIMEOUT);

        let mut mqtt_options = MqttOptions::new(&id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(keep_alive as u64));

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);

        let shared = Arc::new(Shared {
            router: self.router.unwrap_or_default(),
            connected: AtomicBool::new(false),
            pending_subacks: Mutex::new(VecDeque::new()),
        });

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_loop(shared.clone(), event_loop, ready_tx));

        info!("connecting to {}:{} as {}", host, port, id);

        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => return Err(Error::Closed),
            Err(_) => {
                task.abort();
                return Err(Error::Timeout("connect"));
            }
        }

        Ok(Conn {
            client,
            shared,
            subscribe_lock: tokio::sync::Mutex::new(()),
            task: Mutex::new(Some(task)),
            timeout,
        })
    }
}

/// Parsed broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl BrokerAddr {
    /// Parse `mqtt://host[:port]`.
    pub fn parse(addr: &str) -> Result<Self> {
        let url = url::Url::parse(addr).map_err(|e| Error::InvalidAddress(e.to_string()))?;

        match url.scheme() {
            "mqtt" | "tcp" => {}
            other => {
                return Err(Error::InvalidAddress(format!(
                    "unsupported scheme: {}",
                    other
                )));
            }
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidAddress(format!("missing host in {}", addr)))?;

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
        })
    }
}

type SubAckSender = oneshot::Sender<Result<QoS>>;

/// State shared between a [`Conn`] and its event loop task.
struct Shared {
    router: Arc<Router>,
    connected: AtomicBool,
    pending_subacks: Mutex<VecDeque<SubAckSender>>,
}

impl Shared {
    fn complete_suback(&self, result: Result<QoS>) {
        // The broker acknowledges SUBSCRIBEs in the order they were sent.
        match self.pending_subacks.lock().pop_front() {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!("received SUBACK with no pending subscription"),
        }
    }

    fn fail_pending(&self) {
        for tx in self.pending_subacks.lock().drain(..) {
            let _ = tx.send(Err(Error::Closed));
        }
    }
}

async fn run_event_loop(
    shared: Arc<Shared>,
    mut event_loop: EventLoop,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut ready = Some(ready);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                shared.connected.store(true, Ordering::SeqCst);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("received message on topic: {}", publish.topic);

                let msg = Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: publish.qos.into(),
                    retain: publish.retain,
                    packet_id: (publish.pkid != 0).then_some(publish.pkid),
                };

                if let Err(e) = shared.router.dispatch(&msg) {
                    debug!("handler error: {}", e);
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                debug!("subscription acknowledged: {:?}", suback);
                let result = match suback.return_codes.first() {
                    Some(SubscribeReasonCode::Success(qos)) => Ok(QoS::from(*qos)),
                    Some(SubscribeReasonCode::Failure) => {
                        Err(Error::Subscribe("broker rejected subscription".to_string()))
                    }
                    None => Err(Error::Subscribe("empty SUBACK".to_string())),
                };
                shared.complete_suback(result);
            }
            Ok(Event::Incoming(Packet::PubAck(puback))) => {
                debug!("publish acknowledged: {}", puback.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("disconnected by broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let err = Error::from(e);
                if shared.connected.load(Ordering::SeqCst) {
                    warn!("event loop stopped: {}", err);
                } else {
                    error!("connection failed: {}", err);
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(err));
                }
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.fail_pending();
}

/// MQTT connection.
pub struct Conn {
    client: AsyncClient,
    shared: Arc<Shared>,
    // Keeps SUBSCRIBE send order identical to the pending SUBACK queue order.
    subscribe_lock: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl Conn {
    /// Subscribe to a topic and route its messages to `handler`.
    ///
    /// Waits for the broker's SUBACK and returns the granted QoS. On failure
    /// the topic's previous handler, if any, is put back.
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: Arc<dyn Handler>,
    ) -> Result<QoS> {
        let previous = self.shared.router.handle(topic, handler);

        let result = self.request_subscribe(topic, qos).await;
        match &result {
            Ok(granted) => info!("subscribed to {} (granted qos {})", topic, granted.level()),
            Err(e) => {
                match previous {
                    Some(previous) => {
                        self.shared.router.handle(topic, previous);
                    }
                    None => {
                        self.shared.router.remove(topic);
                    }
                }
                error!("subscribe to {} failed: {}", topic, e);
            }
        }
        result
    }

    /// Subscribe with a handler function.
    pub async fn subscribe_func<F>(&self, topic: &str, qos: QoS, f: F) -> Result<QoS>
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(topic, qos, handler_func(f)).await
    }

    async fn request_subscribe(&self, topic: &str, qos: QoS) -> Result<QoS> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }

        let rx = {
            let _guard = self.subscribe_lock.lock().await;
            let (tx, rx) = oneshot::channel();
            self.shared.pending_subacks.lock().push_back(tx);

            if let Err(e) = self.client.subscribe(topic, qos.into()).await {
                self.shared.pending_subacks.lock().pop_back();
                return Err(Error::Subscribe(e.to_string()));
            }
            rx
        };

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout("subscribe")),
        }
    }

    /// Publish a message to a topic.
    pub async fn write_to_topic(&self, payload: &[u8], topic: &str) -> Result<()> {
        self.write_to_topic_with_opts(payload, topic, &[]).await
    }

    /// Publish a message to a topic with options.
    pub async fn write_to_topic_with_opts(
        &self,
        payload: &[u8],
        topic: &str,
        opts: &[WriteOption],
    ) -> Result<()> {
        let mut qos = QoS::AtMostOnce;
        let mut retain = false;

        for opt in opts {
            match opt {
                WriteOption::Qos(q) => qos = *q,
                WriteOption::Retain => retain = true,
            }
        }

        self.client
            .publish(topic, qos.into(), retain, payload.to_vec())
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        Ok(())
    }

    /// Disconnect, waiting at most `timeout` for the event loop to wind down.
    pub async fn close_with_timeout(&self, timeout: Duration) -> Result<()> {
        if let Err(e) = self.client.disconnect().await {
            debug!("disconnect request not sent: {}", e);
        }

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("event loop still running after {:?}, aborting", timeout);
                handle.abort();
            }
        }

        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.fail_pending();
        info!("connection closed");
        Ok(())
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<()> {
        self.close_with_timeout(self.timeout).await
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}
