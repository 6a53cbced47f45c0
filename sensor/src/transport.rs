//! Transport seam between the sensor and an MQTT client.

use crate::cache::LatestValueCache;
use async_trait::async_trait;
use mqttsensor_mqtt::{Conn, Dialer, Handler, Message, QoS};
use std::sync::Arc;
use std::time::Duration;

/// Opens broker connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the broker at `host:port`.
    async fn connect(&self, host: &str, port: u16) -> mqttsensor_mqtt::Result<Box<dyn Connection>>;
}

/// An open broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Subscribe `topic`, delivering its messages to `handler`.
    ///
    /// Returns the QoS granted by the broker.
    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: Arc<dyn Handler>,
    ) -> mqttsensor_mqtt::Result<QoS>;

    /// Disconnect, waiting at most `timeout`.
    async fn disconnect(&self, timeout: Duration);
}

/// [`Transport`] backed by rumqttc.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    /// Client ID prefix; a random ID is used when unset.
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive: u16,
    /// Timeout for connect and subscribe acknowledgements.
    pub ack_timeout: Duration,
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self {
            client_id: None,
            keep_alive: 20,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl MqttTransport {
    /// Create a transport with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client ID.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set the CONNACK/SUBACK wait timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, host: &str, port: u16) -> mqttsensor_mqtt::Result<Box<dyn Connection>> {
        let mut dialer = Dialer::new()
            .with_keep_alive(self.keep_alive)
            .with_ack_timeout(self.ack_timeout);
        if let Some(id) = &self.client_id {
            dialer = dialer.with_id(id.clone());
        }

        let conn = dialer.dial_host(host, port).await?;
        Ok(Box::new(conn))
    }
}

#[async_trait]
impl Connection for Conn {
    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: Arc<dyn Handler>,
    ) -> mqttsensor_mqtt::Result<QoS> {
        Conn::subscribe(self, topic, qos, handler).await
    }

    async fn disconnect(&self, timeout: Duration) {
        if let Err(e) = self.close_with_timeout(timeout).await {
            tracing::warn!("disconnect failed: {}", e);
        }
    }
}

/// Feeds every delivered message into the cache.
impl Handler for LatestValueCache {
    fn handle_message(&self, msg: &Message) -> mqttsensor_mqtt::Result<()> {
        self.update(&msg.payload, &msg.topic, msg.qos);
        Ok(())
    }
}
