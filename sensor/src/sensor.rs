//! MQTT sensor component.
//!
//! An [`MqttSensor`] owns one broker connection subscribed to one topic and a
//! [`LatestValueCache`] fed by that subscription. Hosts poll it with
//! [`MqttSensor::readings`].

use crate::cache::{CacheStats, LatestValueCache, StoredMessage};
use crate::config::{SensorConfig, Settings};
use crate::error::{Error, Result};
use crate::transport::{Connection, Transport};
use mqttsensor_mqtt::QoS;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long teardown waits for the broker connection to close.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Readings reported to the host.
pub type Readings = Map<String, Value>;

/// Subscription currently feeding the sensor.
struct Active {
    settings: Settings,
    cache: Arc<LatestValueCache>,
    granted_qos: Option<QoS>,
}

impl Active {
    fn idle(settings: Settings) -> Self {
        Self {
            cache: Arc::new(LatestValueCache::new(settings.format)),
            settings,
            granted_qos: None,
        }
    }
}

/// A sensor reporting the latest message published on an MQTT topic.
pub struct MqttSensor {
    name: String,
    transport: Arc<dyn Transport>,
    active: RwLock<Active>,
    connection: tokio::sync::Mutex<Option<Box<dyn Connection>>>,
}

impl MqttSensor {
    /// Validate `config`, connect and subscribe.
    ///
    /// Fails without connecting when the config is invalid. Connect and
    /// subscribe failures are returned as-is; nothing is retried.
    pub async fn new(
        name: impl Into<String>,
        config: &SensorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let name = name.into();
        let settings = config.validate(&name)?;
        log_settings(&name, &settings);

        let (connection, active) = setup(transport.as_ref(), settings).await?;

        Ok(Self {
            name,
            transport,
            active: RwLock::new(active),
            connection: tokio::sync::Mutex::new(Some(connection)),
        })
    }

    /// Apply a new configuration.
    ///
    /// An invalid config is rejected and the current subscription is kept.
    /// Otherwise the current connection is closed and a new one is set up
    /// with an empty cache. If that setup fails the sensor stays
    /// disconnected until the next successful reconfigure.
    pub async fn reconfigure(&self, config: &SensorConfig) -> Result<()> {
        let settings = config.validate(&self.name)?;

        let mut connection = self.connection.lock().await;
        if let Some(old) = connection.take() {
            old.disconnect(DISCONNECT_TIMEOUT).await;
        }

        log_settings(&self.name, &settings);

        match setup(self.transport.as_ref(), settings.clone()).await {
            Ok((conn, active)) => {
                *self.active.write() = active;
                *connection = Some(conn);
                Ok(())
            }
            Err(e) => {
                warn!("sensor {} left disconnected: {}", self.name, e);
                *self.active.write() = Active::idle(settings);
                Err(e)
            }
        }
    }

    /// The latest message, or `None` if nothing has been received since the
    /// current subscription started.
    pub fn snapshot(&self) -> Option<Arc<StoredMessage>> {
        self.active.read().cache.snapshot()
    }

    /// Current readings.
    ///
    /// With a stored message: `payload`, `topic`, `qos` and `received_at` of
    /// that message. Without one: `payload` is `null`, and `topic` and `qos`
    /// are the configured ones. `granted_qos` is present while subscribed.
    pub fn readings(&self) -> Readings {
        let active = self.active.read();
        let mut readings = Readings::new();

        match active.cache.snapshot() {
            Some(msg) => {
                readings.insert("payload".into(), msg.payload.to_value());
                readings.insert("topic".into(), msg.topic.clone().into());
                readings.insert("qos".into(), msg.qos.level().into());
                readings.insert("received_at".into(), msg.received_at.to_rfc3339().into());
            }
            None => {
                readings.insert("payload".into(), Value::Null);
                readings.insert("topic".into(), active.settings.topic.clone().into());
                readings.insert("qos".into(), active.settings.qos.level().into());
            }
        }

        if let Some(granted) = active.granted_qos {
            readings.insert("granted_qos".into(), granted.level().into());
        }

        readings
    }

    /// Arbitrary commands are not supported.
    pub async fn do_command(&self, _command: &Map<String, Value>) -> Result<Map<String, Value>> {
        Err(Error::Unimplemented)
    }

    /// Disconnect and drop the stored message. Safe to call repeatedly.
    pub async fn close(&self) -> Result<()> {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.disconnect(DISCONNECT_TIMEOUT).await;
            info!("sensor {} closed", self.name);
        }

        let mut active = self.active.write();
        active.cache.clear();
        active.granted_qos = None;
        Ok(())
    }

    /// Sensor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validated settings of the current subscription.
    pub fn settings(&self) -> Settings {
        self.active.read().settings.clone()
    }

    /// QoS granted by the broker for the current subscription.
    pub fn granted_qos(&self) -> Option<QoS> {
        self.active.read().granted_qos
    }

    /// Delivery counters of the current subscription.
    pub fn stats(&self) -> CacheStats {
        self.active.read().cache.stats()
    }
}

async fn setup(transport: &dyn Transport, settings: Settings) -> Result<(Box<dyn Connection>, Active)> {
    let connection = transport
        .connect(&settings.host, settings.port)
        .await
        .map_err(Error::Connection)?;

    let cache = Arc::new(LatestValueCache::new(settings.format));

    match connection
        .subscribe(&settings.topic, settings.qos, cache.clone())
        .await
    {
        Ok(granted) => {
            if granted != settings.qos {
                warn!(
                    "broker granted qos {} for {} (requested {})",
                    granted.level(),
                    settings.topic,
                    settings.qos.level()
                );
            }
            Ok((
                connection,
                Active {
                    settings,
                    cache,
                    granted_qos: Some(granted),
                },
            ))
        }
        Err(e) => {
            connection.disconnect(DISCONNECT_TIMEOUT).await;
            Err(Error::Subscription(e))
        }
    }
}

fn log_settings(name: &str, settings: &Settings) {
    info!(
        "configuring sensor {} with topic: {}, host: {}, port: {}, qos: {}",
        name,
        settings.topic,
        settings.host,
        settings.port,
        settings.qos.level()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadFormat;
    use crate::tests::MockTransport;
    use serde_json::json;

    fn config() -> SensorConfig {
        SensorConfig::new("t/a", "localhost", 1883).with_qos(1)
    }

    #[tokio::test]
    async fn test_new_subscribes_with_settings() {
        let transport = MockTransport::new();
        let sensor = MqttSensor::new("room1", &config(), transport.clone())
            .await
            .unwrap();

        assert_eq!(transport.connects(), vec![("localhost".to_string(), 1883)]);
        assert_eq!(
            transport.subscriptions(),
            vec![("t/a".to_string(), QoS::AtLeastOnce)]
        );
        assert_eq!(sensor.granted_qos(), Some(QoS::AtLeastOnce));
        assert_eq!(sensor.name(), "room1");
    }

    #[tokio::test]
    async fn test_readings_before_first_message() {
        let transport = MockTransport::new();
        let sensor = MqttSensor::new("room1", &config(), transport).await.unwrap();

        assert!(sensor.snapshot().is_none());
        let readings = sensor.readings();
        assert_eq!(readings["payload"], Value::Null);
        assert_eq!(readings["topic"], json!("t/a"));
        assert_eq!(readings["qos"], json!(1));
        assert_eq!(readings["granted_qos"], json!(1));
        assert!(!readings.contains_key("received_at"));
    }

    #[tokio::test]
    async fn test_readings_after_delivery() {
        let transport = MockTransport::new();
        let sensor = MqttSensor::new("room1", &config(), transport.clone())
            .await
            .unwrap();

        transport.deliver("t/a", r#"{"temperature":21.5}"#, QoS::AtLeastOnce);

        let readings = sensor.readings();
        assert_eq!(readings["payload"], json!({"temperature": 21.5}));
        assert_eq!(readings["topic"], json!("t/a"));
        assert_eq!(readings["qos"], json!(1));
        assert!(readings["received_at"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_config_never_connects() {
        let transport = MockTransport::new();
        let result = MqttSensor::new("room1", &config().with_qos(3), transport.clone()).await;

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(transport.connects().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let transport = MockTransport::new();
        transport.fail_connect(true);

        let result = MqttSensor::new("room1", &config(), transport.clone()).await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_subscribe_failure_disconnects() {
        let transport = MockTransport::new();
        transport.reject_subscribe(true);

        let result = MqttSensor::new("room1", &config(), transport.clone()).await;
        assert!(matches!(result, Err(Error::Subscription(_))));
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_reconfigure_replaces_subscription() {
        let transport = MockTransport::new();
        let sensor = MqttSensor::new("room1", &config(), transport.clone())
            .await
            .unwrap();
        transport.deliver("t/a", r#"{"x":1}"#, QoS::AtLeastOnce);

        let next = SensorConfig::new("t/b", "broker2", 1884).with_format(PayloadFormat::Raw);
        sensor.reconfigure(&next).await.unwrap();

        assert_eq!(transport.disconnects(), 1);
        assert_eq!(transport.connects().last(), Some(&("broker2".to_string(), 1884)));
        assert!(sensor.snapshot().is_none());
        assert_eq!(sensor.settings().topic, "t/b");

        transport.deliver("t/b", "plain text", QoS::AtMostOnce);
        assert_eq!(sensor.readings()["payload"], json!("plain text"));
    }

    #[tokio::test]
    async fn test_reconfigure_with_invalid_config_keeps_subscription() {
        let transport = MockTransport::new();
        let sensor = MqttSensor::new("room1", &config(), transport.clone())
            .await
            .unwrap();
        transport.deliver("t/a", r#"{"x":1}"#, QoS::AtLeastOnce);

        let bad = SensorConfig {
            host: String::new(),
            ..config()
        };
        assert!(matches!(
            sensor.reconfigure(&bad).await,
            Err(Error::Config(_))
        ));

        assert_eq!(transport.disconnects(), 0);
        assert!(sensor.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_reconfigure_failure_leaves_sensor_empty() {
        let transport = MockTransport::new();
        let sensor = MqttSensor::new("room1", &config(), transport.clone())
            .await
            .unwrap();
        transport.deliver("t/a", r#"{"x":1}"#, QoS::AtLeastOnce);

        transport.fail_connect(true);
        let result = sensor.reconfigure(&config()).await;

        assert!(matches!(result, Err(Error::Connection(_))));
        assert!(sensor.snapshot().is_none());
        assert_eq!(sensor.granted_qos(), None);
    }

    #[tokio::test]
    async fn test_do_command_unimplemented() {
        let transport = MockTransport::new();
        let sensor = MqttSensor::new("room1", &config(), transport).await.unwrap();

        let result = sensor.do_command(&Map::new()).await;
        assert!(matches!(result, Err(Error::Unimplemented)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = MockTransport::new();
        let sensor = MqttSensor::new("room1", &config(), transport.clone())
            .await
            .unwrap();
        transport.deliver("t/a", r#"{"x":1}"#, QoS::AtLeastOnce);

        sensor.close().await.unwrap();
        sensor.close().await.unwrap();

        assert_eq!(transport.disconnects(), 1);
        assert!(sensor.snapshot().is_none());
        assert!(!sensor.readings().contains_key("granted_qos"));
    }
}
