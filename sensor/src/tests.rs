//! Shared test fixtures and end-to-end sensor scenarios.
//!
//! The mock transport stands in for a broker: it records connects and
//! subscriptions and lets a test deliver messages to the subscribed handler.

use crate::transport::{Connection, Transport};
use async_trait::async_trait;
use mqttsensor_mqtt::{Handler, Message, QoS};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    connects: Mutex<Vec<(String, u16)>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    handler: Mutex<Option<Arc<dyn Handler>>>,
    disconnects: AtomicUsize,
    fail_connect: AtomicBool,
    reject_subscribe: AtomicBool,
}

#[derive(Default)]
pub(crate) struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn reject_subscribe(&self, reject: bool) {
        self.state.reject_subscribe.store(reject, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> Vec<(String, u16)> {
        self.state.connects.lock().clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state.subscriptions.lock().clone()
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Deliver a message to the most recent subscription's handler.
    pub(crate) fn deliver(&self, topic: &str, payload: impl Into<bytes::Bytes>, qos: QoS) {
        let handler = self
            .state
            .handler
            .lock()
            .clone()
            .expect("no active subscription");
        handler
            .handle_message(&Message::new(topic, payload).with_qos(qos))
            .expect("handler failed");
    }
}

/// An unused loopback port.
pub(crate) fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> mqttsensor_mqtt::Result<Box<dyn Connection>> {
        self.state.connects.lock().push((host.to_string(), port));
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(mqttsensor_mqtt::Error::Connection(
                "connection refused".to_string(),
            ));
        }
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
        }))
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: Arc<dyn Handler>,
    ) -> mqttsensor_mqtt::Result<QoS> {
        self.state
            .subscriptions
            .lock()
            .push((topic.to_string(), qos));
        if self.state.reject_subscribe.load(Ordering::SeqCst) {
            return Err(mqttsensor_mqtt::Error::Subscribe(
                "broker rejected subscription".to_string(),
            ));
        }
        *self.state.handler.lock() = Some(handler);
        Ok(qos)
    }

    async fn disconnect(&self, _timeout: Duration) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.state.handler.lock() = None;
    }
}

#[cfg(test)]
mod scenarios {
    use super::MockTransport;
    use crate::{Error, LatestValueCache, MqttSensor, PayloadFormat, SensorConfig};
    use mqttsensor_mqtt::QoS;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn update_then_snapshot() {
        let cache = LatestValueCache::new(PayloadFormat::Json);
        cache.update(br#"{"x":1}"#, "t/a", QoS::AtLeastOnce);

        let msg = cache.snapshot().unwrap();
        assert_eq!(msg.payload.to_value(), json!({"x": 1}));
        assert_eq!(msg.topic, "t/a");
        assert_eq!(msg.qos.level(), 1);
    }

    #[test]
    fn snapshot_of_fresh_cache_is_absent() {
        assert!(LatestValueCache::default().snapshot().is_none());
    }

    #[test]
    fn malformed_update_keeps_first_value() {
        let cache = LatestValueCache::default();
        cache.update(br#"{"x":1}"#, "t/a", QoS::AtLeastOnce);
        cache.update(b"{\"x\":", "t/a", QoS::AtLeastOnce);

        let msg = cache.snapshot().unwrap();
        assert_eq!(msg.payload.to_value(), json!({"x": 1}));
        assert_eq!(cache.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn qos_three_rejected_before_connect() {
        let transport = MockTransport::new();
        let config = SensorConfig::new("t/a", "localhost", 1883).with_qos(3);

        let err = MqttSensor::new("room1", &config, transport.clone())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("qos must be between 0 and 2"));
        assert!(transport.connects().is_empty());
    }

    #[tokio::test]
    async fn sensor_reads_while_messages_arrive() {
        let transport = MockTransport::new();
        let config = SensorConfig::new("t/a", "localhost", 1883);
        let sensor = Arc::new(
            MqttSensor::new("room1", &config, transport.clone())
                .await
                .unwrap(),
        );

        let producer = {
            let transport = transport.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let body = format!(r#"{{"seq":{}}}"#, i);
                    transport.deliver("t/a", body, QoS::AtMostOnce);
                }
            })
        };

        let reader = {
            let sensor = sensor.clone();
            std::thread::spawn(move || {
                let mut last = -1i64;
                for _ in 0..500 {
                    let readings = sensor.readings();
                    if let Some(seq) = readings["payload"].get("seq").and_then(|v| v.as_i64()) {
                        // Single producer: readers never observe the value going back.
                        assert!(seq >= last);
                        last = seq;
                    }
                }
            })
        };

        producer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(sensor.readings()["payload"], json!({"seq": 199}));
        assert_eq!(sensor.stats().updates, 200);
    }

    #[tokio::test]
    async fn wildcard_topic_rejected_before_connect() {
        let transport = MockTransport::new();
        let config = SensorConfig::new("sensors/+/temperature", "localhost", 1883);

        let err = MqttSensor::new("room1", &config, transport.clone())
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            Error::Config(crate::ConfigError::WildcardTopic { .. })
        ));
        assert!(transport.connects().is_empty());
    }

    #[test]
    fn config_from_yaml() {
        let yaml = "topic: aranet/measurements\nhost: 10.1.5.254\nport: 1883\nqos: 2\nformat: auto\n";
        let config: SensorConfig = serde_yaml::from_str(yaml).unwrap();
        let settings = config.validate("aranet").unwrap();
        assert_eq!(settings.qos, QoS::ExactlyOnce);
        assert_eq!(settings.format, PayloadFormat::Auto);
    }
}

/// Scenarios over real TCP connections.
#[cfg(test)]
mod network {
    use super::free_port;
    use crate::{BrokerConfig, Error, MqttBroker, MqttSensor, MqttTransport, SensorConfig};
    use mqttsensor_mqtt::testing::{FakeBroker, wait_until};
    use mqttsensor_mqtt::{Dialer, QoS};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn transport() -> Arc<MqttTransport> {
        Arc::new(MqttTransport::new().with_ack_timeout(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn granted_qos_downgrade_reported() {
        let broker = FakeBroker::start().await.unwrap();
        broker.grant(QoS::AtMostOnce);

        let config = SensorConfig::new("t/a", "127.0.0.1", broker.port()).with_qos(2);
        let sensor = MqttSensor::new("room1", &config, transport()).await.unwrap();

        assert_eq!(broker.connects(), 1);
        assert_eq!(
            broker.subscriptions(),
            vec![("t/a".to_string(), QoS::ExactlyOnce)]
        );
        assert_eq!(sensor.granted_qos(), Some(QoS::AtMostOnce));

        let readings = sensor.readings();
        assert_eq!(readings["qos"], json!(2));
        assert_eq!(readings["granted_qos"], json!(0));
        sensor.close().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_suback_is_subscription_error() {
        let broker = FakeBroker::start().await.unwrap();
        broker.reject_next();

        let config = SensorConfig::new("t/a", "127.0.0.1", broker.port());
        let result = MqttSensor::new("room1", &config, transport()).await;

        assert!(matches!(result, Err(Error::Subscription(_))));
    }

    #[tokio::test]
    async fn published_message_reaches_cache() {
        let broker = FakeBroker::start().await.unwrap();
        let config = SensorConfig::new("t/a", "127.0.0.1", broker.port()).with_qos(1);
        let sensor = MqttSensor::new("room1", &config, transport()).await.unwrap();

        broker.publish("t/other", r#"{"ignored":true}"#, QoS::AtMostOnce);
        broker.publish("t/a", r#"{"temperature":21.5}"#, QoS::AtLeastOnce);

        assert!(wait_until(Duration::from_secs(5), || sensor.snapshot().is_some()).await);
        let readings = sensor.readings();
        assert_eq!(readings["payload"], json!({"temperature": 21.5}));
        assert_eq!(readings["topic"], json!("t/a"));
        assert_eq!(readings["qos"], json!(1));
        assert_eq!(sensor.stats().updates, 1);
        sensor.close().await.unwrap();
    }

    #[tokio::test]
    async fn sensor_reads_through_embedded_broker() {
        let port = free_port();
        let broker = MqttBroker::start("broker", &BrokerConfig::new("127.0.0.1", port))
            .await
            .unwrap();
        assert_eq!(broker.readings()["broker_port"], json!(port));

        let config = SensorConfig::new("sensors/room1", "127.0.0.1", port).with_qos(1);
        let sensor = MqttSensor::new("room1", &config, transport()).await.unwrap();
        assert_eq!(sensor.granted_qos(), Some(QoS::AtLeastOnce));

        let publisher = Dialer::new().dial_host("127.0.0.1", port).await.unwrap();
        publisher
            .write_to_topic(br#"{"co2":612}"#, "sensors/room1")
            .await
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || sensor.snapshot().is_some()).await);
        assert_eq!(sensor.readings()["payload"], json!({"co2": 612}));

        publisher.close().await.unwrap();
        sensor.close().await.unwrap();
    }
}
