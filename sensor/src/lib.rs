//! MQTT sensor holding the latest message published on a topic.
//!
//! [`MqttSensor`] connects to a broker, subscribes one topic and keeps the
//! most recent payload in a [`LatestValueCache`]. Hosts poll it with
//! [`MqttSensor::readings`] or [`MqttSensor::snapshot`]; deliveries and reads
//! may happen on different threads. [`MqttBroker`] hosts an embedded broker
//! for sensors to connect to.
//!
//! # Example
//!
//! ```no_run
//! use mqttsensor::{MqttSensor, MqttTransport, SensorConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mqttsensor::Result<()> {
//!     let config = SensorConfig::new("sensors/room1", "127.0.0.1", 1883).with_qos(1);
//!     let sensor = MqttSensor::new("room1", &config, Arc::new(MqttTransport::new())).await?;
//!
//!     println!("{:?}", sensor.readings());
//!     sensor.close().await
//! }
//! ```

mod broker;
mod cache;
mod config;
mod error;
mod payload;
mod sensor;
#[cfg(test)]
mod tests;
mod transport;

pub use broker::{BROKER_START_TIMEOUT, BrokerConfig, DEFAULT_BROKER_PORT, MqttBroker};
pub use cache::{CacheStats, LatestValueCache, StoredMessage};
pub use config::{ConfigError, SensorConfig, Settings};
pub use error::{Error, Result};
pub use payload::{DecodeError, Payload, PayloadFormat};
pub use sensor::{DISCONNECT_TIMEOUT, MqttSensor, Readings};
pub use transport::{Connection, MqttTransport, Transport};

pub use mqttsensor_mqtt::QoS;
