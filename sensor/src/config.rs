//! Sensor configuration and validation.

use crate::payload::PayloadFormat;
use mqttsensor_mqtt::QoS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration field failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `topic` is empty.
    #[error("topic is required for mqtt sensor {path:?}")]
    MissingTopic { path: String },

    /// `topic` contains a `+` or `#` wildcard.
    #[error("topic {topic:?} must not contain wildcards for mqtt sensor {path:?}")]
    WildcardTopic { path: String, topic: String },

    /// `host` is empty.
    #[error("host is required for mqtt sensor {path:?}")]
    MissingHost { path: String },

    /// Listen host of a broker is not an IP address.
    #[error("listen host {host:?} is not an IP address for mqtt broker {path:?}")]
    InvalidListenHost { path: String, host: String },

    /// `port` is not a usable TCP port.
    #[error("invalid port {port} (should be > 0 and <= 65535) for mqtt sensor {path:?}")]
    InvalidPort { path: String, port: i64 },

    /// `qos` is outside 0..=2.
    #[error("qos must be between 0 and 2 (got {qos}) for mqtt sensor {path:?}")]
    InvalidQos { path: String, qos: i64 },
}

/// Sensor attributes as written in a config file.
///
/// Numeric fields are kept wide so out-of-range values reach validation
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Topic to subscribe to.
    #[serde(default)]
    pub topic: String,

    /// Broker host.
    #[serde(default)]
    pub host: String,

    /// Broker port.
    #[serde(default)]
    pub port: i64,

    /// Subscription QoS.
    #[serde(default)]
    pub qos: i64,

    /// How payloads are decoded.
    #[serde(default)]
    pub format: PayloadFormat,
}

/// A validated [`SensorConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub topic: String,
    pub host: String,
    pub port: u16,
    pub qos: QoS,
    pub format: PayloadFormat,
}

impl SensorConfig {
    /// Create a config for `topic` on `host:port` with QoS 0 and JSON payloads.
    pub fn new(topic: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            topic: topic.into(),
            host: host.into(),
            port: port.into(),
            qos: 0,
            format: PayloadFormat::default(),
        }
    }

    /// Set the QoS level.
    pub fn with_qos(mut self, qos: i64) -> Self {
        self.qos = qos;
        self
    }

    /// Set the payload format.
    pub fn with_format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }

    /// Check every field, reporting the first invalid one.
    ///
    /// `path` names the sensor in error messages. The topic must be a plain
    /// topic name: messages are routed to the cache by exact topic, so a
    /// wildcard filter would never deliver anything.
    pub fn validate(&self, path: &str) -> Result<Settings, ConfigError> {
        self.check(path, false)
    }

    /// Like [`validate`](Self::validate), but accepts `+` and `#` wildcard
    /// filters, for subscribers that handle every topic themselves.
    pub fn validate_filter(&self, path: &str) -> Result<Settings, ConfigError> {
        self.check(path, true)
    }

    fn check(&self, path: &str, allow_wildcards: bool) -> Result<Settings, ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::MissingTopic {
                path: path.to_string(),
            });
        }

        if !allow_wildcards && self.topic.contains(['+', '#']) {
            return Err(ConfigError::WildcardTopic {
                path: path.to_string(),
                topic: self.topic.clone(),
            });
        }

        if self.host.is_empty() {
            return Err(ConfigError::MissingHost {
                path: path.to_string(),
            });
        }

        let port = u16::try_from(self.port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| ConfigError::InvalidPort {
                path: path.to_string(),
                port: self.port,
            })?;

        let qos = u8::try_from(self.qos)
            .ok()
            .and_then(|q| QoS::try_from(q).ok())
            .ok_or_else(|| ConfigError::InvalidQos {
                path: path.to_string(),
                qos: self.qos,
            })?;

        Ok(Settings {
            topic: self.topic.clone(),
            host: self.host.clone(),
            port,
            qos,
            format: self.format,
        })
    }
}

impl Settings {
    /// Broker URL in `mqtt://host:port` form.
    pub fn broker_url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}
