//! Error types for the MQTT transport.

use thiserror::Error;

/// Error type for MQTT operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Broker address could not be parsed.
    #[error("mqtt: invalid broker address: {0}")]
    InvalidAddress(String),

    /// QoS level outside 0..=2.
    #[error("mqtt: invalid qos level: {0}")]
    InvalidQos(u8),

    /// No handler found for topic.
    #[error("mqtt: no handler found for topic: {0}")]
    NoHandlerFound(String),

    /// Connection error.
    #[error("mqtt: connection error: {0}")]
    Connection(String),

    /// Publish error.
    #[error("mqtt: publish error: {0}")]
    Publish(String),

    /// Subscribe error.
    #[error("mqtt: subscribe error: {0}")]
    Subscribe(String),

    /// An operation did not complete in time.
    #[error("mqtt: {0} timed out")]
    Timeout(&'static str),

    /// The connection's event loop has stopped.
    #[error("mqtt: connection closed")]
    Closed,

    /// Client error from rumqttc.
    #[error("mqtt client error: {0}")]
    ClientError(#[from] rumqttc::ClientError),

    /// Connection error from rumqttc.
    #[error("mqtt connection error: {0}")]
    ConnectionError(#[from] rumqttc::ConnectionError),

    /// Embedded broker failed to start or stopped.
    #[error("mqtt: broker error: {0}")]
    Server(String),

    /// Embedded broker was already started.
    #[error("mqtt: broker already started")]
    ServerRunning,

    /// Handler error.
    #[error("mqtt: handler error: {0}")]
    Handler(String),
}

/// Result type for MQTT operations.
pub type Result<T> = std::result::Result<T, Error>;
