//! Error types for the sensor.

use crate::config::ConfigError;
use thiserror::Error;

/// Error type for sensor setup and commands.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration rejected before any connection attempt.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Could not connect to the broker.
    #[error("mqttsensor: connection failed: {0}")]
    Connection(#[source] mqttsensor_mqtt::Error),

    /// Broker did not accept the subscription.
    #[error("mqttsensor: subscription failed: {0}")]
    Subscription(#[source] mqttsensor_mqtt::Error),

    /// Embedded broker failed to start.
    #[error("mqttsensor: broker failed: {0}")]
    Broker(#[source] mqttsensor_mqtt::Error),

    /// Command is not supported by this sensor.
    #[error("mqttsensor: unimplemented")]
    Unimplemented,
}

/// Result type for sensor operations.
pub type Result<T> = std::result::Result<T, Error>;
