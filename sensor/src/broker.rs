//! MQTT broker component.
//!
//! An [`MqttBroker`] hosts an embedded broker that sensors on the same
//! machine or network can connect to, and reports where it listens.

use crate::config::ConfigError;
use crate::error::{Error, Result};
use crate::sensor::Readings;
use mqttsensor_mqtt::{Server, ServerConfig, ServerState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{info, warn};

/// Port used when none is configured.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// How long [`MqttBroker::start`] waits for the listener.
pub const BROKER_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Name reported in readings.
const BROKER_NAME: &str = "rumqttd";

/// Broker attributes as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Listen IP address; all interfaces when empty.
    #[serde(default)]
    pub host: String,

    /// Listen port; 1883 when zero or unset.
    #[serde(default)]
    pub port: i64,
}

impl BrokerConfig {
    /// Create a config listening on `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Resolve the listen address.
    pub fn listen_addr(&self, path: &str) -> std::result::Result<SocketAddr, ConfigError> {
        let ip = if self.host.is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            self.host
                .parse()
                .map_err(|_| ConfigError::InvalidListenHost {
                    path: path.to_string(),
                    host: self.host.clone(),
                })?
        };

        let port = match self.port {
            0 => {
                warn!("no port to listen to for mqtt broker {:?}, using {}", path, DEFAULT_BROKER_PORT);
                DEFAULT_BROKER_PORT
            }
            port => u16::try_from(port)
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| ConfigError::InvalidPort {
                    path: path.to_string(),
                    port,
                })?,
        };

        Ok(SocketAddr::new(ip, port))
    }
}

/// A component hosting an MQTT broker.
///
/// The embedded broker cannot be stopped; it serves until the process
/// exits, so a component is started once and never reconfigured.
pub struct MqttBroker {
    name: String,
    server: Server,
}

impl MqttBroker {
    /// Validate `config`, start the broker and wait until it accepts
    /// connections.
    pub async fn start(name: impl Into<String>, config: &BrokerConfig) -> Result<Self> {
        let name = name.into();
        let listen = config.listen_addr(&name)?;

        let server = Server::new(ServerConfig::new(listen).with_id(name.clone()));
        server.start().map_err(Error::Broker)?;
        server
            .wait_ready(BROKER_START_TIMEOUT)
            .await
            .map_err(Error::Broker)?;

        info!("broker {} listening on {}", name, listen);
        Ok(Self { name, server })
    }

    /// Current readings: broker name, listen address, process ID and state.
    pub fn readings(&self) -> Readings {
        let listen = self.server.listen_addr();
        let mut readings = Readings::new();
        readings.insert("broker_name".into(), BROKER_NAME.into());
        readings.insert("broker_ip".into(), listen.ip().to_string().into());
        readings.insert("broker_port".into(), listen.port().into());
        readings.insert("process_id".into(), std::process::id().into());
        readings.insert("state".into(), describe_state(&self.server.state()).into());
        readings
    }

    /// Arbitrary commands are not supported.
    pub async fn do_command(&self, _command: &Map<String, Value>) -> Result<Map<String, Value>> {
        Err(Error::Unimplemented)
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Listen address.
    pub fn listen_addr(&self) -> SocketAddr {
        self.server.listen_addr()
    }

    /// Check if the broker is serving.
    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }
}

fn describe_state(state: &ServerState) -> String {
    match state {
        ServerState::Idle => "idle".to_string(),
        ServerState::Running => "running".to_string(),
        ServerState::Failed(e) => format!("failed: {}", e),
    }
}
