//! Embedded MQTT broker using rumqttd.
//!
//! [`Server`] runs a rumqttd broker with a single MQTT 3.1.1 TCP listener on
//! a dedicated thread. rumqttd has no shutdown hook, so a started broker
//! keeps serving until the process exits.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{error, info, warn};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listener address.
    pub listen: SocketAddr,
    /// Server ID, used to name the listener.
    pub id: String,
    /// Max incoming payload size in bytes.
    pub max_payload_size: usize,
    /// Max inflight messages per connection.
    pub max_inflight: u16,
}

impl ServerConfig {
    /// Create a config listening on `listen`.
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            id: "mqtt-server".to_string(),
            max_payload_size: 1024 * 1024,
            max_inflight: 100,
        }
    }

    /// Set server ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn to_rumqttd_config(&self) -> Config {
        let mut servers = HashMap::new();
        servers.insert(
            self.id.clone(),
            ServerSettings {
                name: self.id.clone(),
                listen: self.listen,
                tls: None,
                next_connection_delay_ms: 1,
                connections: ConnectionSettings {
                    connection_timeout_ms: 60000,
                    max_payload_size: self.max_payload_size,
                    max_inflight_count: self.max_inflight as usize,
                    auth: None,
                    external_auth: None,
                    dynamic_filters: true,
                },
            },
        );

        Config {
            id: 0,
            router: RouterConfig {
                max_connections: 10000,
                max_outgoing_packet_count: 200,
                max_segment_size: 1024 * 1024,
                max_segment_count: 10,
                ..Default::default()
            },
            v4: Some(servers),
            v5: None,
            ws: None,
            prometheus: None,
            metrics: None,
            console: None,
            bridge: None,
            cluster: None,
        }
    }
}

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    /// Not started yet.
    Idle,
    /// Broker thread is running.
    Running,
    /// Broker exited with an error.
    Failed(String),
}

/// Embedded MQTT broker.
pub struct Server {
    config: ServerConfig,
    state: Arc<Mutex<ServerState>>,
}

impl Server {
    /// Create a server that is not started yet.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ServerState::Idle)),
        }
    }

    /// Start the broker on its own thread.
    ///
    /// Returns once the thread is spawned; use [`wait_ready`](Self::wait_ready)
    /// to wait for the listener.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Idle {
                return Err(Error::ServerRunning);
            }
            *state = ServerState::Running;
        }

        let rumqttd_config = self.config.to_rumqttd_config();
        let state = self.state.clone();
        let listen = self.config.listen;

        info!("starting MQTT broker on {}", listen);

        let spawned = std::thread::Builder::new()
            .name(format!("mqtt-broker-{}", listen.port()))
            .spawn(move || {
                let mut broker = Broker::new(rumqttd_config);
                // Blocks while the broker serves.
                if let Err(e) = broker.start() {
                    error!("MQTT broker on {} stopped: {}", listen, e);
                    *state.lock() = ServerState::Failed(e.to_string());
                }
            });

        if let Err(e) = spawned {
            let err = Error::Server(e.to_string());
            *self.state.lock() = ServerState::Failed(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    /// Wait until the listener accepts TCP connections.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let addr = self.connect_addr();
        let ready = async {
            loop {
                if let ServerState::Failed(e) = self.state() {
                    return Err(Error::Server(e));
                }
                if TcpStream::connect(addr).await.is_ok() {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        match tokio::time::timeout(timeout, ready).await {
            Ok(result) => result,
            Err(_) => {
                warn!("MQTT broker on {} not ready after {:?}", addr, timeout);
                Err(Error::Timeout("broker start"))
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state.lock().clone()
    }

    /// Check if the broker is running.
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Listener address.
    pub fn listen_addr(&self) -> SocketAddr {
        self.config.listen
    }

    // An unspecified listen address is reached through loopback.
    fn connect_addr(&self) -> SocketAddr {
        let mut addr = self.config.listen;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        addr
    }
}
