//! MQTT transport for mqttsensor.
//!
//! A thin client over rumqttc: dial a broker, subscribe a topic with a
//! [`Handler`] and publish messages. Connect and subscribe wait for the
//! broker's acknowledgement so setup failures surface to the caller.
//!
//! [`Server`] embeds a rumqttd broker for hosts that run their own.
//!
//! # Example
//!
//! ```no_run
//! use mqttsensor_mqtt::{Dialer, QoS, WriteOption};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let conn = Dialer::new()
//!         .with_id("example")
//!         .with_ack_timeout(Duration::from_secs(5))
//!         .dial("mqtt://127.0.0.1:1883")
//!         .await?;
//!
//!     conn.subscribe_func("sensors/room1", QoS::AtLeastOnce, |msg| {
//!         println!("Received: {:?}", msg.payload_str());
//!         Ok(())
//!     })
//!     .await?;
//!     conn.write_to_topic_with_opts(b"{\"t\":21.5}", "sensors/room1", &[WriteOption::Qos(QoS::AtLeastOnce)])
//!         .await?;
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod router;
mod server;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
mod types;

pub use client::{BrokerAddr, Conn, Dialer, WriteOption};
pub use error::{Error, Result};
pub use router::{Handler, HandlerFunc, Message, Router, handler_func};
pub use server::{Server, ServerConfig, ServerState};
pub use types::QoS;
