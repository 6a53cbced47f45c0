//! Router for incoming MQTT messages.
//!
//! Delivers each incoming message to the handler registered for its exact
//! topic, or to a fallback handler when no route matches. Topic filters with
//! wildcards are passed to the broker untouched but are only reachable through
//! the fallback.

use crate::error::{Error, Result};
use crate::types::QoS;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// MQTT message received from a subscription.
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic the message was published to.
    pub topic: String,
    /// Message payload.
    pub payload: Bytes,
    /// QoS level the message was delivered with.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Packet ID (for QoS > 0).
    pub packet_id: Option<u16>,
}

impl Message {
    /// Create a new message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            packet_id: None,
        }
    }

    /// Set the QoS level.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Handler trait for processing MQTT messages.
///
/// Handlers run on the connection's event loop task and must not block.
pub trait Handler: Send + Sync {
    /// Handle an incoming MQTT message.
    fn handle_message(&self, msg: &Message) -> Result<()>;
}

/// Handler function type.
pub type HandlerFunc = dyn Fn(&Message) -> Result<()> + Send + Sync;

struct FnHandler {
    f: Box<HandlerFunc>,
}

impl Handler for FnHandler {
    fn handle_message(&self, msg: &Message) -> Result<()> {
        (self.f)(msg)
    }
}

/// Wrap a closure as a [`Handler`].
pub fn handler_func<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f: Box::new(f) })
}

/// Exact-topic message router.
pub struct Router {
    routes: RwLock<HashMap<String, Arc<dyn Handler>>>,
    fallback: RwLock<Option<Arc<dyn Handler>>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new empty Router.
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            fallback: RwLock::new(None),
        }
    }

    /// Register a handler function for the given topic.
    ///
    /// # Example
    ///
    /// ```
    /// use mqttsensor_mqtt::Router;
    ///
    /// let router = Router::new();
    /// router.handle_func("device/gear-001/state", |msg| {
    ///     println!("Received: {:?}", msg.payload);
    ///     Ok(())
    /// });
    /// ```
    pub fn handle_func<F>(&self, topic: &str, f: F)
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(topic, handler_func(f));
    }

    /// Register a handler for the given topic.
    ///
    /// Returns the handler it replaced, if any.
    pub fn handle(&self, topic: &str, handler: Arc<dyn Handler>) -> Option<Arc<dyn Handler>> {
        let previous = self.routes.write().insert(topic.to_string(), handler);
        if previous.is_some() {
            debug!("replaced handler for topic: {}", topic);
        }
        previous
    }

    /// Register the handler used when no exact route matches.
    pub fn set_fallback(&self, handler: Arc<dyn Handler>) {
        *self.fallback.write() = Some(handler);
    }

    /// Register a fallback handler function.
    pub fn fallback_func<F>(&self, f: F)
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.set_fallback(handler_func(f));
    }

    /// Remove the handler for the given topic.
    pub fn remove(&self, topic: &str) -> bool {
        self.routes.write().remove(topic).is_some()
    }

    /// Check if a topic has a handler.
    pub fn has_handler(&self, topic: &str) -> bool {
        self.routes.read().contains_key(topic)
    }

    /// Route an incoming message to its handler.
    pub fn dispatch(&self, msg: &Message) -> Result<()> {
        // Clone the handler out so it runs without the route table locked.
        let handler = self
            .routes
            .read()
            .get(&msg.topic)
            .cloned()
            .or_else(|| self.fallback.read().clone());

        match handler {
            Some(handler) => handler.handle_message(msg),
            None => {
                debug!("no handler found for topic: {}", msg.topic);
                Err(Error::NoHandlerFound(msg.topic.clone()))
            }
        }
    }
}

impl Handler for Router {
    fn handle_message(&self, msg: &Message) -> Result<()> {
        self.dispatch(msg)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut topics: Vec<String> = self.routes.read().keys().cloned().collect();
        topics.sort();
        f.debug_struct("Router")
            .field("topics", &topics)
            .field("fallback", &self.fallback.read().is_some())
            .finish()
    }
}
