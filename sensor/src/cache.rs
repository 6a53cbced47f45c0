//! Single-slot cache holding the latest message of a subscription.
//!
//! The transport's event loop calls [`LatestValueCache::update`] for every
//! delivery while readers on other threads call
//! [`LatestValueCache::snapshot`]. Decoding happens before the slot lock is
//! taken; the lock only guards an `Arc` swap, so readers always see either
//! the previous or the new message as a whole.

use crate::payload::{Payload, PayloadFormat};
use chrono::{DateTime, TimeDelta, Utc};
use mqttsensor_mqtt::QoS;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// A received message. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    /// Decoded payload.
    pub payload: Payload,
    /// Topic the message arrived on.
    pub topic: String,
    /// QoS the message was delivered with.
    pub qos: QoS,
    /// Time the message was received.
    pub received_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Build a message stamped with the current time.
    pub fn new(payload: Payload, topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            payload,
            topic: topic.into(),
            qos,
            received_at: Utc::now(),
        }
    }

    /// Time elapsed since the message was received.
    pub fn age(&self) -> TimeDelta {
        Utc::now().signed_duration_since(self.received_at)
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Messages stored.
    pub updates: u64,
    /// Messages discarded because the payload failed to decode.
    pub decode_errors: u64,
}

/// Thread-safe single-slot mailbox for the most recent message.
#[derive(Debug)]
pub struct LatestValueCache {
    format: PayloadFormat,
    slot: Mutex<Option<Arc<StoredMessage>>>,
    updates: AtomicU64,
    decode_errors: AtomicU64,
}

impl Default for LatestValueCache {
    fn default() -> Self {
        Self::new(PayloadFormat::default())
    }
}

impl LatestValueCache {
    /// Create an empty cache decoding payloads with `format`.
    pub fn new(format: PayloadFormat) -> Self {
        Self {
            format,
            slot: Mutex::new(None),
            updates: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Payload format used by [`update`](Self::update).
    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Decode `payload` and replace the stored message.
    ///
    /// A payload that fails to decode is logged, counted and dropped; the
    /// stored message is left unchanged.
    pub fn update(&self, payload: &[u8], topic: &str, qos: QoS) {
        match self.format.decode(payload) {
            Ok(decoded) => self.store(StoredMessage::new(decoded, topic, qos)),
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(topic, error = %e, "discarding undecodable payload");
            }
        }
    }

    /// Replace the stored message.
    pub fn store(&self, message: StoredMessage) {
        let message = Arc::new(message);
        let previous = self.slot.lock().replace(message);
        self.updates.fetch_add(1, Ordering::Relaxed);
        // Dropped outside the lock.
        drop(previous);
        debug!("latest value updated");
    }

    /// The latest message, or `None` if nothing has been received yet.
    ///
    /// Does not consume the value.
    pub fn snapshot(&self) -> Option<Arc<StoredMessage>> {
        self.slot.lock().clone()
    }

    /// Whether no message is stored.
    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Drop the stored message.
    pub fn clear(&self) {
        let previous = self.slot.lock().take();
        drop(previous);
    }

    /// Delivery counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            updates: self.updates.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}
