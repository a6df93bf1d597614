//! Message definitions for the broker seam.
//!
//! `OutboundMessage` is what the publisher hands to a connection and
//! `Delivery` is what a connection hands back to the consumer. Bodies are
//! opaque bytes (JSON in practice); the metadata rides in AMQP properties:
//!
//! - `message_id`: UUID v4 generated per publish, used to count handler
//!   attempts across redeliveries
//! - `timestamp`: publish time, seconds since the UNIX epoch on the wire
//! - `sequence`: the producer's monotonically increasing counter, carried in
//!   the `x-sequence` header

use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const SEQUENCE_HEADER: &str = "x-sequence";

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub message_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    /// Serializes `payload` to JSON and stamps it with a fresh id and the
    /// current time.
    pub fn json<T: Serialize + ?Sized>(
        sequence: u64,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            sequence,
            timestamp: Utc::now(),
            body: serde_json::to_vec(payload)?,
        })
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Channel-scoped tag used to ack or nack this delivery.
    pub delivery_tag: u64,
    pub message_id: Option<String>,
    pub sequence: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Set by the broker when this message was delivered before and not acked.
    pub redelivered: bool,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Identity that survives redelivery: the message id, or a hash of the
    /// body for messages published without one.
    pub fn attempt_key(&self) -> String {
        match &self.message_id {
            Some(id) => id.clone(),
            None => {
                let mut hasher = DefaultHasher::new();
                self.body.hash(&mut hasher);
                format!("body-{:016x}", hasher.finish())
            }
        }
    }
}
