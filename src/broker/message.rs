//! Message definitions for the broker
//!
//! `PublishMessage` is what producers hand to the broker. The payload is
//! opaque bytes and is written to every subscriber verbatim; the broker never
//! stores it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::ConnectionId;

#[derive(Debug, Clone)]
pub struct PublishMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Free-form description of who published, used only for logging.
    pub origin: Option<String>,
}

impl PublishMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            origin: None,
        }
    }

    /// Serialize `value` as JSON and wrap it for `topic`.
    pub fn json<T: Serialize>(topic: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(topic, payload))
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// A live (connection, topic) relation, handed to the subscribe hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub connection: ConnectionId,
    pub principal: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub connections: usize,
    pub topics: usize,
    pub subscriptions: usize,
}
