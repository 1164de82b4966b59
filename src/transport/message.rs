//! Wire formats.
//!
//! Clients send JSON control frames tagged by `type`. The server writes
//! published payloads verbatim; the envelopes below are the payloads this
//! relay produces itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NOTIFICATION_TOPIC_PREFIX: &str = "notifications/";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed control frame: {0}")]
    Malformed(String),
    #[error("invalid topic: {0}")]
    InvalidTopic(&'static str),
    #[error("topic {0} belongs to another principal")]
    Forbidden(String),
}

impl ClientMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        serde_json::from_slice(bytes).map_err(|e| FrameError::Malformed(e.to_string()))
    }

    pub fn topic(&self) -> &str {
        match self {
            ClientMessage::Subscribe { topic } | ClientMessage::Unsubscribe { topic } => topic,
        }
    }

    /// Checks the topic's shape and that `principal` may use it.
    pub fn validate(&self, principal: &str, max_topic_len: usize) -> Result<(), FrameError> {
        validate_topic(self.topic(), max_topic_len)?;
        authorize_topic(self.topic(), principal)
    }
}

/// Topics are opaque keys, but they must be non-empty, bounded and free of
/// whitespace and control characters.
pub fn validate_topic(topic: &str, max_len: usize) -> Result<(), FrameError> {
    if topic.is_empty() {
        return Err(FrameError::InvalidTopic("empty"));
    }
    if topic.len() > max_len {
        return Err(FrameError::InvalidTopic("too long"));
    }
    if topic.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(FrameError::InvalidTopic("contains whitespace or control characters"));
    }
    Ok(())
}

/// A `notifications/<p>` topic may only be used by principal `p`.
pub fn authorize_topic(topic: &str, principal: &str) -> Result<(), FrameError> {
    match topic.strip_prefix(NOTIFICATION_TOPIC_PREFIX) {
        Some(owner) if owner != principal => Err(FrameError::Forbidden(topic.to_string())),
        _ => Ok(()),
    }
}

/// The principal named by a notification topic, if `topic` is one.
pub fn notification_principal(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(NOTIFICATION_TOPIC_PREFIX)
        .filter(|p| !p.is_empty())
}

pub fn notification_topic(principal: &str) -> String {
    format!("{NOTIFICATION_TOPIC_PREFIX}{principal}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "BE")]
    BehaviouralExperiment,
    #[serde(rename = "FL")]
    FearLadder,
    #[serde(rename = "EC")]
    EvidenceCollection,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 3] = [
        NotificationKind::BehaviouralExperiment,
        NotificationKind::FearLadder,
        NotificationKind::EvidenceCollection,
    ];

    pub fn code(self) -> &'static str {
        match self {
            NotificationKind::BehaviouralExperiment => "BE",
            NotificationKind::FearLadder => "FL",
            NotificationKind::EvidenceCollection => "EC",
        }
    }
}

/// `{"type":"notification","subType":"BE","payload":[1,2]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub sub_type: NotificationKind,
    pub payload: Vec<u64>,
}

impl NotificationEnvelope {
    pub fn new(sub_type: NotificationKind, payload: Vec<u64>) -> Self {
        Self {
            kind: "notification".to_string(),
            sub_type,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub read_by: Vec<u64>,
    pub user: String,
}

/// Broadcast after a chat message has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreatedEnvelope {
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sub_type: String,
    pub message: ChatMessage,
}

/// `{"channel":"general","type":"message","subType":"message_deleted","id":7}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedEnvelope {
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sub_type: String,
    pub id: u64,
}

impl MessageDeletedEnvelope {
    pub fn new(channel: impl Into<String>, id: u64) -> Self {
        Self {
            channel: channel.into(),
            kind: "message".to_string(),
            sub_type: "message_deleted".to_string(),
            id,
        }
    }
}
