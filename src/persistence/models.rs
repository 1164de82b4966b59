use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub principal: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FearLadder {
    pub ladder_id: u64,
    pub step: u32,
}

/// A pair of users allowed to message each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: u64,
    pub source_user_id: UserId,
    pub source_user: String,
    pub destination_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: u64,
    pub channel: String,
    pub text: String,
    pub source_user_id: UserId,
    pub source_user: String,
    pub destination_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: u64,
    pub conversation_id: u64,
    pub channel: String,
    pub text: String,
    pub source_user_id: UserId,
    pub source_user: String,
    pub destination_user_id: UserId,
    pub read_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}
