//! The `persistence` module is the boundary to the relay's data.
//!
//! The broker never touches storage. HTTP handlers persist chat messages
//! through [`MessageStore`] before publishing, and the notification hook
//! reads outstanding items through [`NotificationSource`]. `sled_store`
//! provides an embedded implementation of both.

pub mod models;
pub mod sled_store;

use async_trait::async_trait;
use thiserror::Error;

pub use models::{Conversation, FearLadder, NewMessage, StoredMessage, User, UserId};
pub use sled_store::SledStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Read side used by the notification hook.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Resolve the user behind an authenticated principal.
    async fn find_user(&self, principal: &str) -> Result<Option<User>, StorageError>;

    async fn behavioural_experiments(&self, user: UserId) -> Result<Vec<u64>, StorageError>;

    async fn fear_ladders(&self, user: UserId) -> Result<Vec<FearLadder>, StorageError>;

    async fn evidence_collection(&self, user: UserId) -> Result<Vec<u64>, StorageError>;
}

/// Chat message persistence used by the message endpoints.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn conversation(&self, id: u64) -> Result<Option<Conversation>, StorageError>;

    async fn save_message(&self, message: NewMessage) -> Result<StoredMessage, StorageError>;

    /// Returns `false` when no message with `id` exists.
    async fn delete_message(&self, id: u64) -> Result<bool, StorageError>;
}
