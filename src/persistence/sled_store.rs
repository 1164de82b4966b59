use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use sled::{Db, IVec, Tree};
use tracing::debug;

use crate::persistence::models::{
    Conversation, FearLadder, NewMessage, StoredMessage, User, UserId,
};
use crate::persistence::{MessageStore, NotificationSource, StorageError};

const USERS: &str = "users";
const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";
const BEHAVIOURAL_EXPERIMENTS: &str = "notifications/be";
const FEAR_LADDERS: &str = "notifications/fl";
const EVIDENCE_COLLECTION: &str = "notifications/ec";

#[derive(Serialize, Deserialize)]
struct NotificationItem {
    id: u64,
}

/// Embedded store backed by sled. Each record kind lives in its own tree;
/// notification items are keyed by `user id ++ item id` so a user's items
/// are one prefix scan.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn tree(&self, name: &str) -> Result<Tree, StorageError> {
        Ok(self.db.open_tree(name)?)
    }

    fn get_json<T: DeserializeOwned>(&self, tree: &str, key: &[u8]) -> Result<Option<T>, StorageError> {
        match self.tree(tree)?.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, tree: &str, key: &[u8], value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.tree(tree)?.insert(key, bytes)?;
        Ok(())
    }

    /// Every decodable record under `user`'s prefix.
    fn scan_user<T: DeserializeOwned>(&self, tree: &str, user: UserId) -> Result<Vec<T>, StorageError> {
        decode_records(tree, self.tree(tree)?.scan_prefix(user.to_be_bytes()))
    }

    /// Run `f` on the blocking pool; sled calls block the calling thread.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&SledStore) -> Result<T, StorageError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    pub fn put_user(&self, user: &User) -> Result<(), StorageError> {
        self.put_json(USERS, user.principal.as_bytes(), user)
    }

    pub fn put_conversation(&self, conversation: &Conversation) -> Result<(), StorageError> {
        self.put_json(CONVERSATIONS, &conversation.id.to_be_bytes(), conversation)
    }

    pub fn add_behavioural_experiment(&self, user: UserId, id: u64) -> Result<(), StorageError> {
        self.put_json(BEHAVIOURAL_EXPERIMENTS, &item_key(user, id), &NotificationItem { id })
    }

    pub fn add_fear_ladder(&self, user: UserId, ladder: &FearLadder) -> Result<(), StorageError> {
        self.put_json(FEAR_LADDERS, &item_key(user, ladder.ladder_id), ladder)
    }

    pub fn add_evidence_collection(&self, user: UserId, id: u64) -> Result<(), StorageError> {
        self.put_json(EVIDENCE_COLLECTION, &item_key(user, id), &NotificationItem { id })
    }

    /// Write raw bytes under a notification key, as another producer might.
    #[cfg(test)]
    pub(super) fn put_raw_fear_ladder(&self, user: UserId, id: u64, raw: &[u8]) -> Result<(), StorageError> {
        self.tree(FEAR_LADDERS)?.insert(item_key(user, id), raw)?;
        Ok(())
    }

    pub fn message(&self, id: u64) -> Result<Option<StoredMessage>, StorageError> {
        self.get_json(MESSAGES, &id.to_be_bytes())
    }
}

/// Iterator faults abort the scan; records that fail to decode are skipped.
pub(super) fn decode_records<T, I>(tree: &str, records: I) -> Result<Vec<T>, StorageError>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = sled::Result<(IVec, IVec)>>,
{
    let records = records.into_iter().collect::<Result<Vec<_>, _>>()?;
    let items = records
        .into_iter()
        .filter_map(|(key, val)| match serde_json::from_slice(&val) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!(tree, key = ?key, error = %e, "skipping undecodable record");
                None
            }
        })
        .collect();
    Ok(items)
}

fn item_key(user: UserId, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&user.to_be_bytes());
    key.extend_from_slice(&id.to_be_bytes());
    key
}

#[async_trait]
impl NotificationSource for SledStore {
    async fn find_user(&self, principal: &str) -> Result<Option<User>, StorageError> {
        let principal = principal.to_owned();
        self.blocking(move |store| store.get_json(USERS, principal.as_bytes()))
            .await
    }

    async fn behavioural_experiments(&self, user: UserId) -> Result<Vec<u64>, StorageError> {
        let items: Vec<NotificationItem> = self
            .blocking(move |store| store.scan_user(BEHAVIOURAL_EXPERIMENTS, user))
            .await?;
        Ok(items.into_iter().map(|i| i.id).collect())
    }

    async fn fear_ladders(&self, user: UserId) -> Result<Vec<FearLadder>, StorageError> {
        self.blocking(move |store| store.scan_user(FEAR_LADDERS, user))
            .await
    }

    async fn evidence_collection(&self, user: UserId) -> Result<Vec<u64>, StorageError> {
        let items: Vec<NotificationItem> = self
            .blocking(move |store| store.scan_user(EVIDENCE_COLLECTION, user))
            .await?;
        Ok(items.into_iter().map(|i| i.id).collect())
    }
}

#[async_trait]
impl MessageStore for SledStore {
    async fn conversation(&self, id: u64) -> Result<Option<Conversation>, StorageError> {
        self.blocking(move |store| store.get_json(CONVERSATIONS, &id.to_be_bytes()))
            .await
    }

    async fn save_message(&self, message: NewMessage) -> Result<StoredMessage, StorageError> {
        self.blocking(move |store| {
            let stored = StoredMessage {
                id: store.db.generate_id()? + 1,
                conversation_id: message.conversation_id,
                channel: message.channel,
                text: message.text,
                source_user_id: message.source_user_id,
                source_user: message.source_user,
                destination_user_id: message.destination_user_id,
                read_by: Vec::new(),
                created_at: Utc::now(),
            };
            store.put_json(MESSAGES, &stored.id.to_be_bytes(), &stored)?;
            Ok(stored)
        })
        .await
    }

    async fn delete_message(&self, id: u64) -> Result<bool, StorageError> {
        self.blocking(move |store| Ok(store.tree(MESSAGES)?.remove(id.to_be_bytes())?.is_some()))
            .await
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .finish()
    }
}
