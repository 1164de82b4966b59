//! Topic registry
//!
//! Bidirectional index between topics and connections. A connection appears
//! in a topic's set iff that topic appears in the connection's map; every
//! mutation below updates both sides together. Empty entries are removed on
//! both sides so a drained registry is an empty registry.
//!
//! There is no locking here: the registry is owned by the broker loop and is
//! only ever touched from it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::client::ConnectionId;

#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, HashMap<String, DateTime<Utc>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `(connection, topic)`. Returns `true` only when the pair was
    /// absent; re-subscribing keeps the original creation time.
    pub fn subscribe(&mut self, connection: ConnectionId, topic: &str) -> bool {
        let held = self.connections.entry(connection).or_default();
        if held.contains_key(topic) {
            return false;
        }
        held.insert(topic.to_string(), Utc::now());
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(connection);
        true
    }

    /// Remove `(connection, topic)`. Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, connection: ConnectionId, topic: &str) -> bool {
        let Some(held) = self.connections.get_mut(&connection) else {
            return false;
        };
        if held.remove(topic).is_none() {
            return false;
        }
        if held.is_empty() {
            self.connections.remove(&connection);
        }
        self.detach(topic, connection);
        true
    }

    /// Drop every subscription of `connection`, returning the topics it held.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<String> {
        let Some(held) = self.connections.remove(&connection) else {
            return Vec::new();
        };
        let topics: Vec<String> = held.into_keys().collect();
        for topic in &topics {
            self.detach(topic, connection);
        }
        topics
    }

    fn detach(&mut self, topic: &str, connection: ConnectionId) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(&connection);
            if subscribers.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Current subscribers of `topic`, in no particular order.
    pub fn subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.topics
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, HashSet::len)
    }

    pub fn topics_of(&self, connection: ConnectionId) -> Vec<String> {
        self.connections
            .get(&connection)
            .map(|held| held.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, connection: ConnectionId, topic: &str) -> bool {
        self.connections
            .get(&connection)
            .is_some_and(|held| held.contains_key(topic))
    }

    pub fn subscribed_at(&self, connection: ConnectionId, topic: &str) -> Option<DateTime<Utc>> {
        self.connections.get(&connection)?.get(topic).copied()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.connections.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.connections.is_empty()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
        self.connections.clear();
    }

    /// Checks that both sides of the index agree.
    pub fn is_consistent(&self) -> bool {
        let forward = self.topics.iter().all(|(topic, subscribers)| {
            !subscribers.is_empty()
                && subscribers
                    .iter()
                    .all(|c| self.connections.get(c).is_some_and(|h| h.contains_key(topic)))
        });
        let backward = self.connections.iter().all(|(c, held)| {
            !held.is_empty()
                && held
                    .keys()
                    .all(|t| self.topics.get(t).is_some_and(|s| s.contains(c)))
        });
        forward && backward
    }
}
