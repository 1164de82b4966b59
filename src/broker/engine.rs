//! Broker engine
//!
//! This module contains the broker actor responsible for:
//! - owning the topic registry and the table of live connections
//! - fanning each publish out to the current subscribers of its topic
//! - spawning the subscribe hook on every new subscription
//! - tearing connections down on disconnect, overflow or shutdown
//!
//! Concurrency and usage notes:
//! - `Broker` is never shared. It is moved into `Broker::run`, and every
//!   registry mutation and fan-out happens there, one command at a time.
//!   That loop is the single writer of the registry.
//! - Everything else talks to it through a cloneable `BrokerHandle`. Callers
//!   wait only for the command to be accepted and for the loop's reply; they
//!   never wait on a subscriber's queue, because fan-out uses `try_send`.
//! - The loop holds only a weak sender to its own command channel, so it
//!   stops once every external handle is gone.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::broker::BrokerError;
use crate::broker::hook::SubscribeHook;
use crate::broker::message::{BrokerStats, PublishMessage, Subscription};
use crate::broker::registry::TopicRegistry;
use crate::client::{Connection, ConnectionId, Enqueue, OverflowPolicy};
use crate::config::BrokerSettings;

enum Command {
    Register {
        connection: Connection,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        connection: ConnectionId,
        topic: String,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        connection: ConnectionId,
        topic: String,
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        connection: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        message: PublishMessage,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<BrokerStats>,
    },
    Shutdown,
}

pub struct Broker {
    registry: TopicRegistry,
    connections: HashMap<ConnectionId, Connection>,
    hook: Arc<dyn SubscribeHook>,
    overflow_policy: OverflowPolicy,
    commands: mpsc::Receiver<Command>,
    handle: mpsc::WeakSender<Command>,
}

/// Cloneable entry point to a running [`Broker`].
#[derive(Clone, Debug)]
pub struct BrokerHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("connections", &self.connections.len())
            .field("topics", &self.registry.topic_count())
            .field("overflow_policy", &self.overflow_policy)
            .finish()
    }
}

impl Broker {
    /// Build a broker and the first handle to it. Nothing is processed until
    /// the broker is moved into [`Broker::run`].
    pub fn new(hook: Arc<dyn SubscribeHook>, settings: &BrokerSettings) -> (Self, BrokerHandle) {
        let (tx, rx) = mpsc::channel(settings.command_buffer.max(1));
        let broker = Self {
            registry: TopicRegistry::new(),
            connections: HashMap::new(),
            hook,
            overflow_policy: settings.overflow_policy,
            commands: rx,
            handle: tx.downgrade(),
        };
        (broker, BrokerHandle { commands: tx })
    }

    /// The broker's event loop. Start it exactly once; it returns after
    /// `shutdown` or once every handle has been dropped, and disconnects all
    /// remaining connections on the way out.
    pub async fn run(mut self) {
        info!(policy = ?self.overflow_policy, "broker started");

        while let Some(command) = self.commands.recv().await {
            if !self.apply(command) {
                break;
            }
        }

        self.disconnect_all();
        info!("broker stopped");
    }

    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Register { connection, reply } => {
                self.register(connection);
                let _ = reply.send(());
            }
            Command::Subscribe {
                connection,
                topic,
                reply,
            } => {
                let _ = reply.send(self.subscribe(connection, &topic));
            }
            Command::Unsubscribe {
                connection,
                topic,
                reply,
            } => {
                let _ = reply.send(self.unsubscribe(connection, &topic));
            }
            Command::Disconnect { connection, reply } => {
                let _ = reply.send(self.disconnect(connection));
            }
            Command::Publish { message, reply } => {
                let _ = reply.send(self.publish(message));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown => {
                info!("broker shutdown requested");
                return false;
            }
        }
        true
    }

    /// Track a connection so it can hold subscriptions.
    pub fn register(&mut self, connection: Connection) {
        debug!(connection = %connection.id, principal = %connection.principal, "connection registered");
        self.connections.insert(connection.id, connection);
    }

    /// Subscribe `connection` to `topic`. Returns `true` on the
    /// absent→subscribed edge, which is also the only time the hook runs.
    pub fn subscribe(&mut self, connection: ConnectionId, topic: &str) -> bool {
        let Some(conn) = self.connections.get(&connection) else {
            warn!(%connection, topic, "subscribe from unknown connection ignored");
            return false;
        };

        if !self.registry.subscribe(connection, topic) {
            debug!(%connection, topic, "already subscribed");
            return false;
        }

        let subscription = Subscription {
            connection,
            principal: conn.principal.clone(),
            topic: topic.to_string(),
            created_at: self
                .registry
                .subscribed_at(connection, topic)
                .unwrap_or_else(chrono::Utc::now),
        };
        info!(%connection, topic, "subscribed");
        self.spawn_hook(subscription);
        true
    }

    fn spawn_hook(&self, subscription: Subscription) {
        let Some(commands) = self.handle.upgrade() else {
            debug!(topic = %subscription.topic, "no live handles, skipping subscribe hook");
            return;
        };
        let broker = BrokerHandle { commands };
        let hook = Arc::clone(&self.hook);

        tokio::spawn(async move {
            let topic = subscription.topic.clone();
            let connection = subscription.connection;
            let run = tokio::spawn(async move { hook.on_subscribe(subscription, broker).await });

            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%connection, %topic, error = %e, "subscribe hook failed"),
                Err(e) => error!(%connection, %topic, error = %e, "subscribe hook panicked"),
            }
        });
    }

    /// Remove `(connection, topic)`; a missing pair is a no-op.
    pub fn unsubscribe(&mut self, connection: ConnectionId, topic: &str) -> bool {
        let removed = self.registry.unsubscribe(connection, topic);
        if removed {
            info!(%connection, topic, "unsubscribed");
        }
        removed
    }

    /// Remove a connection from every topic and drop its queue. Returns
    /// `false` when it was already gone.
    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        let topics = self.registry.remove_connection(connection);
        let Some(conn) = self.connections.remove(&connection) else {
            return false;
        };
        conn.close();
        info!(%connection, principal = %conn.principal, topics = topics.len(), "connection disconnected");
        true
    }

    /// Fan `message` out to the current subscribers of its topic. Returns the
    /// number of queues that accepted the frame. A topic nobody holds is a
    /// silent no-op.
    pub fn publish(&mut self, message: PublishMessage) -> usize {
        let subscribers = self.registry.subscribers(&message.topic);
        if subscribers.is_empty() {
            debug!(topic = %message.topic, "publish to topic without subscribers");
            return 0;
        }

        let mut delivered = 0;
        let mut slow = Vec::new();

        for id in subscribers {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            match conn.try_enqueue(message.payload.clone()) {
                Enqueue::Queued => delivered += 1,
                Enqueue::Full => match self.overflow_policy {
                    OverflowPolicy::DropNewest => {
                        warn!(connection = %id, topic = %message.topic, "outbound queue full, frame dropped");
                    }
                    OverflowPolicy::Disconnect => {
                        warn!(connection = %id, topic = %message.topic, "outbound queue full, disconnecting slow subscriber");
                        slow.push(id);
                    }
                },
                Enqueue::Closed => slow.push(id),
            }
        }

        for id in slow {
            self.disconnect(id);
        }

        debug!(
            topic = %message.topic,
            origin = message.origin.as_deref().unwrap_or("-"),
            delivered,
            "published"
        );
        delivered
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            connections: self.connections.len(),
            topics: self.registry.topic_count(),
            subscriptions: self.registry.subscription_count(),
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn is_registered(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    fn disconnect_all(&mut self) {
        let count = self.connections.len();
        for (_, conn) in self.connections.drain() {
            conn.close();
        }
        self.registry.clear();
        if count > 0 {
            info!(connections = count, "closed remaining connections");
        }
    }
}

impl BrokerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)
    }

    pub async fn register(&self, connection: Connection) -> Result<(), BrokerError> {
        self.request(|reply| Command::Register { connection, reply })
            .await
    }

    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        topic: impl Into<String>,
    ) -> Result<bool, BrokerError> {
        let topic = topic.into();
        self.request(|reply| Command::Subscribe {
            connection,
            topic,
            reply,
        })
        .await
    }

    pub async fn unsubscribe(
        &self,
        connection: ConnectionId,
        topic: impl Into<String>,
    ) -> Result<bool, BrokerError> {
        let topic = topic.into();
        self.request(|reply| Command::Unsubscribe {
            connection,
            topic,
            reply,
        })
        .await
    }

    /// Safe to call any number of times and concurrently with publishes.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<bool, BrokerError> {
        self.request(|reply| Command::Disconnect { connection, reply })
            .await
    }

    /// Hand `message` to the broker loop and wait for its fan-out to be
    /// issued. Returns the number of subscriber queues that accepted it.
    pub async fn publish(&self, message: PublishMessage) -> Result<usize, BrokerError> {
        self.request(|reply| Command::Publish { message, reply })
            .await
    }

    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Ask the loop to stop. Commands queued behind this one are dropped.
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| BrokerError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
