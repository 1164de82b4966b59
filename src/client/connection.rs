//! Connection representation
//!
//! `Connection` models one accepted WebSocket and holds the sending side of a
//! bounded per-connection queue. The broker is the only owner of a
//! `Connection`; dropping it closes the queue, which lets the writer task
//! flush what is left and close the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// One outbound payload, written verbatim to the socket.
pub type Frame = Bytes;

/// What happens when a publish finds a subscriber's queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Treat the subscriber as too slow and disconnect it.
    Disconnect,
    /// Discard the frame being published and keep the connection.
    DropNewest,
}

/// Outcome of a single non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    Full,
    Closed,
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub principal: String,
    sender: mpsc::Sender<Frame>,
    closed: Arc<AtomicBool>,
}

/// Consumer half of a connection's queue, owned by its writer task.
#[derive(Debug)]
pub struct Outbound {
    pub id: ConnectionId,
    pub receiver: mpsc::Receiver<Frame>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Create a connection for `principal` with a queue holding at most
    /// `capacity` frames. The `id` is a fresh UUID, so one principal may hold
    /// several connections at once.
    pub fn new(principal: impl Into<String>, capacity: usize) -> (Self, Outbound) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let closed = Arc::new(AtomicBool::new(false));

        let connection = Self {
            id,
            principal: principal.into(),
            sender,
            closed: Arc::clone(&closed),
        };
        let outbound = Outbound {
            id,
            receiver,
            closed,
        };
        (connection, outbound)
    }

    /// Try to queue `frame` without waiting.
    pub fn try_enqueue(&self, frame: Frame) -> Enqueue {
        if self.is_closed() {
            return Enqueue::Closed;
        }
        match self.sender.try_send(frame) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Mark the connection closed. Returns `true` only for the first call.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Frames currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

impl Outbound {
    /// Whether the broker has already torn this connection down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
