//! The `client` module defines the broker-side view of one connected client.
//!
//! A [`Connection`] owns the producer half of a bounded outbound queue; the
//! matching [`Outbound`] half is drained by the connection's writer task.

pub mod connection;

pub use connection::{Connection, ConnectionId, Enqueue, Frame, OverflowPolicy, Outbound};

#[cfg(test)]
mod tests;
