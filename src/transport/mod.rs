//! The `transport` module is responsible for the client-facing side of the
//! relay's WebSocket connections.
//!
//! It defines the control frames clients send and the envelopes the relay
//! publishes, and implements the delivery pump that moves frames between a
//! socket and the broker.

pub mod message;
pub mod websocket;

pub use websocket::{CloseReason, PumpSettings, serve_socket};

#[cfg(test)]
mod tests;
