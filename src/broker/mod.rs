//! The broker module contains the serialized publish/subscribe core:
//! the topic registry, the actor that owns it and the subscribe hook seam.
//!
//! Public types:
//! - `Broker`: the event loop; construct once and drive with `Broker::run`.
//! - `BrokerHandle`: cheap, cloneable entry point used by every other task.
//! - `SubscribeHook`: strategy invoked on each new subscription.

pub mod engine;
pub mod hook;
pub mod message;
pub mod registry;

use thiserror::Error;

pub use engine::{Broker, BrokerHandle};
pub use hook::{NoopHook, SubscribeHook};
pub use message::{BrokerStats, PublishMessage, Subscription};
pub use registry::TopicRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The event loop has stopped and no longer accepts commands.
    #[error("broker is not running")]
    Closed,
}
