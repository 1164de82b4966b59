//! Subscribe hook
//!
//! The broker calls the hook once for every absent→subscribed transition,
//! always on a freshly spawned task, so a hook may await slow I/O freely. It
//! receives a `BrokerHandle` and delivers anything it produces through an
//! ordinary publish.

use async_trait::async_trait;

use crate::broker::engine::BrokerHandle;
use crate::broker::message::Subscription;
use crate::utils::error::RelayError;

#[async_trait]
pub trait SubscribeHook: Send + Sync {
    /// Called after `subscription` has been recorded. Errors are logged by
    /// the broker and never undo the subscription.
    async fn on_subscribe(
        &self,
        subscription: Subscription,
        broker: BrokerHandle,
    ) -> Result<(), RelayError>;
}

/// Hook that does nothing; for brokers without an initial payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl SubscribeHook for NoopHook {
    async fn on_subscribe(&self, _: Subscription, _: BrokerHandle) -> Result<(), RelayError> {
        Ok(())
    }
}
