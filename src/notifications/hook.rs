use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerHandle, PublishMessage, SubscribeHook, Subscription};
use crate::persistence::{NotificationSource, UserId};
use crate::transport::message::{NotificationEnvelope, NotificationKind, notification_principal};
use crate::utils::error::RelayError;

/// `SubscribeHook` that pushes a user's outstanding notifications.
pub struct NotificationHook {
    source: Arc<dyn NotificationSource>,
}

impl NotificationHook {
    pub fn new(source: Arc<dyn NotificationSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl SubscribeHook for NotificationHook {
    async fn on_subscribe(
        &self,
        subscription: Subscription,
        broker: BrokerHandle,
    ) -> Result<(), RelayError> {
        let Some(principal) = notification_principal(&subscription.topic) else {
            return Ok(());
        };
        debug!(connection = %subscription.connection, principal, "pushing notifications");

        let Some(user) = self.source.find_user(principal).await? else {
            warn!(principal, "no user for notification topic, nothing pushed");
            return Ok(());
        };

        let user_id = user.id;
        let mut tasks = JoinSet::new();
        for kind in NotificationKind::ALL {
            let source = Arc::clone(&self.source);
            let broker = broker.clone();
            let topic = subscription.topic.clone();
            tasks.spawn(async move {
                let result = push(kind, source.as_ref(), &broker, topic, user_id).await;
                (kind, result)
            });
        }

        let mut pushed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => pushed += 1,
                Ok((kind, Err(e))) => {
                    warn!(principal, sub_type = kind.code(), error = %e, "notification push skipped");
                }
                Err(e) => error!(principal, error = %e, "notification task panicked"),
            }
        }

        info!(principal, pushed, "initial notifications pushed");
        Ok(())
    }
}

async fn fetch(
    kind: NotificationKind,
    source: &dyn NotificationSource,
    user: UserId,
) -> Result<Vec<u64>, RelayError> {
    let ids = match kind {
        NotificationKind::BehaviouralExperiment => source.behavioural_experiments(user).await?,
        NotificationKind::FearLadder => source
            .fear_ladders(user)
            .await?
            .into_iter()
            .map(|ladder| ladder.ladder_id)
            .collect(),
        NotificationKind::EvidenceCollection => source.evidence_collection(user).await?,
    };
    Ok(ids)
}

async fn push(
    kind: NotificationKind,
    source: &dyn NotificationSource,
    broker: &BrokerHandle,
    topic: String,
    user: UserId,
) -> Result<(), RelayError> {
    let ids = fetch(kind, source, user).await?;
    let envelope = NotificationEnvelope::new(kind, ids);
    let message = PublishMessage::json(topic, &envelope)?.with_origin("notifications");
    broker.publish(message).await?;
    Ok(())
}
