//! Worker-side processing of a queued activity.

use std::str::FromStr;

use bridge_core::{Activity, ActivityIds, ChangeType, DiscardReason, MetricKind};
use link_store::{Subscription, SubscriptionKind};
use tracing::{debug, info, warn};

use crate::context::Context;

/// An activity that passed the validation gate.
#[derive(Debug, Clone)]
pub(crate) struct QueuedActivity {
    pub(crate) activity: Activity,
    pub(crate) ids: ActivityIds,
    pub(crate) subscription: Subscription,
}

impl Context {
    /// Apply one activity. Always observes exactly one `change_event`.
    pub(crate) async fn process_activity(&self, queued: &QueuedActivity) -> DiscardReason {
        let change_type = queued.activity.change_type.as_str();
        let reason = self.apply_activity(queued).await;

        if reason == DiscardReason::None {
            debug!(
                subscription_id = %queued.activity.subscription_id,
                change_type,
                "Activity applied"
            );
        } else {
            debug!(
                subscription_id = %queued.activity.subscription_id,
                change_type,
                resource = %queued.activity.resource,
                discarded_reason = %reason,
                "Activity discarded"
            );
        }

        self.metrics.observe(
            MetricKind::ChangeEvent,
            &[("change_type", change_type), ("discarded_reason", reason.as_str())],
        );
        reason
    }

    async fn apply_activity(&self, queued: &QueuedActivity) -> DiscardReason {
        let Ok(change_type) = ChangeType::from_str(&queued.activity.change_type) else {
            return DiscardReason::InvalidChangeType;
        };

        if queued.ids.is_empty() {
            return DiscardReason::Other;
        }

        if !queued.ids.is_chat() && !self.check_subscription(&queued.subscription).await {
            return DiscardReason::ExpiredSubscription;
        }

        match change_type {
            ChangeType::Created => self.handle_created(&queued.activity, &queued.ids).await,
            ChangeType::Updated => self.handle_updated(&queued.activity, &queued.ids).await,
            ChangeType::Deleted => self.handle_deleted(&queued.ids).await,
        }
    }

    /// A channel subscription is only useful while its channel is linked.
    /// Orphans are deleted here and on Graph.
    pub(crate) async fn check_subscription(&self, subscription: &Subscription) -> bool {
        if subscription.kind != SubscriptionKind::Channel {
            return true;
        }

        match self
            .store
            .get_link_by_ms_teams_channel_id(&subscription.team_id, &subscription.channel_id)
            .await
        {
            Ok(_) => true,
            Err(err) if err.is_not_found() => {
                info!(
                    subscription_id = %subscription.subscription_id,
                    "Channel is no longer linked, deleting its subscription"
                );
                if let Err(err) = self
                    .store
                    .delete_subscription(&subscription.subscription_id)
                    .await
                {
                    warn!(subscription_id = %subscription.subscription_id, error = %err, "Unable to delete subscription");
                }
                self.delete_remote_subscription(&subscription.subscription_id);
                false
            }
            Err(err) => {
                warn!(subscription_id = %subscription.subscription_id, error = %err, "Unable to check subscription link");
                false
            }
        }
    }

    /// Ask Graph to drop a subscription without waiting for the answer.
    pub(crate) fn delete_remote_subscription(&self, subscription_id: &str) {
        let graph = self.graph.clone();
        let metrics = self.metrics.clone();
        let timeout = self.config.graph_timeout;
        let subscription_id = subscription_id.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, graph.delete_subscription(&subscription_id)).await {
                Ok(Ok(())) => {
                    metrics.observe(MetricKind::SubscriptionDeleted, &[("scope", "remote")]);
                }
                Ok(Err(err)) => {
                    debug!(subscription_id = %subscription_id, error = %err, "Unable to delete remote subscription")
                }
                Err(_) => {
                    debug!(subscription_id = %subscription_id, "Timed out deleting remote subscription")
                }
            }
        });
    }
}
