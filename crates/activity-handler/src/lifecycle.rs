//! Lifecycle notifications about subscriptions themselves.

use bridge_core::{Activity, DiscardReason, LifecycleEvent, MetricKind};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{HandlerError, Result};

/// Constant-time string comparison for shared secrets.
pub(crate) fn secret_matches(expected: &str, given: &str) -> bool {
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

impl Context {
    /// Apply one lifecycle event. Fails only when the client state is wrong;
    /// every other outcome is reported as a discard reason.
    pub(crate) async fn handle_lifecycle_event(&self, activity: &Activity) -> Result<DiscardReason> {
        let event = LifecycleEvent::parse(activity.lifecycle_event.as_deref().unwrap_or_default());

        if !secret_matches(&self.config.webhook_secret, &activity.client_state) {
            self.observe_lifecycle(&event, DiscardReason::InvalidWebhookSecret);
            return Err(HandlerError::InvalidClientState(
                activity.subscription_id.clone(),
            ));
        }

        let reason = self.apply_lifecycle_event(activity, &event).await;
        self.observe_lifecycle(&event, reason);
        Ok(reason)
    }

    async fn apply_lifecycle_event(&self, activity: &Activity, event: &LifecycleEvent) -> DiscardReason {
        let subscription_id = activity.subscription_id.as_str();

        let subscription = match self.store.get_subscription(subscription_id).await {
            Ok(subscription) => subscription,
            Err(err) if err.is_not_found() => {
                debug!(subscription_id, "Lifecycle event for an unknown subscription");
                self.delete_remote_subscription(subscription_id);
                return DiscardReason::UnusedSubscription;
            }
            Err(err) => {
                warn!(subscription_id, error = %err, "Unable to load subscription");
                return DiscardReason::Other;
            }
        };

        if !self.check_subscription(&subscription).await {
            return DiscardReason::ExpiredSubscription;
        }

        match event {
            LifecycleEvent::ReauthorizationRequired => {
                let expires_on = match self
                    .bounded(self.graph.refresh_subscription(subscription_id))
                    .await
                {
                    Ok(expires_on) => expires_on,
                    Err(err) => {
                        warn!(subscription_id, error = %err, "Unable to refresh subscription");
                        self.metrics.observe(
                            MetricKind::SubscriptionError,
                            &[("operation", "refresh"), ("scope", "remote")],
                        );
                        return DiscardReason::FailedToRefresh;
                    }
                };

                if let Err(err) = self
                    .store
                    .update_subscription_expires_on(subscription_id, expires_on)
                    .await
                {
                    warn!(subscription_id, error = %err, "Unable to store refreshed expiry");
                }
                self.metrics.observe(MetricKind::Refresh, &[]);
                info!(subscription_id, expires_on = %expires_on, "Subscription reauthorized");
                DiscardReason::None
            }
            LifecycleEvent::SubscriptionRemoved => {
                match self.store.delete_subscription(subscription_id).await {
                    Ok(_) => {
                        self.metrics
                            .observe(MetricKind::SubscriptionDeleted, &[("scope", "local")]);
                        info!(subscription_id, "Subscription removed by Graph");
                    }
                    Err(err) => {
                        warn!(subscription_id, error = %err, "Unable to delete removed subscription")
                    }
                }
                DiscardReason::None
            }
            LifecycleEvent::Missed => {
                info!(subscription_id, "Graph reported missed notifications");
                DiscardReason::None
            }
            LifecycleEvent::Unknown(name) => {
                debug!(subscription_id, event = %name, "Unknown lifecycle event");
                DiscardReason::UnknownLifecycleEvent
            }
        }
    }

    fn observe_lifecycle(&self, event: &LifecycleEvent, reason: DiscardReason) {
        self.metrics.observe(
            MetricKind::LifecycleEvent,
            &[("event", event.as_str()), ("discarded_reason", reason.as_str())],
        );
    }
}
