//! The periodic subscription check.

use std::future::Future;
use std::sync::{Arc, Mutex};

use activity_handler::{supervise, QuitSignal};
use bridge_core::{
    GraphClient, GraphError, GraphResult, MetricKind, Metrics, SubscriptionRequest,
    SubscriptionTarget,
};
use chrono::Utc;
use link_store::{Store, Subscription, SubscriptionKind};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::plan::{decide, group, Action, Drift, Expectations, TargetState};

/// What one check did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub refreshed: usize,
    pub reconnected: usize,
    pub connected: usize,
    /// Subscriptions for targets the bridge no longer needs.
    pub removed: usize,
    /// Duplicate local rows deleted.
    pub deleted_local: usize,
    /// Duplicate or orphaned Graph subscriptions deleted.
    pub deleted_remote: usize,
    pub failed: usize,
}

struct Running {
    quit: QuitSignal,
    task: JoinHandle<()>,
}

struct Inner {
    graph: Arc<dyn GraphClient>,
    store: Store,
    metrics: Arc<dyn Metrics>,
    config: MonitorConfig,
}

/// Keeps Graph webhook subscriptions and their local rows in step.
pub struct Monitor {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl Monitor {
    pub fn new(
        graph: Arc<dyn GraphClient>,
        store: Store,
        metrics: Arc<dyn Metrics>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                graph,
                store,
                metrics,
                config,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Check right away, then every `check_interval` until stopped.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }

        info!(
            interval = ?self.inner.config.check_interval,
            "Running the subscription monitor"
        );
        let quit = QuitSignal::new();
        let inner = self.inner.clone();
        let loop_quit = quit.clone();
        let task = supervise(
            "subscription-monitor",
            quit.clone(),
            self.inner.metrics.clone(),
            move || run(inner.clone(), loop_quit.clone()),
        );
        *running = Some(Running { quit, task });
        Ok(())
    }

    /// Stop the periodic check. A check in progress finishes first.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(Running { quit, task }) = running {
            quit.trigger();
            let _ = task.await;
            info!("Subscription monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Reconcile every subscription once.
    ///
    /// Targets are handled independently; a failure on one is counted in the
    /// report and does not stop the others. Fails when either side cannot be
    /// listed, or when a subscription created in Graph could not be saved.
    pub async fn check(&self) -> Result<CheckReport> {
        self.inner.check().await
    }
}

async fn run(inner: Arc<Inner>, quit: QuitSignal) {
    let mut ticker = tokio::time::interval(inner.config.check_interval);
    loop {
        tokio::select! {
            biased;
            _ = quit.wait() => return,
            _ = ticker.tick() => {}
        }
        if quit.is_quitting() {
            return;
        }

        match inner.check().await {
            Ok(report) => debug!(?report, "Subscription check done"),
            Err(err) => error!(error = %err, "Subscription check failed"),
        }
    }
}

impl Inner {
    async fn bounded<T>(&self, call: impl Future<Output = GraphResult<T>>) -> GraphResult<T> {
        match tokio::time::timeout(self.config.graph_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::Transient(format!(
                "graph call timed out after {:?}",
                self.config.graph_timeout
            ))),
        }
    }

    fn observe_error(&self, operation: &str, scope: &str) {
        self.metrics.observe(
            MetricKind::SubscriptionError,
            &[("operation", operation), ("scope", scope)],
        );
    }

    async fn check(&self) -> Result<CheckReport> {
        debug!("Checking subscriptions");

        let remote = self
            .bounded(self.graph.list_subscriptions())
            .await
            .inspect_err(|_| self.observe_error("list", "remote"))?;
        let (local, desired) = self
            .load_local()
            .await
            .inspect_err(|_| self.observe_error("list", "local"))?;

        let expiry_buffer = chrono::Duration::from_std(self.config.expiry_buffer)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        let expect = Expectations {
            secret: &self.config.webhook_secret,
            certificate: self.config.certificate_id(),
            expiry_buffer,
        };

        let mut report = CheckReport::default();
        let mut persist_error = None;
        for state in group(&desired, local, remote) {
            let plan = decide(&state, Utc::now(), expect);

            for id in &plan.delete_local {
                self.delete_local(id, &mut report).await;
            }
            for id in &plan.delete_remote {
                self.delete_remote(id, &mut report).await;
            }
            if let Some(row) = &plan.repoint {
                if let Err(source) = self.store.save_subscription(row).await {
                    self.observe_error("repoint", "local");
                    report.failed += 1;
                    let err = MonitorError::Persist {
                        subscription_id: row.subscription_id.clone(),
                        source,
                    };
                    error!(resource = ?state.target, error = %err, "Unable to save subscription");
                    persist_error.get_or_insert(err);
                    continue;
                }
                debug!(subscription_id = %row.subscription_id, resource = ?state.target, "Local subscription re-pointed");
            }

            let Some(action) = plan.action else {
                continue;
            };
            if let Err(err) = self.apply(&state, action, &mut report).await {
                report.failed += 1;
                match err {
                    MonitorError::Persist { .. } => {
                        error!(resource = ?state.target, error = %err, "Unable to save subscription");
                        persist_error.get_or_insert(err);
                    }
                    err => warn!(resource = ?state.target, error = %err, "Unable to reconcile subscription"),
                }
            }
        }

        match persist_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Local rows of every kind, and the targets the bridge needs.
    async fn load_local(&self) -> Result<(Vec<Subscription>, Vec<SubscriptionTarget>)> {
        let mut local = self.store.list_global_subscriptions().await?;
        let channels = self.store.list_channel_subscriptions().await?;
        let chats = self.store.list_chat_subscriptions().await?;
        let links = self.store.list_channel_links().await?;

        let mut desired = Vec::new();
        if self.config.subscribe_all_chats {
            desired.push(SubscriptionTarget::AllChats);
        }
        if self.config.subscribe_all_channels {
            desired.push(SubscriptionTarget::AllChannels);
        }
        desired.extend(links.into_iter().map(|link| SubscriptionTarget::Channel {
            team_id: link.ms_teams_team_id,
            channel_id: link.ms_teams_channel_id,
        }));
        // Chat subscriptions are created when a user connects; the monitor
        // only keeps the existing ones alive.
        desired.extend(chats.iter().map(Subscription::target));

        local.extend(channels);
        local.extend(chats);
        Ok((local, desired))
    }

    async fn apply(&self, state: &TargetState, action: Action, report: &mut CheckReport) -> Result<()> {
        match action {
            Action::Refresh(sub) => {
                match self
                    .bounded(self.graph.refresh_subscription(&sub.subscription_id))
                    .await
                {
                    Ok(expires_on) => {
                        self.store
                            .update_subscription_expires_on(&sub.subscription_id, expires_on)
                            .await?;
                        self.metrics.observe(MetricKind::Refresh, &[]);
                        report.refreshed += 1;
                        debug!(subscription_id = %sub.subscription_id, expires_on = %expires_on, "Subscription refreshed");
                        Ok(())
                    }
                    Err(err) => {
                        debug!(subscription_id = %sub.subscription_id, error = %err, "Unable to refresh subscription");
                        self.observe_error("refresh", "remote");
                        self.recreate(&state.target, &sub, None).await?;
                        report.reconnected += 1;
                        Ok(())
                    }
                }
            }
            Action::Recreate(sub, drift) => {
                self.recreate(&state.target, &sub, Some(drift)).await?;
                report.reconnected += 1;
                Ok(())
            }
            Action::Connect => {
                let created = self.create(&state.target).await?;
                self.metrics.observe(MetricKind::Connect, &[]);
                report.connected += 1;
                info!(subscription_id = %created.subscription_id, resource = ?state.target, "Subscription created");
                Ok(())
            }
            Action::Remove(sub) => {
                self.delete_remote(&sub.subscription_id, report).await;
                self.store.delete_subscription(&sub.subscription_id).await?;
                self.metrics
                    .observe(MetricKind::SubscriptionDeleted, &[("scope", "local")]);
                report.removed += 1;
                info!(subscription_id = %sub.subscription_id, resource = ?state.target, "Subscription no longer needed, deleted");
                Ok(())
            }
        }
    }

    /// Delete `sub` on both sides and subscribe again.
    async fn recreate(
        &self,
        target: &SubscriptionTarget,
        sub: &Subscription,
        drift: Option<Drift>,
    ) -> Result<Subscription> {
        let reason = drift.map_or("refresh failed", |d| d.as_str());
        debug!(subscription_id = %sub.subscription_id, reason, "Recreating subscription");

        if let Err(err) = self
            .bounded(self.graph.delete_subscription(&sub.subscription_id))
            .await
        {
            if !err.is_not_found() {
                warn!(subscription_id = %sub.subscription_id, error = %err, "Unable to delete subscription before recreating it");
                self.observe_error("delete", "remote");
            }
        }
        self.store.delete_subscription(&sub.subscription_id).await?;

        let created = self.create(target).await?;
        self.metrics.observe(MetricKind::Reconnect, &[]);
        info!(
            old_subscription_id = %sub.subscription_id,
            subscription_id = %created.subscription_id,
            reason,
            "Subscription recreated"
        );
        Ok(created)
    }

    /// Subscribe to `target` and save the new row.
    async fn create(&self, target: &SubscriptionTarget) -> Result<Subscription> {
        let request = SubscriptionRequest {
            target: target.clone(),
            notification_url: self.config.notification_url(),
            lifecycle_notification_url: self.config.lifecycle_url(),
            client_state: self.config.webhook_secret.clone(),
            certificate: self.config.certificate.clone(),
        };

        let created = self
            .bounded(self.graph.subscribe(request))
            .await
            .inspect_err(|_| self.observe_error("create", "remote"))?;

        let sub = local_row(target, &created.id, &self.config.webhook_secret, created.expires_on)
            .with_certificate(self.config.certificate_id());

        if let Err(source) = self.store.save_subscription(&sub).await {
            self.observe_error("create", "local");
            if let Err(err) = self.bounded(self.graph.delete_subscription(&created.id)).await {
                warn!(subscription_id = %created.id, error = %err, "Unable to delete unsaved subscription");
            }
            return Err(MonitorError::Persist {
                subscription_id: created.id,
                source,
            });
        }
        Ok(sub)
    }

    async fn delete_local(&self, subscription_id: &str, report: &mut CheckReport) {
        match self.store.delete_subscription(subscription_id).await {
            Ok(_) => {
                self.metrics
                    .observe(MetricKind::SubscriptionDeleted, &[("scope", "local")]);
                report.deleted_local += 1;
                debug!(subscription_id, "Deleted duplicate subscription row");
            }
            Err(err) => {
                warn!(subscription_id, error = %err, "Unable to delete duplicate subscription row");
                self.observe_error("delete", "local");
                report.failed += 1;
            }
        }
    }

    async fn delete_remote(&self, subscription_id: &str, report: &mut CheckReport) {
        match self
            .bounded(self.graph.delete_subscription(subscription_id))
            .await
        {
            Ok(()) => {
                self.metrics
                    .observe(MetricKind::SubscriptionDeleted, &[("scope", "remote")]);
                report.deleted_remote += 1;
                debug!(subscription_id, "Deleted subscription in Graph");
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(subscription_id, error = %err, "Unable to delete subscription in Graph");
                self.observe_error("delete", "remote");
                report.failed += 1;
            }
        }
    }
}

fn local_row(
    target: &SubscriptionTarget,
    subscription_id: &str,
    secret: &str,
    expires_on: chrono::DateTime<Utc>,
) -> Subscription {
    match target {
        SubscriptionTarget::AllChats => {
            Subscription::global(subscription_id, SubscriptionKind::AllChats, secret, expires_on)
        }
        SubscriptionTarget::AllChannels => {
            Subscription::global(subscription_id, SubscriptionKind::AllChannels, secret, expires_on)
        }
        SubscriptionTarget::Channel {
            team_id,
            channel_id,
        } => Subscription::channel(subscription_id, team_id, channel_id, secret, expires_on),
        SubscriptionTarget::UserChats { user_id } => {
            Subscription::chat(subscription_id, user_id, secret, expires_on)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_row_matches_target() {
        let targets = [
            SubscriptionTarget::AllChats,
            SubscriptionTarget::AllChannels,
            SubscriptionTarget::Channel {
                team_id: "team".into(),
                channel_id: "channel".into(),
            },
            SubscriptionTarget::UserChats {
                user_id: "user".into(),
            },
        ];
        for target in targets {
            let row = local_row(&target, "id", "secret", Utc::now());
            assert_eq!(row.target(), target);
            assert_eq!(row.kind, Subscription::kind_of(&target));
        }
    }
}
