//! Metrics sink consumed by the bridge.
//!
//! Exporting is someone else's job: the bridge only calls
//! [`Metrics::observe`] with a kind and a few string labels.

use std::fmt;

/// What is being observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// One per processed activity; labels `change_type`, `discarded_reason`.
    ChangeEvent,
    /// A created activity found an existing post link.
    Duplicate,
    /// The activity queue was full and the activity was shed.
    Dropped,
    /// Queue capacity, reported once at start; label `capacity`.
    QueueCapacity,
    /// A subscription was refreshed in place.
    Refresh,
    /// A subscription was deleted and created again.
    Reconnect,
    /// A subscription was created where none existed.
    Connect,
    /// A subscription was deleted; label `scope` is `remote` or `local`.
    SubscriptionDeleted,
    /// A subscription operation failed; labels `operation`, `scope`.
    SubscriptionError,
    /// A lifecycle notification; labels `event`, `discarded_reason`.
    LifecycleEvent,
    /// A message mirrored; labels `action`, `source`, `is_direct`.
    Messages,
    /// A reaction mirrored; labels `action`, `source`, `is_direct`.
    Reactions,
    /// A post was created but its link could not be stored; label `action`
    /// is `deleted` when the unlinked post was removed again.
    PostLinkError,
    /// A supervised task crashed and was relaunched; label `worker`.
    GoroutineFailure,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ChangeEvent => "change_event",
            MetricKind::Duplicate => "duplicate",
            MetricKind::Dropped => "dropped",
            MetricKind::QueueCapacity => "queue_capacity",
            MetricKind::Refresh => "refresh",
            MetricKind::Reconnect => "reconnect",
            MetricKind::Connect => "connect",
            MetricKind::SubscriptionDeleted => "subscription_deleted",
            MetricKind::SubscriptionError => "subscription_error",
            MetricKind::LifecycleEvent => "lifecycle_event",
            MetricKind::Messages => "messages",
            MetricKind::Reactions => "reactions",
            MetricKind::PostLinkError => "post_link_error",
            MetricKind::GoroutineFailure => "goroutine_failure",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an activity was not (fully) applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    None,
    ExpiredSubscription,
    InvalidChangeType,
    UnableToGetTeamsData,
    NotUserEvent,
    DuplicatedPost,
    IsBotUser,
    DirectMessagesDisabled,
    InactiveUser,
    AlreadyAppliedChange,
    SelectiveSync,
    MissingLink,
    InvalidWebhookSecret,
    UnusedSubscription,
    FailedToRefresh,
    UnknownLifecycleEvent,
    Other,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::None => "",
            DiscardReason::ExpiredSubscription => "expired_subscription",
            DiscardReason::InvalidChangeType => "invalid_change_type",
            DiscardReason::UnableToGetTeamsData => "unable_to_get_teams_data",
            DiscardReason::NotUserEvent => "not_user_event",
            DiscardReason::DuplicatedPost => "duplicated_post",
            DiscardReason::IsBotUser => "is_bot_user",
            DiscardReason::DirectMessagesDisabled => "direct_messages_disabled",
            DiscardReason::InactiveUser => "inactive_user",
            DiscardReason::AlreadyAppliedChange => "already_applied_change",
            DiscardReason::SelectiveSync => "selective_sync",
            DiscardReason::MissingLink => "missing_link",
            DiscardReason::InvalidWebhookSecret => "invalid_webhook_secret",
            DiscardReason::UnusedSubscription => "unused_subscription",
            DiscardReason::FailedToRefresh => "failed_to_refresh",
            DiscardReason::UnknownLifecycleEvent => "unknown_lifecycle_event",
            DiscardReason::Other => "other",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric sink.
pub trait Metrics: Send + Sync {
    fn observe(&self, kind: MetricKind, labels: &[(&str, &str)]);
}

/// Emits every observation as a `tracing` debug event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn observe(&self, kind: MetricKind, labels: &[(&str, &str)]) {
        tracing::debug!(kind = %kind, labels = ?labels, "metric observed");
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn observe(&self, _kind: MetricKind, _labels: &[(&str, &str)]) {}
}
