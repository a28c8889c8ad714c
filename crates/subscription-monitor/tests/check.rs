//! Subscription checks against the in-memory Graph double and a SQLite store.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use bridge_core::{GraphError, GraphSubscription, MetricKind};
use chrono::{Duration, Utc};
use link_store::{ChannelLink, Store, StoreConfig, Subscription, SubscriptionKind};
use mock_bridge::{GraphCall, MockGraph, RecordingMetrics};
use subscription_monitor::{Monitor, MonitorConfig, MonitorError};

const KEY: &[u8] = b"0123456789abcdef";
const SECRET: &str = "webhook-secret";
const CHANNEL_RESOURCE: &str = "/teams/team-id/channels/channel-id/messages";

struct Harness {
    monitor: Monitor,
    store: Store,
    graph: Arc<MockGraph>,
    metrics: Arc<RecordingMetrics>,
}

async fn harness(config: MonitorConfig) -> Harness {
    let store = Store::connect(StoreConfig::new("sqlite::memory:", KEY.to_vec()))
        .await
        .unwrap();
    store.migrate().await.unwrap();
    let graph = Arc::new(MockGraph::new());
    let metrics = Arc::new(RecordingMetrics::new());

    Harness {
        monitor: Monitor::new(graph.clone(), store.clone(), metrics.clone(), config),
        store,
        graph,
        metrics,
    }
}

fn config() -> MonitorConfig {
    MonitorConfig::new("https://bridge.example.com", SECRET)
}

async fn link_channel(store: &Store, team_id: &str, channel_id: &str) {
    store
        .store_channel_link(&ChannelLink {
            mattermost_channel_id: format!("mm-{channel_id}"),
            mattermost_team_id: "mm-team".to_string(),
            ms_teams_team_id: team_id.to_string(),
            ms_teams_channel_id: channel_id.to_string(),
            creator: "mm-user-id".to_string(),
        })
        .await
        .unwrap();
}

/// A subscription known to both sides.
async fn existing(h: &Harness, sub: Subscription) {
    h.graph.add_subscription(GraphSubscription {
        id: sub.subscription_id.clone(),
        resource: sub.target().resource(),
        expires_on: sub.expires_on,
        certificate: None,
    });
    h.store.save_subscription(&sub).await.unwrap();
}

fn subscribes_to(h: &Harness, resource: &str) -> usize {
    h.graph.count_calls(|c| {
        *c == GraphCall::Subscribe {
            resource: resource.to_string(),
        }
    })
}

#[tokio::test]
async fn test_subscription_near_expiry_is_recreated() {
    let h = harness(config()).await;
    link_channel(&h.store, "team-id", "channel-id").await;
    let old_expiry = Utc::now() + Duration::seconds(10);
    existing(
        &h,
        Subscription::channel("channel-sub", "team-id", "channel-id", SECRET, old_expiry),
    )
    .await;
    existing(
        &h,
        Subscription::global(
            "chats-sub",
            SubscriptionKind::AllChats,
            SECRET,
            Utc::now() + Duration::minutes(30),
        ),
    )
    .await;

    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.reconnected, 1);
    assert_eq!(report.refreshed, 1);
    assert_eq!(h.metrics.count(MetricKind::Reconnect), 1);

    let calls = h.graph.calls();
    let deleted = calls
        .iter()
        .position(|c| {
            *c == GraphCall::DeleteSubscription {
                id: "channel-sub".to_string(),
            }
        })
        .expect("old subscription deleted");
    let subscribed = calls
        .iter()
        .position(|c| {
            *c == GraphCall::Subscribe {
                resource: CHANNEL_RESOURCE.to_string(),
            }
        })
        .expect("channel subscribed again");
    assert!(deleted < subscribed);

    let channels = h.store.list_channel_subscriptions().await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_ne!(channels[0].subscription_id, "channel-sub");
    assert!(channels[0].expires_on >= old_expiry + Duration::minutes(50));
    assert_eq!(channels[0].secret, SECRET);
}

#[tokio::test]
async fn test_boot_connects_then_refreshes() {
    let h = harness(config()).await;

    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.connected, 1);
    assert_eq!(h.metrics.count(MetricKind::Connect), 1);
    let globals = h.store.list_global_subscriptions().await.unwrap();
    assert_eq!(globals.len(), 1);
    assert_eq!(globals[0].kind, SubscriptionKind::AllChats);

    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.refreshed, 1);
    assert_eq!(report.connected, 0);
    assert_eq!(h.metrics.count(MetricKind::Refresh), 1);
    assert_eq!(subscribes_to(&h, "/chats/getAllMessages"), 1);
    assert_eq!(
        h.store.list_global_subscriptions().await.unwrap()[0].subscription_id,
        globals[0].subscription_id
    );
}

#[tokio::test]
async fn test_orphans_are_deleted() {
    let h = harness(config()).await;
    existing(
        &h,
        Subscription::global(
            "chats-sub",
            SubscriptionKind::AllChats,
            SECRET,
            Utc::now() + Duration::minutes(30),
        ),
    )
    .await;
    // Unknown locally, for a resource the bridge wants and one it doesn't.
    for (id, resource) in [
        ("stray-chats", "/chats/getAllMessages"),
        ("stray-channel", "/teams/t/channels/c/messages"),
    ] {
        h.graph.add_subscription(GraphSubscription {
            id: id.to_string(),
            resource: resource.to_string(),
            expires_on: Utc::now() + Duration::minutes(10),
            certificate: None,
        });
    }

    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.deleted_remote, 2);
    assert_eq!(report.refreshed, 1);

    let remaining: Vec<String> = h.graph.subscriptions().into_iter().map(|s| s.id).collect();
    assert_eq!(remaining, vec!["chats-sub".to_string()]);
    assert_eq!(
        h.metrics
            .count_with(MetricKind::SubscriptionDeleted, "scope", "remote"),
        2
    );
}

#[tokio::test]
async fn test_latest_graph_duplicate_is_kept() {
    let h = harness(config()).await;
    existing(
        &h,
        Subscription::global(
            "chats-sub",
            SubscriptionKind::AllChats,
            SECRET,
            Utc::now() + Duration::minutes(30),
        ),
    )
    .await;
    h.graph.add_subscription(GraphSubscription {
        id: "later-chats".to_string(),
        resource: "/chats/getAllMessages".to_string(),
        expires_on: Utc::now() + Duration::minutes(59),
        certificate: None,
    });

    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.deleted_remote, 1);
    assert_eq!(report.refreshed, 1);
    assert_eq!(report.connected + report.reconnected, 0);

    let remaining: Vec<String> = h.graph.subscriptions().into_iter().map(|s| s.id).collect();
    assert_eq!(remaining, vec!["later-chats".to_string()]);
    let globals = h.store.list_global_subscriptions().await.unwrap();
    assert_eq!(globals.len(), 1);
    assert_eq!(globals[0].subscription_id, "later-chats");
    assert_eq!(globals[0].secret, SECRET);
    assert!(h
        .store
        .get_subscription("chats-sub")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_unlinked_channel_subscription_is_removed() {
    let mut config = config();
    config.subscribe_all_chats = false;
    let h = harness(config).await;
    existing(
        &h,
        Subscription::channel(
            "channel-sub",
            "team-id",
            "channel-id",
            SECRET,
            Utc::now() + Duration::minutes(30),
        ),
    )
    .await;

    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(h.graph.subscriptions().is_empty());
    assert!(h
        .store
        .get_subscription("channel-sub")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_refresh_failure_recreates() {
    let h = harness(config()).await;
    existing(
        &h,
        Subscription::global(
            "chats-sub",
            SubscriptionKind::AllChats,
            SECRET,
            Utc::now() + Duration::minutes(30),
        ),
    )
    .await;
    h.graph.fail(
        "refresh_subscription",
        GraphError::Transient("unable to refresh the subscription".to_string()),
    );

    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.reconnected, 1);
    assert_eq!(
        h.metrics.count_with(MetricKind::SubscriptionError, "operation", "refresh"),
        1
    );
    let globals = h.store.list_global_subscriptions().await.unwrap();
    assert_eq!(globals.len(), 1);
    assert_ne!(globals[0].subscription_id, "chats-sub");
}

#[tokio::test]
async fn test_rotated_secret_recreates() {
    let h = harness(config()).await;
    existing(
        &h,
        Subscription::global(
            "chats-sub",
            SubscriptionKind::AllChats,
            "previous-secret",
            Utc::now() + Duration::minutes(30),
        ),
    )
    .await;

    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.reconnected, 1);
    let globals = h.store.list_global_subscriptions().await.unwrap();
    assert_eq!(globals[0].secret, SECRET);
}

#[tokio::test]
async fn test_certificate_is_requested_and_recorded() {
    let h = harness(config().with_certificate("cert-id")).await;

    h.monitor.check().await.unwrap();
    let globals = h.store.list_global_subscriptions().await.unwrap();
    assert_eq!(globals[0].certificate, "cert-id");
    assert_eq!(h.graph.subscriptions()[0].certificate.as_deref(), Some("cert-id"));

    // Unchanged certificate: refreshed, not recreated.
    let report = h.monitor.check().await.unwrap();
    assert_eq!(report.refreshed, 1);
}

#[tokio::test]
async fn test_list_failure_is_reported() {
    let h = harness(config()).await;
    h.graph.fail("list_subscriptions", GraphError::Throttled);

    let err = h.monitor.check().await.unwrap_err();
    assert!(matches!(err, MonitorError::Graph(GraphError::Throttled)));
    assert_eq!(
        h.metrics.count_with(MetricKind::SubscriptionError, "operation", "list"),
        1
    );
    assert_eq!(subscribes_to(&h, "/chats/getAllMessages"), 0);
}

#[tokio::test]
async fn test_unsaved_subscription_is_deleted_again() {
    let mut config = config();
    config.subscribe_all_chats = false;
    let h = harness(config).await;
    // The store refuses channel subscriptions without a team id.
    link_channel(&h.store, "", "channel-id").await;
    link_channel(&h.store, "team-id", "other-channel").await;

    let err = h.monitor.check().await.unwrap_err();
    let MonitorError::Persist { subscription_id, .. } = err else {
        panic!("expected a persist error, got {err:?}");
    };
    assert!(h.graph.calls().contains(&GraphCall::DeleteSubscription {
        id: subscription_id.clone()
    }));
    assert!(h.graph.subscriptions().iter().all(|s| s.id != subscription_id));

    // The other link was still handled.
    assert_eq!(
        subscribes_to(&h, "/teams/team-id/channels/other-channel/messages"),
        1
    );
    assert_eq!(h.store.list_channel_subscriptions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_checks_and_stops() {
    let h = harness(config().with_check_interval(StdDuration::from_secs(3600))).await;

    h.monitor.start().unwrap();
    assert!(matches!(h.monitor.start(), Err(MonitorError::AlreadyRunning)));
    assert!(h.monitor.is_running());

    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(2);
    while h.store.list_global_subscriptions().await.unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "no subscription created");
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }

    h.monitor.stop().await;
    assert!(!h.monitor.is_running());
    // Stopped monitors can be started again.
    h.monitor.start().unwrap();
    h.monitor.stop().await;
    assert_eq!(h.metrics.count(MetricKind::GoroutineFailure), 0);
}
