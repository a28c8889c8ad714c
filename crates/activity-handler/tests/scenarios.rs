//! End-to-end runs of the activity handler against in-memory capabilities.

use std::sync::Arc;
use std::time::Duration;

use activity_handler::{
    seal_content, ActivityHandler, Admission, Capabilities, HandlerConfig, HandlerError,
    SyncFlags, ATTACHMENT_ERROR_MESSAGE, LAST_RECEIVED_CHANGE_KEY, PREFERENCE_CATEGORY,
    PREFERENCE_NAME_PLATFORM,
};
use bridge_core::{
    Activity, Attachment, Chat, ChatMember, ChatType, DiscardReason, FileLimits, GraphSubscription,
    GraphUser, Message, MetricKind, OAuthToken, PlatformReaction, PlatformUser, Reaction,
    REMOVED_FROM_PLUGIN,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use link_store::{ChannelLink, Store, StoreConfig, Subscription, SubscriptionKind};
use mock_bridge::{GraphCall, MockGraph, MockPlatform, MockUserClientFactory, RecordingMetrics, StaticKeyResolver};

const KEY: &[u8] = b"0123456789abcdef";
const CONTENT_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";
const BOT: &str = "bot-user-id";
const SECRET: &str = "webhook-secret";
const SUBSCRIPTION: &str = "test-subscription-id";
const CHAT: &str = "msteams-chat-id";
const MESSAGE: &str = "msteams-message-id";
const TEAMS_USER: &str = "ms-user-id";
const TEAMS_OTHER: &str = "ms-otheruser-id";
const USER: &str = "mm-user-id";
const OTHER: &str = "mm-otheruser-id";

struct Harness {
    handler: ActivityHandler,
    store: Store,
    graph: Arc<MockGraph>,
    platform: Arc<MockPlatform>,
    metrics: Arc<RecordingMetrics>,
}

fn config() -> HandlerConfig {
    let mut config = HandlerConfig::with_bot_user(BOT)
        .with_remote_id("remote-id")
        .with_webhook_secret(SECRET);
    config.workers = 4;
    config.queue_size = 16;
    config
}

async fn harness(config: HandlerConfig) -> Harness {
    harness_with(config, MockPlatform::new()).await
}

async fn harness_with(config: HandlerConfig, platform: MockPlatform) -> Harness {
    let store = Store::connect(StoreConfig::new("sqlite::memory:", KEY.to_vec()))
        .await
        .unwrap();
    store.migrate().await.unwrap();
    store
        .save_global_subscription(&Subscription::global(
            SUBSCRIPTION,
            SubscriptionKind::AllChats,
            SECRET,
            Utc::now() + chrono::Duration::hours(1),
        ))
        .await
        .unwrap();

    let graph = Arc::new(MockGraph::new());
    let platform = Arc::new(platform);
    let metrics = Arc::new(RecordingMetrics::new());

    for (mm, teams, name) in [(USER, TEAMS_USER, "alice"), (OTHER, TEAMS_OTHER, "bob")] {
        platform.add_user(PlatformUser {
            id: mm.to_string(),
            username: name.to_string(),
            email: format!("{name}@example.com"),
            ..Default::default()
        });
        graph.add_user(GraphUser {
            id: teams.to_string(),
            display_name: name.to_string(),
            mail: format!("{name}@example.com"),
            user_type: "Member".to_string(),
        });
        store
            .set_user_info(mm, teams, Some(&OAuthToken::bearer(format!("token-{name}"))))
            .await
            .unwrap();
    }

    graph.add_chat(Chat {
        id: CHAT.to_string(),
        chat_type: ChatType::OneOnOne,
        members: vec![
            ChatMember {
                user_id: TEAMS_USER.to_string(),
                ..Default::default()
            },
            ChatMember {
                user_id: TEAMS_OTHER.to_string(),
                ..Default::default()
            },
        ],
    });

    let caps = Capabilities {
        store: store.clone(),
        graph: graph.clone(),
        user_clients: Arc::new(MockUserClientFactory::new(graph.clone())),
        platform: platform.clone(),
        metrics: metrics.clone(),
        content_keys: Some(Arc::new(
            StaticKeyResolver::new().with_key("cert-id", CONTENT_KEY.to_vec()),
        )),
    };

    Harness {
        handler: ActivityHandler::new(caps, config),
        store,
        graph,
        platform,
        metrics,
    }
}

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
}

fn chat_message(text: &str, last_update_at: DateTime<Utc>) -> Message {
    Message {
        id: MESSAGE.to_string(),
        chat_id: CHAT.to_string(),
        user_id: TEAMS_USER.to_string(),
        user_display_name: "alice".to_string(),
        text: text.to_string(),
        create_at: at(0),
        last_update_at,
        ..Default::default()
    }
}

fn activity(change_type: &str) -> Activity {
    Activity {
        subscription_id: SUBSCRIPTION.to_string(),
        client_state: SECRET.to_string(),
        change_type: change_type.to_string(),
        resource: format!("chats('{CHAT}')/messages('{MESSAGE}')"),
        ..Default::default()
    }
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn discarded(metrics: &RecordingMetrics, reason: DiscardReason) -> usize {
    metrics.count_with(MetricKind::ChangeEvent, "discarded_reason", reason.as_str())
}

/// Run the new-DM flow and return the created post id.
async fn create_dm_post(h: &Harness) -> String {
    h.graph.add_chat_message(chat_message("test-1", at(0)));
    assert_eq!(
        h.handler.handle(activity("created")).await.unwrap(),
        Admission::Queued
    );

    assert!(
        eventually(|| {
            h.platform
                .direct_channel(USER, OTHER)
                .map(|dm| h.platform.posts_in_channel(&dm).len() == 1)
                .unwrap_or(false)
        })
        .await,
        "post did not appear in the DM channel"
    );

    let dm = h.platform.direct_channel(USER, OTHER).unwrap();
    h.platform.posts_in_channel(&dm)[0].id.clone()
}

#[tokio::test]
async fn test_new_dm_both_connected() {
    let h = harness(config()).await;
    h.handler.start().unwrap();

    let post_id = create_dm_post(&h).await;
    let post = h.platform.post(&post_id).unwrap();
    assert_eq!(post.message, "test-1");
    assert_eq!(post.user_id, USER);
    assert_eq!(post.create_at, at(0).timestamp_millis());
    assert_eq!(
        post.prop(&format!("msteams_sync_{BOT}")),
        Some(&serde_json::Value::Bool(true))
    );

    let info = h
        .store
        .get_post_info_by_ms_teams_id(CHAT, MESSAGE)
        .await
        .unwrap();
    assert_eq!(info.mattermost_id, post_id);
    assert_eq!(info.ms_teams_last_update_at, at(0));

    assert!(eventually(|| discarded(&h.metrics, DiscardReason::None) == 1).await);
    assert_eq!(
        h.metrics
            .count_with(MetricKind::Messages, "action", "created"),
        1
    );
    assert!(h.platform.kv_get(LAST_RECEIVED_CHANGE_KEY).is_some());
    assert_eq!(h.handler.last_activity_at(SUBSCRIPTION), Some(at(0)));

    h.handler.stop().await;
    let sub = h.store.get_subscription(SUBSCRIPTION).await.unwrap();
    assert_eq!(sub.last_activity_at, Some(at(0)));
}

#[tokio::test]
async fn test_encrypted_inline_content() {
    let h = harness(config()).await;
    h.handler.start().unwrap();

    let content = seal_content(
        CONTENT_KEY,
        b"wrapped-key",
        "cert-id",
        &chat_message("test-2", at(0)),
    )
    .unwrap();
    let mut notification = activity("created");
    notification.encrypted_content = Some(content);

    h.handler.handle(notification).await.unwrap();
    assert!(
        eventually(|| {
            h.platform
                .direct_channel(USER, OTHER)
                .map(|dm| h.platform.posts_in_channel(&dm).len() == 1)
                .unwrap_or(false)
        })
        .await
    );

    let dm = h.platform.direct_channel(USER, OTHER).unwrap();
    assert_eq!(h.platform.posts_in_channel(&dm)[0].message, "test-2");
    assert_eq!(
        h.graph
            .count_calls(|c| matches!(c, GraphCall::GetChatMessage { .. })),
        0
    );
    h.handler.stop().await;
}

#[tokio::test]
async fn test_tampered_inline_content_is_discarded() {
    let h = harness(config()).await;
    h.handler.start().unwrap();

    let mut content = seal_content(
        CONTENT_KEY,
        b"wrapped-key",
        "cert-id",
        &chat_message("test-2", at(0)),
    )
    .unwrap();
    content.data_signature = seal_content(
        CONTENT_KEY,
        b"wrapped-key",
        "cert-id",
        &chat_message("other", at(0)),
    )
    .unwrap()
    .data_signature;
    let mut notification = activity("created");
    notification.encrypted_content = Some(content);

    h.handler.handle(notification).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::UnableToGetTeamsData) == 1).await);
    assert!(h.platform.posts().is_empty());
    h.handler.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_creates() {
    let h = harness(config()).await;
    h.graph.add_chat_message(chat_message("test-1", at(0)));
    h.handler.start().unwrap();

    let results = join_all((0..5).map(|_| h.handler.handle(activity("created")))).await;
    assert!(results.iter().all(|r| matches!(r, Ok(Admission::Queued))));

    assert!(eventually(|| h.metrics.count(MetricKind::ChangeEvent) == 5).await);
    assert_eq!(h.platform.posts().len(), 1);
    assert_eq!(h.metrics.count(MetricKind::Duplicate), 4);
    assert_eq!(discarded(&h.metrics, DiscardReason::DuplicatedPost), 4);
    assert!(h
        .store
        .get_post_info_by_ms_teams_id(CHAT, MESSAGE)
        .await
        .is_ok());
    h.handler.stop().await;
}

#[tokio::test]
async fn test_update_after_create() {
    let h = harness(config()).await;
    h.handler.start().unwrap();
    let post_id = create_dm_post(&h).await;

    h.platform.add_existing_reaction(PlatformReaction {
        user_id: USER.to_string(),
        post_id: post_id.clone(),
        channel_id: String::new(),
        emoji_name: "heart".to_string(),
    });

    let mut edited = chat_message("test-1 edited", at(60));
    edited.reactions = vec![Reaction {
        user_id: TEAMS_OTHER.to_string(),
        reaction: "like".to_string(),
    }];
    h.graph.add_chat_message(edited);
    h.handler.handle(activity("updated")).await.unwrap();

    assert!(eventually(|| discarded(&h.metrics, DiscardReason::None) == 2).await);
    let post = h.platform.post(&post_id).unwrap();
    assert_eq!(post.message, "test-1 edited");
    assert_eq!(post.create_at, at(0).timestamp_millis());

    let reactions = h.platform.reactions(&post_id);
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].user_id, OTHER);
    assert_eq!(reactions[0].emoji_name, "+1");

    let removed = h.platform.removed_reactions();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].emoji_name, "heart");
    assert_eq!(removed[0].channel_id, REMOVED_FROM_PLUGIN);

    let info = h
        .store
        .get_post_info_by_ms_teams_id(CHAT, MESSAGE)
        .await
        .unwrap();
    assert_eq!(info.ms_teams_last_update_at, at(60));

    // Same lastUpdateAt again: nothing to apply.
    h.handler.handle(activity("updated")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::AlreadyAppliedChange) == 1).await);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_update_without_link_is_discarded() {
    let h = harness(config()).await;
    h.handler.start().unwrap();
    h.graph.add_chat_message(chat_message("never seen", at(60)));

    h.handler.handle(activity("updated")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::MissingLink) == 1).await);
    assert!(h.platform.posts().is_empty());
    h.handler.stop().await;
}

#[tokio::test]
async fn test_delete_propagation() {
    let h = harness(config()).await;
    h.handler.start().unwrap();
    let post_id = create_dm_post(&h).await;

    h.handler.handle(activity("deleted")).await.unwrap();
    assert!(eventually(|| h.platform.post(&post_id).is_some_and(|p| p.delete_at != 0)).await);
    assert!(eventually(|| {
        h.metrics
            .count_with(MetricKind::Messages, "action", "deleted")
            == 1
    })
    .await);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_delete_without_link_is_missing_link() {
    let h = harness(config()).await;
    h.handler.start().unwrap();

    h.handler.handle(activity("deleted")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::MissingLink) == 1).await);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_invalid_client_state_rejected() {
    let h = harness(config()).await;
    let mut notification = activity("created");
    notification.client_state = "wrong".to_string();

    let err = h.handler.handle(notification).await.unwrap_err();
    assert!(matches!(err, HandlerError::InvalidClientState(id) if id == SUBSCRIPTION));
}

#[tokio::test]
async fn test_unknown_subscription_is_deleted_remotely() {
    let h = harness(config()).await;
    let mut notification = activity("created");
    notification.subscription_id = "stray-subscription".to_string();

    assert_eq!(
        h.handler.handle(notification).await.unwrap(),
        Admission::UnknownSubscription
    );
    assert!(eventually(|| {
        h.graph.count_calls(|c| {
            *c == GraphCall::DeleteSubscription {
                id: "stray-subscription".to_string(),
            }
        }) == 1
    })
    .await);
}

#[tokio::test]
async fn test_full_queue_sheds_load() {
    let mut config = config();
    config.queue_size = 1;
    let h = harness(config).await;

    assert_eq!(
        h.handler.handle(activity("created")).await.unwrap(),
        Admission::Queued
    );
    let err = h.handler.handle(activity("created")).await.unwrap_err();
    assert!(matches!(err, HandlerError::QueueFull));
    assert_eq!(h.metrics.count(MetricKind::Dropped), 1);
}

#[tokio::test]
async fn test_start_twice_and_handle_after_stop() {
    let h = harness(config()).await;
    h.handler.start().unwrap();
    assert!(matches!(h.handler.start(), Err(HandlerError::AlreadyRunning)));
    assert_eq!(
        h.metrics
            .count_with(MetricKind::QueueCapacity, "capacity", "16"),
        1
    );

    h.handler.stop().await;
    assert!(h.handler.is_quitting());
    assert!(matches!(
        h.handler.handle(activity("created")).await,
        Err(HandlerError::Stopped)
    ));
}

#[tokio::test]
async fn test_invalid_change_type() {
    let h = harness(config()).await;
    h.handler.start().unwrap();

    h.handler.handle(activity("moved")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::InvalidChangeType) == 1).await);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_direct_messages_disabled() {
    let h = harness(config().with_flags(SyncFlags {
        sync_direct_messages: false,
        ..Default::default()
    }))
    .await;
    h.graph.add_chat_message(chat_message("test-1", at(0)));
    h.handler.start().unwrap();

    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::DirectMessagesDisabled) == 1).await);
    assert!(h.platform.posts().is_empty());
    h.handler.stop().await;
}

#[tokio::test]
async fn test_selective_sync() {
    let flags = SyncFlags {
        selective_sync: true,
        ..Default::default()
    };
    let h = harness(config().with_flags(flags)).await;
    h.graph.add_chat_message(chat_message("test-1", at(0)));
    h.handler.start().unwrap();

    // Both read on the host platform: the sender already delivered it there.
    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::SelectiveSync) == 1).await);
    assert!(h.platform.posts().is_empty());

    // Recipient reads on Teams.
    h.platform
        .set_preference(OTHER, PREFERENCE_CATEGORY, PREFERENCE_NAME_PLATFORM, "msteams");
    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| h.platform.posts().len() == 1).await);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_inactive_sender_is_discarded() {
    let platform = MockPlatform::new();
    let h = harness_with(config(), platform).await;
    h.platform.add_user(PlatformUser {
        id: USER.to_string(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        delete_at: 1,
        ..Default::default()
    });
    h.graph.add_chat_message(chat_message("test-1", at(0)));
    h.handler.start().unwrap();

    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::InactiveUser) == 1).await);
    assert!(h.platform.posts().is_empty());
    h.handler.stop().await;
}

async fn link_channel(h: &Harness) {
    h.store
        .store_channel_link(&ChannelLink {
            mattermost_channel_id: "mm-channel".to_string(),
            mattermost_team_id: "mm-team".to_string(),
            ms_teams_team_id: "team-id".to_string(),
            ms_teams_channel_id: "channel-id".to_string(),
            creator: USER.to_string(),
        })
        .await
        .unwrap();
    h.store
        .save_channel_subscription(&Subscription::channel(
            "channel-subscription",
            "team-id",
            "channel-id",
            SECRET,
            Utc::now() + chrono::Duration::hours(1),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_channel_message_in_linked_channel() {
    let h = harness(config()).await;
    link_channel(&h).await;
    h.graph.add_channel_message(Message {
        id: "channel-message".to_string(),
        team_id: "team-id".to_string(),
        channel_id: "channel-id".to_string(),
        user_id: TEAMS_USER.to_string(),
        user_display_name: "alice".to_string(),
        text: "<p>hello channel</p>".to_string(),
        subject: "Topic".to_string(),
        create_at: at(0),
        last_update_at: at(0),
        ..Default::default()
    });
    h.handler.start().unwrap();

    h.handler
        .handle(Activity {
            subscription_id: "channel-subscription".to_string(),
            client_state: SECRET.to_string(),
            change_type: "created".to_string(),
            resource: "teams('team-id')/channels('channel-id')/messages('channel-message')"
                .to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(eventually(|| h.platform.posts_in_channel("mm-channel").len() == 1).await);
    let post = &h.platform.posts_in_channel("mm-channel")[0];
    assert_eq!(post.message, "## Topic\nhello channel");
    assert_eq!(post.user_id, USER);
    assert!(h
        .store
        .get_post_info_by_ms_teams_id("channel-id", "channel-message")
        .await
        .is_ok());
    h.handler.stop().await;
}

#[tokio::test]
async fn test_unlinked_channel_subscription_expires() {
    let h = harness(config()).await;
    h.store
        .save_channel_subscription(&Subscription::channel(
            "orphan-subscription",
            "team-id",
            "unlinked-channel",
            SECRET,
            Utc::now() + chrono::Duration::hours(1),
        ))
        .await
        .unwrap();
    h.handler.start().unwrap();

    h.handler
        .handle(Activity {
            subscription_id: "orphan-subscription".to_string(),
            client_state: SECRET.to_string(),
            change_type: "created".to_string(),
            resource: "teams('team-id')/channels('unlinked-channel')/messages('m')".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(eventually(|| discarded(&h.metrics, DiscardReason::ExpiredSubscription) == 1).await);
    assert!(h
        .store
        .get_subscription("orphan-subscription")
        .await
        .unwrap_err()
        .is_not_found());
    h.handler.stop().await;
}

#[tokio::test]
async fn test_oversized_attachment_notifies_sender() {
    let platform = MockPlatform::new().with_file_limits(FileLimits {
        max_file_size: 4,
        ..Default::default()
    });
    let h = harness_with(config(), platform).await;
    h.graph.add_file("https://files/big.bin", vec![0; 10]);
    h.graph.add_file("https://files/ok.txt", b"ok".to_vec());

    let mut msg = chat_message("see files", at(0));
    msg.attachments = vec![
        Attachment {
            id: "big".to_string(),
            content_type: "reference".to_string(),
            name: "big.bin".to_string(),
            content_url: "https://files/big.bin".to_string(),
            ..Default::default()
        },
        Attachment {
            id: "ok".to_string(),
            content_type: "reference".to_string(),
            name: "ok.txt".to_string(),
            content_url: "https://files/ok.txt".to_string(),
            ..Default::default()
        },
    ];
    h.graph.add_chat_message(msg);
    h.handler.start().unwrap();

    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| h.platform.ephemeral_posts().len() == 1).await);

    let posts = h.platform.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].file_ids.len(), 1);

    let (user_id, notice) = &h.platform.ephemeral_posts()[0];
    assert_eq!(user_id, USER);
    assert_eq!(notice.message, ATTACHMENT_ERROR_MESSAGE);
    assert_eq!(notice.user_id, BOT);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_revoked_token_disconnects_user() {
    let h = harness(config()).await;
    h.graph.add_chat_message(chat_message("test-1", at(0)));

    // Rebuild the handler with a factory that rejects alice's token.
    let factory = Arc::new(MockUserClientFactory::new(h.graph.clone()));
    factory.revoke("token-alice");
    let handler = ActivityHandler::new(
        Capabilities {
            store: h.store.clone(),
            graph: h.graph.clone(),
            user_clients: factory,
            platform: h.platform.clone(),
            metrics: h.metrics.clone(),
            content_keys: None,
        },
        config(),
    );
    handler.start().unwrap();

    handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::UnableToGetTeamsData) == 1).await);
    assert_eq!(h.store.get_token_for_ms_teams_user(TEAMS_USER).await.unwrap(), None);
    assert!(h.platform.posts().is_empty());
    handler.stop().await;
}

#[tokio::test]
async fn test_lifecycle_reauthorization() {
    let h = harness(config()).await;
    let before = h.store.get_subscription(SUBSCRIPTION).await.unwrap().expires_on;
    h.graph.add_subscription(GraphSubscription {
        id: SUBSCRIPTION.to_string(),
        resource: "/chats/getAllMessages".to_string(),
        expires_on: before,
        certificate: None,
    });

    let event = Activity {
        subscription_id: SUBSCRIPTION.to_string(),
        client_state: SECRET.to_string(),
        lifecycle_event: Some("reauthorizationRequired".to_string()),
        ..Default::default()
    };
    assert_eq!(
        h.handler.handle_lifecycle_event(&event).await.unwrap(),
        DiscardReason::None
    );

    let after = h.store.get_subscription(SUBSCRIPTION).await.unwrap().expires_on;
    assert!(after > before);
    assert_eq!(h.metrics.count(MetricKind::Refresh), 1);
    assert_eq!(
        h.metrics
            .count_with(MetricKind::LifecycleEvent, "event", "reauthorizationRequired"),
        1
    );
}

#[tokio::test]
async fn test_lifecycle_refresh_failure() {
    let h = harness(config()).await;
    let event = Activity {
        subscription_id: SUBSCRIPTION.to_string(),
        client_state: SECRET.to_string(),
        lifecycle_event: Some("reauthorizationRequired".to_string()),
        ..Default::default()
    };

    // Graph has no such subscription.
    assert_eq!(
        h.handler.handle_lifecycle_event(&event).await.unwrap(),
        DiscardReason::FailedToRefresh
    );
}

#[tokio::test]
async fn test_lifecycle_subscription_removed_and_unknown() {
    let h = harness(config()).await;
    let mut event = Activity {
        subscription_id: SUBSCRIPTION.to_string(),
        client_state: SECRET.to_string(),
        lifecycle_event: Some("somethingNew".to_string()),
        ..Default::default()
    };
    assert_eq!(
        h.handler.handle_lifecycle_event(&event).await.unwrap(),
        DiscardReason::UnknownLifecycleEvent
    );

    event.lifecycle_event = Some("subscriptionRemoved".to_string());
    assert_eq!(
        h.handler.handle_lifecycle_event(&event).await.unwrap(),
        DiscardReason::None
    );
    assert!(h
        .store
        .get_subscription(SUBSCRIPTION)
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(
        h.metrics
            .count_with(MetricKind::SubscriptionDeleted, "scope", "local"),
        1
    );

    // Now unknown locally.
    assert_eq!(
        h.handler.handle_lifecycle_event(&event).await.unwrap(),
        DiscardReason::UnusedSubscription
    );
}

#[tokio::test]
async fn test_lifecycle_wrong_secret() {
    let h = harness(config()).await;
    let event = Activity {
        subscription_id: SUBSCRIPTION.to_string(),
        client_state: "nope".to_string(),
        lifecycle_event: Some("missed".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        h.handler.handle_lifecycle_event(&event).await,
        Err(HandlerError::InvalidClientState(_))
    ));
    assert_eq!(
        h.metrics.count_with(
            MetricKind::LifecycleEvent,
            "discarded_reason",
            "invalid_webhook_secret"
        ),
        1
    );
}

const BOT_TEAMS: &str = "bot-teams-id";
const TEAMS_GUEST: &str = "ms-guest-id";
const GUEST: &str = "mm-guest-id";

/// Link the bot to its Teams account, as when the bot posted the message.
async fn link_bot(h: &Harness) {
    h.store.set_user_info(BOT, BOT_TEAMS, None).await.unwrap();
}

/// An active synthetic user mirroring a Teams guest.
async fn add_guest(h: &Harness) {
    h.platform.add_user(PlatformUser {
        id: GUEST.to_string(),
        username: "msteams_carol".to_string(),
        email: "carol@example.com".to_string(),
        remote_id: Some("remote-id".to_string()),
        ..Default::default()
    });
    h.graph.add_user(GraphUser {
        id: TEAMS_GUEST.to_string(),
        display_name: "carol".to_string(),
        mail: "carol@example.com".to_string(),
        user_type: "Guest".to_string(),
    });
    h.store.set_user_info(GUEST, TEAMS_GUEST, None).await.unwrap();
}

fn authored_by(mut msg: Message, teams_user_id: &str) -> Message {
    msg.user_id = teams_user_id.to_string();
    msg
}

#[tokio::test]
async fn test_created_by_bot_is_skipped_but_touches_subscription() {
    let h = harness(config()).await;
    link_bot(&h).await;
    h.graph
        .add_chat_message(authored_by(chat_message("echo", at(30)), BOT_TEAMS));
    h.handler.start().unwrap();

    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::IsBotUser) == 1).await);
    assert!(h.platform.posts().is_empty());
    assert_eq!(h.handler.last_activity_at(SUBSCRIPTION), Some(at(30)));
    assert!(h.platform.kv_get(LAST_RECEIVED_CHANGE_KEY).is_some());
    h.handler.stop().await;
}

#[tokio::test]
async fn test_updated_by_bot_is_skipped() {
    let h = harness(config()).await;
    link_bot(&h).await;
    h.handler.start().unwrap();
    let post_id = create_dm_post(&h).await;

    h.graph
        .add_chat_message(authored_by(chat_message("echo edit", at(60)), BOT_TEAMS));
    h.handler.handle(activity("updated")).await.unwrap();

    assert!(eventually(|| discarded(&h.metrics, DiscardReason::IsBotUser) == 1).await);
    assert_eq!(h.platform.post(&post_id).unwrap().message, "test-1");
    assert_eq!(h.handler.last_activity_at(SUBSCRIPTION), Some(at(60)));
    let info = h
        .store
        .get_post_info_by_ms_teams_id(CHAT, MESSAGE)
        .await
        .unwrap();
    assert_eq!(info.ms_teams_last_update_at, at(0));
    h.handler.stop().await;
}

#[tokio::test]
async fn test_created_by_guest_deactivates_mirror() {
    let h = harness(config()).await;
    add_guest(&h).await;
    h.graph
        .add_chat_message(authored_by(chat_message("from a guest", at(0)), TEAMS_GUEST));
    h.handler.start().unwrap();

    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::Other) == 1).await);
    assert!(h.platform.posts().is_empty());
    assert_ne!(h.platform.user(GUEST).unwrap().delete_at, 0);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_updated_by_guest_deactivates_mirror() {
    let h = harness(config()).await;
    add_guest(&h).await;
    h.handler.start().unwrap();
    let post_id = create_dm_post(&h).await;

    h.graph
        .add_chat_message(authored_by(chat_message("guest edit", at(60)), TEAMS_GUEST));
    h.handler.handle(activity("updated")).await.unwrap();

    assert!(eventually(|| discarded(&h.metrics, DiscardReason::Other) == 1).await);
    assert_eq!(h.platform.post(&post_id).unwrap().message, "test-1");
    assert_ne!(h.platform.user(GUEST).unwrap().delete_at, 0);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_guest_allowed_when_guest_sync_enabled() {
    let h = harness(config().with_flags(SyncFlags {
        sync_guest_users: true,
        ..Default::default()
    }))
    .await;
    add_guest(&h).await;
    h.graph
        .add_chat_message(authored_by(chat_message("from a guest", at(0)), TEAMS_GUEST));
    h.handler.start().unwrap();

    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| h.metrics.count(MetricKind::ChangeEvent) == 1).await);
    assert_eq!(h.platform.user(GUEST).unwrap().delete_at, 0);
    h.handler.stop().await;
}

#[tokio::test]
async fn test_update_after_delete_restores_post() {
    let h = harness(config()).await;
    h.handler.start().unwrap();
    let post_id = create_dm_post(&h).await;

    h.handler.handle(activity("deleted")).await.unwrap();
    assert!(eventually(|| h.platform.post(&post_id).is_some_and(|p| p.delete_at != 0)).await);

    h.graph
        .add_chat_message(chat_message("test-1 restored", at(60)));
    h.handler.handle(activity("updated")).await.unwrap();

    assert!(eventually(|| {
        h.metrics
            .count_with(MetricKind::Messages, "action", "updated")
            == 1
    })
    .await);
    let post = h.platform.post(&post_id).unwrap();
    assert_eq!(post.delete_at, 0);
    assert_eq!(post.message, "test-1 restored");
    let info = h
        .store
        .get_post_info_by_ms_teams_id(CHAT, MESSAGE)
        .await
        .unwrap();
    assert_eq!(info.ms_teams_last_update_at, at(60));
    h.handler.stop().await;
}

#[tokio::test]
async fn test_channel_reply_create_and_delete() {
    let h = harness(config()).await;
    link_channel(&h).await;
    h.graph.add_reply(
        "parent-message",
        Message {
            id: "reply-message".to_string(),
            team_id: "team-id".to_string(),
            channel_id: "channel-id".to_string(),
            reply_to_id: "parent-message".to_string(),
            user_id: TEAMS_USER.to_string(),
            user_display_name: "alice".to_string(),
            text: "<p>a reply</p>".to_string(),
            create_at: at(0),
            last_update_at: at(0),
            ..Default::default()
        },
    );
    h.handler.start().unwrap();

    let reply = |change_type: &str| Activity {
        subscription_id: "channel-subscription".to_string(),
        client_state: SECRET.to_string(),
        change_type: change_type.to_string(),
        resource: "teams('team-id')/channels('channel-id')/messages('parent-message')/replies('reply-message')"
            .to_string(),
        ..Default::default()
    };

    h.handler.handle(reply("created")).await.unwrap();
    assert!(eventually(|| h.platform.posts_in_channel("mm-channel").len() == 1).await);
    let post = h.platform.posts_in_channel("mm-channel")[0].clone();
    assert_eq!(post.message, "a reply");
    let info = h
        .store
        .get_post_info_by_ms_teams_id("channel-id", "reply-message")
        .await
        .unwrap();
    assert_eq!(info.mattermost_id, post.id);

    h.handler.handle(reply("deleted")).await.unwrap();
    assert!(eventually(|| h.platform.post(&post.id).is_some_and(|p| p.delete_at != 0)).await);
    assert_eq!(
        h.metrics.count_with(MetricKind::Messages, "action", "deleted"),
        1
    );
    h.handler.stop().await;
}

#[tokio::test]
async fn test_link_failure_removes_created_post() {
    let h = harness(config()).await;
    sqlx::query(
        r#"
        CREATE TRIGGER fail_post_links BEFORE INSERT ON msteamssync_posts
        BEGIN SELECT RAISE(ABORT, 'link failure'); END
        "#,
    )
    .execute(h.store.primary())
    .await
    .unwrap();
    h.graph.add_chat_message(chat_message("test-1", at(0)));
    h.handler.start().unwrap();

    h.handler.handle(activity("created")).await.unwrap();
    assert!(eventually(|| discarded(&h.metrics, DiscardReason::Other) == 1).await);
    assert_eq!(
        h.metrics
            .count_with(MetricKind::PostLinkError, "action", "deleted"),
        1
    );
    assert_eq!(
        h.metrics
            .count_with(MetricKind::Messages, "action", "created"),
        0
    );

    let posts = h.platform.posts();
    assert_eq!(posts.len(), 1);
    assert_ne!(posts[0].delete_at, 0);
    assert!(h
        .store
        .get_post_info_by_ms_teams_id(CHAT, MESSAGE)
        .await
        .unwrap_err()
        .is_not_found());
    h.handler.stop().await;
}
