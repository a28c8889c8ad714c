//! HTTP behavior of the notification endpoints.

use std::sync::Arc;

use activity_handler::{ActivityHandler, Capabilities, HandlerConfig};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use bridge_core::{GraphSubscription, MetricKind};
use chrono::{Duration, Utc};
use link_store::{Store, StoreConfig, Subscription, SubscriptionKind};
use mock_bridge::{GraphCall, MockGraph, MockPlatform, MockUserClientFactory, RecordingMetrics};
use serde_json::{json, Value};
use tower::ServiceExt;
use webhook_server::{router, AppState};

const KEY: &[u8] = b"0123456789abcdef";
const SECRET: &str = "webhook-secret";
const SUBSCRIPTION: &str = "chats-sub";

struct Harness {
    app: Router,
    handler: Arc<ActivityHandler>,
    graph: Arc<MockGraph>,
    metrics: Arc<RecordingMetrics>,
}

async fn harness() -> Harness {
    let store = Store::connect(StoreConfig::new("sqlite::memory:", KEY.to_vec()))
        .await
        .unwrap();
    store.migrate().await.unwrap();

    let expires_on = Utc::now() + Duration::minutes(30);
    store
        .save_subscription(&Subscription::global(
            SUBSCRIPTION,
            SubscriptionKind::AllChats,
            SECRET,
            expires_on,
        ))
        .await
        .unwrap();

    let graph = Arc::new(MockGraph::new());
    graph.add_subscription(GraphSubscription {
        id: SUBSCRIPTION.to_string(),
        resource: "/chats/getAllMessages".to_string(),
        expires_on,
        certificate: None,
    });
    let metrics = Arc::new(RecordingMetrics::new());

    let handler = Arc::new(ActivityHandler::new(
        Capabilities {
            store,
            graph: graph.clone(),
            user_clients: Arc::new(MockUserClientFactory::new(graph.clone())),
            platform: Arc::new(MockPlatform::new()),
            metrics: metrics.clone(),
            content_keys: None,
        },
        HandlerConfig::with_bot_user("bot-user-id").with_webhook_secret(SECRET),
    ));

    Harness {
        app: router().with_state(AppState::new(handler.clone())),
        handler,
        graph,
        metrics,
    }
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn notification(subscription_id: &str, client_state: &str) -> Value {
    json!({
        "value": [{
            "subscriptionId": subscription_id,
            "clientState": client_state,
            "changeType": "created",
            "resource": "chats('chat-id')/messages('message-id')"
        }]
    })
}

fn lifecycle_event(client_state: &str, event: &str) -> Value {
    json!({
        "value": [{
            "subscriptionId": SUBSCRIPTION,
            "clientState": client_state,
            "lifecycleEvent": event
        }]
    })
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_validation_token_is_echoed() {
    let h = harness().await;

    for path in ["/changes", "/lifecycle"] {
        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("{path}?validationToken=token%20value"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain"
        );
        assert_eq!(body_string(response).await, "token value");
    }
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let h = harness().await;

    let response = h
        .app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/changes")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "unable to get the activities from the message");
}

#[tokio::test]
async fn test_valid_notification_is_accepted() {
    let h = harness().await;

    let response = h
        .app
        .oneshot(post("/changes", notification(SUBSCRIPTION, SECRET)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_wrong_client_state_is_rejected() {
    let h = harness().await;

    let response = h
        .app
        .oneshot(post("/changes", notification(SUBSCRIPTION, "wrong-secret")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(
        body["error"],
        format!("invalid client state for subscription {SUBSCRIPTION}")
    );
}

#[tokio::test]
async fn test_unknown_subscription_is_accepted_and_deleted() {
    let h = harness().await;

    let response = h
        .app
        .oneshot(post("/changes", notification("unknown-sub", SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    let deleted = GraphCall::DeleteSubscription {
        id: "unknown-sub".to_string(),
    };
    while !h.graph.calls().contains(&deleted) {
        assert!(tokio::time::Instant::now() < deadline, "subscription not deleted");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_stopped_handler_is_unavailable() {
    let h = harness().await;
    h.handler.stop().await;

    let response = h
        .app
        .oneshot(post("/changes", notification(SUBSCRIPTION, SECRET)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_lifecycle_reauthorization_refreshes() {
    let h = harness().await;

    let response = h
        .app
        .oneshot(post(
            "/lifecycle",
            lifecycle_event(SECRET, "reauthorizationRequired"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.metrics.count(MetricKind::Refresh), 1);
    assert_eq!(
        h.graph.count_calls(|c| matches!(c, GraphCall::RefreshSubscription { .. })),
        1
    );
}

#[tokio::test]
async fn test_lifecycle_wrong_secret_is_rejected() {
    let h = harness().await;

    let response = h
        .app
        .oneshot(post(
            "/lifecycle",
            lifecycle_event("wrong-secret", "reauthorizationRequired"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        h.metrics
            .count_with(MetricKind::LifecycleEvent, "discarded_reason", "invalid_webhook_secret"),
        1
    );
    assert_eq!(
        h.graph.count_calls(|c| matches!(c, GraphCall::RefreshSubscription { .. })),
        0
    );
}

#[tokio::test]
async fn test_health() {
    let h = harness().await;

    let response = h
        .app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}
