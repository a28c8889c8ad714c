//! In-memory Graph.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bridge_core::{
    ActivityIds, Chat, ContentKeyResolver, GraphClient, GraphError, GraphResult, GraphSubscription,
    GraphUser, Message, OAuthToken, SubscriptionRequest, UserClientFactory,
};
use chrono::{DateTime, Duration, Utc};

use crate::lock;

/// A call made against [`MockGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphCall {
    Subscribe { resource: String },
    RefreshSubscription { id: String },
    DeleteSubscription { id: String },
    ListSubscriptions,
    GetChat { chat_id: String },
    GetChatMessage { chat_id: String, message_id: String },
    GetMessage { team_id: String, channel_id: String, message_id: String },
    GetReply { message_id: String, reply_id: String },
    GetUser { user_id: String },
    GetFileContent { url: String },
    GetHostedContent { message_id: String, hosted_contents_id: String },
    GetCodeSnippet { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MessageKey {
    Chat(String, String),
    Channel(String, String, String),
    Reply(String, String, String, String),
}

#[derive(Default)]
struct GraphState {
    subscriptions: HashMap<String, GraphSubscription>,
    chats: HashMap<String, Chat>,
    messages: HashMap<MessageKey, Message>,
    users: HashMap<String, GraphUser>,
    files: HashMap<String, Vec<u8>>,
    hosted_contents: HashMap<(String, String), Vec<u8>>,
    snippets: HashMap<String, String>,
    failures: HashMap<&'static str, GraphError>,
    calls: Vec<GraphCall>,
}

/// In-memory Graph.
///
/// Subscriptions get ids `sub-1`, `sub-2`, … and live for
/// [`subscription_lifetime`](Self::with_subscription_lifetime) (one hour by
/// default) from creation or refresh.
pub struct MockGraph {
    state: Mutex<GraphState>,
    next_id: AtomicU64,
    lifetime: Duration,
}

impl Default for MockGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGraph {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            next_id: AtomicU64::new(1),
            lifetime: Duration::hours(1),
        }
    }

    pub fn with_subscription_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// How long a created or refreshed subscription lives.
    pub fn subscription_lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Put a subscription in place as if created earlier.
    pub fn add_subscription(&self, subscription: GraphSubscription) {
        lock(&self.state)
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub fn subscriptions(&self) -> Vec<GraphSubscription> {
        let mut subs: Vec<_> = lock(&self.state).subscriptions.values().cloned().collect();
        subs.sort_by(|a, b| a.id.cmp(&b.id));
        subs
    }

    pub fn add_chat(&self, chat: Chat) {
        lock(&self.state).chats.insert(chat.id.clone(), chat);
    }

    /// Store a chat message under its `chat_id`.
    pub fn add_chat_message(&self, message: Message) {
        let key = MessageKey::Chat(message.chat_id.clone(), message.id.clone());
        lock(&self.state).messages.insert(key, message);
    }

    /// Store a channel message under its `team_id` and `channel_id`.
    pub fn add_channel_message(&self, message: Message) {
        let key = MessageKey::Channel(
            message.team_id.clone(),
            message.channel_id.clone(),
            message.id.clone(),
        );
        lock(&self.state).messages.insert(key, message);
    }

    /// Store a reply to `parent_id` in a channel.
    pub fn add_reply(&self, parent_id: &str, message: Message) {
        let key = MessageKey::Reply(
            message.team_id.clone(),
            message.channel_id.clone(),
            parent_id.to_string(),
            message.id.clone(),
        );
        lock(&self.state).messages.insert(key, message);
    }

    pub fn add_user(&self, user: GraphUser) {
        lock(&self.state).users.insert(user.id.clone(), user);
    }

    pub fn add_file(&self, url: impl Into<String>, data: Vec<u8>) {
        lock(&self.state).files.insert(url.into(), data);
    }

    pub fn add_hosted_content(&self, message_id: &str, hosted_contents_id: &str, data: Vec<u8>) {
        lock(&self.state).hosted_contents.insert(
            (message_id.to_string(), hosted_contents_id.to_string()),
            data,
        );
    }

    pub fn add_code_snippet(&self, url: impl Into<String>, code: impl Into<String>) {
        lock(&self.state).snippets.insert(url.into(), code.into());
    }

    /// Make every call to `operation` (the trait method name) fail with `error`
    /// until [`clear_failure`](Self::clear_failure).
    pub fn fail(&self, operation: &'static str, error: GraphError) {
        lock(&self.state).failures.insert(operation, error);
    }

    pub fn clear_failure(&self, operation: &'static str) {
        lock(&self.state).failures.remove(operation);
    }

    pub fn calls(&self) -> Vec<GraphCall> {
        lock(&self.state).calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&GraphCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    fn record(&self, operation: &'static str, call: GraphCall) -> GraphResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        match state.failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn message(&self, key: &MessageKey, id: &str) -> GraphResult<Message> {
        lock(&self.state)
            .messages
            .get(key)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("message {id}")))
    }
}

#[async_trait]
impl GraphClient for MockGraph {
    async fn subscribe(&self, request: SubscriptionRequest) -> GraphResult<GraphSubscription> {
        let resource = request.target.resource();
        self.record(
            "subscribe",
            GraphCall::Subscribe {
                resource: resource.clone(),
            },
        )?;

        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = GraphSubscription {
            id: id.clone(),
            resource,
            expires_on: Utc::now() + self.lifetime,
            certificate: request.certificate,
        };
        lock(&self.state)
            .subscriptions
            .insert(id, subscription.clone());
        Ok(subscription)
    }

    async fn refresh_subscription(&self, subscription_id: &str) -> GraphResult<DateTime<Utc>> {
        self.record(
            "refresh_subscription",
            GraphCall::RefreshSubscription {
                id: subscription_id.to_string(),
            },
        )?;

        let mut state = lock(&self.state);
        let sub = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| GraphError::NotFound(format!("subscription {subscription_id}")))?;
        sub.expires_on = Utc::now() + self.lifetime;
        Ok(sub.expires_on)
    }

    async fn delete_subscription(&self, subscription_id: &str) -> GraphResult<()> {
        self.record(
            "delete_subscription",
            GraphCall::DeleteSubscription {
                id: subscription_id.to_string(),
            },
        )?;

        lock(&self.state)
            .subscriptions
            .remove(subscription_id)
            .map(|_| ())
            .ok_or_else(|| GraphError::NotFound(format!("subscription {subscription_id}")))
    }

    async fn list_subscriptions(&self) -> GraphResult<Vec<GraphSubscription>> {
        self.record("list_subscriptions", GraphCall::ListSubscriptions)?;
        Ok(self.subscriptions())
    }

    async fn get_chat(&self, chat_id: &str) -> GraphResult<Chat> {
        self.record(
            "get_chat",
            GraphCall::GetChat {
                chat_id: chat_id.to_string(),
            },
        )?;

        lock(&self.state)
            .chats
            .get(chat_id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("chat {chat_id}")))
    }

    async fn get_chat_message(&self, chat_id: &str, message_id: &str) -> GraphResult<Message> {
        self.record(
            "get_chat_message",
            GraphCall::GetChatMessage {
                chat_id: chat_id.to_string(),
                message_id: message_id.to_string(),
            },
        )?;
        self.message(
            &MessageKey::Chat(chat_id.to_string(), message_id.to_string()),
            message_id,
        )
    }

    async fn get_message(
        &self,
        team_id: &str,
        channel_id: &str,
        message_id: &str,
    ) -> GraphResult<Message> {
        self.record(
            "get_message",
            GraphCall::GetMessage {
                team_id: team_id.to_string(),
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
            },
        )?;
        self.message(
            &MessageKey::Channel(
                team_id.to_string(),
                channel_id.to_string(),
                message_id.to_string(),
            ),
            message_id,
        )
    }

    async fn get_reply(
        &self,
        team_id: &str,
        channel_id: &str,
        message_id: &str,
        reply_id: &str,
    ) -> GraphResult<Message> {
        self.record(
            "get_reply",
            GraphCall::GetReply {
                message_id: message_id.to_string(),
                reply_id: reply_id.to_string(),
            },
        )?;
        self.message(
            &MessageKey::Reply(
                team_id.to_string(),
                channel_id.to_string(),
                message_id.to_string(),
                reply_id.to_string(),
            ),
            reply_id,
        )
    }

    async fn get_user(&self, user_id: &str) -> GraphResult<GraphUser> {
        self.record(
            "get_user",
            GraphCall::GetUser {
                user_id: user_id.to_string(),
            },
        )?;

        lock(&self.state)
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("user {user_id}")))
    }

    async fn get_file_content(&self, download_url: &str) -> GraphResult<Vec<u8>> {
        self.record(
            "get_file_content",
            GraphCall::GetFileContent {
                url: download_url.to_string(),
            },
        )?;

        lock(&self.state)
            .files
            .get(download_url)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("file {download_url}")))
    }

    async fn get_hosted_content(&self, ids: &ActivityIds) -> GraphResult<Vec<u8>> {
        let message_id = ids.target_message_id().to_string();
        self.record(
            "get_hosted_content",
            GraphCall::GetHostedContent {
                message_id: message_id.clone(),
                hosted_contents_id: ids.hosted_contents_id.clone(),
            },
        )?;

        lock(&self.state)
            .hosted_contents
            .get(&(message_id, ids.hosted_contents_id.clone()))
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("hosted content {}", ids.hosted_contents_id)))
    }

    async fn get_code_snippet(&self, url: &str) -> GraphResult<String> {
        self.record(
            "get_code_snippet",
            GraphCall::GetCodeSnippet {
                url: url.to_string(),
            },
        )?;

        lock(&self.state)
            .snippets
            .get(url)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("code snippet {url}")))
    }
}

/// A Graph client whose token has been revoked.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnauthorizedGraph;

impl UnauthorizedGraph {
    fn denied<T>() -> GraphResult<T> {
        Err(GraphError::Unauthorized("token expired or revoked".to_string()))
    }
}

#[async_trait]
impl GraphClient for UnauthorizedGraph {
    async fn subscribe(&self, _request: SubscriptionRequest) -> GraphResult<GraphSubscription> {
        Self::denied()
    }
    async fn refresh_subscription(&self, _id: &str) -> GraphResult<DateTime<Utc>> {
        Self::denied()
    }
    async fn delete_subscription(&self, _id: &str) -> GraphResult<()> {
        Self::denied()
    }
    async fn list_subscriptions(&self) -> GraphResult<Vec<GraphSubscription>> {
        Self::denied()
    }
    async fn get_chat(&self, _chat_id: &str) -> GraphResult<Chat> {
        Self::denied()
    }
    async fn get_chat_message(&self, _chat_id: &str, _message_id: &str) -> GraphResult<Message> {
        Self::denied()
    }
    async fn get_message(&self, _t: &str, _c: &str, _m: &str) -> GraphResult<Message> {
        Self::denied()
    }
    async fn get_reply(&self, _t: &str, _c: &str, _m: &str, _r: &str) -> GraphResult<Message> {
        Self::denied()
    }
    async fn get_user(&self, _user_id: &str) -> GraphResult<GraphUser> {
        Self::denied()
    }
    async fn get_file_content(&self, _url: &str) -> GraphResult<Vec<u8>> {
        Self::denied()
    }
    async fn get_hosted_content(&self, _ids: &ActivityIds) -> GraphResult<Vec<u8>> {
        Self::denied()
    }
    async fn get_code_snippet(&self, _url: &str) -> GraphResult<String> {
        Self::denied()
    }
}

/// Hands out a shared [`MockGraph`] for any token except revoked ones.
pub struct MockUserClientFactory {
    graph: Arc<MockGraph>,
    revoked: Mutex<HashSet<String>>,
    used: Mutex<Vec<String>>,
}

impl MockUserClientFactory {
    pub fn new(graph: Arc<MockGraph>) -> Self {
        Self {
            graph,
            revoked: Mutex::new(HashSet::new()),
            used: Mutex::new(Vec::new()),
        }
    }

    /// Clients built for `access_token` answer every call with `Unauthorized`.
    pub fn revoke(&self, access_token: &str) {
        lock(&self.revoked).insert(access_token.to_string());
    }

    /// Access tokens clients were built for, in order.
    pub fn used_tokens(&self) -> Vec<String> {
        lock(&self.used).clone()
    }
}

impl UserClientFactory for MockUserClientFactory {
    fn client_for_token(&self, token: &OAuthToken) -> Arc<dyn GraphClient> {
        lock(&self.used).push(token.access_token.clone());
        if lock(&self.revoked).contains(&token.access_token) {
            Arc::new(UnauthorizedGraph)
        } else {
            self.graph.clone()
        }
    }
}

/// Returns a fixed content key per certificate id.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<String, Vec<u8>>,
}

impl StaticKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, certificate_id: impl Into<String>, key: Vec<u8>) -> Self {
        self.keys.insert(certificate_id.into(), key);
        self
    }
}

impl ContentKeyResolver for StaticKeyResolver {
    fn unwrap_data_key(&self, certificate_id: &str, _wrapped_key: &[u8]) -> Result<Vec<u8>, String> {
        self.keys
            .get(certificate_id)
            .cloned()
            .ok_or_else(|| format!("unknown certificate {certificate_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::SubscriptionTarget;

    fn request(target: SubscriptionTarget) -> SubscriptionRequest {
        SubscriptionRequest {
            target,
            notification_url: "https://bridge/changes".to_string(),
            lifecycle_notification_url: "https://bridge/lifecycle".to_string(),
            client_state: "secret".to_string(),
            certificate: None,
        }
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let graph = MockGraph::new().with_subscription_lifetime(Duration::minutes(30));
        let sub = graph.subscribe(request(SubscriptionTarget::AllChats)).await.unwrap();
        assert_eq!(sub.id, "sub-1");
        assert_eq!(sub.resource, "/chats/getAllMessages");

        let refreshed = graph.refresh_subscription("sub-1").await.unwrap();
        assert!(refreshed >= sub.expires_on);
        assert_eq!(graph.list_subscriptions().await.unwrap().len(), 1);

        graph.delete_subscription("sub-1").await.unwrap();
        assert!(graph.delete_subscription("sub-1").await.unwrap_err().is_not_found());
        assert_eq!(
            graph.calls()[0],
            GraphCall::Subscribe {
                resource: "/chats/getAllMessages".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let graph = MockGraph::new();
        graph.fail("list_subscriptions", GraphError::Throttled);
        assert_eq!(graph.list_subscriptions().await, Err(GraphError::Throttled));

        graph.clear_failure("list_subscriptions");
        assert!(graph.list_subscriptions().await.unwrap().is_empty());
        assert_eq!(graph.count_calls(|c| *c == GraphCall::ListSubscriptions), 2);
    }

    #[tokio::test]
    async fn test_revoked_token() {
        let graph = Arc::new(MockGraph::new());
        let factory = MockUserClientFactory::new(graph);
        factory.revoke("old");

        let client = factory.client_for_token(&OAuthToken::bearer("old"));
        assert!(client.get_user("u").await.unwrap_err().is_unauthorized());

        let client = factory.client_for_token(&OAuthToken::bearer("fresh"));
        assert!(client.get_user("u").await.unwrap_err().is_not_found());
        assert_eq!(factory.used_tokens(), vec!["old", "fresh"]);
    }
}
