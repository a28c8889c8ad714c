//! The Graph API capability set consumed by the bridge.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::GraphError;
use crate::models::{Chat, GraphSubscription, GraphUser, Message, SubscriptionRequest};
use crate::resource::ActivityIds;
use crate::token::OAuthToken;

/// Result type for Graph calls.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Operations the bridge needs from Microsoft Graph.
///
/// Implementations are expected to bound each call with their own timeout.
#[async_trait]
pub trait GraphClient: Send + Sync {
    // Subscriptions
    async fn subscribe(&self, request: SubscriptionRequest) -> GraphResult<GraphSubscription>;
    async fn refresh_subscription(&self, subscription_id: &str) -> GraphResult<DateTime<Utc>>;
    async fn delete_subscription(&self, subscription_id: &str) -> GraphResult<()>;
    async fn list_subscriptions(&self) -> GraphResult<Vec<GraphSubscription>>;

    // Chats and messages
    async fn get_chat(&self, chat_id: &str) -> GraphResult<Chat>;
    async fn get_chat_message(&self, chat_id: &str, message_id: &str) -> GraphResult<Message>;
    async fn get_message(
        &self,
        team_id: &str,
        channel_id: &str,
        message_id: &str,
    ) -> GraphResult<Message>;
    async fn get_reply(
        &self,
        team_id: &str,
        channel_id: &str,
        message_id: &str,
        reply_id: &str,
    ) -> GraphResult<Message>;

    // Users
    async fn get_user(&self, user_id: &str) -> GraphResult<GraphUser>;

    // Files
    async fn get_file_content(&self, download_url: &str) -> GraphResult<Vec<u8>>;
    async fn get_hosted_content(&self, ids: &ActivityIds) -> GraphResult<Vec<u8>>;
    async fn get_code_snippet(&self, url: &str) -> GraphResult<String>;
}

/// Builds clients acting on behalf of a connected user.
pub trait UserClientFactory: Send + Sync {
    fn client_for_token(&self, token: &OAuthToken) -> Arc<dyn GraphClient>;
}

/// Unwraps the symmetric key of a rich notification using the private key of
/// the subscription's encryption certificate.
pub trait ContentKeyResolver: Send + Sync {
    fn unwrap_data_key(&self, certificate_id: &str, wrapped_key: &[u8])
        -> Result<Vec<u8>, String>;
}
