//! Core traits and types for the Teams bridge.
//!
//! This crate defines the capabilities the bridge consumes from the outside
//! world and the data it exchanges with them:
//!
//! - [`GraphClient`] / [`UserClientFactory`] - Microsoft Graph operations
//! - [`PlatformSdk`] - posts, users, reactions and files on the host platform
//! - [`Metrics`] - the `observe(kind, labels)` sink
//! - [`Activity`] - a webhook change notification, and [`parse_resource`] to
//!   turn its resource string into [`ActivityIds`]
//!
//! # Example
//!
//! ```rust
//! use bridge_core::parse_resource;
//!
//! let ids = parse_resource("chats('19:abc')/messages('1690000000000')");
//! assert_eq!(ids.chat_id, "19:abc");
//! assert_eq!(ids.channel_key(), "19:abc");
//! ```

mod activity;
mod error;
mod graph;
mod markdown;
mod metrics;
mod models;
mod platform;
mod resource;
mod token;

pub use activity::{Activities, Activity, ChangeType, EncryptedContent, LifecycleEvent};
pub use error::{GraphError, PlatformError};
pub use graph::{ContentKeyResolver, GraphClient, GraphResult, UserClientFactory};
pub use markdown::html_to_markdown;
pub use metrics::{DiscardReason, MetricKind, Metrics, NoopMetrics, TracingMetrics};
pub use models::{
    Attachment, Chat, ChatMember, ChatType, GraphSubscription, GraphUser, Mention, Message,
    Reaction, SubscriptionRequest, SubscriptionTarget, CODE_SNIPPET_CONTENT_TYPE,
    MESSAGE_REFERENCE_CONTENT_TYPE,
};
pub use platform::{
    FileInfo, FileLimits, NewUser, PlatformReaction, PlatformResult, PlatformSdk, PlatformUser,
    Post, REMOVED_FROM_PLUGIN,
};
pub use resource::{parse_resource, ActivityIds};
pub use token::OAuthToken;

// Re-export async_trait for convenience
pub use async_trait::async_trait;
