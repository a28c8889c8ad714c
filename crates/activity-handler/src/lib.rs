//! Activity handler for the Teams bridge.
//!
//! Graph delivers change notifications for chats and channels to a webhook.
//! [`ActivityHandler::handle`] authenticates each one against its
//! subscription and queues it; a fixed pool of supervised workers then
//! mirrors the change onto the host platform:
//!
//! - **created** - resolve the sender and target channel, build the post
//!   (mentions, emoji, code snippets, files) and create it together with its
//!   post link
//! - **updated** - apply the edit to the linked post and reconcile reactions
//! - **deleted** - delete the linked post
//!
//! Every processed activity ends in a single `change_event` observation
//! labelled with its [`DiscardReason`](bridge_core::DiscardReason).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use activity_handler::{ActivityHandler, Capabilities, HandlerConfig};
//! use bridge_core::{Activity, TracingMetrics};
//! use link_store::{Store, StoreConfig};
//! use mock_bridge::{MockGraph, MockPlatform, MockUserClientFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::connect(StoreConfig::new("sqlite::memory:", b"0123456789abcdef".to_vec())).await?;
//!     store.migrate().await?;
//!
//!     let graph = Arc::new(MockGraph::new());
//!     let caps = Capabilities {
//!         store,
//!         graph: graph.clone(),
//!         user_clients: Arc::new(MockUserClientFactory::new(graph)),
//!         platform: Arc::new(MockPlatform::new()),
//!         metrics: Arc::new(TracingMetrics),
//!         content_keys: None,
//!     };
//!
//!     let handler = ActivityHandler::new(caps, HandlerConfig::with_bot_user("bot-user-id"));
//!     handler.start()?;
//!     handler.handle(Activity::default()).await?;
//!     handler.stop().await;
//!     Ok(())
//! }
//! ```

mod attachments;
mod config;
mod context;
mod convert;
mod created;
mod emoji;
mod encrypted;
mod error;
mod handler;
mod last_activity;
mod lifecycle;
mod process;
mod reactions;
mod resolve;
mod selective_sync;
mod supervisor;
mod updated;
mod users;

pub use attachments::{ATTACHMENT_ERROR_MESSAGE, MAX_FILE_ATTACHMENTS};
pub use config::{
    HandlerConfig, SyncFlags, DEFAULT_FLUSH_INTERVAL, DEFAULT_GRAPH_TIMEOUT, DEFAULT_QUEUE_SIZE,
    DEFAULT_WORKERS,
};
pub use context::Capabilities;
pub use convert::{extract_hosted_images, replace_emojis, sync_prop_key};
pub use emoji::emoji_name;
pub use encrypted::{decrypt_content, open_content, seal_content};
pub use error::{HandlerError, Result};
pub use handler::{ActivityHandler, Admission};
pub use last_activity::LAST_RECEIVED_CHANGE_KEY;
pub use selective_sync::{
    classify, should_sync, should_sync_any, Participant, PLATFORM_MATTERMOST, PLATFORM_MSTEAMS,
    PREFERENCE_CATEGORY, PREFERENCE_NAME_PLATFORM,
};
pub use supervisor::{supervise, QuitSignal};
pub use users::{is_remote_user, synthetic_username};
