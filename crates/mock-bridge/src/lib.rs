//! In-memory doubles for the capabilities the bridge consumes.
//!
//! - [`MockGraph`] - subscriptions, chats, messages, users and files kept in
//!   memory, with a call log and per-operation failure injection
//! - [`MockUserClientFactory`] - hands out [`MockGraph`] for user tokens,
//!   or an always-unauthorized client for revoked ones
//! - [`MockPlatform`] - posts, users, reactions, files and KV of the host
//!   platform
//! - [`RecordingMetrics`] - remembers every `observe` call
//! - [`StaticKeyResolver`] - fixed content keys per certificate id
//!
//! # Example
//!
//! ```rust
//! use bridge_core::{GraphClient, Message};
//! use mock_bridge::{GraphCall, MockGraph};
//!
//! #[tokio::main]
//! async fn main() {
//!     let graph = MockGraph::new();
//!     graph.add_chat_message(Message {
//!         id: "msg".to_string(),
//!         chat_id: "chat".to_string(),
//!         text: "hello".to_string(),
//!         ..Default::default()
//!     });
//!
//!     let message = graph.get_chat_message("chat", "msg").await.unwrap();
//!     assert_eq!(message.text, "hello");
//!     assert_eq!(graph.count_calls(|c| matches!(c, GraphCall::GetChatMessage { .. })), 1);
//! }
//! ```

mod graph;
mod metrics;
mod platform;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use graph::{GraphCall, MockGraph, MockUserClientFactory, StaticKeyResolver, UnauthorizedGraph};
pub use metrics::{Observation, RecordingMetrics};
pub use platform::MockPlatform;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
