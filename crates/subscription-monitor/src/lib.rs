//! Subscription monitor for the Teams bridge.
//!
//! Graph only delivers change notifications while a webhook subscription is
//! alive, and subscriptions expire within the hour. [`Monitor`] runs a
//! periodic check that compares the subscriptions Graph reports with the rows
//! in the link store and, per target:
//!
//! - refreshes healthy subscriptions in place
//! - recreates those that are missing in Graph, about to expire, or created
//!   under another webhook secret or certificate
//! - subscribes where nothing exists yet
//! - deletes duplicates, orphans and subscriptions for unlinked channels
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bridge_core::TracingMetrics;
//! use link_store::{Store, StoreConfig};
//! use mock_bridge::MockGraph;
//! use subscription_monitor::{Monitor, MonitorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::connect(StoreConfig::new("sqlite::memory:", b"0123456789abcdef".to_vec())).await?;
//!     store.migrate().await?;
//!
//!     let monitor = Monitor::new(
//!         Arc::new(MockGraph::new()),
//!         store,
//!         Arc::new(TracingMetrics),
//!         MonitorConfig::new("https://bridge.example.com", "webhook-secret"),
//!     );
//!     monitor.start()?;
//!     monitor.stop().await;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod monitor;
mod plan;

pub use config::{
    MonitorConfig, CHANGES_PATH, DEFAULT_CHECK_INTERVAL, DEFAULT_EXPIRY_BUFFER,
    DEFAULT_GRAPH_TIMEOUT, LIFECYCLE_PATH,
};
pub use error::{MonitorError, Result};
pub use monitor::{CheckReport, Monitor};
