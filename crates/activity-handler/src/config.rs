//! Handler configuration.

use std::time::Duration;

/// Default number of workers draining the queue.
pub const DEFAULT_WORKERS: usize = 20;

/// Default bound of the activity queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Default period of the last-activity flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default bound on a single Graph call.
pub const DEFAULT_GRAPH_TIMEOUT: Duration = Duration::from_secs(30);

/// Feature flags, captured once when the handler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncFlags {
    /// Mirror one-on-one and group chats.
    pub sync_direct_messages: bool,

    /// Mirror messages from Teams guest accounts.
    pub sync_guest_users: bool,

    /// Suppress chat mirrorings both sides would rather read on their own
    /// platform.
    pub selective_sync: bool,
}

impl Default for SyncFlags {
    fn default() -> Self {
        Self {
            sync_direct_messages: true,
            sync_guest_users: false,
            selective_sync: false,
        }
    }
}

/// Configuration for the activity handler.
#[derive(Clone)]
pub struct HandlerConfig {
    /// Number of workers. Default: 20.
    pub workers: usize,

    /// Bound of the activity queue. Once full, new activities are shed.
    /// Default: 1000.
    pub queue_size: usize,

    /// The bridge's bot user on the host platform.
    pub bot_user_id: String,

    /// Remote-cluster id stamped on synthetic users.
    pub remote_id: String,

    /// Client state expected on lifecycle notifications.
    pub webhook_secret: String,

    /// How often the in-memory `lastActivityAt` map is written back.
    pub flush_interval: Duration,

    /// Upper bound on each Graph call made while processing an activity.
    pub graph_timeout: Duration,

    pub flags: SyncFlags,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            bot_user_id: String::new(),
            remote_id: String::new(),
            webhook_secret: String::new(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            graph_timeout: DEFAULT_GRAPH_TIMEOUT,
            flags: SyncFlags::default(),
        }
    }
}

impl std::fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("workers", &self.workers)
            .field("queue_size", &self.queue_size)
            .field("bot_user_id", &self.bot_user_id)
            .field("remote_id", &self.remote_id)
            .field("flush_interval", &self.flush_interval)
            .field("graph_timeout", &self.graph_timeout)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl HandlerConfig {
    /// Create a config for the given bot user with default settings.
    pub fn with_bot_user(bot_user_id: impl Into<String>) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = remote_id.into();
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = secret.into();
        self
    }

    pub fn with_flags(mut self, flags: SyncFlags) -> Self {
        self.flags = flags;
        self
    }
}
