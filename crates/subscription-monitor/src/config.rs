//! Monitor configuration.

use std::time::Duration;

/// Default period between two checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Subscriptions closer than this to expiry are recreated instead of refreshed.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(15);

/// Default bound on a single Graph call.
pub const DEFAULT_GRAPH_TIMEOUT: Duration = Duration::from_secs(30);

/// Path the bridge receives change notifications on.
pub const CHANGES_PATH: &str = "/changes";

/// Path the bridge receives lifecycle notifications on.
pub const LIFECYCLE_PATH: &str = "/lifecycle";

#[derive(Clone)]
pub struct MonitorConfig {
    /// Public URL of the webhook server, without a trailing slash.
    pub base_url: String,

    /// Client state given to every subscription.
    pub webhook_secret: String,

    /// Encryption certificate id. When set, subscriptions ask Graph to
    /// include resource data in notifications.
    pub certificate: Option<String>,

    /// Keep a tenant-wide subscription to chat messages. Default: true.
    pub subscribe_all_chats: bool,

    /// Keep a tenant-wide subscription to channel messages, on top of the
    /// per-link ones. Default: false.
    pub subscribe_all_channels: bool,

    pub check_interval: Duration,
    pub expiry_buffer: Duration,
    pub graph_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            webhook_secret: String::new(),
            certificate: None,
            subscribe_all_chats: true,
            subscribe_all_channels: false,
            check_interval: DEFAULT_CHECK_INTERVAL,
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
            graph_timeout: DEFAULT_GRAPH_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("base_url", &self.base_url)
            .field("webhook_secret", &"<redacted>")
            .field("certificate", &self.certificate)
            .field("subscribe_all_chats", &self.subscribe_all_chats)
            .field("subscribe_all_channels", &self.subscribe_all_channels)
            .field("check_interval", &self.check_interval)
            .field("expiry_buffer", &self.expiry_buffer)
            .field("graph_timeout", &self.graph_timeout)
            .finish()
    }
}

impl MonitorConfig {
    pub fn new(base_url: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            webhook_secret: webhook_secret.into(),
            ..Default::default()
        }
    }

    pub fn with_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn notification_url(&self) -> String {
        format!("{}{CHANGES_PATH}", self.base_url)
    }

    pub fn lifecycle_url(&self) -> String {
        format!("{}{LIFECYCLE_PATH}", self.base_url)
    }

    /// The certificate id as stored on local rows: empty when unset.
    pub(crate) fn certificate_id(&self) -> &str {
        self.certificate.as_deref().unwrap_or_default()
    }
}
