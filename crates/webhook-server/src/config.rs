//! Configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use activity_handler::{HandlerConfig, SyncFlags, DEFAULT_QUEUE_SIZE, DEFAULT_WORKERS};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use link_store::StoreConfig;
use subscription_monitor::{MonitorConfig, DEFAULT_CHECK_INTERVAL};

/// Webhook server configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address.
    pub addr: SocketAddr,
    /// Primary SQLite database URL.
    pub database_url: String,
    /// Read replica URL; reads use the primary when unset.
    pub replica_url: Option<String>,
    /// Key sealing stored OAuth tokens.
    pub encryption_key: Vec<u8>,
    /// Client state shared with Graph.
    pub webhook_secret: String,
    /// Public URL Graph delivers notifications to.
    pub base_url: String,
    pub bot_user_id: String,
    pub remote_id: String,
    pub flags: SyncFlags,
    pub workers: usize,
    pub queue_size: usize,
    pub monitor_interval: Duration,
    /// Encryption certificate id for notifications with resource data.
    pub certificate: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("database_url", &self.database_url)
            .field("replica_url", &self.replica_url)
            .field("base_url", &self.base_url)
            .field("bot_user_id", &self.bot_user_id)
            .field("remote_id", &self.remote_id)
            .field("flags", &self.flags)
            .field("workers", &self.workers)
            .field("queue_size", &self.queue_size)
            .field("monitor_interval", &self.monitor_interval)
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `BRIDGE_ADDR` | Server bind address | `127.0.0.1:8789` |
    /// | `BRIDGE_DATABASE_URL` | Primary SQLite URL | `sqlite:bridge.db?mode=rwc` |
    /// | `BRIDGE_REPLICA_URL` | Read replica URL | primary |
    /// | `BRIDGE_ENCRYPTION_KEY` | Base64 token key, 16 bytes | (required) |
    /// | `BRIDGE_WEBHOOK_SECRET` | Webhook client state | (required) |
    /// | `BRIDGE_BASE_URL` | Public URL of this server | (required) |
    /// | `BRIDGE_BOT_USER_ID` | Bot user on the host platform | (required) |
    /// | `BRIDGE_REMOTE_ID` | Remote id of synthetic users | (required) |
    /// | `BRIDGE_SYNC_DIRECT_MESSAGES` | Mirror chats | `true` |
    /// | `BRIDGE_SYNC_GUEST_USERS` | Mirror guest messages | `false` |
    /// | `BRIDGE_SELECTIVE_SYNC` | Selective sync | `false` |
    /// | `BRIDGE_WORKERS` | Activity workers | `20` |
    /// | `BRIDGE_QUEUE_SIZE` | Activity queue bound | `1000` |
    /// | `BRIDGE_MONITOR_INTERVAL_SECS` | Subscription check period | `300` |
    /// | `BRIDGE_CERTIFICATE` | Encryption certificate id | (none) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let addr = var("BRIDGE_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8789".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidAddr)?;

        let database_url =
            var("BRIDGE_DATABASE_URL").unwrap_or_else(|| "sqlite:bridge.db?mode=rwc".to_string());

        let encryption_key = STANDARD
            .decode(required("BRIDGE_ENCRYPTION_KEY")?.trim())
            .map_err(|_| ConfigError::InvalidEncryptionKey)?;
        if encryption_key.len() != 16 {
            return Err(ConfigError::InvalidEncryptionKey);
        }

        let flags = SyncFlags {
            sync_direct_messages: parse_bool(&var, "BRIDGE_SYNC_DIRECT_MESSAGES", true)?,
            sync_guest_users: parse_bool(&var, "BRIDGE_SYNC_GUEST_USERS", false)?,
            selective_sync: parse_bool(&var, "BRIDGE_SELECTIVE_SYNC", false)?,
        };

        Ok(Self {
            addr,
            database_url,
            replica_url: var("BRIDGE_REPLICA_URL"),
            encryption_key,
            webhook_secret: required("BRIDGE_WEBHOOK_SECRET")?,
            base_url: required("BRIDGE_BASE_URL")?.trim_end_matches('/').to_string(),
            bot_user_id: required("BRIDGE_BOT_USER_ID")?,
            remote_id: required("BRIDGE_REMOTE_ID")?,
            flags,
            workers: parse_number(&var, "BRIDGE_WORKERS", DEFAULT_WORKERS as u64)? as usize,
            queue_size: parse_number(&var, "BRIDGE_QUEUE_SIZE", DEFAULT_QUEUE_SIZE as u64)? as usize,
            monitor_interval: Duration::from_secs(parse_number(
                &var,
                "BRIDGE_MONITOR_INTERVAL_SECS",
                DEFAULT_CHECK_INTERVAL.as_secs(),
            )?),
            certificate: var("BRIDGE_CERTIFICATE"),
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            replica_url: self.replica_url.clone(),
            remote_id: self.remote_id.clone(),
            ..StoreConfig::new(&self.database_url, self.encryption_key.clone())
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        let mut config = HandlerConfig::with_bot_user(&self.bot_user_id)
            .with_remote_id(&self.remote_id)
            .with_webhook_secret(&self.webhook_secret)
            .with_flags(self.flags);
        config.workers = self.workers;
        config.queue_size = self.queue_size;
        config
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let config = MonitorConfig::new(&self.base_url, &self.webhook_secret)
            .with_check_interval(self.monitor_interval);
        match &self.certificate {
            Some(certificate) => config.with_certificate(certificate),
            None => config,
        }
    }
}

fn parse_bool(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(name)),
        },
    }
}

fn parse_number(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::Invalid(name)),
        },
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid BRIDGE_ADDR format")]
    InvalidAddr,

    #[error("BRIDGE_ENCRYPTION_KEY must be 16 bytes, base64 encoded")]
    InvalidEncryptionKey,

    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}
