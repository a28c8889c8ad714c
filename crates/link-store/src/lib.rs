//! SQLite persistence for the Teams bridge.
//!
//! The store owns every bridge table: channel links, post links, user links
//! with sealed OAuth tokens, subscription records, the connect whitelist and
//! pending invites. Each module exposes free functions over a
//! [`sqlx::SqliteExecutor`]; [`Store`] wraps them, sending reads to the
//! replica pool and writes (and reads that must see the latest write) to the
//! primary.
//!
//! # Example
//!
//! ```no_run
//! use link_store::{Store, StoreConfig, PostInfo};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::connect(StoreConfig::new(
//!         "sqlite:bridge.db?mode=rwc",
//!         b"0123456789abcdef".to_vec(),
//!     ))
//!     .await?;
//!     store.migrate().await?;
//!
//!     store
//!         .link_posts(&PostInfo {
//!             mattermost_id: "mm-post".to_string(),
//!             ms_teams_id: "teams-message".to_string(),
//!             ms_teams_channel: "teams-chat".to_string(),
//!             ms_teams_last_update_at: chrono::Utc::now(),
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod channel_link;
pub mod crypt;
pub mod error;
pub mod invite;
pub mod migrations;
pub mod models;
pub mod post_link;
pub mod settings;
pub mod subscription;
pub mod user_info;
pub mod whitelist;

pub use crypt::{CryptError, TokenCipher};
pub use error::{OptionalExt, Result, StoreError};
pub use models::{
    from_micros, to_micros, ChannelLink, ConnectedUser, InvitedUser, PostInfo, Subscription,
    SubscriptionKind, UserChatActivity, UserConnectStatus,
};

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use bridge_core::OAuthToken;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

/// Default number of connections per pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Rows per statement when replacing the whitelist.
pub const WHITELIST_BATCH_SIZE: usize = 100;

/// Connection settings for [`Store`].
#[derive(Clone)]
pub struct StoreConfig {
    /// Primary database URL, e.g. `sqlite:bridge.db?mode=rwc`.
    pub database_url: String,
    /// Optional read replica. Reads use the primary when unset.
    pub replica_url: Option<String>,
    pub max_connections: u32,
    pub replica_max_connections: u32,
    /// 16- or 32-byte AES key for stored tokens.
    pub encryption_key: Vec<u8>,
    /// Remote-cluster id that owns synthetic users.
    pub remote_id: String,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>, encryption_key: Vec<u8>) -> Self {
        Self {
            database_url: database_url.into(),
            replica_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            replica_max_connections: DEFAULT_MAX_CONNECTIONS,
            encryption_key,
            remote_id: String::new(),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &self.database_url)
            .field("replica_url", &self.replica_url)
            .field("max_connections", &self.max_connections)
            .field("replica_max_connections", &self.replica_max_connections)
            .field("remote_id", &self.remote_id)
            .finish_non_exhaustive()
    }
}

/// Bridge store: primary and replica pools plus the token cipher.
#[derive(Debug, Clone)]
pub struct Store {
    primary: SqlitePool,
    replica: SqlitePool,
    cipher: TokenCipher,
    remote_id: String,
}

impl Store {
    /// Open the pools described by `config`.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let cipher = TokenCipher::new(&config.encryption_key)?;

        let primary = open_pool(&config.database_url, config.max_connections, false).await?;
        let replica = match &config.replica_url {
            Some(url) => open_pool(url, config.replica_max_connections, true).await?,
            None => primary.clone(),
        };

        tracing::info!(
            database_url = %config.database_url,
            replica = config.replica_url.is_some(),
            pool_size = config.max_connections,
            "Connected to store"
        );

        Ok(Self {
            primary,
            replica,
            cipher,
            remote_id: config.remote_id,
        })
    }

    /// Wrap existing pools; mostly for tests.
    pub fn with_pools(primary: SqlitePool, replica: SqlitePool, cipher: TokenCipher) -> Self {
        Self {
            primary,
            replica,
            cipher,
            remote_id: String::new(),
        }
    }

    /// Run schema and data migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running store migrations...");
        migrations::run(&self.primary, &self.remote_id).await?;
        tracing::info!("Migrations complete");
        Ok(())
    }

    pub fn primary(&self) -> &SqlitePool {
        &self.primary
    }

    pub fn replica(&self) -> &SqlitePool {
        &self.replica
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.primary.close().await;
        self.replica.close().await;
    }

    // Channel links

    pub async fn store_channel_link(&self, link: &ChannelLink) -> Result<()> {
        channel_link::store_channel_link(&self.primary, link).await
    }

    pub async fn get_link_by_channel_id(&self, channel_id: &str) -> Result<ChannelLink> {
        channel_link::get_link_by_channel_id(&self.replica, channel_id).await
    }

    pub async fn get_link_by_ms_teams_channel_id(
        &self,
        team_id: &str,
        channel_id: &str,
    ) -> Result<ChannelLink> {
        channel_link::get_link_by_ms_teams_channel_id(&self.replica, team_id, channel_id).await
    }

    pub async fn delete_link_by_channel_id(&self, channel_id: &str) -> Result<()> {
        channel_link::delete_link_by_channel_id(&self.primary, channel_id).await
    }

    pub async fn list_channel_links(&self) -> Result<Vec<ChannelLink>> {
        channel_link::list_channel_links(&self.replica).await
    }

    pub async fn get_linked_channels_count(&self) -> Result<i64> {
        channel_link::get_linked_channels_count(&self.replica).await
    }

    // Post links

    pub async fn link_posts(&self, info: &PostInfo) -> Result<()> {
        post_link::link_posts(&self.primary, info).await
    }

    pub async fn get_post_info_by_mattermost_id(&self, post_id: &str) -> Result<PostInfo> {
        post_link::get_post_info_by_mattermost_id(&self.replica, post_id).await
    }

    pub async fn get_post_info_by_ms_teams_id(
        &self,
        channel_key: &str,
        ms_teams_post_id: &str,
    ) -> Result<PostInfo> {
        post_link::get_post_info_by_ms_teams_id(&self.replica, channel_key, ms_teams_post_id).await
    }

    pub async fn set_post_last_update_at_by_mattermost_id(
        &self,
        post_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        post_link::set_post_last_update_at_by_mattermost_id(&self.primary, post_id, at).await
    }

    pub async fn set_post_last_update_at_by_ms_teams_id(
        &self,
        ms_teams_post_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        post_link::set_post_last_update_at_by_ms_teams_id(&self.primary, ms_teams_post_id, at)
            .await
    }

    /// Start a transaction that holds the post-link write lock until it ends.
    pub async fn begin_post_write(&self) -> Result<PostWriteTx> {
        let mut tx = self.primary.begin().await?;
        post_link::lock_post_links(&mut tx).await?;
        Ok(PostWriteTx { tx })
    }

    // Users

    pub async fn set_user_info(
        &self,
        mattermost_user_id: &str,
        ms_teams_user_id: &str,
        token: Option<&OAuthToken>,
    ) -> Result<()> {
        let mut tx = self.primary.begin().await?;
        user_info::set_user_info(&mut tx, &self.cipher, mattermost_user_id, ms_teams_user_id, token)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_token_for_mattermost_user(
        &self,
        mattermost_user_id: &str,
    ) -> Result<Option<OAuthToken>> {
        user_info::get_token_for_mattermost_user(&self.replica, &self.cipher, mattermost_user_id)
            .await
    }

    pub async fn get_token_for_ms_teams_user(
        &self,
        ms_teams_user_id: &str,
    ) -> Result<Option<OAuthToken>> {
        user_info::get_token_for_ms_teams_user(&self.replica, &self.cipher, ms_teams_user_id).await
    }

    pub async fn teams_to_mattermost_user_id(&self, ms_teams_user_id: &str) -> Result<String> {
        user_info::teams_to_mattermost_user_id(&self.replica, ms_teams_user_id).await
    }

    pub async fn mattermost_to_teams_user_id(&self, mattermost_user_id: &str) -> Result<String> {
        user_info::mattermost_to_teams_user_id(&self.replica, mattermost_user_id).await
    }

    pub async fn user_connect_status(&self, mattermost_user_id: &str) -> Result<UserConnectStatus> {
        user_info::user_connect_status(&self.replica, mattermost_user_id).await
    }

    pub async fn delete_user_info(&self, mattermost_user_id: &str) -> Result<()> {
        user_info::delete_user_info(&self.primary, mattermost_user_id).await
    }

    pub async fn get_connected_users(&self, page: i64, per_page: i64) -> Result<Vec<ConnectedUser>> {
        user_info::get_connected_users(&self.replica, page, per_page).await
    }

    pub async fn get_connected_users_count(&self) -> Result<i64> {
        user_info::get_connected_users_count(&self.replica).await
    }

    pub async fn set_user_last_chat_sent_at(
        &self,
        mattermost_user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        user_info::set_user_last_chat_sent_at(&self.primary, mattermost_user_id, at).await
    }

    pub async fn set_user_last_chat_received_at(
        &self,
        mattermost_user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        user_info::set_user_last_chat_received_at(&self.primary, mattermost_user_id, at).await
    }

    pub async fn set_users_last_chat_received_at(
        &self,
        mattermost_user_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.primary.begin().await?;
        user_info::set_users_last_chat_received_at(&mut tx, mattermost_user_ids, at).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_user_chat_activity(&self, mattermost_user_id: &str) -> Result<UserChatActivity> {
        user_info::get_user_chat_activity(&self.replica, mattermost_user_id).await
    }

    pub async fn get_active_users_sending_count(&self, window: chrono::Duration) -> Result<i64> {
        user_info::get_active_users_sending_count(&self.replica, window).await
    }

    pub async fn get_active_users_receiving_count(&self, window: chrono::Duration) -> Result<i64> {
        user_info::get_active_users_receiving_count(&self.replica, window).await
    }

    // Subscriptions

    pub async fn save_global_subscription(&self, sub: &Subscription) -> Result<()> {
        self.save_subscription_of(sub, |kind| kind.is_global()).await
    }

    pub async fn save_channel_subscription(&self, sub: &Subscription) -> Result<()> {
        self.save_subscription_of(sub, |kind| kind == SubscriptionKind::Channel)
            .await
    }

    pub async fn save_chat_subscription(&self, sub: &Subscription) -> Result<()> {
        self.save_subscription_of(sub, |kind| kind == SubscriptionKind::Chat)
            .await
    }

    /// Save a subscription of any kind.
    pub async fn save_subscription(&self, sub: &Subscription) -> Result<()> {
        self.save_subscription_of(sub, |_| true).await
    }

    async fn save_subscription_of(
        &self,
        sub: &Subscription,
        accepts: impl Fn(SubscriptionKind) -> bool,
    ) -> Result<()> {
        if !accepts(sub.kind) {
            return Err(StoreError::Invalid {
                field: "subscription type",
                message: format!("unexpected {}", sub.kind),
            });
        }

        let mut tx = self.primary.begin().await?;
        subscription::save_subscription(&mut tx, sub).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Read a subscription from the primary; the webhook gate must see a
    /// subscription as soon as it is saved.
    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription> {
        subscription::get_subscription(&self.primary, subscription_id).await
    }

    pub async fn list_subscriptions(&self, kind: SubscriptionKind) -> Result<Vec<Subscription>> {
        subscription::list_subscriptions(&self.replica, kind).await
    }

    pub async fn list_global_subscriptions(&self) -> Result<Vec<Subscription>> {
        subscription::list_global_subscriptions(&self.replica).await
    }

    pub async fn list_channel_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.list_subscriptions(SubscriptionKind::Channel).await
    }

    pub async fn list_chat_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.list_subscriptions(SubscriptionKind::Chat).await
    }

    pub async fn get_channel_subscription_by_teams_channel_id(
        &self,
        team_id: &str,
        channel_id: &str,
    ) -> Result<Subscription> {
        subscription::get_channel_subscription_by_teams_channel_id(&self.replica, team_id, channel_id)
            .await
    }

    pub async fn get_chat_subscription_by_user_id(&self, user_id: &str) -> Result<Subscription> {
        subscription::get_chat_subscription_by_user_id(&self.replica, user_id).await
    }

    pub async fn get_subscription_type(&self, subscription_id: &str) -> Result<SubscriptionKind> {
        subscription::get_subscription_type(&self.replica, subscription_id).await
    }

    pub async fn delete_subscription(&self, subscription_id: &str) -> Result<bool> {
        subscription::delete_subscription(&self.primary, subscription_id).await
    }

    pub async fn update_subscription_expires_on(
        &self,
        subscription_id: &str,
        expires_on: DateTime<Utc>,
    ) -> Result<()> {
        subscription::update_subscription_expires_on(&self.primary, subscription_id, expires_on)
            .await
    }

    pub async fn update_subscription_last_activity_at(
        &self,
        subscription_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        subscription::update_subscription_last_activity_at(&self.primary, subscription_id, at).await
    }

    pub async fn get_subscriptions_last_activity_at(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        subscription::get_subscriptions_last_activity_at(&self.replica).await
    }

    // Whitelist and invites

    pub async fn store_user_in_whitelist(&self, user_id: &str) -> Result<()> {
        whitelist::store_user_in_whitelist(&self.primary, user_id).await
    }

    pub async fn delete_user_from_whitelist(&self, user_id: &str) -> Result<()> {
        whitelist::delete_user_from_whitelist(&self.primary, user_id).await
    }

    pub async fn is_user_whitelisted(&self, user_id: &str) -> Result<bool> {
        whitelist::is_user_whitelisted(&self.replica, user_id).await
    }

    pub async fn get_whitelist_count(&self) -> Result<i64> {
        whitelist::get_whitelist_count(&self.replica).await
    }

    pub async fn list_whitelisted_users(&self) -> Result<Vec<String>> {
        whitelist::list_whitelisted_users(&self.replica).await
    }

    pub async fn set_whitelist(&self, user_ids: &[String]) -> Result<()> {
        let mut tx = self.primary.begin().await?;
        whitelist::set_whitelist(&mut tx, user_ids, WHITELIST_BATCH_SIZE).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn store_invited_user(&self, invited: &InvitedUser) -> Result<()> {
        invite::store_invited_user(&self.primary, invited).await
    }

    pub async fn get_invited_user(&self, user_id: &str) -> Result<InvitedUser> {
        invite::get_invited_user(&self.replica, user_id).await
    }

    pub async fn delete_user_invite(&self, user_id: &str) -> Result<()> {
        invite::delete_user_invite(&self.primary, user_id).await
    }

    pub async fn get_invited_count(&self) -> Result<i64> {
        invite::get_invited_count(&self.replica).await
    }

    pub async fn list_invited_users(&self) -> Result<Vec<InvitedUser>> {
        invite::list_invited_users(&self.replica).await
    }

    // Settings

    pub async fn store_oauth2_state(&self, state: &str) -> Result<()> {
        settings::store_oauth2_state(&self.primary, state).await
    }

    pub async fn verify_oauth2_state(&self, state: &str) -> Result<bool> {
        let mut tx = self.primary.begin().await?;
        let valid = settings::verify_oauth2_state(&mut tx, state).await?;
        tx.commit().await?;
        Ok(valid)
    }
}

/// A primary transaction holding the post-link write lock.
///
/// Used by the create path so that the dedup check, the post link and the
/// subscription's `lastActivityAt` commit together. Dropping it rolls back.
pub struct PostWriteTx {
    tx: Transaction<'static, Sqlite>,
}

impl PostWriteTx {
    pub async fn get_post_info_by_ms_teams_id(
        &mut self,
        channel_key: &str,
        ms_teams_post_id: &str,
    ) -> Result<PostInfo> {
        post_link::get_post_info_by_ms_teams_id(&mut *self.tx, channel_key, ms_teams_post_id).await
    }

    pub async fn get_post_info_by_mattermost_id(&mut self, post_id: &str) -> Result<PostInfo> {
        post_link::get_post_info_by_mattermost_id(&mut *self.tx, post_id).await
    }

    pub async fn link_posts(&mut self, info: &PostInfo) -> Result<()> {
        post_link::link_posts(&mut *self.tx, info).await
    }

    pub async fn update_subscription_last_activity_at(
        &mut self,
        subscription_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        subscription::update_subscription_last_activity_at(&mut *self.tx, subscription_id, at)
            .await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn open_pool(url: &str, max_connections: u32, read_only: bool) -> Result<SqlitePool> {
    let mut options = SqliteConnectOptions::from_str(url)?
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));
    options = if read_only {
        options.read_only(true)
    } else {
        options.create_if_missing(true)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    Ok(pool)
}
