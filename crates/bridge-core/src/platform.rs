//! The host-platform SDK capability set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PlatformError;

/// Result type for SDK calls.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Channel id marker put on reactions removed by the bridge, so reaction
/// hooks can tell them apart from user removals.
pub const REMOVED_FROM_PLUGIN: &str = "removedfromplugin";

/// A post on the host platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub channel_id: String,
    pub root_id: String,
    pub message: String,
    pub props: Map<String, Value>,
    pub file_ids: Vec<String>,
    /// Milliseconds since the epoch.
    pub create_at: i64,
    /// Non-zero once soft-deleted.
    pub delete_at: i64,
}

impl Post {
    pub fn add_prop(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(key.into(), value.into());
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}

/// A host-platform user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    /// Set for users owned by a remote cluster (our synthetic users).
    pub remote_id: Option<String>,
    pub delete_at: i64,
}

impl PlatformUser {
    pub fn is_active(&self) -> bool {
        self.delete_at == 0
    }
}

/// Fields for creating a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub email: String,
    pub password: String,
    pub remote_id: Option<String>,
    pub email_notifications: bool,
}

/// A reaction on a host-platform post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformReaction {
    pub user_id: String,
    pub post_id: String,
    pub channel_id: String,
    pub emoji_name: String,
}

/// Result of a file upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size: i64,
}

/// Upload limits configured on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLimits {
    /// Bytes.
    pub max_file_size: i64,
    /// Width × height.
    pub max_image_resolution: i64,
}

impl Default for FileLimits {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            max_image_resolution: 7680 * 4320,
        }
    }
}

/// Operations the bridge needs from the host platform.
#[async_trait]
pub trait PlatformSdk: Send + Sync {
    // Posts
    async fn create_post(&self, post: Post) -> PlatformResult<Post>;
    async fn update_post(&self, post: Post) -> PlatformResult<Post>;
    async fn get_post(&self, post_id: &str) -> PlatformResult<Post>;
    async fn delete_post(&self, post_id: &str) -> PlatformResult<()>;
    /// Revert a soft delete.
    async fn restore_post(&self, post_id: &str) -> PlatformResult<()>;
    async fn send_ephemeral_post(&self, user_id: &str, post: Post) -> PlatformResult<()>;

    // Users
    async fn get_user(&self, user_id: &str) -> PlatformResult<PlatformUser>;
    async fn get_user_by_email(&self, email: &str) -> PlatformResult<PlatformUser>;
    async fn create_user(&self, user: NewUser) -> PlatformResult<PlatformUser>;
    async fn update_user_active(&self, user_id: &str, active: bool) -> PlatformResult<()>;
    async fn get_preference(
        &self,
        user_id: &str,
        category: &str,
        name: &str,
    ) -> PlatformResult<Option<String>>;

    // Channels
    async fn get_direct_channel(&self, user_a: &str, user_b: &str) -> PlatformResult<String>;
    async fn get_group_channel(&self, user_ids: &[String]) -> PlatformResult<String>;

    // Reactions
    async fn get_reactions(&self, post_id: &str) -> PlatformResult<Vec<PlatformReaction>>;
    async fn add_reaction(&self, reaction: PlatformReaction) -> PlatformResult<()>;
    async fn remove_reaction(&self, reaction: PlatformReaction) -> PlatformResult<()>;

    // Files
    async fn upload_file(
        &self,
        data: Vec<u8>,
        channel_id: &str,
        name: &str,
    ) -> PlatformResult<FileInfo>;
    fn file_limits(&self) -> FileLimits;

    // Key-value store
    async fn kv_set(&self, key: &str, value: Vec<u8>) -> PlatformResult<()>;

    /// Public URL of the avatar for a Teams user, if one can be served.
    async fn avatar_url(&self, teams_user_id: &str) -> Option<String>;
}
