//! In-memory host platform.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bridge_core::{
    FileInfo, FileLimits, NewUser, PlatformError, PlatformReaction, PlatformResult, PlatformSdk,
    PlatformUser, Post,
};
use chrono::Utc;

use crate::lock;

#[derive(Default)]
struct PlatformState {
    posts: HashMap<String, Post>,
    post_order: Vec<String>,
    users: HashMap<String, PlatformUser>,
    passwords: HashMap<String, String>,
    preferences: HashMap<(String, String, String), String>,
    channels: HashMap<Vec<String>, String>,
    reactions: Vec<PlatformReaction>,
    removed_reactions: Vec<PlatformReaction>,
    files: HashMap<String, (FileInfo, String, Vec<u8>)>,
    kv: HashMap<String, Vec<u8>>,
    ephemeral: Vec<(String, Post)>,
    failures: HashMap<&'static str, PlatformError>,
}

/// In-memory host platform.
///
/// Posts, users and files get sequential ids (`post-1`, `user-1`, …).
/// Deleting a post only sets `delete_at`; reading or updating a deleted post
/// fails with `NotFound` until it is restored, the way the real platform does.
pub struct MockPlatform {
    state: Mutex<PlatformState>,
    next_id: AtomicU64,
    limits: FileLimits,
    site_url: String,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState::default()),
            next_id: AtomicU64::new(1),
            limits: FileLimits::default(),
            site_url: "http://localhost:8065".to_string(),
        }
    }

    pub fn with_file_limits(mut self, limits: FileLimits) -> Self {
        self.limits = limits;
        self
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Add an existing user.
    pub fn add_user(&self, user: PlatformUser) {
        lock(&self.state).users.insert(user.id.clone(), user);
    }

    pub fn user(&self, user_id: &str) -> Option<PlatformUser> {
        lock(&self.state).users.get(user_id).cloned()
    }

    pub fn users(&self) -> Vec<PlatformUser> {
        let mut users: Vec<_> = lock(&self.state).users.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    pub fn set_preference(&self, user_id: &str, category: &str, name: &str, value: &str) {
        lock(&self.state).preferences.insert(
            (user_id.to_string(), category.to_string(), name.to_string()),
            value.to_string(),
        );
    }

    /// Insert a post as if it had been created earlier.
    pub fn add_post(&self, post: Post) {
        let mut state = lock(&self.state);
        state.post_order.push(post.id.clone());
        state.posts.insert(post.id.clone(), post);
    }

    pub fn post(&self, post_id: &str) -> Option<Post> {
        lock(&self.state).posts.get(post_id).cloned()
    }

    /// Every post ever created, in creation order.
    pub fn posts(&self) -> Vec<Post> {
        let state = lock(&self.state);
        state
            .post_order
            .iter()
            .filter_map(|id| state.posts.get(id).cloned())
            .collect()
    }

    pub fn posts_in_channel(&self, channel_id: &str) -> Vec<Post> {
        self.posts()
            .into_iter()
            .filter(|p| p.channel_id == channel_id)
            .collect()
    }

    pub fn reactions(&self, post_id: &str) -> Vec<PlatformReaction> {
        lock(&self.state)
            .reactions
            .iter()
            .filter(|r| r.post_id == post_id)
            .cloned()
            .collect()
    }

    pub fn add_existing_reaction(&self, reaction: PlatformReaction) {
        lock(&self.state).reactions.push(reaction);
    }

    /// Reactions removed through [`PlatformSdk::remove_reaction`], as passed in.
    pub fn removed_reactions(&self) -> Vec<PlatformReaction> {
        lock(&self.state).removed_reactions.clone()
    }

    /// `(user_id, post)` of every ephemeral post sent.
    pub fn ephemeral_posts(&self) -> Vec<(String, Post)> {
        lock(&self.state).ephemeral.clone()
    }

    pub fn uploaded_files(&self) -> Vec<FileInfo> {
        let mut files: Vec<_> = lock(&self.state)
            .files
            .values()
            .map(|(info, _, _)| info.clone())
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        files
    }

    pub fn kv_get(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.state).kv.get(key).cloned()
    }

    /// Id of the direct channel between two users, if one was requested.
    pub fn direct_channel(&self, a: &str, b: &str) -> Option<String> {
        let key = channel_key(&[a.to_string(), b.to_string()]);
        lock(&self.state).channels.get(&key).cloned()
    }

    /// Make every call to `operation` (the trait method name) fail with `error`.
    pub fn fail(&self, operation: &'static str, error: PlatformError) {
        lock(&self.state).failures.insert(operation, error);
    }

    pub fn clear_failure(&self, operation: &'static str) {
        lock(&self.state).failures.remove(operation);
    }

    fn check(&self, operation: &'static str) -> PlatformResult<()> {
        match lock(&self.state).failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn channel(&self, members: &[String], prefix: &str) -> String {
        let key = channel_key(members);
        let mut state = lock(&self.state);
        if let Some(id) = state.channels.get(&key) {
            return id.clone();
        }
        let id = format!("{prefix}-{}", key.join("-"));
        state.channels.insert(key, id.clone());
        id
    }
}

fn channel_key(members: &[String]) -> Vec<String> {
    let mut key = members.to_vec();
    key.sort();
    key.dedup();
    key
}

fn not_found(entity: &'static str, id: &str) -> PlatformError {
    PlatformError::NotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl PlatformSdk for MockPlatform {
    async fn create_post(&self, mut post: Post) -> PlatformResult<Post> {
        self.check("create_post")?;
        post.id = self.next_id("post");
        if post.create_at == 0 {
            post.create_at = Utc::now().timestamp_millis();
        }
        self.add_post(post.clone());
        tracing::debug!(post_id = %post.id, channel_id = %post.channel_id, "mock post created");
        Ok(post)
    }

    async fn update_post(&self, post: Post) -> PlatformResult<Post> {
        self.check("update_post")?;
        let mut state = lock(&self.state);
        let existing = state
            .posts
            .get_mut(&post.id)
            .filter(|p| p.delete_at == 0)
            .ok_or_else(|| not_found("Post", &post.id))?;
        existing.message = post.message;
        existing.props = post.props;
        existing.file_ids = post.file_ids;
        Ok(existing.clone())
    }

    async fn get_post(&self, post_id: &str) -> PlatformResult<Post> {
        self.check("get_post")?;
        self.post(post_id)
            .filter(|p| p.delete_at == 0)
            .ok_or_else(|| not_found("Post", post_id))
    }

    async fn delete_post(&self, post_id: &str) -> PlatformResult<()> {
        self.check("delete_post")?;
        let mut state = lock(&self.state);
        let post = state
            .posts
            .get_mut(post_id)
            .ok_or_else(|| not_found("Post", post_id))?;
        post.delete_at = Utc::now().timestamp_millis();
        Ok(())
    }

    async fn restore_post(&self, post_id: &str) -> PlatformResult<()> {
        self.check("restore_post")?;
        let mut state = lock(&self.state);
        let post = state
            .posts
            .get_mut(post_id)
            .ok_or_else(|| not_found("Post", post_id))?;
        post.delete_at = 0;
        Ok(())
    }

    async fn send_ephemeral_post(&self, user_id: &str, post: Post) -> PlatformResult<()> {
        self.check("send_ephemeral_post")?;
        lock(&self.state).ephemeral.push((user_id.to_string(), post));
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> PlatformResult<PlatformUser> {
        self.check("get_user")?;
        self.user(user_id).ok_or_else(|| not_found("User", user_id))
    }

    async fn get_user_by_email(&self, email: &str) -> PlatformResult<PlatformUser> {
        self.check("get_user_by_email")?;
        lock(&self.state)
            .users
            .values()
            .find(|u| !email.is_empty() && u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| not_found("User", email))
    }

    async fn create_user(&self, user: NewUser) -> PlatformResult<PlatformUser> {
        self.check("create_user")?;
        let mut state = lock(&self.state);
        if state.users.values().any(|u| u.username == user.username) {
            return Err(PlatformError::UsernameExists(user.username));
        }
        let created = PlatformUser {
            id: self.next_id("user"),
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            remote_id: user.remote_id,
            delete_at: 0,
        };
        state.passwords.insert(created.id.clone(), user.password);
        if !user.email_notifications {
            state.preferences.insert(
                (
                    created.id.clone(),
                    "notifications".to_string(),
                    "email".to_string(),
                ),
                "false".to_string(),
            );
        }
        state.users.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_user_active(&self, user_id: &str, active: bool) -> PlatformResult<()> {
        self.check("update_user_active")?;
        let mut state = lock(&self.state);
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| not_found("User", user_id))?;
        user.delete_at = if active {
            0
        } else {
            Utc::now().timestamp_millis()
        };
        Ok(())
    }

    async fn get_preference(
        &self,
        user_id: &str,
        category: &str,
        name: &str,
    ) -> PlatformResult<Option<String>> {
        self.check("get_preference")?;
        Ok(lock(&self.state)
            .preferences
            .get(&(user_id.to_string(), category.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_direct_channel(&self, user_a: &str, user_b: &str) -> PlatformResult<String> {
        self.check("get_direct_channel")?;
        Ok(self.channel(&[user_a.to_string(), user_b.to_string()], "dm"))
    }

    async fn get_group_channel(&self, user_ids: &[String]) -> PlatformResult<String> {
        self.check("get_group_channel")?;
        Ok(self.channel(user_ids, "gm"))
    }

    async fn get_reactions(&self, post_id: &str) -> PlatformResult<Vec<PlatformReaction>> {
        self.check("get_reactions")?;
        Ok(self.reactions(post_id))
    }

    async fn add_reaction(&self, reaction: PlatformReaction) -> PlatformResult<()> {
        self.check("add_reaction")?;
        let mut state = lock(&self.state);
        let exists = state.reactions.iter().any(|r| {
            r.post_id == reaction.post_id
                && r.user_id == reaction.user_id
                && r.emoji_name == reaction.emoji_name
        });
        if !exists {
            state.reactions.push(reaction);
        }
        Ok(())
    }

    async fn remove_reaction(&self, reaction: PlatformReaction) -> PlatformResult<()> {
        self.check("remove_reaction")?;
        let mut state = lock(&self.state);
        state.reactions.retain(|r| {
            !(r.post_id == reaction.post_id
                && r.user_id == reaction.user_id
                && r.emoji_name == reaction.emoji_name)
        });
        state.removed_reactions.push(reaction);
        Ok(())
    }

    async fn upload_file(
        &self,
        data: Vec<u8>,
        channel_id: &str,
        name: &str,
    ) -> PlatformResult<FileInfo> {
        self.check("upload_file")?;
        let info = FileInfo {
            id: self.next_id("file"),
            name: name.to_string(),
            size: data.len() as i64,
        };
        lock(&self.state)
            .files
            .insert(info.id.clone(), (info.clone(), channel_id.to_string(), data));
        Ok(info)
    }

    fn file_limits(&self) -> FileLimits {
        self.limits
    }

    async fn kv_set(&self, key: &str, value: Vec<u8>) -> PlatformResult<()> {
        self.check("kv_set")?;
        lock(&self.state).kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn avatar_url(&self, teams_user_id: &str) -> Option<String> {
        Some(format!(
            "{}/plugins/com.mattermost.msteams-sync/avatar/{teams_user_id}",
            self.site_url
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_lifecycle() {
        let platform = MockPlatform::new();
        let post = platform
            .create_post(Post {
                channel_id: "channel".to_string(),
                message: "hello".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = platform
            .update_post(Post {
                message: "edited".to_string(),
                ..post.clone()
            })
            .await
            .unwrap();
        assert_eq!(updated.message, "edited");

        platform.delete_post(&post.id).await.unwrap();
        assert_ne!(platform.post(&post.id).unwrap().delete_at, 0);
        assert!(platform.get_post(&post.id).await.unwrap_err().is_not_found());
        assert!(platform.update_post(post.clone()).await.unwrap_err().is_not_found());

        platform.restore_post(&post.id).await.unwrap();
        assert_eq!(platform.get_post(&post.id).await.unwrap().delete_at, 0);
        assert!(platform.update_post(post).await.is_ok());
    }

    #[tokio::test]
    async fn test_username_collision() {
        let platform = MockPlatform::new();
        let user = NewUser {
            username: "msteams_alice".to_string(),
            ..Default::default()
        };
        platform.create_user(user.clone()).await.unwrap();
        assert_eq!(
            platform.create_user(user).await.unwrap_err(),
            PlatformError::UsernameExists("msteams_alice".to_string())
        );
    }

    #[tokio::test]
    async fn test_direct_channel_is_stable() {
        let platform = MockPlatform::new();
        let a = platform.get_direct_channel("u1", "u2").await.unwrap();
        let b = platform.get_direct_channel("u2", "u1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(platform.direct_channel("u1", "u2"), Some(a));
    }
}
