//! The updated and deleted paths.

use bridge_core::{Activity, ActivityIds, DiscardReason, MetricKind, Post};
use link_store::PostInfo;
use tracing::{debug, warn};

use crate::context::Context;

impl Context {
    pub(crate) async fn handle_updated(&self, activity: &Activity, ids: &ActivityIds) -> DiscardReason {
        let (msg, chat) = match self.get_message_and_chat(activity, ids).await {
            Ok(Some(found)) => found,
            Ok(None) => return DiscardReason::UnableToGetTeamsData,
            Err(err) => {
                debug!(resource = %activity.resource, error = %err, "Unable to get Teams data");
                return DiscardReason::UnableToGetTeamsData;
            }
        };

        if msg.user_id.is_empty() {
            return DiscardReason::NotUserEvent;
        }

        if let Err(reason) = self.admit_sender(activity, &msg).await {
            return reason;
        }

        let channel_key = msg.channel_key();
        let info = match self
            .store
            .get_post_info_by_ms_teams_id(&channel_key, &msg.id)
            .await
        {
            Ok(info) => info,
            Err(err) if err.is_not_found() => return DiscardReason::MissingLink,
            Err(err) => {
                warn!(message_id = %msg.id, error = %err, "Unable to get post link");
                return DiscardReason::Other;
            }
        };

        if msg.last_update_at.timestamp_micros() <= info.ms_teams_last_update_at.timestamp_micros() {
            return DiscardReason::AlreadyAppliedChange;
        }

        if chat.is_some() && !self.config.flags.sync_direct_messages {
            return DiscardReason::DirectMessagesDisabled;
        }

        let existing = match self.get_post_recovering(&info.mattermost_id).await {
            Some(post) => post,
            None => return DiscardReason::Other,
        };

        let channel_id = if chat.is_some() {
            existing.channel_id.clone()
        } else {
            match self
                .store
                .get_link_by_ms_teams_channel_id(&msg.team_id, &msg.channel_id)
                .await
            {
                Ok(link) => link.mattermost_channel_id,
                Err(err) => {
                    debug!(channel_id = %msg.channel_id, error = %err, "Channel is not linked");
                    return DiscardReason::Other;
                }
            }
        };

        let sender_id = match self.linked_user(&msg.user_id).await {
            Ok(Some(id)) => id,
            Ok(None) => self.bot_user_id().to_string(),
            Err(err) => {
                warn!(teams_user_id = %msg.user_id, error = %err, "Unable to map sender");
                return DiscardReason::Other;
            }
        };

        if !self.sender_is_active(&sender_id).await {
            return DiscardReason::InactiveUser;
        }

        let converted = self
            .msg_to_post(&channel_id, &sender_id, &msg, chat.as_ref(), true)
            .await;
        let mut post = converted.post;
        post.id = existing.id.clone();
        post.create_at = existing.create_at;
        post.file_ids = existing.file_ids.clone();

        if !self.update_post_recovering(post).await {
            return DiscardReason::Other;
        }

        let is_direct = chat.is_some();
        self.metrics.observe(
            MetricKind::Messages,
            &[
                ("action", "updated"),
                ("source", "msteams"),
                ("is_direct", if is_direct { "true" } else { "false" }),
            ],
        );

        let updated_link = PostInfo {
            ms_teams_last_update_at: msg.last_update_at,
            ..info
        };
        if let Err(err) = self.store.link_posts(&updated_link).await {
            warn!(post_id = %updated_link.mattermost_id, error = %err, "Unable to store post update time");
        }

        self.touch_subscription(&activity.subscription_id, msg.last_update_at);
        self.update_last_received_change(msg.last_update_at).await;
        self.reconcile_reactions(&existing.id, &msg.reactions, is_direct)
            .await;

        DiscardReason::None
    }

    pub(crate) async fn handle_deleted(&self, ids: &ActivityIds) -> DiscardReason {
        let info = match self
            .store
            .get_post_info_by_ms_teams_id(&ids.channel_key(), ids.target_message_id())
            .await
        {
            Ok(info) => info,
            Err(err) if err.is_not_found() => return DiscardReason::MissingLink,
            Err(err) => {
                warn!(message_id = %ids.target_message_id(), error = %err, "Unable to get post link");
                return DiscardReason::Other;
            }
        };

        if let Err(err) = self.sdk.delete_post(&info.mattermost_id).await {
            warn!(post_id = %info.mattermost_id, error = %err, "Unable to delete post");
            return DiscardReason::Other;
        }

        self.metrics.observe(
            MetricKind::Messages,
            &[
                ("action", "deleted"),
                ("source", "msteams"),
                ("is_direct", if ids.is_chat() { "true" } else { "false" }),
            ],
        );
        DiscardReason::None
    }

    /// Fetch a post, reverting its deletion first if the platform no longer
    /// serves it.
    async fn get_post_recovering(&self, post_id: &str) -> Option<Post> {
        match self.sdk.get_post(post_id).await {
            Ok(post) => return Some(post),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(post_id = %post_id, error = %err, "Unable to get post");
                return None;
            }
        }

        if let Err(err) = self.sdk.restore_post(post_id).await {
            warn!(post_id = %post_id, error = %err, "Unable to recover post");
            return None;
        }
        debug!(post_id = %post_id, "Recovered deleted post");

        match self.sdk.get_post(post_id).await {
            Ok(post) => Some(post),
            Err(err) => {
                warn!(post_id = %post_id, error = %err, "Post not found after recovery");
                None
            }
        }
    }

    async fn update_post_recovering(&self, post: Post) -> bool {
        let post_id = post.id.clone();
        match self.sdk.update_post(post.clone()).await {
            Ok(_) => return true,
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(post_id = %post_id, error = %err, "Unable to update post");
                return false;
            }
        }

        if let Err(err) = self.sdk.restore_post(&post_id).await {
            warn!(post_id = %post_id, error = %err, "Unable to recover post");
            return false;
        }

        match self.sdk.update_post(post).await {
            Ok(_) => true,
            Err(err) => {
                warn!(post_id = %post_id, error = %err, "Unable to update recovered post");
                false
            }
        }
    }
}
