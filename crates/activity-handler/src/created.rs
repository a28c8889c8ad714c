//! The created path.

use bridge_core::{Activity, ActivityIds, Chat, DiscardReason, GraphUser, Message, MetricKind, Post};
use link_store::{OptionalExt, PostInfo};
use tracing::{debug, error, warn};

use crate::attachments::ATTACHMENT_ERROR_MESSAGE;
use crate::context::Context;
use crate::selective_sync::{classify, should_sync_any, Participant};

/// Where a new post goes and who writes it.
struct Target {
    channel_id: String,
    sender_id: String,
}

impl Context {
    pub(crate) async fn handle_created(&self, activity: &Activity, ids: &ActivityIds) -> DiscardReason {
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

        if self.is_duplicate(&msg).await {
            self.touch_subscription(&activity.subscription_id, msg.last_update_at);
            self.update_last_received_change(msg.last_update_at).await;
            self.metrics.observe(MetricKind::Duplicate, &[]);
            return DiscardReason::DuplicatedPost;
        }

        let user = match self.admit_sender(activity, &msg).await {
            Ok(user) => user,
            Err(reason) => return reason,
        };

        let target = match &chat {
            Some(chat) => match self.chat_target(&msg, chat).await {
                Ok(target) => target,
                Err(reason) => return reason,
            },
            None => match self.channel_target(&msg, &user).await {
                Ok(target) => target,
                Err(reason) => return reason,
            },
        };

        if !self.sender_is_active(&target.sender_id).await {
            return DiscardReason::InactiveUser;
        }

        let converted = self
            .msg_to_post(&target.channel_id, &target.sender_id, &msg, chat.as_ref(), false)
            .await;

        let reason = self
            .create_linked_post(activity, &msg, converted.post, chat.is_some())
            .await;
        if reason != DiscardReason::None {
            return reason;
        }

        if converted.error_found {
            self.notify_attachment_error(&target.channel_id, &target.sender_id)
                .await;
        }

        self.touch_subscription(&activity.subscription_id, msg.last_update_at);
        self.update_last_received_change(msg.last_update_at).await;
        DiscardReason::None
    }

    async fn is_duplicate(&self, msg: &Message) -> bool {
        match self
            .store
            .get_post_info_by_ms_teams_id(&msg.channel_key(), &msg.id)
            .await
            .optional()
        {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!(message_id = %msg.id, error = %err, "Unable to check for an existing post link");
                false
            }
        }
    }

    /// Skip messages the bridge itself wrote and, with guest sync off,
    /// messages from guests. Returns the sender otherwise.
    pub(crate) async fn admit_sender(
        &self,
        activity: &Activity,
        msg: &Message,
    ) -> Result<GraphUser, DiscardReason> {
        if self.is_bot_message(msg).await {
            debug!(message_id = %msg.id, "Skipping message from the bot user");
            self.touch_subscription(&activity.subscription_id, msg.last_update_at);
            self.update_last_received_change(msg.last_update_at).await;
            return Err(DiscardReason::IsBotUser);
        }

        let user = match self.bounded(self.graph.get_user(&msg.user_id)).await {
            Ok(user) => user,
            Err(err) => {
                debug!(teams_user_id = %msg.user_id, error = %err, "Unable to get sender");
                return Err(DiscardReason::UnableToGetTeamsData);
            }
        };

        if user.is_guest() && !self.config.flags.sync_guest_users {
            self.deactivate_guest(&user).await;
            return Err(DiscardReason::Other);
        }

        Ok(user)
    }

    async fn is_bot_message(&self, msg: &Message) -> bool {
        match self
            .store
            .mattermost_to_teams_user_id(self.bot_user_id())
            .await
        {
            Ok(bot_teams_id) => !bot_teams_id.is_empty() && bot_teams_id == msg.user_id,
            Err(_) => false,
        }
    }

    async fn chat_target(&self, msg: &Message, chat: &Chat) -> Result<Target, DiscardReason> {
        if !self.config.flags.sync_direct_messages {
            return Err(DiscardReason::DirectMessagesDisabled);
        }

        let chat_channel = match self.get_chat_channel(chat).await {
            Ok(Some(chat_channel)) => chat_channel,
            Ok(None) => return Err(DiscardReason::Other),
            Err(err) => {
                warn!(chat_id = %chat.id, error = %err, "Unable to get the chat channel");
                return Err(DiscardReason::Other);
            }
        };

        let sender_id = match self.linked_user(&msg.user_id).await {
            Ok(Some(id)) => id,
            Ok(None) => self.bot_user_id().to_string(),
            Err(err) => {
                warn!(teams_user_id = %msg.user_id, error = %err, "Unable to map sender");
                return Err(DiscardReason::Other);
            }
        };

        let sender = if sender_id == self.bot_user_id() {
            Participant::Synthetic
        } else {
            classify(&self.store, self.sdk.as_ref(), &sender_id).await
        };
        let mut recipients = Vec::with_capacity(chat_channel.members.len());
        for (teams_id, mattermost_id) in &chat_channel.members {
            if *teams_id == msg.user_id {
                continue;
            }
            recipients.push(classify(&self.store, self.sdk.as_ref(), mattermost_id).await);
        }

        if !should_sync_any(sender, &recipients, self.config.flags.selective_sync) {
            return Err(DiscardReason::SelectiveSync);
        }

        Ok(Target {
            channel_id: chat_channel.channel_id,
            sender_id,
        })
    }

    async fn channel_target(&self, msg: &Message, user: &GraphUser) -> Result<Target, DiscardReason> {
        let link = match self
            .store
            .get_link_by_ms_teams_channel_id(&msg.team_id, &msg.channel_id)
            .await
        {
            Ok(link) => link,
            Err(err) => {
                debug!(team_id = %msg.team_id, channel_id = %msg.channel_id, error = %err, "Channel is not linked");
                return Err(DiscardReason::Other);
            }
        };

        let sender_id = match self.get_or_create_synthetic_user(user, true).await {
            Ok(id) => id,
            Err(err) => {
                warn!(teams_user_id = %user.id, error = %err, "Unable to resolve sender, posting as bot");
                self.bot_user_id().to_string()
            }
        };

        Ok(Target {
            channel_id: link.mattermost_channel_id,
            sender_id,
        })
    }

    pub(crate) async fn sender_is_active(&self, sender_id: &str) -> bool {
        if sender_id == self.bot_user_id() {
            return true;
        }
        match self.sdk.get_user(sender_id).await {
            Ok(user) => user.is_active(),
            Err(err) => {
                debug!(user_id = %sender_id, error = %err, "Unable to load sender");
                false
            }
        }
    }

    /// Create the post and its link under the post-link write lock, so
    /// concurrent deliveries of the same message create one post.
    async fn create_linked_post(
        &self,
        activity: &Activity,
        msg: &Message,
        post: Post,
        is_direct: bool,
    ) -> DiscardReason {
        let channel_key = msg.channel_key();

        let mut tx = match self.store.begin_post_write().await {
            Ok(tx) => tx,
            Err(err) => {
                error!(error = %err, "Unable to start post transaction");
                return DiscardReason::Other;
            }
        };

        match tx
            .get_post_info_by_ms_teams_id(&channel_key, &msg.id)
            .await
            .optional()
        {
            Ok(Some(_)) => {
                let _ = tx.rollback().await;
                self.touch_subscription(&activity.subscription_id, msg.last_update_at);
                self.metrics.observe(MetricKind::Duplicate, &[]);
                return DiscardReason::DuplicatedPost;
            }
            Ok(None) => {}
            Err(err) => {
                error!(message_id = %msg.id, error = %err, "Unable to check for an existing post link");
                let _ = tx.rollback().await;
                return DiscardReason::Other;
            }
        }

        let created = match self.sdk.create_post(post).await {
            Ok(created) => created,
            Err(err) => {
                warn!(message_id = %msg.id, error = %err, "Unable to create post");
                let _ = tx.rollback().await;
                return DiscardReason::Other;
            }
        };

        let info = PostInfo {
            mattermost_id: created.id.clone(),
            ms_teams_id: msg.id.clone(),
            ms_teams_channel: channel_key,
            ms_teams_last_update_at: msg.last_update_at,
        };

        let linked = async move {
            tx.link_posts(&info).await?;
            tx.update_subscription_last_activity_at(&activity.subscription_id, msg.last_update_at)
                .await?;
            tx.commit().await
        }
        .await;

        if let Err(err) = linked {
            error!(
                post_id = %created.id,
                message_id = %msg.id,
                error = %err,
                "Post created but its link could not be stored"
            );
            // An unlinked post would be created a second time on redelivery.
            let action = match self.sdk.delete_post(&created.id).await {
                Ok(()) => "deleted",
                Err(err) => {
                    error!(post_id = %created.id, error = %err, "Unable to delete unlinked post");
                    "kept"
                }
            };
            self.metrics
                .observe(MetricKind::PostLinkError, &[("action", action)]);
            return DiscardReason::Other;
        }

        self.metrics.observe(
            MetricKind::Messages,
            &[
                ("action", "created"),
                ("source", "msteams"),
                ("is_direct", if is_direct { "true" } else { "false" }),
            ],
        );

        DiscardReason::None
    }

    async fn notify_attachment_error(&self, channel_id: &str, sender_id: &str) {
        let notice = Post {
            channel_id: channel_id.to_string(),
            user_id: self.bot_user_id().to_string(),
            message: ATTACHMENT_ERROR_MESSAGE.to_string(),
            ..Default::default()
        };
        if let Err(err) = self.sdk.send_ephemeral_post(sender_id, notice).await {
            warn!(user_id = %sender_id, error = %err, "Unable to send attachment error notice");
        }
    }
}
