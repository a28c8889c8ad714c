//! Fetching the Teams data an activity refers to.

use bridge_core::{Activity, ActivityIds, Chat, ChatType, Message};
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::encrypted::decrypt_content;
use crate::error::{HandlerError, Result};

/// Host channel of a Teams chat, and who is in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChatChannel {
    pub(crate) channel_id: String,
    /// `(teams user id, host user id)` of the mirrored members.
    pub(crate) members: Vec<(String, String)>,
}

impl Context {
    /// The message an activity refers to, and its chat for chat messages.
    ///
    /// Inline content is decrypted locally when present; otherwise the
    /// message is fetched from Graph. `Ok(None)` means nobody can read it,
    /// e.g. a chat none of whose members is connected.
    pub(crate) async fn get_message_and_chat(
        &self,
        activity: &Activity,
        ids: &ActivityIds,
    ) -> Result<Option<(Message, Option<Chat>)>> {
        let chat = if ids.is_chat() {
            match self.bounded(self.graph.get_chat(&ids.chat_id)).await {
                Ok(chat) => Some(chat),
                Err(err) => {
                    error!(chat_id = %ids.chat_id, error = %err, "Unable to get original chat");
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        if let Some(content) = &activity.encrypted_content {
            let resolver = self
                .content_keys
                .as_deref()
                .ok_or_else(|| HandlerError::Decrypt("no content key resolver configured".to_string()))?;
            let mut msg = decrypt_content(resolver, content)?;
            if msg.chat_id.is_empty() && msg.channel_id.is_empty() {
                msg.chat_id = ids.chat_id.clone();
                msg.team_id = ids.team_id.clone();
                msg.channel_id = ids.channel_id.clone();
            }
            return Ok(Some((msg, chat)));
        }

        if let Some(chat) = chat {
            let msg = self.get_message_from_chat(&chat, &ids.message_id).await?;
            return Ok(msg.map(|msg| (msg, Some(chat))));
        }

        let msg = if ids.reply_id.is_empty() {
            self.bounded(
                self.graph
                    .get_message(&ids.team_id, &ids.channel_id, &ids.message_id),
            )
            .await
        } else {
            self.bounded(self.graph.get_reply(
                &ids.team_id,
                &ids.channel_id,
                &ids.message_id,
                &ids.reply_id,
            ))
            .await
        };

        match msg {
            Ok(msg) => Ok(Some((msg, None))),
            Err(err) => {
                error!(message_id = %ids.target_message_id(), error = %err, "Unable to get message from channel");
                Err(err.into())
            }
        }
    }

    /// Chat messages are only readable by members, so fetch as the first
    /// connected one.
    async fn get_message_from_chat(&self, chat: &Chat, message_id: &str) -> Result<Option<Message>> {
        for member in &chat.members {
            let Some(client) = self.client_for_teams_user(&member.user_id).await else {
                continue;
            };

            return match self
                .bounded(client.get_chat_message(&chat.id, message_id))
                .await
            {
                Ok(msg) => Ok(Some(msg)),
                Err(err) => {
                    error!(chat_id = %chat.id, message_id = %message_id, error = %err, "Unable to get message from chat");
                    self.on_user_client_error(&member.user_id, &err).await;
                    Err(err.into())
                }
            };
        }

        debug!(chat_id = %chat.id, "No connected member to read the chat with");
        Ok(None)
    }

    /// Host DM/GM channel over the chat's mirrored members.
    ///
    /// Guests are skipped (and their mirrors deactivated) unless guest sync
    /// is on. `Ok(None)` when fewer than two members remain.
    pub(crate) async fn get_chat_channel(&self, chat: &Chat) -> Result<Option<ChatChannel>> {
        let mut members = Vec::with_capacity(chat.members.len());
        for member in &chat.members {
            let user = match self.bounded(self.graph.get_user(&member.user_id)).await {
                Ok(user) => user,
                Err(err) => {
                    warn!(teams_user_id = %member.user_id, error = %err, "Unable to get the Teams user");
                    continue;
                }
            };

            if user.is_guest() && !self.config.flags.sync_guest_users {
                self.deactivate_guest(&user).await;
                debug!(teams_user_id = %user.id, "Skipping guest user while resolving chat channel");
                continue;
            }

            let mattermost_user_id = self.get_or_create_synthetic_user(&user, true).await?;
            members.push((user.id, mattermost_user_id));
        }

        if members.len() < 2 {
            debug!(chat_id = %chat.id, "Not enough users for a chat channel");
            return Ok(None);
        }

        let channel_id = match chat.chat_type {
            ChatType::OneOnOne => {
                self.sdk
                    .get_direct_channel(&members[0].1, &members[1].1)
                    .await?
            }
            ChatType::Group => {
                let ids: Vec<String> = members.iter().map(|(_, id)| id.clone()).collect();
                self.sdk.get_group_channel(&ids).await?
            }
        };

        Ok(Some(ChatChannel {
            channel_id,
            members,
        }))
    }
}
