//! Teams-side data exchanged with the Graph client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type of a code-snippet card attachment.
pub const CODE_SNIPPET_CONTENT_TYPE: &str = "application/vnd.microsoft.card.codesnippet";

/// Content type of a reply/quote reference attachment.
pub const MESSAGE_REFERENCE_CONTENT_TYPE: &str = "messageReference";

/// A chat or channel message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub chat_id: String,
    /// Sender; empty for system events.
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_display_name: String,
    /// HTML body.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub reply_to_id: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    pub create_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
}

impl Message {
    /// Key posts from this message are linked under.
    pub fn channel_key(&self) -> String {
        format!("{}{}", self.chat_id, self.channel_id)
    }
}

/// A message attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content_type: String,
    /// Card payload (JSON) for snippets and references.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_url: String,
}

/// A reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    /// Reaction label, e.g. `like` or a unicode emoji.
    pub reaction: String,
}

/// An `<at>` mention inside a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub id: i32,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: String,
    pub mentioned_text: String,
}

/// One-on-one or group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatType {
    #[serde(rename = "D")]
    OneOnOne,
    #[serde(rename = "G")]
    Group,
}

/// A chat with its membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub chat_type: ChatType,
    #[serde(default)]
    pub members: Vec<ChatMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

/// A Teams user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub mail: String,
    /// `Member` or `Guest`.
    #[serde(default)]
    pub user_type: String,
}

impl GraphUser {
    pub fn is_guest(&self) -> bool {
        self.user_type == "Guest"
    }
}

/// What a webhook subscription watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubscriptionTarget {
    AllChats,
    AllChannels,
    Channel { team_id: String, channel_id: String },
    UserChats { user_id: String },
}

impl SubscriptionTarget {
    /// The Graph resource path for this target.
    pub fn resource(&self) -> String {
        match self {
            SubscriptionTarget::AllChats => "/chats/getAllMessages".to_string(),
            SubscriptionTarget::AllChannels => "/teams/getAllMessages".to_string(),
            SubscriptionTarget::Channel {
                team_id,
                channel_id,
            } => format!("/teams/{team_id}/channels/{channel_id}/messages"),
            SubscriptionTarget::UserChats { user_id } => {
                format!("/users/{user_id}/chats/getAllMessages")
            }
        }
    }

    /// Inverse of [`resource`](Self::resource), ignoring any query string.
    pub fn from_resource(resource: &str) -> Option<Self> {
        let path = resource.split('?').next().unwrap_or_default();
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match parts.as_slice() {
            ["chats", "getAllMessages"] => Some(SubscriptionTarget::AllChats),
            ["teams", "getAllMessages"] => Some(SubscriptionTarget::AllChannels),
            ["teams", team, "channels", channel, "messages"] => Some(SubscriptionTarget::Channel {
                team_id: team.to_string(),
                channel_id: channel.to_string(),
            }),
            ["users", user, "chats", "getAllMessages"] => Some(SubscriptionTarget::UserChats {
                user_id: user.to_string(),
            }),
            _ => None,
        }
    }
}

/// Parameters for creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub target: SubscriptionTarget,
    pub notification_url: String,
    pub lifecycle_notification_url: String,
    pub client_state: String,
    /// Encryption certificate id; when set, notifications carry resource data.
    pub certificate: Option<String>,
}

/// A subscription as Graph reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSubscription {
    pub id: String,
    pub resource: String,
    pub expires_on: DateTime<Utc>,
    #[serde(default)]
    pub certificate: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_resource_round_trip() {
        let targets = [
            SubscriptionTarget::AllChats,
            SubscriptionTarget::AllChannels,
            SubscriptionTarget::Channel {
                team_id: "t".into(),
                channel_id: "c".into(),
            },
            SubscriptionTarget::UserChats { user_id: "u".into() },
        ];
        for target in targets {
            assert_eq!(SubscriptionTarget::from_resource(&target.resource()), Some(target));
        }
    }

    #[test]
    fn test_target_ignores_query() {
        assert_eq!(
            SubscriptionTarget::from_resource("/chats/getAllMessages?model=B"),
            Some(SubscriptionTarget::AllChats)
        );
        assert_eq!(SubscriptionTarget::from_resource("/me/events"), None);
    }

    #[test]
    fn test_guest_user() {
        let user = GraphUser {
            user_type: "Guest".into(),
            ..Default::default()
        };
        assert!(user.is_guest());
        assert!(!GraphUser::default().is_guest());
    }
}
