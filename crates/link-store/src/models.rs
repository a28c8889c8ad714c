//! Store models.
//!
//! Timestamps are persisted as microseconds since the Unix epoch. A stored
//! value of `0` means "never" and surfaces as `None`.

use std::fmt;
use std::str::FromStr;

use bridge_core::SubscriptionTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A link between a Mattermost channel and a Teams channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChannelLink {
    #[sqlx(rename = "mmChannelID")]
    pub mattermost_channel_id: String,
    #[sqlx(rename = "mmTeamID")]
    pub mattermost_team_id: String,
    #[sqlx(rename = "msTeamsTeamID")]
    pub ms_teams_team_id: String,
    #[sqlx(rename = "msTeamsChannelID")]
    pub ms_teams_channel_id: String,
    /// Mattermost user id of whoever created the link.
    pub creator: String,
}

/// Mirrored post pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInfo {
    pub mattermost_id: String,
    pub ms_teams_id: String,
    /// Channel key: the Teams chat id or channel id.
    pub ms_teams_channel: String,
    pub ms_teams_last_update_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub(crate) struct PostInfoRow {
    #[sqlx(rename = "mmPostID")]
    pub mm_post_id: String,
    #[sqlx(rename = "msTeamsPostID")]
    pub ms_teams_post_id: String,
    #[sqlx(rename = "msTeamsChannelID")]
    pub ms_teams_channel_id: String,
    #[sqlx(rename = "msTeamsLastUpdateAt")]
    pub ms_teams_last_update_at: i64,
}

impl From<PostInfoRow> for PostInfo {
    fn from(row: PostInfoRow) -> Self {
        PostInfo {
            mattermost_id: row.mm_post_id,
            ms_teams_id: row.ms_teams_post_id,
            ms_teams_channel: row.ms_teams_channel_id,
            ms_teams_last_update_at: from_micros(row.ms_teams_last_update_at),
        }
    }
}

/// The kind of resource a subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionKind {
    AllChats,
    AllChannels,
    Channel,
    Chat,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::AllChats => "allChats",
            SubscriptionKind::AllChannels => "allChannels",
            SubscriptionKind::Channel => "channel",
            SubscriptionKind::Chat => "chat",
        }
    }

    /// Whether this is one of the tenant-wide subscriptions.
    pub fn is_global(&self) -> bool {
        matches!(self, SubscriptionKind::AllChats | SubscriptionKind::AllChannels)
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allChats" => Ok(SubscriptionKind::AllChats),
            "allChannels" => Ok(SubscriptionKind::AllChannels),
            "channel" => Ok(SubscriptionKind::Channel),
            "chat" => Ok(SubscriptionKind::Chat),
            other => Err(format!("unknown subscription type: {other}")),
        }
    }
}

/// A locally recorded webhook subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub kind: SubscriptionKind,
    /// Set for channel subscriptions.
    pub team_id: String,
    /// Set for channel subscriptions.
    pub channel_id: String,
    /// Set for chat subscriptions.
    pub user_id: String,
    pub secret: String,
    pub expires_on: DateTime<Utc>,
    /// Encryption certificate id, empty when notifications carry no content.
    pub certificate: String,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// A tenant-wide subscription of `kind`.
    pub fn global(
        subscription_id: impl Into<String>,
        kind: SubscriptionKind,
        secret: impl Into<String>,
        expires_on: DateTime<Utc>,
    ) -> Self {
        Self::new(subscription_id, kind, secret, expires_on)
    }

    /// A subscription to one Teams channel.
    pub fn channel(
        subscription_id: impl Into<String>,
        team_id: impl Into<String>,
        channel_id: impl Into<String>,
        secret: impl Into<String>,
        expires_on: DateTime<Utc>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            channel_id: channel_id.into(),
            ..Self::new(subscription_id, SubscriptionKind::Channel, secret, expires_on)
        }
    }

    /// A subscription to one user's chats.
    pub fn chat(
        subscription_id: impl Into<String>,
        user_id: impl Into<String>,
        secret: impl Into<String>,
        expires_on: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::new(subscription_id, SubscriptionKind::Chat, secret, expires_on)
        }
    }

    fn new(
        subscription_id: impl Into<String>,
        kind: SubscriptionKind,
        secret: impl Into<String>,
        expires_on: DateTime<Utc>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            kind,
            team_id: String::new(),
            channel_id: String::new(),
            user_id: String::new(),
            secret: secret.into(),
            expires_on,
            certificate: String::new(),
            last_activity_at: None,
        }
    }

    /// Attach an encryption certificate id.
    pub fn with_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.certificate = certificate.into();
        self
    }

    /// The resource this subscription watches.
    pub fn target(&self) -> SubscriptionTarget {
        match self.kind {
            SubscriptionKind::AllChats => SubscriptionTarget::AllChats,
            SubscriptionKind::AllChannels => SubscriptionTarget::AllChannels,
            SubscriptionKind::Channel => SubscriptionTarget::Channel {
                team_id: self.team_id.clone(),
                channel_id: self.channel_id.clone(),
            },
            SubscriptionKind::Chat => SubscriptionTarget::UserChats {
                user_id: self.user_id.clone(),
            },
        }
    }

    /// The kind matching a subscription target.
    pub fn kind_of(target: &SubscriptionTarget) -> SubscriptionKind {
        match target {
            SubscriptionTarget::AllChats => SubscriptionKind::AllChats,
            SubscriptionTarget::AllChannels => SubscriptionKind::AllChannels,
            SubscriptionTarget::Channel { .. } => SubscriptionKind::Channel,
            SubscriptionTarget::UserChats { .. } => SubscriptionKind::Chat,
        }
    }
}

#[derive(FromRow)]
pub(crate) struct SubscriptionRow {
    #[sqlx(rename = "subscriptionID")]
    pub subscription_id: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    #[sqlx(rename = "msTeamsTeamID")]
    pub team_id: String,
    #[sqlx(rename = "msTeamsChannelID")]
    pub channel_id: String,
    #[sqlx(rename = "msTeamsUserID")]
    pub user_id: String,
    pub secret: String,
    #[sqlx(rename = "expiresOn")]
    pub expires_on: i64,
    pub certificate: String,
    #[sqlx(rename = "lastActivityAt")]
    pub last_activity_at: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = crate::StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse()
            .map_err(|message| crate::StoreError::Invalid {
                field: "subscription type",
                message,
            })?;
        Ok(Subscription {
            subscription_id: row.subscription_id,
            kind,
            team_id: row.team_id,
            channel_id: row.channel_id,
            user_id: row.user_id,
            secret: row.secret,
            expires_on: from_micros(row.expires_on),
            certificate: row.certificate,
            last_activity_at: optional_from_micros(row.last_activity_at),
        })
    }
}

/// Connect state of a Mattermost user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConnectStatus {
    pub mattermost_user_id: String,
    pub connected: bool,
    pub last_connect_at: Option<DateTime<Utc>>,
    pub last_disconnect_at: Option<DateTime<Utc>>,
}

/// A user holding a stored token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedUser {
    pub mattermost_user_id: String,
    pub ms_teams_user_id: String,
    pub last_connect_at: Option<DateTime<Utc>>,
}

/// Last chat timestamps of a linked user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChatActivity {
    pub mattermost_user_id: String,
    pub last_chat_sent_at: Option<DateTime<Utc>>,
    pub last_chat_received_at: Option<DateTime<Utc>>,
}

/// A Mattermost user with a pending invite to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitedUser {
    pub mattermost_user_id: String,
    pub invite_pending_since: DateTime<Utc>,
    pub invite_last_sent_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub(crate) struct InvitedUserRow {
    #[sqlx(rename = "mmUserID")]
    pub mm_user_id: String,
    #[sqlx(rename = "invitePendingSince")]
    pub invite_pending_since: i64,
    #[sqlx(rename = "inviteLastSentAt")]
    pub invite_last_sent_at: i64,
}

impl From<InvitedUserRow> for InvitedUser {
    fn from(row: InvitedUserRow) -> Self {
        InvitedUser {
            mattermost_user_id: row.mm_user_id,
            invite_pending_since: from_micros(row.invite_pending_since),
            invite_last_sent_at: from_micros(row.invite_last_sent_at),
        }
    }
}

/// Microseconds since the Unix epoch.
pub fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Inverse of [`to_micros`]; out-of-range values clamp to the epoch.
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn optional_from_micros(micros: i64) -> Option<DateTime<Utc>> {
    (micros > 0).then(|| from_micros(micros))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_kind_parse() {
        for kind in [
            SubscriptionKind::AllChats,
            SubscriptionKind::AllChannels,
            SubscriptionKind::Channel,
            SubscriptionKind::Chat,
        ] {
            assert_eq!(kind.as_str().parse::<SubscriptionKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<SubscriptionKind>().is_err());
    }

    #[test]
    fn test_subscription_target() {
        let sub = Subscription::channel("sub", "team", "chan", "secret", Utc::now());
        assert_eq!(
            sub.target(),
            SubscriptionTarget::Channel {
                team_id: "team".to_string(),
                channel_id: "chan".to_string()
            }
        );
        assert_eq!(Subscription::kind_of(&sub.target()), SubscriptionKind::Channel);
    }

    #[test]
    fn test_micros_preserve_resolution() {
        let at = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_micros(to_micros(at)), at);
        assert_eq!(optional_from_micros(0), None);
    }
}
