//! Selective sync: which chat mirrorings are worth materializing.

use bridge_core::PlatformSdk;
use link_store::Store;
use tracing::debug;

use crate::users::is_remote_user;

/// Preference category the bridge keeps its per-user settings under.
pub const PREFERENCE_CATEGORY: &str = "pp_com.mattermost.msteams-sync";

/// Preference holding a user's primary platform.
pub const PREFERENCE_NAME_PLATFORM: &str = "platform";

pub const PLATFORM_MATTERMOST: &str = "mattermost";
pub const PLATFORM_MSTEAMS: &str = "msteams";

/// How a chat participant relates to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Participant {
    /// A synthetic user standing in for a Teams account.
    Synthetic,
    /// Connected, reads on the host platform.
    MattermostPrimary,
    /// Connected, reads on Teams.
    TeamsPrimary,
    /// Has a host account but never connected it.
    NotConnected,
}

/// Whether a message from `sender` should be delivered to `recipient`.
pub fn should_sync(sender: Participant, recipient: Participant, selective: bool) -> bool {
    use Participant::*;

    match (sender, recipient) {
        // Nobody on the host side would ever read it.
        (Synthetic, NotConnected) => false,
        (Synthetic, Synthetic) => false,
        _ if !selective => true,
        (Synthetic, MattermostPrimary) => true,
        (Synthetic, TeamsPrimary) => false,
        (MattermostPrimary, TeamsPrimary) | (MattermostPrimary, Synthetic) => true,
        (MattermostPrimary, _) => false,
        (TeamsPrimary, NotConnected) | (TeamsPrimary, MattermostPrimary) => true,
        (TeamsPrimary, _) => false,
        (NotConnected, MattermostPrimary) => true,
        (NotConnected, _) => false,
    }
}

/// True when at least one recipient should receive the message.
pub fn should_sync_any(sender: Participant, recipients: &[Participant], selective: bool) -> bool {
    recipients
        .iter()
        .any(|recipient| should_sync(sender, *recipient, selective))
}

/// Classify a host user.
pub async fn classify(
    store: &Store,
    sdk: &dyn PlatformSdk,
    mattermost_user_id: &str,
) -> Participant {
    let user = match sdk.get_user(mattermost_user_id).await {
        Ok(user) => user,
        Err(err) => {
            debug!(user_id = %mattermost_user_id, error = %err, "Unable to load user, treating as not connected");
            return Participant::NotConnected;
        }
    };
    if is_remote_user(&user) {
        return Participant::Synthetic;
    }

    match store.get_token_for_mattermost_user(mattermost_user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Participant::NotConnected,
        Err(err) => {
            debug!(user_id = %mattermost_user_id, error = %err, "Unable to read token, treating as not connected");
            return Participant::NotConnected;
        }
    }

    match sdk
        .get_preference(mattermost_user_id, PREFERENCE_CATEGORY, PREFERENCE_NAME_PLATFORM)
        .await
    {
        Ok(Some(platform)) if platform == PLATFORM_MSTEAMS => Participant::TeamsPrimary,
        _ => Participant::MattermostPrimary,
    }
}
