//! Reconciling a post's reactions with its Teams message.

use std::collections::HashSet;

use bridge_core::{MetricKind, PlatformReaction, Reaction, REMOVED_FROM_PLUGIN};
use tracing::{debug, warn};

use crate::context::Context;
use crate::emoji::emoji_name;

/// Reaction changes needed to make the post match the message.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReactionDiff {
    pub(crate) add: Vec<(String, String)>,
    pub(crate) remove: Vec<PlatformReaction>,
}

/// Compare `current` host reactions with the `wanted` `(user, emoji)` set.
pub(crate) fn diff_reactions(
    current: &[PlatformReaction],
    wanted: &[(String, String)],
) -> ReactionDiff {
    let wanted_set: HashSet<(&str, &str)> = wanted
        .iter()
        .map(|(user, emoji)| (user.as_str(), emoji.as_str()))
        .collect();
    let current_set: HashSet<(&str, &str)> = current
        .iter()
        .map(|r| (r.user_id.as_str(), r.emoji_name.as_str()))
        .collect();

    let remove = current
        .iter()
        .filter(|r| !wanted_set.contains(&(r.user_id.as_str(), r.emoji_name.as_str())))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let add = wanted
        .iter()
        .filter(|(user, emoji)| !current_set.contains(&(user.as_str(), emoji.as_str())))
        .filter(|pair| seen.insert((*pair).clone()))
        .cloned()
        .collect();

    ReactionDiff { add, remove }
}

impl Context {
    /// Make the reactions on `post_id` match `reactions` from Teams.
    pub(crate) async fn reconcile_reactions(
        &self,
        post_id: &str,
        reactions: &[Reaction],
        is_direct: bool,
    ) {
        let current = match self.sdk.get_reactions(post_id).await {
            Ok(current) => current,
            Err(err) => {
                warn!(post_id = %post_id, error = %err, "Unable to get post reactions");
                return;
            }
        };
        if current.is_empty() && reactions.is_empty() {
            return;
        }

        let mut wanted = Vec::with_capacity(reactions.len());
        for reaction in reactions {
            let Some(emoji) = emoji_name(&reaction.reaction) else {
                debug!(reaction = %reaction.reaction, "Skipping unknown reaction");
                continue;
            };
            match self.linked_user(&reaction.user_id).await {
                Ok(Some(user_id)) => wanted.push((user_id, emoji.to_string())),
                Ok(None) => {
                    debug!(teams_user_id = %reaction.user_id, "Skipping reaction of unlinked user")
                }
                Err(err) => {
                    warn!(teams_user_id = %reaction.user_id, error = %err, "Unable to map reaction user")
                }
            }
        }

        let diff = diff_reactions(&current, &wanted);
        let is_direct = if is_direct { "true" } else { "false" };

        for mut reaction in diff.remove {
            reaction.channel_id = REMOVED_FROM_PLUGIN.to_string();
            match self.sdk.remove_reaction(reaction.clone()).await {
                Ok(()) => self.metrics.observe(
                    MetricKind::Reactions,
                    &[("action", "unset"), ("source", "msteams"), ("is_direct", is_direct)],
                ),
                Err(err) => {
                    warn!(post_id = %post_id, emoji = %reaction.emoji_name, error = %err, "Unable to remove reaction")
                }
            }
        }

        for (user_id, emoji_name) in diff.add {
            let reaction = PlatformReaction {
                user_id,
                post_id: post_id.to_string(),
                channel_id: String::new(),
                emoji_name,
            };
            match self.sdk.add_reaction(reaction.clone()).await {
                Ok(()) => self.metrics.observe(
                    MetricKind::Reactions,
                    &[("action", "set"), ("source", "msteams"), ("is_direct", is_direct)],
                ),
                Err(err) => {
                    warn!(post_id = %post_id, emoji = %reaction.emoji_name, error = %err, "Unable to add reaction")
                }
            }
        }
    }
}
