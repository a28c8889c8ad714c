//! Parsing of Graph resource strings into identifiers.
//!
//! Two shapes are recognised:
//!
//! - `chats('<chat>')/messages('<message>')`
//! - `teams('<team>')/channels('<channel>')/messages('<message>')[/replies('<reply>')]`
//!
//! Leading, trailing and repeated slashes are ignored. Each segment must be
//! exactly `name('value')`; anything else yields an empty [`ActivityIds`].

use serde::{Deserialize, Serialize};

/// Identifiers extracted from a resource string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityIds {
    pub chat_id: String,
    pub team_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub reply_id: String,
    pub hosted_contents_id: String,
}

impl ActivityIds {
    /// True when the resource did not match any known shape.
    pub fn is_empty(&self) -> bool {
        self.message_id.is_empty()
    }

    /// True for chat (DM/GM) resources.
    pub fn is_chat(&self) -> bool {
        !self.chat_id.is_empty()
    }

    /// The key posts are linked under: the chat id or the channel id,
    /// whichever is set.
    pub fn channel_key(&self) -> String {
        format!("{}{}", self.chat_id, self.channel_id)
    }

    /// The message a delete or update targets: the reply when present.
    pub fn target_message_id(&self) -> &str {
        if self.reply_id.is_empty() {
            &self.message_id
        } else {
            &self.reply_id
        }
    }
}

/// Parse a resource string. Unknown shapes produce an empty record.
pub fn parse_resource(resource: &str) -> ActivityIds {
    let segments: Option<Vec<(&str, &str)>> = resource
        .split('/')
        .filter(|s| !s.is_empty())
        .map(parse_segment)
        .collect();

    let Some(segments) = segments else {
        return ActivityIds::default();
    };

    match segments.as_slice() {
        [("chats", chat), ("messages", message)] => ActivityIds {
            chat_id: chat.to_string(),
            message_id: message.to_string(),
            ..Default::default()
        },
        [("teams", team), ("channels", channel), ("messages", message)] => ActivityIds {
            team_id: team.to_string(),
            channel_id: channel.to_string(),
            message_id: message.to_string(),
            ..Default::default()
        },
        [("teams", team), ("channels", channel), ("messages", message), ("replies", reply)] => {
            ActivityIds {
                team_id: team.to_string(),
                channel_id: channel.to_string(),
                message_id: message.to_string(),
                reply_id: reply.to_string(),
                ..Default::default()
            }
        }
        _ => ActivityIds::default(),
    }
}

/// Split `name('value')` into its parts.
fn parse_segment(segment: &str) -> Option<(&str, &str)> {
    let open = segment.find("('")?;
    let name = &segment[..open];
    let rest = segment[open + 2..].strip_suffix("')")?;
    if name.is_empty() || rest.is_empty() || rest.contains('\'') {
        return None;
    }
    Some((name, rest))
}
