//! Teams message → host post conversion.

use std::collections::HashMap;
use std::sync::OnceLock;

use bridge_core::{html_to_markdown, Attachment, Chat, Message, Post};
use regex::Regex;
use tracing::debug;

use crate::context::Context;

/// Marker in the URL of images embedded in a message body.
pub const HOSTED_CONTENTS: &str = "hostedContents";

/// Post prop flagging posts written by the bridge.
pub fn sync_prop_key(bot_user_id: &str) -> String {
    format!("msteams_sync_{bot_user_id}")
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

pub(crate) fn attachment_tag() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"<attachment id=.*?attachment>")
}

fn image_tag() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"<img .*?>")
}

fn src_attr() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r#"src="([^"]*)""#)
}

fn emoji_tag() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?s)<emoji\b[^>]*>.*?</emoji>")
}

fn alt_attr() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r#"alt="([^"]*)""#)
}

/// Replace every `<emoji ... alt="x">…</emoji>` with `x`.
pub fn replace_emojis(text: &str) -> String {
    let (Some(tag), Some(alt)) = (emoji_tag(), alt_attr()) else {
        return text.to_string();
    };

    tag.replace_all(text, |caps: &regex::Captures<'_>| {
        let whole = &caps[0];
        match alt.captures(whole) {
            Some(alt) => alt[1].to_string(),
            None => whole.to_string(),
        }
    })
    .into_owned()
}

/// Pull images embedded as hosted content out of the body.
///
/// Returns the body without those `<img>` tags and one attachment per image.
pub fn extract_hosted_images(text: &str) -> (String, Vec<Attachment>) {
    let (Some(img), Some(src)) = (image_tag(), src_attr()) else {
        return (text.to_string(), Vec::new());
    };

    let mut attachments = Vec::new();
    let stripped = img.replace_all(text, |caps: &regex::Captures<'_>| {
        let tag = &caps[0];
        match src.captures(tag) {
            Some(url) if url[1].contains(HOSTED_CONTENTS) => {
                attachments.push(Attachment {
                    content_url: url[1].to_string(),
                    ..Default::default()
                });
                String::new()
            }
            _ => tag.to_string(),
        }
    });

    (stripped.into_owned(), attachments)
}

/// The hosted-content id in a `.../hostedContents/<id>/$value` URL.
pub fn hosted_contents_id(url: &str) -> Option<&str> {
    let rest = url.split_once(&format!("{HOSTED_CONTENTS}/"))?.1;
    let id = rest.split('/').next()?;
    (!id.is_empty()).then_some(id)
}

/// Tag text of mention `id`.
fn mention_tag(id: i32, text: &str) -> String {
    format!("<at id=\"{id}\">{text}</at>")
}

/// A post built from a Teams message.
#[derive(Debug, Clone)]
pub(crate) struct ConvertedPost {
    pub(crate) post: Post,
    /// An attachment was rejected for its size or resolution.
    pub(crate) error_found: bool,
}

impl Context {
    /// Rewrite `<at>` mentions in the body to host mentions.
    ///
    /// Teams splits a multi-word name into one mention per word, all with
    /// the same target; only the first fragment is kept.
    pub(crate) async fn replace_mentions(&self, msg: &Message) -> String {
        let mut first_fragment: HashMap<&str, &str> = HashMap::new();
        for mention in &msg.mentions {
            let target = if !mention.user_id.is_empty() {
                mention.user_id.as_str()
            } else if !mention.conversation_id.is_empty() {
                mention.conversation_id.as_str()
            } else {
                continue;
            };
            first_fragment
                .entry(target)
                .or_insert(mention.mentioned_text.as_str());
        }

        let mut text = msg.text.clone();
        for mention in &msg.mentions {
            let tag = mention_tag(mention.id, &mention.mentioned_text);
            let target = if !mention.user_id.is_empty() {
                mention.user_id.as_str()
            } else {
                mention.conversation_id.as_str()
            };

            if !target.is_empty()
                && first_fragment.get(target).copied() != Some(mention.mentioned_text.as_str())
            {
                text = text.replacen(&format!("&nbsp;{tag}"), "", 1);
                text = text.replacen(&tag, "", 1);
                continue;
            }

            let replacement = if !mention.user_id.is_empty() {
                self.user_mention(&mention.user_id).await
            } else if !mention.conversation_id.is_empty() {
                if mention.conversation_id == msg.chat_id && mention.mentioned_text == "Everyone" {
                    Some("@all".to_string())
                } else if mention.conversation_id == msg.channel_id {
                    Some("@channel".to_string())
                } else {
                    None
                }
            } else {
                None
            };

            let replacement = replacement.unwrap_or_else(|| mention.mentioned_text.clone());
            text = text.replacen(&tag, &replacement, 1);
        }

        text
    }

    async fn user_mention(&self, ms_teams_user_id: &str) -> Option<String> {
        let mattermost_user_id = match self.store.teams_to_mattermost_user_id(ms_teams_user_id).await {
            Ok(id) => id,
            Err(err) => {
                debug!(teams_user_id = %ms_teams_user_id, error = %err, "No host user for mention");
                return None;
            }
        };

        match self.sdk.get_user(&mattermost_user_id).await {
            Ok(user) => Some(format!("@{} ", user.username)),
            Err(err) => {
                debug!(user_id = %mattermost_user_id, error = %err, "Unable to load mentioned user");
                None
            }
        }
    }

    /// Build the host post for `msg`.
    ///
    /// Uploads attachments (except on updates) and resolves the thread
    /// root, so it must run outside any store transaction.
    pub(crate) async fn msg_to_post(
        &self,
        channel_id: &str,
        sender_id: &str,
        msg: &Message,
        chat: Option<&Chat>,
        is_update: bool,
    ) -> ConvertedPost {
        let text = self.replace_mentions(msg).await;
        let text = replace_emojis(&text);
        let (text, embedded) = extract_hosted_images(&text);
        let text = html_to_markdown(&text);

        let mut root_id = String::new();
        if !msg.reply_to_id.is_empty() {
            if let Ok(root) = self
                .store
                .get_post_info_by_ms_teams_id(&msg.channel_key(), &msg.reply_to_id)
                .await
            {
                root_id = root.mattermost_id;
            }
        }

        let mut attachments = msg.attachments.clone();
        attachments.extend(embedded);
        let handled = self
            .handle_attachments(channel_id, sender_id, text, msg, &attachments, chat, is_update)
            .await;

        let mut text = handled.text;
        if !handled.parent_id.is_empty() {
            root_id = handled.parent_id;
        }
        if root_id.is_empty() && !msg.subject.is_empty() {
            text = format!("## {}\n{text}", msg.subject);
        }

        let mut post = Post {
            user_id: sender_id.to_string(),
            channel_id: channel_id.to_string(),
            root_id,
            message: text,
            create_at: msg.create_at.timestamp_millis(),
            ..Default::default()
        };
        if !is_update {
            post.file_ids = handled.file_ids;
        }
        post.add_prop(sync_prop_key(self.bot_user_id()), true);

        if sender_id == self.bot_user_id() {
            post.add_prop("override_username", msg.user_display_name.clone());
            post.add_prop("from_webhook", "true");
            if let Some(url) = self.sdk.avatar_url(&msg.user_id).await {
                post.add_prop("override_icon_url", url);
            }
        }

        ConvertedPost {
            post,
            error_found: handled.error_found,
        }
    }
}
