//! Attachment handling: code snippets, reply references and file uploads.

use std::io::Cursor;
use std::sync::Arc;

use bridge_core::{
    ActivityIds, Attachment, Chat, GraphClient, GraphError, GraphResult, Message,
    CODE_SNIPPET_CONTENT_TYPE, MESSAGE_REFERENCE_CONTENT_TYPE,
};
use image::ImageReader;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::convert::{attachment_tag, hosted_contents_id, HOSTED_CONTENTS};

/// Files attached to a single host post, at most.
pub const MAX_FILE_ATTACHMENTS: usize = 10;

/// Sent to the sender when an attachment had to be left out.
pub const ATTACHMENT_ERROR_MESSAGE: &str = "Some images could not be delivered because they exceeded the maximum resolution and/or size allowed.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeSnippetContent {
    #[serde(default)]
    language: String,
    #[serde(default)]
    code_snippet_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageReferenceContent {
    message_id: String,
}

/// Outcome of processing a message's attachments.
#[derive(Debug, Default)]
pub(crate) struct HandledAttachments {
    pub(crate) text: String,
    pub(crate) file_ids: Vec<String>,
    /// Root of the thread a `messageReference` points into.
    pub(crate) parent_id: String,
    pub(crate) error_found: bool,
}

/// Code-snippet URLs have this many `/`-separated segments.
fn is_code_snippet_url(url: &str) -> bool {
    matches!(url.split('/').count(), 13 | 15)
}

/// Width × height of an image, `None` when `data` is not an image format we
/// can read. SVG is never sniffed as an image.
fn image_resolution(data: &[u8]) -> Option<Result<i64, String>> {
    let reader = match ImageReader::new(Cursor::new(data)).with_guessed_format() {
        Ok(reader) => reader,
        Err(err) => return Some(Err(err.to_string())),
    };
    reader.format()?;
    Some(
        reader
            .into_dimensions()
            .map(|(w, h)| i64::from(w) * i64::from(h))
            .map_err(|e| e.to_string()),
    )
}

impl Context {
    /// Process `attachments` of `msg` for a post in `channel_id`.
    ///
    /// Attachment tags are stripped from `text`. On updates nothing is
    /// downloaded or uploaded.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn handle_attachments(
        &self,
        channel_id: &str,
        sender_id: &str,
        text: String,
        msg: &Message,
        attachments: &[Attachment],
        chat: Option<&Chat>,
        is_update: bool,
    ) -> HandledAttachments {
        let mut handled = HandledAttachments {
            text,
            ..Default::default()
        };
        if attachments.is_empty() {
            return handled;
        }

        if let Some(tag) = attachment_tag() {
            handled.text = tag.replace_all(&handled.text, "").into_owned();
        }

        let limits = self.sdk.file_limits();
        for attachment in attachments {
            if attachment.content_type == CODE_SNIPPET_CONTENT_TYPE {
                handled.text = self
                    .append_code_snippet(sender_id, attachment, handled.text)
                    .await;
                continue;
            }

            if attachment.content_type == MESSAGE_REFERENCE_CONTENT_TYPE {
                if let Some(parent_id) = self.referenced_root(attachment, &msg.channel_key()).await {
                    handled.parent_id = parent_id;
                }
                continue;
            }

            if is_update {
                continue;
            }

            if handled.file_ids.len() >= MAX_FILE_ATTACHMENTS {
                debug!(
                    message_id = %msg.id,
                    "Discarding the remaining attachments, a post holds at most {MAX_FILE_ATTACHMENTS}"
                );
                break;
            }

            let data = match self.download_attachment(attachment, msg, chat).await {
                Ok(data) => data,
                Err(err) => {
                    warn!(file_name = %attachment.name, error = %err, "File download failed");
                    continue;
                }
            };

            if data.len() as i64 > limits.max_file_size {
                warn!(
                    file_name = %attachment.name,
                    size = data.len(),
                    "Attachment is larger than the allowed file size"
                );
                handled.error_found = true;
                continue;
            }

            match image_resolution(&data) {
                Some(Ok(resolution)) if resolution > limits.max_image_resolution => {
                    warn!(file_name = %attachment.name, resolution, "Image resolution is too high");
                    handled.error_found = true;
                    continue;
                }
                Some(Err(err)) => {
                    warn!(file_name = %attachment.name, error = %err, "Unable to read image dimensions");
                    continue;
                }
                _ => {}
            }

            let name = if attachment.name.is_empty() {
                "image"
            } else {
                attachment.name.as_str()
            };
            match self.sdk.upload_file(data, channel_id, name).await {
                Ok(info) => handled.file_ids.push(info.id),
                Err(err) => {
                    error!(file_name = %name, error = %err, "Upload to the platform failed");
                }
            }
        }

        handled
    }

    /// Client to download files with: a connected chat member's, or the
    /// application's for channels.
    async fn download_client(&self, chat: Option<&Chat>) -> Option<(Arc<dyn GraphClient>, String)> {
        let Some(chat) = chat else {
            return Some((self.graph.clone(), String::new()));
        };
        for member in &chat.members {
            if let Some(client) = self.client_for_teams_user(&member.user_id).await {
                return Some((client, member.user_id.clone()));
            }
        }
        None
    }

    async fn download_attachment(
        &self,
        attachment: &Attachment,
        msg: &Message,
        chat: Option<&Chat>,
    ) -> GraphResult<Vec<u8>> {
        let Some((client, acting_user)) = self.download_client(chat).await else {
            return Err(GraphError::Unauthorized(
                "no connected chat member to download with".to_string(),
            ));
        };

        let result = if attachment.content_url.contains(HOSTED_CONTENTS) {
            let ids = hosted_content_ids(msg, &attachment.content_url);
            self.bounded(client.get_hosted_content(&ids)).await
        } else {
            self.bounded(client.get_file_content(&attachment.content_url))
                .await
        };

        if let Err(err) = &result {
            if !acting_user.is_empty() {
                self.on_user_client_error(&acting_user, err).await;
            }
        }
        result
    }

    async fn append_code_snippet(&self, sender_id: &str, attachment: &Attachment, text: String) -> String {
        let content: CodeSnippetContent = match serde_json::from_str(&attachment.content) {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, "Unable to decode code snippet");
                return text;
            }
        };

        if !is_code_snippet_url(&content.code_snippet_url) {
            warn!(url = %content.code_snippet_url, "Code snippet URL has an unexpected shape");
            return text;
        }

        let client = match self.client_for_mattermost_user(sender_id).await {
            Some(client) => client,
            None => self.graph.clone(),
        };

        match self
            .bounded(client.get_code_snippet(&content.code_snippet_url))
            .await
        {
            Ok(code) => format!("{text}\n```{}\n{code}\n```\n", content.language),
            Err(err) => {
                warn!(error = %err, "Retrieving code snippet failed");
                text
            }
        }
    }

    /// Root post id of the message a `messageReference` points at.
    async fn referenced_root(&self, attachment: &Attachment, channel_key: &str) -> Option<String> {
        let content: MessageReferenceContent = match serde_json::from_str(&attachment.content) {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, "Unable to decode message reference");
                return None;
            }
        };

        let info = self
            .store
            .get_post_info_by_ms_teams_id(channel_key, &content.message_id)
            .await
            .ok()?;
        let post = self.sdk.get_post(&info.mattermost_id).await.ok()?;
        if post.root_id.is_empty() {
            Some(post.id)
        } else {
            Some(post.root_id)
        }
    }
}

/// Ids to fetch an embedded image of `msg` with.
fn hosted_content_ids(msg: &Message, url: &str) -> ActivityIds {
    let (message_id, reply_id) = if msg.reply_to_id.is_empty() || !msg.chat_id.is_empty() {
        (msg.id.clone(), String::new())
    } else {
        (msg.reply_to_id.clone(), msg.id.clone())
    };

    ActivityIds {
        chat_id: msg.chat_id.clone(),
        team_id: msg.team_id.clone(),
        channel_id: msg.channel_id.clone(),
        message_id,
        reply_id,
        hosted_contents_id: hosted_contents_id(url).unwrap_or_default().to_string(),
    }
}
