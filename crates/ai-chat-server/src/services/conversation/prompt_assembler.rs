use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::chat::{ChatMessage, ContentPart, MessageRole};
use crate::services::attachment_storage::AttachmentStorage;
use crate::utils::format::format_file_size;
use crate::utils::metrics::Metrics;

use super::types::{Attachment, Role, Turn};

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Turns pruned history plus the new user turn into the provider message list.
///
/// Output order: historical turns, the new user turn, then the system
/// message, which is always last.
pub struct PromptAssembler {
    storage: Arc<dyn AttachmentStorage>,
    metrics: Metrics,
}

impl PromptAssembler {
    pub fn new(storage: Arc<dyn AttachmentStorage>, metrics: Metrics) -> Self {
        Self { storage, metrics }
    }

    pub async fn assemble(
        &self,
        history: &[Turn],
        new_turn: &Turn,
        system_prompt: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);

        for turn in history.iter().chain(std::iter::once(new_turn)) {
            messages.push(self.render_turn(turn).await);
        }
        messages.push(ChatMessage::system(system_prompt.trim()));

        debug!("Assembled {} provider messages", messages.len());
        messages
    }

    async fn render_turn(&self, turn: &Turn) -> ChatMessage {
        let role = MessageRole::from(turn.role);

        if turn.attachments.is_empty() {
            return ChatMessage::text(role, turn.content.clone());
        }

        if turn.role == Role::User && turn.has_images() {
            return ChatMessage::parts(role, self.render_parts(turn).await);
        }

        ChatMessage::text(role, with_manifest(&turn.content, &turn.attachments))
    }

    /// Text fragment first, then one fragment per attachment in order
    async fn render_parts(&self, turn: &Turn) -> Vec<ContentPart> {
        let mut parts = Vec::with_capacity(turn.attachments.len() + 1);
        parts.push(ContentPart::text(turn.content.clone()));

        for attachment in &turn.attachments {
            let part = if attachment.is_image() {
                self.render_image(attachment).await
            } else {
                ContentPart::text(format!(
                    "[Attached file: {} ({}, {})]",
                    attachment.display_name,
                    attachment.mime_type,
                    format_file_size(attachment.byte_size)
                ))
            };
            parts.push(part);
        }

        parts
    }

    async fn render_image(&self, attachment: &Attachment) -> ContentPart {
        match self.storage.read(&attachment.location_ref).await {
            Ok(bytes) => {
                let mime = if attachment.mime_type.is_empty() {
                    DEFAULT_IMAGE_MIME
                } else {
                    attachment.mime_type.as_str()
                };
                ContentPart::image_data_uri(mime, &STANDARD.encode(&bytes))
            }
            Err(e) => {
                warn!(
                    attachment = %attachment.display_name,
                    error = %e,
                    "Failed to read image attachment, substituting placeholder"
                );
                self.metrics.increment_attachments_unreadable();
                ContentPart::text(format!(
                    "[Failed to process image: {}]",
                    attachment.display_name
                ))
            }
        }
    }
}

/// Plain-text rendering with a numbered attachment list appended
fn with_manifest(content: &str, attachments: &[Attachment]) -> String {
    let mut text = String::from(content);
    text.push_str("\n\nAttached files:\n");

    for (i, attachment) in attachments.iter().enumerate() {
        let line = if attachment.is_image() {
            format!(
                "{}. Image: {} ({})\n",
                i + 1,
                attachment.display_name,
                format_file_size(attachment.byte_size)
            )
        } else {
            format!(
                "{}. File: {} ({}, {})\n",
                i + 1,
                attachment.display_name,
                attachment.mime_type,
                format_file_size(attachment.byte_size)
            )
        };
        text.push_str(&line);
    }

    text
}
