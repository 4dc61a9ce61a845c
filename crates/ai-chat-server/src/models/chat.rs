use serde::{Deserialize, Serialize};

use crate::services::conversation::types::{Attachment, AttachmentKind, Role, Turn};

// ===== PROVIDER MESSAGE MODELS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Assistant => Self::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One fragment of a structured message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_data_uri(mime_type: &str, base64_data: &str) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", mime_type, base64_data),
            },
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::ImageUrl { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Role-tagged message handed to the completion provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    pub fn parts(role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub message: String,
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<TurnView>,
}

#[derive(Debug, Serialize)]
pub struct TurnView {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    pub attachments: Vec<AttachmentView>,
}

#[derive(Debug, Serialize)]
pub struct AttachmentView {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub name: String,
    pub url: String,
    pub size: u64,
    pub mimetype: String,
}

impl TurnView {
    /// `public_path` is the route prefix uploads are served from
    pub fn from_turn(turn: Turn, public_path: &str) -> Self {
        Self {
            role: turn.role,
            content: turn.content,
            timestamp: turn.timestamp,
            attachments: turn
                .attachments
                .into_iter()
                .map(|a| AttachmentView::from_attachment(a, public_path))
                .collect(),
        }
    }
}

impl AttachmentView {
    pub fn from_attachment(attachment: Attachment, public_path: &str) -> Self {
        Self {
            kind: attachment.kind,
            url: format!(
                "{}/{}",
                public_path.trim_end_matches('/'),
                attachment.location_ref
            ),
            name: attachment.display_name,
            size: attachment.byte_size,
            mimetype: attachment.mime_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_message_wire_shape() {
        let msg = ChatMessage::parts(
            MessageRole::User,
            vec![
                ContentPart::text("What is this?"),
                ContentPart::image_data_uri("image/png", "AAAA"),
            ],
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "What is this?");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_plain_message_wire_shape() {
        let json = serde_json::to_value(ChatMessage::system("be nice")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "be nice"}));
    }

    #[test]
    fn test_attachment_view_builds_public_url() {
        let view = AttachmentView::from_attachment(
            Attachment {
                kind: AttachmentKind::File,
                display_name: "notes.pdf".to_string(),
                location_ref: "1700000000000-42.pdf".to_string(),
                byte_size: 10,
                mime_type: "application/pdf".to_string(),
            },
            "/api/v2/uploads/",
        );
        assert_eq!(view.url, "/api/v2/uploads/1700000000000-42.pdf");
        assert_eq!(view.name, "notes.pdf");
    }
}
