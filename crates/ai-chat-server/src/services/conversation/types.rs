use serde::{Deserialize, Serialize};

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

impl AttachmentKind {
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }
}

/// Reference to an uploaded file, owned by exactly one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub display_name: String,
    /// Opaque handle understood by the attachment storage
    pub location_ref: String,
    pub byte_size: u64,
    pub mime_type: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.kind == AttachmentKind::Image
    }
}

/// One role-tagged message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Turn {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>, timestamp: i64) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp,
            attachments,
        }
    }

    /// Assistant turns never carry attachments
    pub fn assistant(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp,
            attachments: Vec::new(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.is_image()).count()
    }

    pub fn has_images(&self) -> bool {
        self.attachments.iter().any(Attachment::is_image)
    }

    /// A turn is sendable when it has text or at least one attachment
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachments.is_empty()
    }
}

/// Ordered turns of one (user, thread) pair, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.turns.last().map(|t| t.timestamp)
    }

    /// Timestamp for the next appended turn: `now`, but never before the last turn
    pub fn next_timestamp(&self, now: i64) -> i64 {
        self.last_timestamp().map_or(now, |last| last.max(now))
    }

    /// Returns a new history with `turn` appended
    pub fn with_turn(&self, turn: Turn) -> Self {
        let mut turns = Vec::with_capacity(self.turns.len() + 1);
        turns.extend_from_slice(&self.turns);
        turns.push(turn);
        Self { turns }
    }
}

/// Identifies one conversation scope owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub user_id: String,
    pub thread_id: String,
}

impl ThreadKey {
    pub fn new(user_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

impl std::fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.user_id, self.thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> Attachment {
        Attachment {
            kind: AttachmentKind::Image,
            display_name: name.to_string(),
            location_ref: format!("{}-ref", name),
            byte_size: 2048,
            mime_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_history_json_schema() {
        let history = History::new(vec![
            Turn::user("", vec![image("cat.png")], 1_000),
            Turn::assistant("A cat", 2_000),
        ]);

        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[0]["attachments"][0]["kind"], "image");
        assert_eq!(json[1]["role"], "assistant");
        assert!(json[1].get("attachments").is_none());

        let decoded: History = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, history);
    }

    #[test]
    fn test_next_timestamp_never_goes_backwards() {
        let history = History::new(vec![Turn::user("hi", vec![], 5_000)]);
        assert_eq!(history.next_timestamp(4_000), 5_000);
        assert_eq!(history.next_timestamp(6_000), 6_000);
        assert_eq!(History::default().next_timestamp(10), 10);
    }

    #[test]
    fn test_turn_emptiness() {
        assert!(Turn::user("   ", vec![], 0).is_empty());
        assert!(!Turn::user("", vec![image("a.png")], 0).is_empty());
        assert!(!Turn::user("hello", vec![], 0).is_empty());
    }

    #[test]
    fn test_attachment_kind_from_mime() {
        assert_eq!(AttachmentKind::from_mime("image/jpeg"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_mime("application/pdf"), AttachmentKind::File);
    }
}
