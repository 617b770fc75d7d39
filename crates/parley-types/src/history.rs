//! Conversation history entries.
//!
//! One [`HistoryEntry`] is a role-tagged message. Entries are stored as JSON
//! strings in an append-only list per conversation, so the serde shape here
//! is the persisted format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Text substituted for image parts when replaying history whose image URLs
/// may no longer resolve.
pub const EXPIRED_IMAGE_PLACEHOLDER: &str = "[expired image reference]";

/// Author role of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

/// One piece of an entry's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String, media_type: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::Image { .. })
    }
}

/// A single role-tagged message in a conversation's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl HistoryEntry {
    /// Build a text-only entry.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Whether any part of this entry references an image.
    pub fn has_images(&self) -> bool {
        self.content.iter().any(ContentPart::is_image)
    }

    /// Copy of this entry with every image part replaced by
    /// [`EXPIRED_IMAGE_PLACEHOLDER`].
    pub fn with_expired_images(&self) -> Self {
        let content = self
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Image { .. } => ContentPart::text(EXPIRED_IMAGE_PLACEHOLDER),
                other => other.clone(),
            })
            .collect();
        Self {
            role: self.role,
            content,
        }
    }

    /// Concatenated text parts, separated by blank lines. Image parts are skipped.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
