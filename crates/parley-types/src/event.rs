//! Inbound chat-platform events and outbound replies.

use serde::{Deserialize, Serialize};

use crate::id::{ConversationId, WorkItemId};

/// Image content types the bot accepts as attachments.
pub const SUPPORTED_IMAGE_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/webp", "image/gif"];

/// A file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Attachment {
    /// Whether the attachment's content type is one of [`SUPPORTED_IMAGE_TYPES`].
    pub fn is_supported_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| SUPPORTED_IMAGE_TYPES.contains(&ct))
    }
}

/// One message delivered by the chat platform.
///
/// The platform may deliver the same event more than once; `id` is what the
/// claim guard deduplicates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: WorkItemId,
    pub conversation_id: ConversationId,
    /// Channel a thread belongs to, used as a fallback scope for preferences.
    #[serde(default)]
    pub parent_id: Option<ConversationId>,
    #[serde(default)]
    pub author: Option<String>,
    /// Question text with any leading bot mention already stripped.
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl InboundEvent {
    /// The trimmed question text.
    pub fn question(&self) -> &str {
        self.content.trim()
    }
}

/// A message sent back to the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub conversation_id: ConversationId,
    pub content: String,
}
