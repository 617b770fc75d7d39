//! Request/answer shapes for LLM provider calls.

use serde::{Deserialize, Serialize};

use crate::history::HistoryEntry;

/// Request sent to a chat provider: the full replayed conversation plus the new turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    /// Model identifier; empty means the provider's configured default.
    pub model: String,
    pub messages: Vec<HistoryEntry>,
    pub max_tokens: u32,
}

/// Provider answer with the cost signal the eviction policy inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// Total tokens consumed by the call, if the provider reported usage.
    pub cost: Option<u32>,
}

impl Answer {
    pub fn new(text: impl Into<String>, cost: Option<u32>) -> Self {
        Self {
            text: text.into(),
            cost,
        }
    }
}
