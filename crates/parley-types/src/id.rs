//! Identifier newtypes.
//!
//! A [`ConversationId`] scopes both locks and history; a [`WorkItemId`] scopes
//! claim deduplication for one inbound event.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a conversation (a channel or thread on the chat platform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub u64);

impl ConversationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConversationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| format!("invalid conversation id '{s}': {e}"))
    }
}

impl From<u64> for ConversationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier of one inbound work item, derived from the platform event's own id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for WorkItemId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_parse() {
        let id: ConversationId = "42".parse().unwrap();
        assert_eq!(id, ConversationId(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_conversation_id_parse_rejects_garbage() {
        let err = "forty-two".parse::<ConversationId>().unwrap_err();
        assert!(err.contains("forty-two"));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&ConversationId(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&WorkItemId::new("1098370802526724206")).unwrap(),
            "\"1098370802526724206\""
        );
    }
}
