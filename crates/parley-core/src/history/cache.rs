//! Conversation history cache.
//!
//! Each conversation's history is a list of JSON-encoded [`HistoryEntry`]
//! values at `history:{namespace}:{conversation_id}`. Reads return entries in
//! insertion order and never mutate the list. Callers serialize
//! read-modify-write cycles with the conversation's distributed mutex.

use std::sync::Arc;

use parley_types::error::StoreError;
use parley_types::history::{HistoryEntry, Role};
use parley_types::id::ConversationId;
use tracing::debug;

use crate::storage::kv_store::KvStore;

/// Ordered message log per conversation, scoped by a key namespace.
pub struct HistoryCache<S: KvStore> {
    store: Arc<S>,
    namespace: String,
    expire_images: bool,
}

impl<S: KvStore> Clone for HistoryCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            expire_images: self.expire_images,
        }
    }
}

impl<S: KvStore> HistoryCache<S> {
    pub fn new(store: Arc<S>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            expire_images: false,
        }
    }

    /// Rewrite image parts to a placeholder on every read.
    ///
    /// Externally hosted image URLs are not guaranteed to stay valid, so
    /// multimodal histories replay them as text. Stored entries keep the
    /// original parts.
    pub fn with_expiring_images(mut self) -> Self {
        self.expire_images = true;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, conversation: ConversationId) -> String {
        format!("history:{}:{}", self.namespace, conversation)
    }

    /// Full history in insertion order; empty if nothing is stored.
    pub async fn get_history(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let entries = self.get_stored(conversation).await?;
        if !self.expire_images {
            return Ok(entries);
        }
        Ok(entries.iter().map(HistoryEntry::with_expired_images).collect())
    }

    /// Entries exactly as stored, without the image rewrite.
    pub async fn get_stored(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let raw = self.store.read_list(&self.key(conversation)).await?;
        raw.iter()
            .map(|value| {
                serde_json::from_str(value)
                    .map_err(|e| StoreError::Serialization(format!("invalid history entry: {e}")))
            })
            .collect()
    }

    /// Append entries to the end of the history, in the order given.
    pub async fn remember(
        &self,
        conversation: ConversationId,
        entries: &[HistoryEntry],
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let values = entries
            .iter()
            .map(|entry| {
                serde_json::to_string(entry)
                    .map_err(|e| StoreError::Serialization(format!("failed to encode entry: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let len = self.store.append_list(&self.key(conversation), &values).await?;
        debug!(conversation_id = %conversation, appended = values.len(), len, "History appended");
        Ok(())
    }

    /// Delete the whole history. Resetting an empty history is a no-op.
    pub async fn reset(&self, conversation: ConversationId) -> Result<(), StoreError> {
        let removed = self.store.delete(&self.key(conversation)).await?;
        debug!(conversation_id = %conversation, removed, "History reset");
        Ok(())
    }

    /// Replace the history with the last `window` entries of `entries`,
    /// starting at a user entry (see [`trim_to_window`]).
    ///
    /// Not atomic on its own; hold the conversation lock.
    pub async fn replace(
        &self,
        conversation: ConversationId,
        entries: Vec<HistoryEntry>,
        window: usize,
    ) -> Result<(), StoreError> {
        let kept = trim_to_window(entries, window);
        self.reset(conversation).await?;
        self.remember(conversation, &kept).await
    }
}

/// Keep the last `window` entries, then drop leading entries until the first
/// remaining one is a user entry. Providers that send the system prompt out
/// of band reject histories that open with an assistant turn.
pub fn trim_to_window(entries: Vec<HistoryEntry>, window: usize) -> Vec<HistoryEntry> {
    let skip = entries.len().saturating_sub(window);
    entries
        .into_iter()
        .skip(skip)
        .skip_while(|entry| entry.role != Role::User)
        .collect()
}
