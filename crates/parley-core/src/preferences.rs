//! Per-conversation model selection.
//!
//! A conversation can pin a model with the `model <name>` command. Threads
//! without their own choice inherit their parent channel's, and everything
//! else uses the configured default.

use std::sync::Arc;

use parley_types::error::StoreError;
use parley_types::id::ConversationId;
use tracing::info;

use crate::storage::kv_store::{KvStore, SetOptions};

pub struct ModelPreferences<S: KvStore> {
    store: Arc<S>,
}

impl<S: KvStore> Clone for ModelPreferences<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KvStore> ModelPreferences<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn key(conversation: ConversationId) -> String {
        format!("model:{conversation}")
    }

    /// The model pinned on exactly this conversation, if any.
    pub async fn get(&self, conversation: ConversationId) -> Result<Option<String>, StoreError> {
        self.store.get(&Self::key(conversation)).await
    }

    /// Pin `model` on `conversation`. Preferences never expire.
    pub async fn set(&self, conversation: ConversationId, model: &str) -> Result<(), StoreError> {
        self.store
            .set(&Self::key(conversation), model, SetOptions::default())
            .await?;
        info!(conversation_id = %conversation, model, "Model preference set");
        Ok(())
    }

    /// Effective model: the conversation's own, else the parent's, else `default`.
    pub async fn resolve(
        &self,
        conversation: ConversationId,
        parent: Option<ConversationId>,
        default: &str,
    ) -> Result<String, StoreError> {
        if let Some(model) = self.get(conversation).await? {
            return Ok(model);
        }
        if let Some(parent) = parent {
            if let Some(model) = self.get(parent).await? {
                return Ok(model);
            }
        }
        Ok(default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;

    fn prefs() -> ModelPreferences<MemoryKvStore> {
        ModelPreferences::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn test_unset_resolves_to_default() {
        let model = prefs().resolve(ConversationId(1), None, "gpt-4o").await.unwrap();
        assert_eq!(model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let prefs = prefs();
        prefs.set(ConversationId(1), "o4-mini").await.unwrap();

        assert_eq!(prefs.get(ConversationId(1)).await.unwrap().as_deref(), Some("o4-mini"));
        assert!(prefs.get(ConversationId(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_thread_inherits_parent_choice() {
        let prefs = prefs();
        let channel = ConversationId(10);
        let thread = ConversationId(11);
        prefs.set(channel, "o4-mini").await.unwrap();

        assert_eq!(prefs.resolve(thread, Some(channel), "gpt-4o").await.unwrap(), "o4-mini");

        prefs.set(thread, "gpt-4.1").await.unwrap();
        assert_eq!(prefs.resolve(thread, Some(channel), "gpt-4o").await.unwrap(), "gpt-4.1");
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let prefs = prefs();
        prefs.set(ConversationId(3), "a").await.unwrap();
        prefs.set(ConversationId(3), "b").await.unwrap();
        assert_eq!(prefs.get(ConversationId(3)).await.unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_key_format() {
        assert_eq!(ModelPreferences::<MemoryKvStore>::key(ConversationId(9)), "model:9");
    }
}
