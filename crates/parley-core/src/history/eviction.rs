//! Token-budget eviction for conversation history.
//!
//! Token counts of stored entries are not tracked locally. Instead, after each
//! turn the provider's reported cost (total tokens for the call, which already
//! includes the replayed history) is compared against a fixed threshold. Over
//! the threshold the whole history is dropped; otherwise the turn is appended.
//! There is no partial trimming.

use parley_types::config::HistoryConfig;
use parley_types::error::StoreError;
use parley_types::history::HistoryEntry;
use parley_types::id::ConversationId;
use tracing::info;

use super::cache::HistoryCache;
use crate::storage::kv_store::KvStore;

/// Default threshold in total tokens per call.
pub const DEFAULT_EVICTION_THRESHOLD: u32 = 3500;

/// What [`EvictionPolicy::apply`] did with a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The turn's entries were appended.
    Remembered { entries: usize },
    /// The history was reset and the turn discarded.
    Evicted { cost: u32 },
}

/// All-or-nothing eviction keyed on the provider's cost signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    threshold: u32,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EVICTION_THRESHOLD)
    }
}

impl EvictionPolicy {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::new(config.eviction_token_threshold)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether a turn with this cost should reset the history.
    ///
    /// A cost equal to the threshold is still within budget. An unknown cost
    /// never evicts.
    pub fn should_evict(&self, cost: Option<u32>) -> bool {
        cost.is_some_and(|cost| cost > self.threshold)
    }

    /// Record a finished turn: reset when over budget, append otherwise.
    pub async fn apply<S: KvStore>(
        &self,
        cache: &HistoryCache<S>,
        conversation: ConversationId,
        cost: Option<u32>,
        turn: &[HistoryEntry],
    ) -> Result<TurnOutcome, StoreError> {
        match cost {
            Some(cost) if self.should_evict(Some(cost)) => {
                cache.reset(conversation).await?;
                info!(
                    conversation_id = %conversation,
                    cost,
                    threshold = self.threshold,
                    "Token budget exceeded, history evicted"
                );
                Ok(TurnOutcome::Evicted { cost })
            }
            _ => {
                cache.remember(conversation, turn).await?;
                Ok(TurnOutcome::Remembered {
                    entries: turn.len(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use std::sync::Arc;

    fn turn() -> Vec<HistoryEntry> {
        vec![HistoryEntry::user("question"), HistoryEntry::assistant("answer")]
    }

    #[test]
    fn test_should_evict_boundaries() {
        let policy = EvictionPolicy::new(3500);
        assert!(!policy.should_evict(Some(3499)));
        assert!(!policy.should_evict(Some(3500)));
        assert!(policy.should_evict(Some(3501)));
        assert!(!policy.should_evict(None));
    }

    #[test]
    fn test_from_config() {
        let config = HistoryConfig {
            eviction_token_threshold: 8000,
            ..HistoryConfig::default()
        };
        assert_eq!(EvictionPolicy::from_config(&config).threshold(), 8000);
    }

    #[tokio::test]
    async fn test_over_threshold_empties_history() {
        let cache = HistoryCache::new(Arc::new(MemoryKvStore::new()), "openai");
        let conv = ConversationId(42);
        cache.remember(conv, &turn()).await.unwrap();

        let outcome = EvictionPolicy::default()
            .apply(&cache, conv, Some(4000), &turn())
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Evicted { cost: 4000 });
        assert!(cache.get_history(conv).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_at_threshold_keeps_prior_entries() {
        let cache = HistoryCache::new(Arc::new(MemoryKvStore::new()), "openai");
        let conv = ConversationId(42);
        cache.remember(conv, &turn()).await.unwrap();

        let outcome = EvictionPolicy::default()
            .apply(&cache, conv, Some(3500), &turn())
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Remembered { entries: 2 });
        assert_eq!(cache.get_history(conv).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_cost_remembers() {
        let cache = HistoryCache::new(Arc::new(MemoryKvStore::new()), "openai");
        let conv = ConversationId(7);

        EvictionPolicy::default().apply(&cache, conv, None, &turn()).await.unwrap();

        assert_eq!(cache.get_history(conv).await.unwrap(), turn());
    }
}
