//! Task claim guard: at-most-once processing of redelivered work items.
//!
//! The chat platform delivers events at least once and several process
//! instances may receive the same event. Whoever first writes
//! `task:{work_item_id}` with set-if-absent processes it; everyone else skips.
//! Claims are never released -- they expire after the TTL, after which a
//! redelivery is processed again.

use std::sync::Arc;
use std::time::Duration;

use parley_types::config::CoordinationConfig;
use parley_types::error::StoreError;
use parley_types::id::WorkItemId;
use tracing::debug;

use crate::storage::kv_store::{KvStore, SetOptions};

/// Default claim TTL. Must exceed the expected processing time of one event.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(30);

const CLAIM_SENTINEL: &str = "1";

/// One-shot idempotency check per work item.
pub struct TaskClaimGuard<S: KvStore> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: KvStore> Clone for TaskClaimGuard<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ttl: self.ttl,
        }
    }
}

impl<S: KvStore> TaskClaimGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_ttl(store, DEFAULT_CLAIM_TTL)
    }

    pub fn with_ttl(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn from_config(store: Arc<S>, config: &CoordinationConfig) -> Self {
        Self::with_ttl(store, config.claim_ttl())
    }

    pub fn claim_key(id: &WorkItemId) -> String {
        format!("task:{id}")
    }

    /// Claim `id` for this process.
    ///
    /// Returns `true` exactly once per id while the claim record is live.
    /// Store errors propagate; they are never reported as "already claimed".
    pub async fn try_claim(&self, id: &WorkItemId) -> Result<bool, StoreError> {
        let claimed = self
            .store
            .set(
                &Self::claim_key(id),
                CLAIM_SENTINEL,
                SetOptions::if_absent_with_ttl(self.ttl),
            )
            .await?;

        if !claimed {
            debug!(work_item_id = %id, "Work item already claimed");
        }
        Ok(claimed)
    }
}
