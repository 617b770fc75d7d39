//! Distributed mutex over the shared key-value store.
//!
//! A lock is a record at `lock:{resource}` written with atomic
//! set-if-absent-with-expiry. The store has no blocking wait, so contended
//! acquisition polls at a fixed interval until the record is free. There is
//! no attempt ceiling and no fairness between waiters.
//!
//! The record's TTL bounds how long a crashed holder can block others. It also
//! means a holder whose critical section outlives the TTL silently loses the
//! lock to the next caller. Each acquisition writes a unique token so that:
//! - `release` only deletes the record while it still carries this token, and
//! - holders can call [`LockGuard::ensure_held`] right before a side effect.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parley_types::config::CoordinationConfig;
use parley_types::error::{CoordinationError, StoreError};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::storage::kv_store::{KvStore, SetOptions};

/// Default lock record TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Default delay between acquisition attempts while the lock is held elsewhere.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-resource mutual exclusion across every process sharing the store.
pub struct DistributedMutex<S: KvStore> {
    store: Arc<S>,
    ttl: Duration,
    poll_interval: Duration,
}

impl<S: KvStore> Clone for DistributedMutex<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ttl: self.ttl,
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: KvStore> DistributedMutex<S> {
    /// Create a mutex with the default 10s TTL and 500ms poll interval.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_timing(store, DEFAULT_LOCK_TTL, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_timing(store: Arc<S>, ttl: Duration, poll_interval: Duration) -> Self {
        Self {
            store,
            ttl,
            poll_interval,
        }
    }

    pub fn from_config(store: Arc<S>, config: &CoordinationConfig) -> Self {
        Self::with_timing(store, config.lock_ttl(), config.lock_poll_interval())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store key of the lock record for `resource`.
    pub fn lock_key(resource: impl fmt::Display) -> String {
        format!("lock:{resource}")
    }

    /// Make a single acquisition attempt.
    ///
    /// Returns `None` when another holder has the lock. Store errors are
    /// returned as errors, never reported as contention.
    pub async fn try_acquire(
        &self,
        resource: impl fmt::Display,
    ) -> Result<Option<LockGuard<S>>, StoreError> {
        let key = Self::lock_key(resource);
        let token = Uuid::now_v7().to_string();

        let acquired = self
            .store
            .set(&key, &token, SetOptions::if_absent_with_ttl(self.ttl))
            .await?;

        if !acquired {
            return Ok(None);
        }

        debug!(resource = %key, "Lock acquired");
        Ok(Some(LockGuard {
            store: Arc::clone(&self.store),
            key,
            token,
            ttl: self.ttl,
            acquired_at: Instant::now(),
            released: false,
        }))
    }

    /// Acquire the lock, polling until it is free.
    ///
    /// Blocks only the calling task. Wrap in `tokio::time::timeout` for a
    /// bounded wait.
    pub async fn acquire(&self, resource: impl fmt::Display) -> Result<LockGuard<S>, StoreError> {
        let resource = resource.to_string();
        let mut attempts: u64 = 1;

        loop {
            if let Some(guard) = self.try_acquire(&resource).await? {
                if attempts > 1 {
                    debug!(resource = %guard.key, attempts, "Lock acquired after contention");
                }
                return Ok(guard);
            }

            trace!(resource = %resource, attempts, "Lock held elsewhere, waiting");
            attempts += 1;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run `critical` while holding the lock for `resource`.
    ///
    /// The lock is released whether `critical` returns `Ok` or `Err`, before
    /// its result is propagated. A failed release is logged, not returned;
    /// the record's TTL cleans it up.
    ///
    /// If `critical` panics or this future is dropped mid-section, the guard's
    /// `Drop` releases in the background instead (see [`LockGuard`]). That
    /// release is best effort and may land after another waiter's poll.
    pub async fn with_lock<T, E, F, Fut>(&self, resource: impl fmt::Display, critical: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        let guard = self.acquire(resource).await?;
        let result = critical().await;
        guard.release_logged().await;
        result
    }
}

/// Proof of holding a lock. Release it with [`LockGuard::release`].
///
/// Dropping a guard without releasing leaves the record to expire after its TTL.
pub struct LockGuard<S: KvStore> {
    store: Arc<S>,
    key: String,
    token: String,
    ttl: Duration,
    acquired_at: Instant,
    released: bool,
}

impl<S: KvStore> LockGuard<S> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the TTL has elapsed by the local clock. The store may still
    /// disagree in either direction; use [`Self::is_held`] for the real answer.
    pub fn ttl_elapsed(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }

    /// Ask the store whether the record still carries this guard's token.
    pub async fn is_held(&self) -> Result<bool, StoreError> {
        let current = self.store.get(&self.key).await?;
        Ok(current.as_deref() == Some(self.token.as_str()))
    }

    /// Fail with [`CoordinationError::LockLost`] unless the lock is still held.
    pub async fn ensure_held(&self) -> Result<(), CoordinationError> {
        if self.is_held().await? {
            Ok(())
        } else {
            Err(CoordinationError::LockLost {
                resource: self.key.clone(),
            })
        }
    }

    /// Delete the lock record if it still carries this guard's token.
    ///
    /// Returns `false` when the record had already expired (and possibly been
    /// taken by another holder, which is left untouched).
    pub async fn release(mut self) -> Result<bool, StoreError> {
        self.released = true;
        let deleted = self.store.delete_if_equals(&self.key, &self.token).await?;
        debug!(resource = %self.key, deleted, held_for = ?self.acquired_at.elapsed(), "Lock released");
        Ok(deleted)
    }

    /// Release, logging instead of returning failures.
    pub async fn release_logged(self) {
        let key = self.key.clone();
        match self.release().await {
            Ok(true) => {}
            Ok(false) => warn!(resource = %key, "Lock expired before release"),
            Err(err) => warn!(resource = %key, error = %err, "Failed to release lock; it will expire"),
        }
    }
}

/// A guard dropped without `release` (a panic in the critical section, or a
/// cancelled future) releases from a background task when a tokio runtime is
/// available. Outside a runtime the record is left to its TTL.
impl<S: KvStore> Drop for LockGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(resource = %self.key, ttl = ?self.ttl, "Lock guard dropped outside a runtime; record will expire");
            return;
        };

        warn!(resource = %self.key, "Lock guard dropped without release; releasing in the background");
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        runtime.spawn(async move {
            match store.delete_if_equals(&key, &token).await {
                Ok(deleted) => debug!(resource = %key, deleted, "Dropped lock released"),
                Err(err) => {
                    warn!(resource = %key, error = %err, "Failed to release dropped lock; it will expire")
                }
            }
        });
    }
}

impl<S: KvStore> fmt::Debug for LockGuard<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}
