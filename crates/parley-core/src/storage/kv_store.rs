//! Key-value store trait.
//!
//! The one shared mutable resource every process instance talks to. All
//! coordination state (locks, claims, history) goes through these narrow
//! operations. Implementations live in parley-infra (SQLite) and
//! [`super::memory`] (process-local).

use std::time::Duration;

use parley_types::error::StoreError;

/// Options for [`KvStore::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Only write when the key is absent (or expired).
    pub if_absent: bool,
    /// Time-to-live after which the key is treated as absent.
    pub expire: Option<Duration>,
}

impl SetOptions {
    /// Atomic set-if-absent with expiry -- the primitive locks and claims use.
    pub fn if_absent_with_ttl(ttl: Duration) -> Self {
        Self {
            if_absent: true,
            expire: Some(ttl),
        }
    }
}

/// Trait for the shared key-value store.
///
/// Expired keys must behave exactly like absent keys for every operation.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait KvStore: Send + Sync + 'static {
    /// Write `value` under `key`.
    ///
    /// Returns `true` if the value was written, `false` if `if_absent` was set
    /// and a live value already exists. The check and the write are atomic.
    fn set(
        &self,
        key: &str,
        value: &str,
        options: SetOptions,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Get a scalar value. Returns None if the key does not exist or has expired.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Delete a key (scalar or list). Returns the number of keys removed.
    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;

    /// Delete a scalar key only while it still holds `value`. Atomic.
    fn delete_if_equals(
        &self,
        key: &str,
        value: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Append values to the end of the list at `key`, in order.
    /// Returns the list length after the append.
    fn append_list(
        &self,
        key: &str,
        values: &[String],
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;

    /// Read the whole list at `key` in insertion order (empty if absent).
    fn read_list(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, StoreError>> + Send;
}
