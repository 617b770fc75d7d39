//! Process-local key-value store backed by `DashMap`.
//!
//! Every operation runs under the shard lock of its key, so set-if-absent is
//! atomic across tasks. Coordination only spans one process with this store;
//! use the SQLite store from parley-infra to coordinate several processes.
//!
//! Expiry uses `tokio::time::Instant`, so tests running with paused time can
//! advance past a TTL deterministically.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_types::error::StoreError;
use tokio::time::Instant;

use super::kv_store::{KvStore, SetOptions};

#[derive(Debug, Clone)]
enum Value {
    Scalar(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory implementation of [`KvStore`].
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<DashMap<String, Slot>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key. Expired keys are already invisible; this only
    /// reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        before - self.entries.len()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Query(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        let now = Instant::now();
        let slot = Slot {
            value: Value::Scalar(value.to_string()),
            expires_at: options.expire.map(|ttl| now + ttl),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if options.if_absent && occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => match &slot.value {
                Value::Scalar(value) => Ok(Some(value.clone())),
                Value::List(_) => Err(wrong_type(key)),
            },
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        match self.entries.remove(key) {
            Some((_, slot)) if slot.is_live(now) => Ok(1),
            _ => Ok(0),
        }
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let removed = self.entries.remove_if(key, |_, slot| {
            slot.is_live(now) && matches!(&slot.value, Value::Scalar(v) if v == value)
        });
        Ok(removed.is_some())
    }

    async fn append_list(&self, key: &str, values: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if !slot.is_live(now) {
                    *slot = Slot {
                        value: Value::List(Vec::new()),
                        expires_at: None,
                    };
                }
                match &mut slot.value {
                    Value::List(list) => {
                        list.extend(values.iter().cloned());
                        Ok(list.len() as u64)
                    }
                    Value::Scalar(_) => Err(wrong_type(key)),
                }
            }
            Entry::Vacant(vacant) => {
                if values.is_empty() {
                    return Ok(0);
                }
                vacant.insert(Slot {
                    value: Value::List(values.to_vec()),
                    expires_at: None,
                });
                Ok(values.len() as u64)
            }
        }
    }

    async fn read_list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => match &slot.value {
                Value::List(list) => Ok(list.clone()),
                Value::Scalar(_) => Err(wrong_type(key)),
            },
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = MemoryKvStore::new();
        assert!(store.set("k", "v", SetOptions::default()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let store = MemoryKvStore::new();
        let opts = SetOptions::if_absent_with_ttl(Duration::from_secs(10));
        assert!(store.set("lock:1", "a", opts).await.unwrap());
        assert!(!store.set("lock:1", "b", opts).await.unwrap());
        assert_eq!(store.get("lock:1").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_is_absent() {
        let store = MemoryKvStore::new();
        let opts = SetOptions::if_absent_with_ttl(Duration::from_secs(10));
        store.set("task:1", "1", opts).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(store.get("task:1").await.unwrap(), None);
        assert_eq!(store.delete("task:1").await.unwrap(), 0);
        assert!(store.set("task:1", "1", opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_counts_removed_keys() {
        let store = MemoryKvStore::new();
        store.set("k", "v", SetOptions::default()).await.unwrap();
        assert_eq!(store.delete("k").await.unwrap(), 1);
        assert_eq!(store.delete("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = MemoryKvStore::new();
        store.set("lock:7", "token-a", SetOptions::default()).await.unwrap();

        assert!(!store.delete_if_equals("lock:7", "token-b").await.unwrap());
        assert_eq!(store.get("lock:7").await.unwrap(), Some("token-a".to_string()));

        assert!(store.delete_if_equals("lock:7", "token-a").await.unwrap());
        assert_eq!(store.get("lock:7").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_append_preserves_order() {
        let store = MemoryKvStore::new();
        let len = store
            .append_list("history:1", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(len, 2);
        let len = store.append_list("history:1", &["c".to_string()]).await.unwrap();
        assert_eq!(len, 3);

        let list = store.read_list("history:1").await.unwrap();
        assert_eq!(list, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_read_missing_list_is_empty() {
        let store = MemoryKvStore::new();
        assert!(store.read_list("history:none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryKvStore::new();
        store.set("k", "v", SetOptions::default()).await.unwrap();
        assert!(store.append_list("k", &["x".to_string()]).await.is_err());
        assert!(store.read_list("k").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryKvStore::new();
        store
            .set("short", "1", SetOptions::if_absent_with_ttl(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("long", "1", SetOptions::default()).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
