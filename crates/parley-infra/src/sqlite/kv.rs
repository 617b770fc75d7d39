//! SQLite key-value store implementation.
//!
//! Implements `KvStore` from `parley-core`. Scalars live in `kv_entries`; a
//! list key has a `kv_entries` row of kind `list` plus ordered rows in
//! `kv_list_items`. Expiry is lazy: rows past `expires_at` are treated as
//! absent by every query and removed by the next write to the same key (or by
//! [`SqliteKvStore::purge_expired`]).
//!
//! Atomicity comes from SQLite itself: conditional writes are single
//! statements or run in one transaction on the writer pool.

use chrono::Utc;
use parley_core::storage::kv_store::{KvStore, SetOptions};
use parley_types::error::StoreError;
use sqlx::Row;
use tracing::debug;

use super::pool::DatabasePool;

const KIND_SCALAR: &str = "scalar";
const KIND_LIST: &str = "list";

/// SQLite-backed implementation of `KvStore`.
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: DatabasePool,
}

impl SqliteKvStore {
    /// Create a new KV store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Delete every expired key. Returns the number of keys removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool.writer)
            .await
            .map_err(store_error)?;

        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "Purged expired keys");
        }
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(options: &SetOptions) -> Option<i64> {
    options.expire.map(|ttl| {
        let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_millis().saturating_add(ttl)
    })
}

fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(err.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Query(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

async fn delete_expired(conn: &mut sqlx::SqliteConnection, key: &str, now: i64) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM kv_entries WHERE key = ? AND expires_at IS NOT NULL AND expires_at <= ?")
        .bind(key)
        .bind(now)
        .execute(conn)
        .await
        .map_err(store_error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// KvStore implementation
// ---------------------------------------------------------------------------

impl KvStore for SqliteKvStore {
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        let now = now_millis();
        let expires_at = expiry_millis(&options);
        let mut tx = self.pool.writer.begin().await.map_err(store_error)?;

        delete_expired(&mut tx, key, now).await?;

        let written = if options.if_absent {
            let result = sqlx::query(
                r#"INSERT INTO kv_entries (key, kind, value, expires_at)
                   VALUES (?, ?, ?, ?)
                   ON CONFLICT (key) DO NOTHING"#,
            )
            .bind(key)
            .bind(KIND_SCALAR)
            .bind(value)
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
            result.rows_affected() == 1
        } else {
            // A plain set replaces whatever the key held, lists included.
            sqlx::query("DELETE FROM kv_list_items WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
            sqlx::query(
                r#"INSERT INTO kv_entries (key, kind, value, expires_at)
                   VALUES (?, ?, ?, ?)
                   ON CONFLICT (key) DO UPDATE SET
                       kind = excluded.kind,
                       value = excluded.value,
                       expires_at = excluded.expires_at"#,
            )
            .bind(key)
            .bind(KIND_SCALAR)
            .bind(value)
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
            true
        };

        tx.commit().await.map_err(store_error)?;
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT kind, value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(store_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind: String = row.try_get("kind").map_err(store_error)?;
        if kind != KIND_SCALAR {
            return Err(wrong_type(key));
        }
        row.try_get("value").map_err(store_error)
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(store_error)?;

        delete_expired(&mut tx, key, now_millis()).await?;
        let result = sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"DELETE FROM kv_entries
               WHERE key = ? AND kind = ? AND value = ?
                 AND (expires_at IS NULL OR expires_at > ?)"#,
        )
        .bind(key)
        .bind(KIND_SCALAR)
        .bind(value)
        .bind(now_millis())
        .execute(&self.pool.writer)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_list(&self, key: &str, values: &[String]) -> Result<u64, StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(store_error)?;

        delete_expired(&mut tx, key, now_millis()).await?;

        let kind: Option<String> = sqlx::query_scalar("SELECT kind FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error)?;

        match kind.as_deref() {
            Some(KIND_LIST) => {}
            Some(_) => return Err(wrong_type(key)),
            None if values.is_empty() => return Ok(0),
            None => {
                sqlx::query("INSERT INTO kv_entries (key, kind, value, expires_at) VALUES (?, ?, NULL, NULL)")
                    .bind(key)
                    .bind(KIND_LIST)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_error)?;
            }
        }

        for value in values {
            sqlx::query("INSERT INTO kv_list_items (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }

        let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_list_items WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        Ok(u64::try_from(len).unwrap_or(0))
    }

    async fn read_list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        // One statement, so the kind check and the items come from the same snapshot
        let rows = sqlx::query(
            r#"SELECT e.kind AS kind, i.value AS value
               FROM kv_entries e
               LEFT JOIN kv_list_items i ON i.key = e.key
               WHERE e.key = ? AND (e.expires_at IS NULL OR e.expires_at > ?)
               ORDER BY i.id"#,
        )
        .bind(key)
        .bind(now_millis())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(store_error)?;

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.try_get("kind").map_err(store_error)?;
            if kind != KIND_LIST {
                return Err(wrong_type(key));
            }
            let value: Option<String> = row.try_get("value").map_err(store_error)?;
            values.extend(value);
        }

        Ok(values)
    }
}
