//! SQLite storage layer.
//!
//! The shared key-value store backed by SQLite with WAL mode and split
//! read/write connection pools. Several processes pointing at the same
//! database file coordinate through it.

pub mod kv;
pub mod pool;

pub use kv::SqliteKvStore;
pub use pool::{DatabasePool, default_database_url};
