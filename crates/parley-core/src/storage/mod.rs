//! Storage abstractions for Parley.
//!
//! Defines the shared key-value store trait the coordination layer is built on,
//! and a process-local implementation. The SQLite implementation lives in
//! parley-infra.

pub mod kv_store;
pub mod memory;

pub use kv_store::{KvStore, SetOptions};
pub use memory::MemoryKvStore;
