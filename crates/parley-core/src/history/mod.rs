//! Per-conversation message history with caller-driven eviction.
//!
//! - `cache` -- append/read/reset of the stored entry list
//! - `eviction` -- all-or-nothing reset when a turn's token cost is too high

pub mod cache;
pub mod eviction;

pub use cache::{HistoryCache, trim_to_window};
pub use eviction::{EvictionPolicy, TurnOutcome};
