//! Coordination primitives built on the shared key-value store.
//!
//! - `mutex` -- per-resource distributed lock with a polled acquire loop
//! - `claim` -- one-shot idempotency check per inbound work item
//! - `retry` -- bounded-attempt wrapper for idempotent operations

pub mod claim;
pub mod mutex;
pub mod retry;

pub use claim::TaskClaimGuard;
pub use mutex::{DistributedMutex, LockGuard};
pub use retry::{RetryPolicy, retry};
