//! Shared domain types for Parley.
//!
//! Conversation and work-item identifiers, history entries, inbound events,
//! provider request/answer shapes, configuration, and the error enums used
//! across the workspace.
//!
//! Zero infrastructure dependencies -- only serde and thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod id;
pub mod provider;
