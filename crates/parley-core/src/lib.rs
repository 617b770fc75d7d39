//! Coordination layer and port trait definitions for Parley.
//!
//! This crate defines the "ports" (store, provider, platform traits) that the
//! infrastructure layer implements, plus everything built on them: the
//! distributed mutex, task claim guard, conversation history cache, shutdown
//! coordinator, retry helper, and the per-event handler. It depends only on
//! `parley-types` -- never on `parley-infra` or any database/IO crate.

pub mod coordination;
pub mod history;
pub mod llm;
pub mod message;
pub mod preferences;
pub mod shutdown;
pub mod storage;
