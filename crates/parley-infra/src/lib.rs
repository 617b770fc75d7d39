//! Infrastructure layer for Parley.
//!
//! Contains implementations of the ports defined in `parley-core`: the SQLite
//! key-value store, the OpenAI-compatible chat provider, and the data
//! directory / `config.toml` loader.

pub mod config;
pub mod llm;
pub mod sqlite;
