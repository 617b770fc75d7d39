//! Global configuration types for Parley.
//!
//! `GlobalConfig` represents the top-level `config.toml`. Every section and
//! field has a default, so an empty file (or no file) is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration, loaded from `{data_dir}/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Version string reported by the `version` chat command.
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub coordination: CoordinationConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub provider: ProviderConfig,
}

fn default_version() -> String {
    "parley.v1".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            store: StoreConfig::default(),
            coordination: CoordinationConfig::default(),
            history: HistoryConfig::default(),
            retry: RetryConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Reject values the coordination layer cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordination.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Which key-value store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared SQLite database file; usable by several processes on one host.
    #[default]
    Sqlite,
    /// Process-local map; coordination only spans tasks of one process.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Explicit database URL; defaults to `{data_dir}/parley.db`.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Timing knobs for the mutex, claim guard, and shutdown drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,

    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_lock_ttl_secs() -> u64 {
    10
}

fn default_lock_poll_interval_ms() -> u64 {
    500
}

fn default_claim_ttl_secs() -> u64 {
    30
}

fn default_drain_timeout_secs() -> u64 {
    30
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            claim_ttl_secs: default_claim_ttl_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl CoordinationConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("coordination.lock_ttl_secs", self.lock_ttl_secs),
            ("coordination.lock_poll_interval_ms", self.lock_poll_interval_ms),
            ("coordination.claim_ttl_secs", self.claim_ttl_secs),
            ("coordination.drain_timeout_secs", self.drain_timeout_secs),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.lock_ttl() <= self.lock_poll_interval() {
            return Err(ConfigError::Invalid {
                field: "coordination.lock_ttl_secs",
                reason: format!(
                    "lock TTL ({}s) must exceed the poll interval ({}ms)",
                    self.lock_ttl_secs, self.lock_poll_interval_ms
                ),
            });
        }
        Ok(())
    }
}

/// History cache and eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Key namespace, so different providers keep separate histories.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// A turn costing more tokens than this resets the conversation history.
    #[serde(default = "default_eviction_token_threshold")]
    pub eviction_token_threshold: u32,

    /// Maximum entries kept when a provider rewrites the whole history.
    #[serde(default = "default_replay_window")]
    pub replay_window: usize,
}

fn default_namespace() -> String {
    "openai".to_string()
}

fn default_eviction_token_threshold() -> u32 {
    3500
}

fn default_replay_window() -> usize {
    25
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            eviction_token_threshold: default_eviction_token_threshold(),
            replay_window: default_replay_window(),
        }
    }
}

/// Retry settings for idempotent outbound sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// OpenAI-compatible provider settings. The API key is read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_system_prompt() -> String {
    "You are an assistant in a chat channel. Answer as concisely as possible, but match \
     the tone and language of the person talking to you. Don't overdo it. Skip emojis and \
     excessive slang."
        .to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}
