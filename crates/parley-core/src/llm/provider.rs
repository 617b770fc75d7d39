//! ChatProvider trait definition.
//!
//! Implementations live in parley-infra (e.g., `OpenAiCompatibleProvider`).

use parley_types::error::ProviderError;
use parley_types::provider::{AskRequest, Answer};

/// A chat-completion backend.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Send the replayed conversation and return the answer with its cost signal.
    fn ask(
        &self,
        request: &AskRequest,
    ) -> impl std::future::Future<Output = Result<Answer, ProviderError>> + Send;
}
