//! ChatPlatform trait definition.

use parley_types::error::PlatformError;
use parley_types::id::ConversationId;

/// Outbound side of the chat platform.
///
/// Sends must be safe to repeat: the handler retries failed chunks.
pub trait ChatPlatform: Send + Sync {
    /// Post `content` to `conversation`. `content` already fits the platform's size limit.
    fn send_message(
        &self,
        conversation: ConversationId,
        content: &str,
    ) -> impl std::future::Future<Output = Result<(), PlatformError>> + Send;
}
