//! JSON-lines platform adapter.
//!
//! Each reply is written as one [`OutboundMessage`] JSON object per line.
//! Writes are serialized through a mutex so concurrent handlers never
//! interleave partial lines.

use parley_core::message::ChatPlatform;
use parley_types::error::PlatformError;
use parley_types::event::OutboundMessage;
use parley_types::id::ConversationId;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

pub struct StdioPlatform<W> {
    out: Mutex<W>,
}

impl<W> StdioPlatform<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

fn send_error(err: std::io::Error) -> PlatformError {
    if err.kind() == std::io::ErrorKind::BrokenPipe {
        PlatformError::Closed
    } else {
        PlatformError::Send(err.to_string())
    }
}

impl<W> ChatPlatform for StdioPlatform<W>
where
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn send_message(
        &self,
        conversation: ConversationId,
        content: &str,
    ) -> Result<(), PlatformError> {
        let message = OutboundMessage {
            conversation_id: conversation,
            content: content.to_string(),
        };
        let mut line =
            serde_json::to_string(&message).map_err(|e| PlatformError::Send(e.to_string()))?;
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await.map_err(send_error)?;
        out.flush().await.map_err(send_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_one_json_line_per_message() {
        let platform = StdioPlatform::new(Vec::<u8>::new());
        platform.send_message(ConversationId(7), "hello").await.unwrap();
        platform.send_message(ConversationId(7), "multi\nline").await.unwrap();

        let written = String::from_utf8(platform.out.into_inner()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: OutboundMessage = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.conversation_id, ConversationId(7));
        assert_eq!(second.content, "multi\nline");
    }

    #[test]
    fn test_broken_pipe_maps_to_closed() {
        let err = send_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(matches!(err, PlatformError::Closed));

        let err = send_error(std::io::Error::other("disk full"));
        assert!(matches!(err, PlatformError::Send(ref m) if m == "disk full"));
    }
}
