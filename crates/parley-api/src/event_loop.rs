//! Reads inbound events and fans them out to handler tasks.

use std::sync::Arc;

use parley_core::llm::ChatProvider;
use parley_core::message::{ChatPlatform, EventHandler, HandleOutcome};
use parley_core::shutdown::{DrainOutcome, DrainTrigger, ShutdownCoordinator};
use parley_core::storage::KvStore;
use parley_types::event::InboundEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Why the event loop stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
    /// Input reached EOF; every spawned handler has finished.
    InputClosed,
    /// A drain started; in-flight handlers keep running detached.
    Draining,
}

/// How [`serve_events`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeEnd {
    InputClosed,
    /// Drained after a shutdown trigger. Stdin may still be blocked in a
    /// reader thread, so the caller must exit the process rather than wait
    /// for the runtime to wind down.
    Drained(DrainOutcome),
}

/// Run the event loop, then wait out the drain if one started.
pub async fn serve_events<S, P, C, R>(
    handler: Arc<EventHandler<S, P, C>>,
    shutdown: &ShutdownCoordinator,
    input: R,
) -> ServeEnd
where
    S: KvStore,
    P: ChatProvider + 'static,
    C: ChatPlatform + 'static,
    R: AsyncBufRead + Unpin,
{
    match run_event_loop(handler, shutdown, input).await {
        LoopEnd::InputClosed => ServeEnd::InputClosed,
        LoopEnd::Draining => ServeEnd::Drained(shutdown.wait_for_exit().await),
    }
}

/// Read one JSON [`InboundEvent`] per line and handle each on its own task.
///
/// Blank lines are ignored and malformed lines are logged and skipped.
/// Stops reading as soon as `shutdown` starts draining. A read error is fatal:
/// it starts a drain and ends the loop like any other trigger.
pub async fn run_event_loop<S, P, C, R>(
    handler: Arc<EventHandler<S, P, C>>,
    shutdown: &ShutdownCoordinator,
    input: R,
) -> LoopEnd
where
    S: KvStore,
    P: ChatProvider + 'static,
    C: ChatPlatform + 'static,
    R: AsyncBufRead + Unpin,
{
    let drain = shutdown.drain_token();
    let mut lines = input.lines();
    let mut tasks = JoinSet::new();

    let end = loop {
        let line = tokio::select! {
            biased;
            _ = drain.cancelled() => break LoopEnd::Draining,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break LoopEnd::InputClosed,
            Err(err) => {
                error!(error = %err, "Failed to read event input");
                shutdown.begin_drain(DrainTrigger::Fatal(format!("event input failed: {err}")));
                break LoopEnd::Draining;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<InboundEvent>(&line) {
            Ok(event) => {
                let handler = Arc::clone(&handler);
                let span = info_span!(
                    "event",
                    work_item_id = %event.id,
                    conversation_id = %event.conversation_id,
                );
                tasks.spawn(async move { handler.handle(&event).await }.instrument(span));
            }
            Err(err) => warn!(error = %err, "Skipping malformed event line"),
        }

        while let Some(result) = tasks.try_join_next() {
            log_task_result(result);
        }
    };

    match end {
        LoopEnd::InputClosed => {
            debug!(in_flight = tasks.len(), "Input closed, waiting for handlers");
            while let Some(result) = tasks.join_next().await {
                log_task_result(result);
            }
        }
        LoopEnd::Draining => {
            info!(in_flight = tasks.len(), "Draining, no longer reading events");
            // Dropping a JoinSet aborts its tasks; in-flight turns must finish.
            tasks.detach_all();
        }
    }
    end
}

fn log_task_result(result: Result<HandleOutcome, JoinError>) {
    match result {
        Ok(outcome) => debug!(?outcome, "Event handled"),
        Err(err) if err.is_panic() => error!("Event handler panicked"),
        Err(err) => warn!(error = %err, "Event handler task ended abnormally"),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use parley_core::message::HandlerSettings;
    use parley_core::storage::MemoryKvStore;
    use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};
    use parley_types::config::GlobalConfig;
    use parley_types::error::{PlatformError, ProviderError};
    use parley_types::id::ConversationId;
    use parley_types::provider::{Answer, AskRequest};

    use super::*;

    #[derive(Default)]
    struct EchoProvider {
        delay: Duration,
    }

    impl ChatProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn ask(&self, request: &AskRequest) -> Result<Answer, ProviderError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let question = request
                .messages
                .last()
                .map(|entry| entry.text_content())
                .unwrap_or_default();
            Ok(Answer::new(format!("echo: {question}"), Some(10)))
        }
    }

    #[derive(Default)]
    struct RecordingPlatform {
        sent: Mutex<Vec<(ConversationId, String)>>,
    }

    impl RecordingPlatform {
        fn sent(&self) -> Vec<(ConversationId, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ChatPlatform for RecordingPlatform {
        async fn send_message(
            &self,
            conversation: ConversationId,
            content: &str,
        ) -> Result<(), PlatformError> {
            self.sent.lock().unwrap().push((conversation, content.to_string()));
            Ok(())
        }
    }

    /// Reader that yields once, then fails every read.
    #[derive(Default)]
    struct FailingReader {
        yielded: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if !self.yielded {
                self.yielded = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            Poll::Ready(Err(io::Error::other("device gone")))
        }
    }

    fn handler(
        shutdown: &ShutdownCoordinator,
    ) -> (
        Arc<EventHandler<MemoryKvStore, EchoProvider, RecordingPlatform>>,
        Arc<RecordingPlatform>,
    ) {
        handler_with(shutdown, EchoProvider::default())
    }

    fn handler_with(
        shutdown: &ShutdownCoordinator,
        provider: EchoProvider,
    ) -> (
        Arc<EventHandler<MemoryKvStore, EchoProvider, RecordingPlatform>>,
        Arc<RecordingPlatform>,
    ) {
        let platform = Arc::new(RecordingPlatform::default());
        let mut settings = HandlerSettings::from_config(&GlobalConfig::default(), "0.1.0");
        settings.chunk_pause = Duration::ZERO;
        let handler = EventHandler::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(provider),
            Arc::clone(&platform),
            shutdown.clone(),
            settings,
        );
        (Arc::new(handler), platform)
    }

    #[tokio::test]
    async fn test_handles_every_event_until_eof() {
        let shutdown = ShutdownCoordinator::default();
        let (handler, platform) = handler(&shutdown);
        let input = concat!(
            r#"{"id":"m1","conversation_id":1,"content":"first"}"#,
            "\n\n",
            "not json\n",
            r#"{"id":"m2","conversation_id":2,"content":"second"}"#,
            "\n",
        );

        let end = run_event_loop(handler, &shutdown, input.as_bytes()).await;

        assert_eq!(end, LoopEnd::InputClosed);
        let mut sent = platform.sent();
        sent.sort();
        assert_eq!(
            sent,
            vec![
                (ConversationId(1), "echo: first".to_string()),
                (ConversationId(2), "echo: second".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_redelivered_event_is_answered_once() {
        let shutdown = ShutdownCoordinator::default();
        let (handler, platform) = handler(&shutdown);
        let line = r#"{"id":"dup","conversation_id":5,"content":"hello"}"#;
        let input = format!("{line}\n{line}\n{line}\n");

        run_event_loop(handler, &shutdown, input.as_bytes()).await;

        assert_eq!(platform.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_stops_reading_once_draining() {
        let shutdown = ShutdownCoordinator::default();
        let (handler, platform) = handler(&shutdown);
        shutdown.begin_drain(DrainTrigger::Signal("SIGTERM".to_string()));
        let input = r#"{"id":"m1","conversation_id":1,"content":"too late"}"#;

        let end = run_event_loop(handler, &shutdown, input.as_bytes()).await;

        assert_eq!(end, LoopEnd::Draining);
        assert!(platform.sent().is_empty());
    }

    #[tokio::test]
    async fn test_history_persists_across_events_in_one_conversation() {
        let shutdown = ShutdownCoordinator::default();
        let (handler, _platform) = handler(&shutdown);

        let first = r#"{"id":"a","conversation_id":9,"content":"one"}"#;
        run_event_loop(Arc::clone(&handler), &shutdown, first.as_bytes()).await;
        let second = r#"{"id":"b","conversation_id":9,"content":"two"}"#;
        run_event_loop(Arc::clone(&handler), &shutdown, second.as_bytes()).await;

        let history = handler.history().get_history(ConversationId(9)).await.unwrap();
        // system prompt + two user/assistant turns
        assert_eq!(history.len(), 5);
        assert_eq!(history[4].text_content(), "echo: two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_drains_without_aborting_in_flight_turns() {
        let shutdown = ShutdownCoordinator::default();
        let provider = EchoProvider {
            delay: Duration::from_secs(5),
        };
        let (handler, platform) = handler_with(&shutdown, provider);
        let line = concat!(r#"{"id":"m1","conversation_id":1,"content":"slow"}"#, "\n");
        let input = BufReader::new(line.as_bytes().chain(FailingReader::default()));

        let end = run_event_loop(handler, &shutdown, input).await;

        assert_eq!(end, LoopEnd::Draining);
        assert!(matches!(shutdown.trigger(), Some(DrainTrigger::Fatal(_))));
        assert_eq!(shutdown.wait_for_exit().await, DrainOutcome::WorkCompleted);
        assert_eq!(platform.sent(), vec![(ConversationId(1), "echo: slow".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_returns_after_drain_while_input_stays_open() {
        let shutdown = ShutdownCoordinator::new(Duration::from_secs(5));
        let (handler, _platform) = handler(&shutdown);
        // Writer half kept alive: input never reaches EOF.
        let (reader, _writer) = tokio::io::duplex(64);

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.begin_drain(DrainTrigger::Signal("SIGTERM".to_string()));
        });

        let start = tokio::time::Instant::now();
        let end = serve_events(handler, &shutdown, BufReader::new(reader)).await;

        assert_eq!(end, ServeEnd::Drained(DrainOutcome::TimedOut));
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_serve_reports_input_closed() {
        let shutdown = ShutdownCoordinator::default();
        let (handler, platform) = handler(&shutdown);
        let input = r#"{"id":"m1","conversation_id":1,"content":"hi"}"#;

        let end = serve_events(handler, &shutdown, input.as_bytes()).await;

        assert_eq!(end, ServeEnd::InputClosed);
        assert_eq!(platform.sent().len(), 1);
    }
}
