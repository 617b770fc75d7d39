//! Per-event handling pipeline.
//!
//! `EventHandler::handle` takes one inbound event from claim to reply:
//! skip while draining, deduplicate with the claim guard, validate, answer
//! chat commands, otherwise run a conversation turn under the conversation's
//! lock, and finally send the reply in chunks. Every path that gets past the
//! draining check ends with `signal_done`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_types::config::{CoordinationConfig, GlobalConfig, HistoryConfig};
use parley_types::error::{CoordinationError, HandlerError};
use parley_types::event::InboundEvent;
use parley_types::history::{ContentPart, HistoryEntry, Role};
use parley_types::id::ConversationId;
use parley_types::provider::AskRequest;
use tracing::{debug, error, info, warn};

use super::chunk::{MAX_MESSAGE_CHARS, chunk_message};
use super::platform::ChatPlatform;
use crate::coordination::{DistributedMutex, LockGuard, RetryPolicy, TaskClaimGuard, retry};
use crate::history::{EvictionPolicy, HistoryCache};
use crate::llm::ChatProvider;
use crate::preferences::ModelPreferences;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::kv_store::KvStore;

pub const EMPTY_QUESTION_REPLY: &str = "Don't @ me unless you have a question.";
pub const UNSUPPORTED_ATTACHMENT_REPLY: &str =
    "Only PNG, JPEG, WEBP, and GIF images are supported at the moment.";
pub const RESET_REPLY: &str =
    "History reset. I no longer remember what we've said in this conversation.";
pub const GENERIC_FAILURE_REPLY: &str = "Something went wrong 😢 Please try again!";

/// Pause between consecutive chunks of one reply.
pub const CHUNK_PAUSE: Duration = Duration::from_millis(500);

/// Static inputs of the pipeline, resolved once at startup.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Reported by the `version` command.
    pub version: String,
    /// Reported by the `deployment` command.
    pub started_at: DateTime<Utc>,
    /// Prepended to a conversation's first turn. Empty disables it.
    pub system_prompt: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub max_message_chars: usize,
    pub chunk_pause: Duration,
    pub retry: RetryPolicy,
    pub coordination: CoordinationConfig,
    pub history: HistoryConfig,
}

impl HandlerSettings {
    pub fn from_config(config: &GlobalConfig, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            started_at: Utc::now(),
            system_prompt: config.provider.system_prompt.clone(),
            default_model: config.provider.default_model.clone(),
            max_tokens: config.provider.max_tokens,
            max_message_chars: MAX_MESSAGE_CHARS,
            chunk_pause: CHUNK_PAUSE,
            retry: RetryPolicy::from(&config.retry),
            coordination: config.coordination.clone(),
            history: config.history.clone(),
        }
    }
}

/// Why an event was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Draining had already started when the event arrived.
    ShuttingDown,
    /// Another delivery of the same event was claimed first.
    Duplicate,
    /// The claim could not be checked; processing would risk a double reply.
    ClaimFailed,
}

/// Result of [`EventHandler::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// A reply was produced; `chunks_sent` of `chunks` reached the platform.
    Replied { chunks: usize, chunks_sent: usize },
    Skipped(SkipReason),
}

/// Chat commands recognised in place of a question.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Version,
    Deployment,
    Reset,
    /// `model` alone reports; `model <name>` sets.
    Model(Option<&'a str>),
}

impl<'a> Command<'a> {
    fn parse(question: &'a str) -> Option<Self> {
        const MODEL_PREFIX: &str = "model ";

        if question.eq_ignore_ascii_case("version") {
            Some(Command::Version)
        } else if question.eq_ignore_ascii_case("deployment") {
            Some(Command::Deployment)
        } else if question.eq_ignore_ascii_case("reset") {
            Some(Command::Reset)
        } else if question.eq_ignore_ascii_case("model") {
            Some(Command::Model(None))
        } else if question
            .get(..MODEL_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MODEL_PREFIX))
        {
            let name = question[MODEL_PREFIX.len()..].trim();
            (!name.is_empty() && !name.contains(char::is_whitespace)).then_some(Command::Model(Some(name)))
        } else {
            None
        }
    }
}

/// Answers inbound events. Share one instance across tasks behind an `Arc`.
pub struct EventHandler<S: KvStore, P: ChatProvider, C: ChatPlatform> {
    claims: TaskClaimGuard<S>,
    mutex: DistributedMutex<S>,
    history: HistoryCache<S>,
    eviction: EvictionPolicy,
    preferences: ModelPreferences<S>,
    provider: Arc<P>,
    platform: Arc<C>,
    shutdown: ShutdownCoordinator,
    settings: HandlerSettings,
}

impl<S: KvStore, P: ChatProvider, C: ChatPlatform> EventHandler<S, P, C> {
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        platform: Arc<C>,
        shutdown: ShutdownCoordinator,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            claims: TaskClaimGuard::from_config(store.clone(), &settings.coordination),
            mutex: DistributedMutex::from_config(store.clone(), &settings.coordination),
            history: HistoryCache::new(store.clone(), settings.history.namespace.clone())
                .with_expiring_images(),
            eviction: EvictionPolicy::from_config(&settings.history),
            preferences: ModelPreferences::new(store),
            provider,
            platform,
            shutdown,
            settings,
        }
    }

    pub fn history(&self) -> &HistoryCache<S> {
        &self.history
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Handle one inbound event end to end. Never fails: errors become a
    /// generic reply and are logged.
    pub async fn handle(&self, event: &InboundEvent) -> HandleOutcome {
        if self.shutdown.is_draining() {
            info!(work_item_id = %event.id, "Shutdown imminent, skipping event");
            self.shutdown.signal_done();
            return HandleOutcome::Skipped(SkipReason::ShuttingDown);
        }

        match self.claims.try_claim(&event.id).await {
            Ok(true) => {}
            Ok(false) => {
                if self.shutdown.is_draining() {
                    self.shutdown.signal_done();
                }
                return HandleOutcome::Skipped(SkipReason::Duplicate);
            }
            Err(err) => {
                error!(work_item_id = %event.id, error = %err, "Failed to claim work item");
                if self.shutdown.is_draining() {
                    self.shutdown.signal_done();
                }
                return HandleOutcome::Skipped(SkipReason::ClaimFailed);
            }
        }
        let _done = self.shutdown.work_guard();

        info!(
            work_item_id = %event.id,
            conversation_id = %event.conversation_id,
            author = event.author.as_deref().unwrap_or("unknown"),
            attachments = event.attachments.len(),
            "Processing event"
        );

        let reply = match self.answer(event).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(
                    work_item_id = %event.id,
                    conversation_id = %event.conversation_id,
                    error = %err,
                    detail = ?err,
                    "Failed to answer event"
                );
                GENERIC_FAILURE_REPLY.to_string()
            }
        };

        self.respond(event.conversation_id, &reply).await
    }

    async fn answer(&self, event: &InboundEvent) -> Result<String, HandlerError> {
        let question = event.question();

        if question.is_empty() {
            return Ok(EMPTY_QUESTION_REPLY.to_string());
        }
        if event.attachments.iter().any(|a| !a.is_supported_image()) {
            return Ok(UNSUPPORTED_ATTACHMENT_REPLY.to_string());
        }

        let conversation = event.conversation_id;
        match Command::parse(question) {
            Some(Command::Version) => Ok(self.settings.version.clone()),
            Some(Command::Deployment) => Ok(self.settings.started_at.to_rfc3339()),
            Some(Command::Model(None)) => Ok(self
                .preferences
                .resolve(conversation, event.parent_id, &self.settings.default_model)
                .await?),
            Some(Command::Model(Some(name))) => {
                self.preferences.set(conversation, name).await?;
                Ok(format!("This conversation is now using {name}"))
            }
            Some(Command::Reset) => {
                let history = &self.history;
                self.mutex
                    .with_lock(conversation, || async move {
                        history.reset(conversation).await.map_err(HandlerError::from)
                    })
                    .await?;
                info!(conversation_id = %conversation, "History reset on request");
                Ok(RESET_REPLY.to_string())
            }
            None => self.converse(event).await,
        }
    }

    /// One conversation turn, serialized per conversation.
    async fn converse(&self, event: &InboundEvent) -> Result<String, HandlerError> {
        let model = self
            .preferences
            .resolve(event.conversation_id, event.parent_id, &self.settings.default_model)
            .await?;

        let guard = self.mutex.acquire(event.conversation_id).await?;
        let result = self.converse_locked(&guard, event, model).await;
        guard.release_logged().await;
        result
    }

    async fn converse_locked(
        &self,
        guard: &LockGuard<S>,
        event: &InboundEvent,
        model: String,
    ) -> Result<String, HandlerError> {
        let conversation = event.conversation_id;
        let history = self.history.get_history(conversation).await?;

        let mut turn = Vec::with_capacity(3);
        if history.is_empty() && !self.settings.system_prompt.is_empty() {
            turn.push(HistoryEntry::system(self.settings.system_prompt.clone()));
        }
        turn.push(user_entry(event));

        let request = AskRequest {
            model,
            messages: history.iter().chain(turn.iter()).cloned().collect(),
            max_tokens: self.settings.max_tokens,
        };
        debug!(
            conversation_id = %conversation,
            provider = self.provider.name(),
            model = %request.model,
            replayed = history.len(),
            "Querying provider"
        );

        let answer = self.provider.ask(&request).await?;

        match guard.ensure_held().await {
            Ok(()) => {}
            Err(CoordinationError::LockLost { resource }) => {
                warn!(conversation_id = %conversation, %resource, "Lock lost during provider call, not recording turn");
                return Ok(answer.text);
            }
            Err(err) => return Err(err.into()),
        }

        turn.push(HistoryEntry::assistant(answer.text.clone()));
        let outcome = self
            .eviction
            .apply(&self.history, conversation, answer.cost, &turn)
            .await?;
        debug!(conversation_id = %conversation, cost = ?answer.cost, ?outcome, "Turn recorded");

        Ok(answer.text)
    }

    /// Send `reply` in chunks. Failures are logged; remaining chunks are dropped.
    async fn respond(&self, conversation: ConversationId, reply: &str) -> HandleOutcome {
        let chunks = chunk_message(reply, self.settings.max_message_chars);
        let platform = &self.platform;
        let mut chunks_sent = 0;

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.chunk_pause).await;
            }

            let sent = retry(self.settings.retry, move || platform.send_message(conversation, chunk)).await;

            match sent {
                Ok(()) => chunks_sent += 1,
                Err(err) => {
                    error!(
                        conversation_id = %conversation,
                        chunk = i,
                        chunks = chunks.len(),
                        error = %err,
                        "Failed sending reply"
                    );
                    break;
                }
            }
        }

        HandleOutcome::Replied {
            chunks: chunks.len(),
            chunks_sent,
        }
    }
}

/// The question as a user entry, with image attachments ahead of the text.
fn user_entry(event: &InboundEvent) -> HistoryEntry {
    let mut content: Vec<ContentPart> = event
        .attachments
        .iter()
        .filter_map(|attachment| {
            attachment.content_type.as_ref().map(|media_type| ContentPart::Image {
                url: attachment.url.clone(),
                media_type: media_type.clone(),
            })
        })
        .collect();
    content.push(ContentPart::text(event.question()));

    HistoryEntry {
        role: Role::User,
        content,
    }
}
