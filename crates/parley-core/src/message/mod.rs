//! Chat-platform side of the bot.
//!
//! - `platform` -- `ChatPlatform` port for sending replies
//! - `chunk` -- splitting long replies into platform-sized messages
//! - `handler` -- `EventHandler`, the per-event pipeline (claim, validate, commands, ask, respond)

pub mod chunk;
pub mod handler;
pub mod platform;

pub use chunk::{MAX_MESSAGE_CHARS, chunk_message};
pub use handler::{EventHandler, HandleOutcome, HandlerSettings, SkipReason};
pub use platform::ChatPlatform;
