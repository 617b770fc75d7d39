//! `parley history` subcommands.
//!
//! Operates on the SQLite store, the only backend shared across processes.

use std::sync::Arc;

use console::style;
use parley_core::coordination::DistributedMutex;
use parley_core::history::HistoryCache;
use parley_core::storage::KvStore;
use parley_types::history::{HistoryEntry, Role};
use parley_types::id::ConversationId;

use super::HistoryCommand;
use crate::state::AppState;

pub async fn handle_history_command(
    cmd: HistoryCommand,
    state: &AppState,
    json: bool,
) -> anyhow::Result<()> {
    let store = state.open_sqlite().await?;
    let cache = state.history_cache(Arc::clone(&store));

    match cmd {
        HistoryCommand::Show { conversation } => {
            show(&cache, ConversationId(conversation), json).await
        }
        HistoryCommand::Reset { conversation } => {
            let mutex = DistributedMutex::from_config(store, &state.config.coordination);
            reset(&mutex, &cache, ConversationId(conversation), json).await
        }
        HistoryCommand::Trim {
            conversation,
            window,
        } => {
            let mutex = DistributedMutex::from_config(store, &state.config.coordination);
            let window = window.unwrap_or(state.config.history.replay_window);
            trim(&mutex, &cache, ConversationId(conversation), window, json).await
        }
    }
}

async fn show<S: KvStore>(
    cache: &HistoryCache<S>,
    conversation: ConversationId,
    json: bool,
) -> anyhow::Result<()> {
    let entries = cache.get_stored(conversation).await?;

    if json {
        let output = serde_json::json!({
            "conversation_id": conversation,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!("  No history for conversation {}.", style(conversation).cyan());
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  Conversation {} ({} entries)",
        style(conversation).cyan().bold(),
        entries.len()
    );
    println!();
    for entry in &entries {
        println!("  {}  {}", styled_role(entry), describe(entry));
    }
    println!();
    Ok(())
}

async fn reset<S: KvStore>(
    mutex: &DistributedMutex<S>,
    cache: &HistoryCache<S>,
    conversation: ConversationId,
    json: bool,
) -> anyhow::Result<()> {
    mutex
        .with_lock(conversation, || async {
            cache.reset(conversation).await.map_err(anyhow::Error::from)
        })
        .await?;

    if json {
        let output = serde_json::json!({ "conversation_id": conversation, "reset": true });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        println!(
            "  {} History reset for conversation {}.",
            style("ok").green().bold(),
            style(conversation).cyan()
        );
        println!();
    }
    Ok(())
}

async fn trim<S: KvStore>(
    mutex: &DistributedMutex<S>,
    cache: &HistoryCache<S>,
    conversation: ConversationId,
    window: usize,
    json: bool,
) -> anyhow::Result<()> {
    let (before, after) = mutex
        .with_lock(conversation, || async {
            let entries = cache.get_stored(conversation).await?;
            let before = entries.len();
            cache.replace(conversation, entries, window).await?;
            let after = cache.get_stored(conversation).await?.len();
            Ok::<_, anyhow::Error>((before, after))
        })
        .await?;

    if json {
        let output = serde_json::json!({
            "conversation_id": conversation,
            "before": before,
            "after": after,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        println!(
            "  {} Conversation {} trimmed from {before} to {after} entries.",
            style("ok").green().bold(),
            style(conversation).cyan()
        );
        println!();
    }
    Ok(())
}

fn styled_role(entry: &HistoryEntry) -> console::StyledObject<String> {
    let label = format!("{:<9}", entry.role.to_string());
    match entry.role {
        Role::System => style(label).dim(),
        Role::User => style(label).yellow(),
        Role::Assistant => style(label).green(),
    }
}

/// Text content, with a count of any attached images.
fn describe(entry: &HistoryEntry) -> String {
    let images = entry.content.iter().filter(|part| part.is_image()).count();
    let text = entry.text_content();
    match images {
        0 => text,
        1 => format!("{text} [1 image]"),
        n => format!("{text} [{n} images]"),
    }
}
