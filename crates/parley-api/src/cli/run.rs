//! `parley run`: answer chat events until input ends or a drain completes.

use std::sync::Arc;

use anyhow::Context;
use parley_core::message::{EventHandler, HandlerSettings};
use parley_core::shutdown::ShutdownCoordinator;
use parley_core::storage::{KvStore, MemoryKvStore};
use parley_infra::config::{API_KEY_ENV, api_key_from_env};
use parley_infra::llm::OpenAiCompatibleProvider;
use parley_types::config::StoreBackend;
use tokio::io::BufReader;
use tracing::{info, warn};

use super::StoreArg;
use crate::event_loop::{ServeEnd, serve_events};
use crate::platform::StdioPlatform;
use crate::signals;
use crate::state::AppState;

pub async fn run(state: &AppState, store: Option<StoreArg>) -> anyhow::Result<ServeEnd> {
    let backend = store.map(StoreBackend::from).unwrap_or(state.config.store.backend);
    match backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; locks and history are local to this process");
            serve(state, Arc::new(MemoryKvStore::new())).await
        }
        StoreBackend::Sqlite => serve(state, state.open_sqlite().await?).await,
    }
}

async fn serve<S: KvStore>(state: &AppState, store: Arc<S>) -> anyhow::Result<ServeEnd> {
    let api_key = api_key_from_env().with_context(|| format!("{API_KEY_ENV} is not set"))?;
    let provider = Arc::new(OpenAiCompatibleProvider::from_config(
        &api_key,
        &state.config.provider,
    ));
    let platform = Arc::new(StdioPlatform::new(tokio::io::stdout()));

    let shutdown = ShutdownCoordinator::from_config(&state.config.coordination);
    signals::spawn_signal_listener(shutdown.clone());
    signals::install_panic_hook(shutdown.clone());

    let settings = HandlerSettings::from_config(&state.config, env!("CARGO_PKG_VERSION"));
    let handler = Arc::new(EventHandler::new(
        store,
        provider,
        platform,
        shutdown.clone(),
        settings,
    ));

    info!(
        model = %state.config.provider.default_model,
        namespace = %state.config.history.namespace,
        "Ready, reading events from stdin"
    );

    let input = BufReader::new(tokio::io::stdin());
    let end = serve_events(handler, &shutdown, input).await;
    match end {
        ServeEnd::InputClosed => info!("Input closed, all events handled"),
        ServeEnd::Drained(outcome) => info!(?outcome, "Shutdown complete"),
    }
    Ok(end)
}
