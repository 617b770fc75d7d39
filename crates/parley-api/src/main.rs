//! Parley CLI entry point.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, sets up tracing, loads configuration, then dispatches
//! to the command handler. `parley run` is the long-running bot process.

mod cli;
mod event_loop;
mod platform;
mod signals;
mod state;

use clap::Parser;
use clap_complete::generate;
use parley_observe::{LogFormat, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use event_loop::ServeEnd;
use state::AppState;

/// How the process ends once a command returns.
enum Finish {
    Normal,
    /// Exit immediately. After a drain the stdin reader thread may still be
    /// blocked, and dropping the runtime would wait on it until the next line
    /// or EOF.
    Exit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "parley", &mut std::io::stdout());
        return Ok(());
    }

    init_logging(&cli)?;

    let result = dispatch(cli).await;
    shutdown_tracing();

    match result? {
        Finish::Exit => std::process::exit(0),
        Finish::Normal => Ok(()),
    }
}

/// Set up tracing based on verbosity and `--json`.
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format, cli.otel, filter).map_err(|e| anyhow::anyhow!(e))
}

async fn dispatch(cli: Cli) -> anyhow::Result<Finish> {
    let state = AppState::init().await?;

    match cli.command {
        Commands::Run { store } => match cli::run::run(&state, store).await? {
            ServeEnd::Drained(_) => Ok(Finish::Exit),
            ServeEnd::InputClosed => Ok(Finish::Normal),
        },
        Commands::History { command } => {
            cli::history::handle_history_command(command, &state, cli.json).await?;
            Ok(Finish::Normal)
        }
        Commands::Completions { .. } => Ok(Finish::Normal),
    }
}
