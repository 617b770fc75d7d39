//! Shutdown triggers: OS signals and panics.

use parley_core::shutdown::{DrainTrigger, ShutdownCoordinator};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Listen for termination signals for the life of the process.
///
/// The first signal starts the drain; later ones are logged and ignored.
pub fn spawn_signal_listener(shutdown: ShutdownCoordinator) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let (mut term, mut int, mut hup) = match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
                signal(SignalKind::hangup()),
            ) {
                (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
                (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => {
                    error!(error = %err, "Failed to install signal handlers");
                    return;
                }
            };

            loop {
                let name = tokio::select! {
                    _ = term.recv() => "SIGTERM",
                    _ = int.recv() => "SIGINT",
                    _ = hup.recv() => "SIGHUP",
                };
                debug!(signal = name, "Received signal");
                shutdown.begin_drain(DrainTrigger::Signal(name.to_string()));
            }
        }

        #[cfg(not(unix))]
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "Failed to listen for Ctrl+C");
                return;
            }
            shutdown.begin_drain(DrainTrigger::Signal("CTRL_C".to_string()));
        }
    })
}

/// Start a drain on any panic, then run the previously installed hook.
pub fn install_panic_hook(shutdown: ShutdownCoordinator) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        shutdown.begin_drain(DrainTrigger::Fatal(info.to_string()));
        previous(info);
    }));
}
