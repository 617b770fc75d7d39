//! Graceful shutdown coordination.
//!
//! One coordinator is built at startup and handed to the event loop, the
//! signal listener and every handler. A shutdown trigger moves it from
//! `Running` to `Draining`; in-flight handlers call [`ShutdownCoordinator::signal_done`]
//! when they finish, and [`ShutdownCoordinator::wait_for_exit`] returns on the
//! first release or when the drain timeout runs out.
//!
//! The release gate is single-shot and shared: the first handler to finish
//! while draining lets the process exit, even if other handlers are still
//! running. The drain timeout is the backstop for everything else.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parley_types::config::CoordinationConfig;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time to wait for in-flight work after draining starts.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle phase of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Exiting,
}

/// What started the drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainTrigger {
    /// An OS signal, by name (`SIGTERM`, `SIGINT`, `SIGHUP`).
    Signal(String),
    /// A panic or other unrecoverable error.
    Fatal(String),
}

impl fmt::Display for DrainTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainTrigger::Signal(name) => write!(f, "signal {name}"),
            DrainTrigger::Fatal(message) => write!(f, "fatal error: {message}"),
        }
    }
}

/// How [`ShutdownCoordinator::wait_for_exit`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A handler released the gate.
    WorkCompleted,
    /// The drain timeout elapsed first.
    TimedOut,
}

#[derive(Debug, Clone)]
struct ShutdownState {
    phase: ShutdownPhase,
    trigger: Option<DrainTrigger>,
    draining_since: Option<Instant>,
    released: bool,
}

struct Inner {
    state: watch::Sender<ShutdownState>,
    drain_token: CancellationToken,
    drain_timeout: Duration,
}

/// Process-wide drain coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_TIMEOUT)
    }
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState {
            phase: ShutdownPhase::Running,
            trigger: None,
            draining_since: None,
            released: false,
        });
        Self {
            inner: Arc::new(Inner {
                state,
                drain_token: CancellationToken::new(),
                drain_timeout,
            }),
        }
    }

    pub fn from_config(config: &CoordinationConfig) -> Self {
        Self::new(config.drain_timeout())
    }

    pub fn drain_timeout(&self) -> Duration {
        self.inner.drain_timeout
    }

    /// Enter `Draining`. Only the first call has any effect and returns `true`.
    pub fn begin_drain(&self, trigger: DrainTrigger) -> bool {
        let started = self.inner.state.send_if_modified(|state| {
            if state.phase != ShutdownPhase::Running {
                return false;
            }
            state.phase = ShutdownPhase::Draining;
            state.trigger = Some(trigger.clone());
            state.draining_since = Some(Instant::now());
            true
        });

        if started {
            match &trigger {
                DrainTrigger::Signal(_) => info!(%trigger, timeout = ?self.inner.drain_timeout, "Draining"),
                DrainTrigger::Fatal(_) => warn!(%trigger, timeout = ?self.inner.drain_timeout, "Draining"),
            }
            self.inner.drain_token.cancel();
        } else {
            debug!(%trigger, "Drain already started, ignoring trigger");
        }
        started
    }

    /// Whether shutdown is imminent. New work should be skipped when true.
    pub fn is_draining(&self) -> bool {
        self.inner.state.borrow().phase != ShutdownPhase::Running
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.inner.state.borrow().phase
    }

    pub fn trigger(&self) -> Option<DrainTrigger> {
        self.inner.state.borrow().trigger.clone()
    }

    /// Token cancelled when draining starts.
    pub fn drain_token(&self) -> CancellationToken {
        self.inner.drain_token.clone()
    }

    /// Report that this unit of work is finished.
    ///
    /// Releases the gate when draining; a no-op while running or once the
    /// gate is already released.
    pub fn signal_done(&self) {
        let released = self.inner.state.send_if_modified(|state| {
            if state.phase != ShutdownPhase::Draining || state.released {
                return false;
            }
            state.released = true;
            true
        });
        if released {
            debug!("Drain gate released");
        }
    }

    /// Guard for one claimed unit of work; its drop is the work's
    /// `signal_done`, on every exit path.
    pub fn work_guard(&self) -> WorkGuard {
        WorkGuard {
            shutdown: self.clone(),
        }
    }

    /// Wait for the gate or the drain timeout, whichever comes first, then
    /// move to `Exiting`.
    ///
    /// The timeout counts from the moment draining began, not from this call.
    /// Called while still running, this first waits for a drain to start.
    pub async fn wait_for_exit(&self) -> DrainOutcome {
        let mut rx = self.inner.state.subscribe();

        let draining_since = match rx.wait_for(|s| s.draining_since.is_some()).await {
            Ok(state) => state.draining_since.unwrap_or_else(Instant::now),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => Instant::now(),
        };
        let deadline = draining_since + self.inner.drain_timeout;

        let outcome = match tokio::time::timeout_at(deadline, rx.wait_for(|s| s.released)).await {
            Ok(_) => DrainOutcome::WorkCompleted,
            Err(_) => DrainOutcome::TimedOut,
        };

        self.inner.state.send_modify(|state| state.phase = ShutdownPhase::Exiting);
        match outcome {
            DrainOutcome::WorkCompleted => {
                info!(waited = ?draining_since.elapsed(), "In-flight work finished, exiting");
            }
            DrainOutcome::TimedOut => {
                warn!(timeout = ?self.inner.drain_timeout, "Drain timeout elapsed, exiting");
            }
        }
        outcome
    }
}

/// Calls [`ShutdownCoordinator::signal_done`] when dropped, including while
/// unwinding from a panic.
#[must_use = "the gate is released when the guard is dropped"]
#[derive(Debug)]
pub struct WorkGuard {
    shutdown: ShutdownCoordinator,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.shutdown.signal_done();
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ShutdownCoordinator")
            .field("phase", &state.phase)
            .field("released", &state.released)
            .field("drain_timeout", &self.inner.drain_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sigterm() -> DrainTrigger {
        DrainTrigger::Signal("SIGTERM".to_string())
    }

    #[tokio::test]
    async fn test_starts_running() {
        let coordinator = ShutdownCoordinator::default();
        assert_eq!(coordinator.phase(), ShutdownPhase::Running);
        assert!(!coordinator.is_draining());
        assert!(!coordinator.drain_token().is_cancelled());
        assert!(coordinator.trigger().is_none());
    }

    #[tokio::test]
    async fn test_begin_drain_is_one_way_and_idempotent() {
        let coordinator = ShutdownCoordinator::default();

        assert!(coordinator.begin_drain(sigterm()));
        assert!(!coordinator.begin_drain(DrainTrigger::Fatal("boom".to_string())));

        assert!(coordinator.is_draining());
        assert_eq!(coordinator.phase(), ShutdownPhase::Draining);
        assert_eq!(coordinator.trigger(), Some(sigterm()));
        assert!(coordinator.drain_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_done_releases_before_timeout() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        coordinator.begin_drain(sigterm());

        let worker = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            worker.signal_done();
        });

        let start = Instant::now();
        let outcome = coordinator.wait_for_exit().await;

        assert_eq!(outcome, DrainOutcome::WorkCompleted);
        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(coordinator.phase(), ShutdownPhase::Exiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_exactly_drain_timeout_without_signal_done() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        coordinator.begin_drain(sigterm());

        let start = Instant::now();
        let outcome = coordinator.wait_for_exit().await;

        assert_eq!(outcome, DrainOutcome::TimedOut);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(30) && waited < Duration::from_millis(30_010));
        assert_eq!(coordinator.phase(), ShutdownPhase::Exiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_from_drain_start() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        coordinator.begin_drain(sigterm());
        tokio::time::advance(Duration::from_secs(20)).await;

        let start = Instant::now();
        let outcome = coordinator.wait_for_exit().await;

        assert_eq!(outcome, DrainOutcome::TimedOut);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_millis(10_010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_done_while_running_is_noop() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.signal_done();

        coordinator.begin_drain(sigterm());
        let outcome = coordinator.wait_for_exit().await;

        // The early call must not have pre-released the gate
        assert_eq!(outcome, DrainOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_done_before_wait_is_remembered() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        coordinator.begin_drain(DrainTrigger::Fatal("panic in handler".to_string()));
        coordinator.signal_done();
        coordinator.signal_done();

        let start = Instant::now();
        assert_eq!(coordinator.wait_for_exit().await, DrainOutcome::WorkCompleted);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_while_running_waits_for_drain() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.begin_drain(sigterm());
            trigger.signal_done();
        });

        assert_eq!(coordinator.wait_for_exit().await, DrainOutcome::WorkCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_guard_releases_on_panic() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));

        let worker = coordinator.clone();
        let task = tokio::spawn(async move {
            let _done = worker.work_guard();
            worker.begin_drain(DrainTrigger::Fatal("handler bug".to_string()));
            if worker.is_draining() {
                panic!("handler bug");
            }
        });
        assert!(task.await.unwrap_err().is_panic());

        let start = Instant::now();
        assert_eq!(coordinator.wait_for_exit().await, DrainOutcome::WorkCompleted);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(sigterm().to_string(), "signal SIGTERM");
        assert_eq!(DrainTrigger::Fatal("oops".to_string()).to_string(), "fatal error: oops");
    }
}
