//! Ordered, cooperative shutdown
//!
//! State machine: `Running -> Draining -> Stopped`.
//!
//! - `Running -> Draining` on the first termination signal or when the vote
//!   source is exhausted. Later requests (a second Ctrl-C) are ignored.
//! - While `Draining` each runtime winds its tasks down in order; there is no
//!   deadline, tasks finish the work they already accepted.
//! - `Draining -> Stopped` once the runtime has joined everything.
//!
//! The state is published on a `tokio::sync::watch` channel so any task can
//! await the transition.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT, SIGTERM or SIGHUP
    Signal,
    /// The vote source has no more votes
    SourceExhausted,
    /// Requested programmatically (tests, embedding)
    Requested,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Signal => write!(f, "termination signal"),
            ShutdownReason::SourceExhausted => write!(f, "vote source exhausted"),
            ShutdownReason::Requested => write!(f, "shutdown requested"),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    state_tx: Arc<watch::Sender<ShutdownState>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.state_tx.subscribe(),
        }
    }

    /// Move `Running -> Draining`
    ///
    /// Returns true for the request that started the drain, false for every
    /// later one.
    pub fn begin_drain(&self, reason: ShutdownReason) -> bool {
        let started = self.state_tx.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        });

        if started {
            log::info!("⚠️  Shutdown: draining ({})", reason);
        } else {
            log::debug!("Shutdown already in progress, ignoring {}", reason);
        }
        started
    }

    /// Move to `Stopped`; terminal
    pub fn finish(&self) {
        let previous = self.state_tx.send_replace(ShutdownState::Stopped);
        if previous != ShutdownState::Stopped {
            log::info!("✅ Shutdown: stopped");
        }
    }

    /// Listen for termination signals for the lifetime of the process
    ///
    /// The first signal starts the drain; duplicates are absorbed here so
    /// they never reach the default handler and kill the process mid-drain.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                match wait_for_shutdown_signal().await {
                    Ok(()) => {
                        coordinator.begin_drain(ShutdownReason::Signal);
                    }
                    Err(e) => {
                        log::error!("❌ Failed to listen for termination signals: {}", e);
                        return;
                    }
                }
            }
        })
    }
}

/// Read side of the coordinator, one per task
#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<ShutdownState>,
}

impl ShutdownListener {
    pub fn is_running(&self) -> bool {
        *self.rx.borrow() == ShutdownState::Running
    }

    /// Resolves once the drain has started (or the coordinator is gone)
    pub async fn draining(&mut self) {
        let _ = self
            .rx
            .wait_for(|state| *state != ShutdownState::Running)
            .await;
    }

    /// Resolves once shutdown is complete (or the coordinator is gone)
    pub async fn stopped(&mut self) {
        let _ = self
            .rx
            .wait_for(|state| *state == ShutdownState::Stopped)
            .await;
    }
}

/// Waits for a termination signal.
///
/// Unix: SIGINT, SIGTERM, SIGHUP. Elsewhere: Ctrl-C.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sighup.recv()  => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
