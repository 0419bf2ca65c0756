//! Graceful shutdown signaling.
//!
//! One [`Shutdown`] handle is cloned into everything that must react when
//! the process is asked to stop: the HTTP listener stops accepting joins
//! and `/health` flips to 503 immediately, then the registry drains its
//! live sessions so each one persists a final snapshot before memory is
//! released. Draining is bounded by the grace window; whatever has not
//! finished by then is aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// How long session draining may take before the process force-exits.
const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// Cloneable shutdown signal backed by a single watch channel.
///
/// The watch value is the whole state: `false` while serving, `true` once
/// shutdown begins. Late subscribers observe the current value, so a task
/// that starts waiting after the trigger resolves immediately.
#[derive(Clone)]
pub struct Shutdown {
    state: Arc<watch::Sender<bool>>,
    grace: Duration,
}

impl Shutdown {
    /// Create a shutdown handle with the default grace window.
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    /// Create a shutdown handle with a custom grace window.
    pub fn with_grace(grace: Duration) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
            grace,
        }
    }

    /// Begin shutdown. Idempotent; only the first call logs.
    pub fn trigger(&self) {
        let was_down = self.state.send_replace(true);
        if !was_down {
            info!("Shutdown requested, draining sessions");
        }
    }

    /// True once shutdown has begun. New joins are refused from here on.
    pub fn in_progress(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once shutdown begins; immediately if it already has.
    pub async fn triggered(&self) {
        let mut rx = self.state.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Drain window granted to live sessions after the trigger.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Trigger on the first SIGTERM or SIGINT.
    #[cfg(unix)]
    pub async fn on_signal(self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        self.trigger();
    }

    /// Trigger on Ctrl+C (non-Unix platforms).
    #[cfg(not(unix))]
    pub async fn on_signal(self) {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C");
        self.trigger();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_flips_state_idempotently() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.in_progress());

        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.in_progress());
    }

    #[tokio::test]
    async fn test_triggered_resolves_immediately_after_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        tokio::time::timeout(Duration::from_millis(100), shutdown.triggered())
            .await
            .expect("late subscriber must resolve immediately");
    }

    #[tokio::test]
    async fn test_triggered_wakes_waiting_tasks() {
        let shutdown = Shutdown::with_grace(Duration::from_secs(1));
        assert_eq!(shutdown.grace(), Duration::from_secs(1));

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.triggered().await })
        };
        shutdown.trigger();

        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter must wake on trigger")
            .unwrap();
    }
}
