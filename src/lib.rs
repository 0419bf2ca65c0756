//! Scribe - a real-time collaborative text editing server.
//!
//! Scribe accepts streams of character-level edits from many concurrent
//! clients per document, reconciles them with operational transformation,
//! and broadcasts the reconciled edits so every client converges on the
//! same text without locking or a central clock.
//!
//! # Features
//!
//! - **Operational Transformation**: pure transform algebra with
//!   deterministic tie-breaking and TP1 convergence.
//! - **Vector-Clock Causality**: sparse per-client clocks decide whether
//!   edits are ordered or concurrent.
//! - **Session Actors**: one single-writer task per document; no locks on
//!   the hot path, FIFO admission, bounded fan-out queues.
//! - **Bounded History**: configurable operation history with
//!   acknowledgement-driven eviction and automatic client resync.
//! - **Pluggable Persistence**: snapshot + operation log behind a store
//!   trait; sessions degrade to in-memory-only on store failure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Scribe                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: WebSocket frames | Client Adapters | /health     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Session Registry: document id -> session, lazy creation    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Sessions: serialize | rebase (OT) | apply | broadcast      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Document State: content | revision | history | clock       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use scribe::config::ScribeConfig;
//!
//! #[tokio::main]
//! async fn main() -> scribe::Result<()> {
//!     let config = ScribeConfig::from_env()?;
//!     scribe::run(config).await
//! }
//! ```

pub mod adapter;
pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod health;
pub mod observability;
pub mod op;
pub mod protocol;
pub mod ratelimit;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod transform;
pub mod types;

// Re-exports
pub use error::{Result, ScribeError};
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use config::ScribeConfig;
use registry::SessionRegistry;
use shutdown::Shutdown;
use store::{DocumentStore, MemoryStore};
use tracing::{error, info, warn};

/// Interval between registry sweeps for retired sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Run the Scribe server with the given configuration.
pub async fn run(config: ScribeConfig) -> Result<()> {
    let store: Option<Arc<dyn DocumentStore>> = if config.store.url.is_some() {
        info!("Session store configured, persisting snapshots and op logs");
        Some(Arc::new(MemoryStore::new()))
    } else {
        None
    };
    run_with_store(config, store).await
}

/// Run the Scribe server with an explicit store implementation.
pub async fn run_with_store(
    config: ScribeConfig,
    store: Option<Arc<dyn DocumentStore>>,
) -> Result<()> {
    config.validate()?;
    observability::init(&config.observability)?;
    info!(addr = %config.server.bind_addr, "Starting Scribe");

    let shutdown = Shutdown::new();

    let registry = SessionRegistry::new(
        config.session.clone(),
        config.ratelimit.clone(),
        store,
    );

    let mut handles = Vec::new();

    let sweeper_registry = registry.clone();
    let handle = tokio::spawn(sweeper_registry.run_sweeper(SWEEP_INTERVAL));
    handles.push(("sweeper", handle));

    if config.observability.metrics_enabled {
        let obs_config = config.observability.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config).await {
                error!("Metrics server error: {}", e);
            }
        });
        handles.push(("metrics", handle));
    }

    let server_registry = registry.clone();
    let server_shutdown = shutdown.clone();
    let server_config = config.server.clone();
    let handle = {
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) =
                server::run_server(server_config, &config, server_registry, server_shutdown).await
            {
                error!("Server error: {}", e);
            }
        })
    };
    handles.push(("server", handle));

    // First SIGTERM/SIGINT flips the shutdown signal.
    tokio::spawn(shutdown.clone().on_signal());

    shutdown.triggered().await;
    info!("Shutting down Scribe gracefully...");

    // The listener has stopped accepting; give live sessions the grace
    // window to persist their final snapshots.
    if tokio::time::timeout(shutdown.grace(), registry.drain())
        .await
        .is_err()
    {
        error!("Session drain timed out after {:?}", shutdown.grace());
    }

    for (name, handle) in handles {
        if !handle.is_finished() {
            warn!(service = %name, "Force aborting service");
            handle.abort();
        }
    }

    info!("Scribe shutdown complete");
    Ok(())
}
