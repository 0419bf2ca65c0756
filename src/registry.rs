//! Process-wide mapping from document id to live session.
//!
//! Lookup is concurrent; creation is synchronized under the map's write
//! lock so two clients joining a new document always share one session.
//! Sessions retire themselves when idle; a periodic sweep drops the dead
//! handles, and the next join recreates the session from the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::document::DocumentState;
use crate::error::Result;
use crate::ratelimit::RateLimitConfig;
use crate::session::{Session, SessionHandle};
use crate::store::{self, DocumentStore};
use crate::types::DocumentId;

/// Registry counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    /// Live sessions currently registered.
    pub sessions: usize,
    /// Sessions created since startup.
    pub sessions_created: u64,
}

/// Maps document ids to their owning sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<DocumentId, SessionHandle>>,
    session_config: SessionConfig,
    ratelimit: RateLimitConfig,
    store: Option<Arc<dyn DocumentStore>>,
    created: std::sync::atomic::AtomicU64,
}

impl SessionRegistry {
    /// Create a registry.
    pub fn new(
        session_config: SessionConfig,
        ratelimit: RateLimitConfig,
        store: Option<Arc<dyn DocumentStore>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            session_config,
            ratelimit,
            store,
            created: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Look up a document's session, creating it on first join.
    pub async fn get_or_create(&self, document_id: &str) -> Result<SessionHandle> {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(document_id) {
                if !handle.is_closed() {
                    return Ok(handle.clone());
                }
            }
        }

        // Recover state before taking the write lock; a losing racer just
        // discards its copy.
        let doc = self.recover(document_id).await;

        let mut sessions = self.sessions.write().await;
        if let Some(handle) = sessions.get(document_id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }

        let handle = Session::spawn(
            document_id.to_string(),
            doc,
            self.session_config.clone(),
            self.ratelimit.clone(),
            self.store.clone(),
        );
        sessions.insert(document_id.to_string(), handle.clone());
        self.created
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        info!(document = %document_id, "Session created");
        Ok(handle)
    }

    /// Rebuild document state from the store: latest snapshot + log tail.
    async fn recover(&self, document_id: &str) -> DocumentState {
        let limit = self.session_config.history_limit;
        let Some(store) = self.store.as_deref() else {
            return DocumentState::new(limit);
        };

        match store::replay(store, document_id).await {
            Ok(Some((snapshot, tail))) => {
                let revision = snapshot.revision;
                let mut doc = DocumentState::from_snapshot(snapshot, limit);
                for entry in tail {
                    if let Err(e) = doc.apply(entry.ops) {
                        warn!(
                            document = %document_id,
                            revision = entry.revision,
                            error = %e,
                            "Discarding unreplayable log tail"
                        );
                        break;
                    }
                }
                debug!(
                    document = %document_id,
                    snapshot_revision = revision,
                    revision = doc.revision(),
                    "Recovered document from store"
                );
                doc
            }
            Ok(None) => DocumentState::new(limit),
            Err(e) => {
                warn!(
                    document = %document_id,
                    error = %e,
                    "Store unavailable, starting document in-memory"
                );
                DocumentState::new(limit)
            }
        }
    }

    /// Drop handles whose sessions have retired.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.is_closed());
        let removed = before - sessions.len();
        gauge!("scribe_registry_sessions").set(sessions.len() as f64);
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "Swept retired sessions");
        }
        removed
    }

    /// Close every live session, letting each persist a final snapshot.
    /// Used on graceful shutdown; the registry is empty afterwards.
    pub async fn drain(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        let count = handles.len();
        for handle in handles {
            handle.close().await;
        }
        gauge!("scribe_registry_sessions").set(0.0);
        if count > 0 {
            info!(sessions = count, "Drained sessions for shutdown");
        }
    }

    /// Run the sweep loop until the registry is dropped elsewhere.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// Registry counters.
    pub async fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.read().await;
        RegistryStats {
            sessions: sessions.values().filter(|h| !h.is_closed()).count(),
            sessions_created: self.created.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}
