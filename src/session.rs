//! Per-document editing session.
//!
//! A session is the single point of serialization for one document: a
//! tokio task that owns the [`DocumentState`], receives commands over an
//! mpsc channel, and fans committed operations out to per-client bounded
//! outbound queues. Admission is FIFO on arrival order; the
//! transform/apply/history-append sequence runs to completion before the
//! next command is taken, so the document needs no locks.
//!
//! # Submit pipeline
//!
//! 1. Rate-limit check (reject, never queue).
//! 2. Shape validation and ownership checks.
//! 3. Base revision checks: ahead of the server is `FutureRevision`;
//!    behind the retained history triggers a resync push.
//! 4. Rebase over the history suffix via the OT engine.
//! 5. A fully annihilated result is recorded as a no-op (revision does
//!    not advance) and acknowledged at the current revision; otherwise
//!    the result commits, the clocks merge, and the revision advances.
//! 6. Broadcast to every other client; the originator gets an ack.
//!
//! Errors local to one client never affect the other clients; an
//! invariant violation inside the OT engine is logged with full context,
//! surfaces as `InternalError`, and leaves the revision untouched.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::document::{DocumentState, Snapshot};
use crate::error::{Result, ScribeError};
use crate::op::Operation;
use crate::protocol::ServerFrame;
use crate::ratelimit::{OpBudget, RateLimitConfig};
use crate::store::DocumentStore;
use crate::transform::transform_against_all;
use crate::types::{ClientId, CursorPosition, DocumentId, Revision};

/// Commands a session accepts from client adapters and the registry.
enum SessionCommand {
    Join {
        client_id: ClientId,
        outbound: mpsc::Sender<ServerFrame>,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    Submit {
        client_id: ClientId,
        op: Box<Operation>,
    },
    Ack {
        client_id: ClientId,
        revision: Revision,
    },
    Cursor {
        client_id: ClientId,
        cursor: CursorPosition,
    },
    Leave {
        client_id: ClientId,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
}

/// Counters a session keeps about itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Operations committed (no-op collapses excluded).
    pub ops_committed: u64,
    /// Submissions that collapsed to nothing under transform.
    pub noop_collapses: u64,
    /// Resync pushes (history exhaustion or forced eviction).
    pub resyncs: u64,
    /// Submissions rejected by the rate limiter.
    pub rate_limited: u64,
    /// Clients dropped for overflowing their outbound queue.
    pub slow_consumer_drops: u64,
    /// Currently connected clients.
    pub clients: usize,
    /// Current document revision.
    pub revision: Revision,
}

/// Handle used to talk to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    document_id: DocumentId,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// The document this session owns.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// True when the session task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Register a client and receive the current snapshot.
    pub async fn join(
        &self,
        client_id: ClientId,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Join {
            client_id,
            outbound,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| ScribeError::SessionClosed(self.document_id.clone()))?
    }

    /// Submit an operation. The outcome arrives on the client's outbound
    /// queue as an ack, a resync, or an error frame.
    pub async fn submit(&self, client_id: ClientId, op: Operation) -> Result<()> {
        self.send(SessionCommand::Submit {
            client_id,
            op: Box::new(op),
        })
        .await
    }

    /// Acknowledge broadcasts up to `revision`.
    pub async fn ack(&self, client_id: ClientId, revision: Revision) -> Result<()> {
        self.send(SessionCommand::Ack {
            client_id,
            revision,
        })
        .await
    }

    /// Relay a presence update to the other clients.
    pub async fn cursor(&self, client_id: ClientId, cursor: CursorPosition) -> Result<()> {
        self.send(SessionCommand::Cursor { client_id, cursor }).await
    }

    /// Deregister a client.
    pub async fn leave(&self, client_id: ClientId) -> Result<()> {
        self.send(SessionCommand::Leave { client_id }).await
    }

    /// Ask the session to persist its final snapshot and exit. Used when
    /// draining for shutdown; resolves once the snapshot write finished.
    /// A session that already retired resolves immediately.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(SessionCommand::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Fetch the session's counters.
    pub async fn stats(&self) -> Result<SessionStats> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Stats { reply }).await?;
        rx.await
            .map_err(|_| ScribeError::SessionClosed(self.document_id.clone()))
    }

    async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| ScribeError::SessionClosed(self.document_id.clone()))
    }
}

struct ClientState {
    outbound: mpsc::Sender<ServerFrame>,
    last_ack: Revision,
    quota: OpBudget,
}

/// The session actor. Owns one document; runs until idle with no clients.
pub struct Session {
    document_id: DocumentId,
    doc: DocumentState,
    clients: HashMap<ClientId, ClientState>,
    config: SessionConfig,
    ratelimit: RateLimitConfig,
    store: Option<Arc<dyn DocumentStore>>,
    store_degraded: bool,
    stats: SessionStats,
    rx: mpsc::Receiver<SessionCommand>,
    close_ack: Option<oneshot::Sender<()>>,
}

impl Session {
    /// Spawn a session task for a document and return its handle.
    pub fn spawn(
        document_id: DocumentId,
        doc: DocumentState,
        config: SessionConfig,
        ratelimit: RateLimitConfig,
        store: Option<Arc<dyn DocumentStore>>,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::channel(config.command_queue);
        let session = Session {
            document_id: document_id.clone(),
            doc,
            clients: HashMap::new(),
            config,
            ratelimit,
            store,
            store_degraded: false,
            stats: SessionStats::default(),
            rx,
            close_ack: None,
        };
        tokio::spawn(session.run());
        gauge!("scribe_sessions_active").increment(1.0);
        SessionHandle { document_id, tx }
    }

    async fn run(mut self) {
        info!(document = %self.document_id, revision = self.doc.revision(), "Session started");
        loop {
            let idle_deadline = Instant::now() + self.config.idle_timeout;
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = sleep_until(idle_deadline), if self.clients.is_empty() => {
                    info!(document = %self.document_id, "Session idle, retiring");
                    break;
                }
            }
        }
        self.persist_snapshot().await;
        gauge!("scribe_sessions_active").decrement(1.0);
        info!(
            document = %self.document_id,
            revision = self.doc.revision(),
            ops = self.stats.ops_committed,
            "Session retired"
        );
        // Stop accepting commands before acknowledging the close, so a
        // drain observes the handle as closed the moment close() returns.
        self.rx.close();
        if let Some(reply) = self.close_ack.take() {
            let _ = reply.send(());
        }
    }

    /// Process one command; false stops the actor.
    async fn handle(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Join {
                client_id,
                outbound,
                reply,
            } => {
                let _ = reply.send(self.handle_join(client_id, outbound));
                true
            }
            SessionCommand::Submit { client_id, op } => {
                self.handle_submit(&client_id, *op).await;
                true
            }
            SessionCommand::Ack {
                client_id,
                revision,
            } => {
                self.handle_ack(&client_id, revision);
                true
            }
            SessionCommand::Cursor { client_id, cursor } => {
                self.relay_cursor(&client_id, cursor);
                true
            }
            SessionCommand::Leave { client_id } => {
                if self.clients.remove(&client_id).is_some() {
                    gauge!("scribe_clients_connected").decrement(1.0);
                    debug!(document = %self.document_id, client = %client_id, "Client left");
                }
                true
            }
            SessionCommand::Close { reply } => {
                info!(
                    document = %self.document_id,
                    clients = self.clients.len(),
                    "Session closing for shutdown"
                );
                self.close_ack = Some(reply);
                false
            }
            SessionCommand::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.clients = self.clients.len();
                stats.revision = self.doc.revision();
                let _ = reply.send(stats);
                true
            }
        }
    }

    fn handle_join(
        &mut self,
        client_id: ClientId,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Result<Snapshot> {
        if client_id.is_empty() {
            return Err(ScribeError::InvalidOperation(
                "client_id must be non-empty".into(),
            ));
        }
        let rejoining = self.clients.contains_key(&client_id);
        if !rejoining && self.clients.len() >= self.config.max_clients {
            return Err(ScribeError::DocumentFull {
                document: self.document_id.clone(),
                limit: self.config.max_clients,
            });
        }

        let snapshot = self.doc.snapshot();
        self.clients.insert(
            client_id.clone(),
            ClientState {
                outbound,
                last_ack: snapshot.revision,
                quota: OpBudget::new(&self.ratelimit),
            },
        );
        if !rejoining {
            gauge!("scribe_clients_connected").increment(1.0);
        }
        debug!(
            document = %self.document_id,
            client = %client_id,
            revision = snapshot.revision,
            rejoining,
            "Client joined"
        );
        Ok(snapshot)
    }

    async fn handle_submit(&mut self, client_id: &ClientId, op: Operation) {
        let Some(state) = self.clients.get_mut(client_id) else {
            debug!(document = %self.document_id, client = %client_id, "Submit from unknown client");
            return;
        };

        if !state.quota.admit() {
            self.stats.rate_limited += 1;
            counter!("scribe_rate_limited_total").increment(1);
            self.send_frame(
                client_id,
                ServerFrame::error(&ScribeError::RateLimited(client_id.clone())),
            );
            return;
        }

        if let Err(e) = self.validate_submission(client_id, &op) {
            self.send_frame(client_id, ServerFrame::error(&e));
            return;
        }

        let base = op.base_revision;
        if base > self.doc.revision() {
            let e = ScribeError::FutureRevision {
                base,
                server: self.doc.revision(),
            };
            self.send_frame(client_id, ServerFrame::error(&e));
            return;
        }

        let suffix = match self.doc.rebase_suffix(base) {
            Ok(suffix) => suffix,
            Err(ScribeError::HistoryExhausted { base, oldest }) => {
                debug!(
                    document = %self.document_id,
                    client = %client_id,
                    base,
                    oldest,
                    "Base predates retained history, resyncing"
                );
                self.resync_client(client_id);
                return;
            }
            Err(e) => {
                self.send_frame(client_id, ServerFrame::error(&e));
                return;
            }
        };

        let fragments = match transform_against_all(&op, &suffix) {
            Ok(fragments) => fragments,
            Err(e) => {
                error!(
                    document = %self.document_id,
                    client = %client_id,
                    base,
                    op = ?op.kind,
                    error = %e,
                    "Transform failed on admitted operation"
                );
                self.send_frame(
                    client_id,
                    ServerFrame::error(&ScribeError::Internal(e.to_string())),
                );
                return;
            }
        };

        if fragments.is_empty() {
            // Fully annihilated by concurrent history: record as a no-op.
            self.stats.noop_collapses += 1;
            counter!("scribe_noop_collapses_total").increment(1);
            let revision = self.doc.revision();
            self.send_frame(client_id, ServerFrame::Ack { revision });
            return;
        }

        let revision = match self.doc.apply(fragments) {
            Ok(revision) => revision,
            Err(e) => {
                // The transformed result must always fit the document; this
                // is an engine invariant violation, not a client error.
                error!(
                    document = %self.document_id,
                    client = %client_id,
                    base,
                    doc_revision = self.doc.revision(),
                    doc_len = self.doc.len(),
                    error = %e,
                    "Transformed operation failed to apply"
                );
                self.send_frame(
                    client_id,
                    ServerFrame::error(&ScribeError::Internal(e.to_string())),
                );
                return;
            }
        };

        self.stats.ops_committed += 1;
        counter!("scribe_ops_committed_total").increment(1);

        if let Some(client) = self.clients.get_mut(client_id) {
            client.last_ack = revision;
        }

        self.persist_entry(revision).await;
        self.broadcast_commit(client_id, revision);
        self.send_frame(client_id, ServerFrame::Ack { revision });
        self.enforce_history_bound();
    }

    fn validate_submission(&self, client_id: &ClientId, op: &Operation) -> Result<()> {
        op.validate()?;
        if &op.client_id != client_id {
            return Err(ScribeError::InvalidOperation(format!(
                "operation claims client {} but arrived from {}",
                op.client_id, client_id
            )));
        }
        if op.vector_clock.get(client_id) == 0 {
            return Err(ScribeError::InvalidOperation(
                "vector clock missing the originating client's own increment".into(),
            ));
        }
        Ok(())
    }

    /// Send the committed entry to every client except the originator.
    ///
    /// The broadcast copy carries the producing revision, a base of
    /// `revision - 1`, and the merged server clock; the history keeps the
    /// original identity for later precedence elections.
    fn broadcast_commit(&mut self, originator: &ClientId, revision: Revision) {
        let entry = match self.doc.operations_since(revision - 1) {
            Ok(mut entries) if !entries.is_empty() => entries.remove(0),
            _ => return,
        };

        let merged = self.doc.clock().clone();
        let frames: Vec<ServerFrame> = entry
            .ops
            .iter()
            .map(|op| {
                let mut broadcast = op.clone();
                broadcast.base_revision = revision - 1;
                broadcast.vector_clock = merged.clone();
                ServerFrame::Op {
                    op: broadcast,
                    revision,
                }
            })
            .collect();

        let receivers: Vec<ClientId> = self
            .clients
            .keys()
            .filter(|id| *id != originator)
            .cloned()
            .collect();
        for client_id in receivers {
            for frame in &frames {
                if !self.send_frame(&client_id, frame.clone()) {
                    break;
                }
            }
        }
    }

    fn handle_ack(&mut self, client_id: &ClientId, revision: Revision) {
        let current = self.doc.revision();
        if let Some(state) = self.clients.get_mut(client_id) {
            state.last_ack = state.last_ack.max(revision.min(current));
        }
        self.enforce_history_bound();
    }

    fn relay_cursor(&mut self, client_id: &ClientId, cursor: CursorPosition) {
        if !self.clients.contains_key(client_id) {
            return;
        }
        let frame = ServerFrame::Cursor {
            client_id: client_id.clone(),
            cursor,
        };
        let receivers: Vec<ClientId> = self
            .clients
            .keys()
            .filter(|id| *id != client_id)
            .cloned()
            .collect();
        for receiver in receivers {
            self.send_frame(&receiver, frame.clone());
        }
    }

    /// Evict acknowledged history down to the bound; if unacknowledged
    /// entries still hold it open, force them out and resync the laggards.
    fn enforce_history_bound(&mut self) {
        let min_ack = self
            .clients
            .values()
            .map(|c| c.last_ack)
            .min()
            .unwrap_or_else(|| self.doc.revision());
        self.doc.evict_acknowledged(min_ack);

        let mut forced = false;
        while self.doc.force_evict().is_some() {
            forced = true;
        }
        if forced {
            let oldest = self.doc.oldest_base();
            let laggards: Vec<ClientId> = self
                .clients
                .iter()
                .filter(|(_, s)| s.last_ack < oldest)
                .map(|(id, _)| id.clone())
                .collect();
            for client_id in laggards {
                warn!(
                    document = %self.document_id,
                    client = %client_id,
                    oldest,
                    "History evicted past client ack, forcing resync"
                );
                self.resync_client(&client_id);
            }
        }
    }

    fn resync_client(&mut self, client_id: &ClientId) {
        let snapshot = self.doc.snapshot();
        self.stats.resyncs += 1;
        counter!("scribe_resyncs_total").increment(1);
        if let Some(state) = self.clients.get_mut(client_id) {
            state.last_ack = snapshot.revision;
        }
        self.send_frame(
            client_id,
            ServerFrame::Resync {
                revision: snapshot.revision,
                content: snapshot.content,
                clock: snapshot.clock,
            },
        );
    }

    /// Queue a frame for one client. A full queue drops the client with
    /// `SlowConsumer`; returns false when the client is gone.
    fn send_frame(&mut self, client_id: &ClientId, frame: ServerFrame) -> bool {
        let Some(state) = self.clients.get(client_id) else {
            return false;
        };
        if state.outbound.try_send(frame).is_err() {
            warn!(
                document = %self.document_id,
                client = %client_id,
                "Outbound queue overflow, disconnecting slow consumer"
            );
            self.clients.remove(client_id);
            self.stats.slow_consumer_drops += 1;
            counter!("scribe_slow_consumers_total").increment(1);
            gauge!("scribe_clients_connected").decrement(1.0);
            return false;
        }
        true
    }

    async fn persist_entry(&mut self, revision: Revision) {
        let Some(store) = self.store.clone() else {
            return;
        };
        if self.store_degraded {
            return;
        }
        let entry = match self.doc.operations_since(revision - 1) {
            Ok(mut entries) if !entries.is_empty() => entries.remove(0),
            _ => return,
        };
        if let Err(e) = store.append_entry(&self.document_id, &entry).await {
            warn!(
                document = %self.document_id,
                error = %e,
                "Store append failed, degrading to in-memory-only"
            );
            self.store_degraded = true;
        }
    }

    async fn persist_snapshot(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        if self.store_degraded {
            return;
        }
        let snapshot = self.doc.snapshot();
        if let Err(e) = store.save_snapshot(&self.document_id, &snapshot).await {
            warn!(
                document = %self.document_id,
                error = %e,
                "Final snapshot persist failed"
            );
        }
    }
}
