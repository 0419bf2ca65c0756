//! External document store interface.
//!
//! The cluster-wide session store is an external facility; this module
//! specifies the interface the engine needs from it (a per-document
//! snapshot slot plus an appended operation log keyed by revision) and
//! ships an in-memory implementation. Replay is the latest snapshot plus
//! the log tail. Values are encoded as the same JSON used on the wire.
//!
//! Store failures never take a session down: the session logs the failure,
//! degrades to in-memory-only mode, and keeps serving.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::document::{CommittedOp, Snapshot};
use crate::error::{Result, ScribeError};
use crate::types::{DocumentId, Revision};

/// Persistence interface for document snapshots and operation logs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist the latest snapshot for a document, replacing any prior one.
    async fn save_snapshot(&self, document_id: &str, snapshot: &Snapshot) -> Result<()>;

    /// Load the latest snapshot, if any.
    async fn load_snapshot(&self, document_id: &str) -> Result<Option<Snapshot>>;

    /// Append one committed entry to the operation log, keyed by
    /// `(document_id, revision)`.
    async fn append_entry(&self, document_id: &str, entry: &CommittedOp) -> Result<()>;

    /// Log entries with revisions greater than `revision`, oldest first.
    async fn entries_after(&self, document_id: &str, revision: Revision)
        -> Result<Vec<CommittedOp>>;
}

/// Replay a document from the store: latest snapshot plus log tail.
pub async fn replay(
    store: &dyn DocumentStore,
    document_id: &str,
) -> Result<Option<(Snapshot, Vec<CommittedOp>)>> {
    let Some(snapshot) = store.load_snapshot(document_id).await? else {
        return Ok(None);
    };
    let tail = store.entries_after(document_id, snapshot.revision).await?;
    Ok(Some((snapshot, tail)))
}

#[derive(Default)]
struct StoredDocument {
    snapshot: Option<String>,
    log: BTreeMap<Revision, String>,
}

/// In-memory store, used when no external store is configured and as the
/// reference implementation for tests.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, StoredDocument>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents with any persisted state.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// True when nothing has been persisted.
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn save_snapshot(&self, document_id: &str, snapshot: &Snapshot) -> Result<()> {
        let encoded = serde_json::to_string(snapshot)?;
        let mut documents = self.documents.write();
        let doc = documents.entry(document_id.to_string()).or_default();
        doc.snapshot = Some(encoded);
        // Log entries at or below the snapshot revision are subsumed.
        doc.log = doc.log.split_off(&(snapshot.revision + 1));
        Ok(())
    }

    async fn load_snapshot(&self, document_id: &str) -> Result<Option<Snapshot>> {
        let documents = self.documents.read();
        match documents.get(document_id).and_then(|d| d.snapshot.as_ref()) {
            Some(encoded) => Ok(Some(serde_json::from_str(encoded)?)),
            None => Ok(None),
        }
    }

    async fn append_entry(&self, document_id: &str, entry: &CommittedOp) -> Result<()> {
        let encoded = serde_json::to_string(entry)?;
        let mut documents = self.documents.write();
        let doc = documents.entry(document_id.to_string()).or_default();
        doc.log.insert(entry.revision, encoded);
        Ok(())
    }

    async fn entries_after(
        &self,
        document_id: &str,
        revision: Revision,
    ) -> Result<Vec<CommittedOp>> {
        let documents = self.documents.read();
        let Some(doc) = documents.get(document_id) else {
            return Ok(Vec::new());
        };
        doc.log
            .range(revision + 1..)
            .map(|(_, encoded)| {
                serde_json::from_str(encoded).map_err(|e| ScribeError::Storage(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;
    use crate::op::Operation;

    fn entry(revision: Revision, content: &str) -> CommittedOp {
        let clock: VectorClock = [("c1".to_string(), revision)].into_iter().collect();
        CommittedOp {
            revision,
            ops: vec![Operation::insert("c1", revision - 1, clock, 0, content)],
        }
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load_snapshot("doc-1").await.unwrap().is_none());

        let snapshot = Snapshot {
            revision: 3,
            content: "abc".into(),
            clock: VectorClock::new(),
        };
        store.save_snapshot("doc-1", &snapshot).await.unwrap();

        let loaded = store.load_snapshot("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_log_tail() {
        let store = MemoryStore::new();
        for rev in 1..=5 {
            store.append_entry("doc-1", &entry(rev, "x")).await.unwrap();
        }

        let tail = store.entries_after("doc-1", 3).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].revision, 4);
        assert_eq!(tail[1].revision, 5);

        assert!(store.entries_after("doc-2", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_truncates_subsumed_log() {
        let store = MemoryStore::new();
        for rev in 1..=5 {
            store.append_entry("doc-1", &entry(rev, "x")).await.unwrap();
        }
        store
            .save_snapshot(
                "doc-1",
                &Snapshot {
                    revision: 3,
                    content: "xxx".into(),
                    clock: VectorClock::new(),
                },
            )
            .await
            .unwrap();

        let (snapshot, tail) = replay(&store, "doc-1").await.unwrap().unwrap();
        assert_eq!(snapshot.revision, 3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].revision, 4);
    }

    #[tokio::test]
    async fn test_replay_empty() {
        let store = MemoryStore::new();
        assert!(replay(&store, "missing").await.unwrap().is_none());
    }
}
