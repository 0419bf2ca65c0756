//! Document state: content buffer, revision counter, bounded history.
//!
//! A [`DocumentState`] is owned by exactly one session and mutated only
//! inside it, so none of this needs locking. Content is a flat character
//! sequence; every position is a Unicode scalar value index. The history
//! is a bounded FIFO of committed operations, newest last; replaying it in
//! order from an empty buffer yields the current content, and `revision`
//! equals the number of commits ever made.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;
use crate::error::{Result, ScribeError};
use crate::op::{char_len, OpKind, Operation};
use crate::types::Revision;

/// Default bound on retained history entries.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// A point-in-time view of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Revision the content corresponds to.
    pub revision: Revision,
    /// Full document content.
    pub content: String,
    /// Server vector clock at that revision.
    pub clock: VectorClock,
}

/// One committed revision.
///
/// A commit usually carries a single operation; a delete that was split by
/// a concurrent insert carries both fragments. Fragments are stored in
/// application order (descending position), all expressed against the
/// document state before the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOp {
    /// The revision this commit produced.
    pub revision: Revision,
    /// The operation fragments, in application order.
    pub ops: Vec<Operation>,
}

/// The character buffer and commit history of one document.
#[derive(Debug, Clone)]
pub struct DocumentState {
    content: String,
    revision: Revision,
    history: VecDeque<CommittedOp>,
    clock: VectorClock,
    history_limit: usize,
}

impl DocumentState {
    /// Create an empty document.
    pub fn new(history_limit: usize) -> Self {
        Self {
            content: String::new(),
            revision: 0,
            history: VecDeque::new(),
            clock: VectorClock::new(),
            history_limit,
        }
    }

    /// Restore a document from a persisted snapshot. History before the
    /// snapshot is gone; older bases will be forced into resync.
    pub fn from_snapshot(snapshot: Snapshot, history_limit: usize) -> Self {
        Self {
            content: snapshot.content,
            revision: snapshot.revision,
            history: VecDeque::new(),
            clock: snapshot.clock,
            history_limit,
        }
    }

    /// Current revision.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Content length in characters.
    pub fn len(&self) -> usize {
        char_len(&self.content)
    }

    /// True when the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Current content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Server vector clock, merged over every committed operation.
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Number of retained history entries.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// The oldest base revision the retained history can still rebase.
    /// Submissions with an older base must resync.
    pub fn oldest_base(&self) -> Revision {
        match self.history.front() {
            Some(entry) => entry.revision - 1,
            None => self.revision,
        }
    }

    /// Cheap point-in-time view.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            revision: self.revision,
            content: self.content.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Committed entries with revisions greater than `rev`, oldest first.
    ///
    /// Fails with `HistoryExhausted` when `rev` predates the retained
    /// history.
    pub fn operations_since(&self, rev: Revision) -> Result<Vec<CommittedOp>> {
        if rev > self.revision {
            return Err(ScribeError::FutureRevision {
                base: rev,
                server: self.revision,
            });
        }
        if rev < self.oldest_base() {
            return Err(ScribeError::HistoryExhausted {
                base: rev,
                oldest: self.oldest_base(),
            });
        }
        Ok(self
            .history
            .iter()
            .filter(|entry| entry.revision > rev)
            .cloned()
            .collect())
    }

    /// Flattened view of the operations committed after `rev`, in the
    /// order a rebase must fold over them.
    pub fn rebase_suffix(&self, rev: Revision) -> Result<Vec<Operation>> {
        Ok(self
            .operations_since(rev)?
            .into_iter()
            .flat_map(|entry| entry.ops)
            .collect())
    }

    /// Commit a transformed operation (or split fragments) to the buffer.
    ///
    /// All fragments must be expressed against the current content; they
    /// are validated before anything mutates, then applied in descending
    /// position order. Returns the new revision. The document clock
    /// absorbs every fragment's clock.
    pub fn apply(&mut self, mut ops: Vec<Operation>) -> Result<Revision> {
        if ops.is_empty() {
            return Err(ScribeError::InvalidOperation(
                "commit must carry at least one operation".into(),
            ));
        }
        ops.sort_by(|a, b| b.position().cmp(&a.position()));

        let len = self.len();
        for op in &ops {
            op.validate()?;
            match &op.kind {
                OpKind::Insert { position, .. } => {
                    if *position > len {
                        return Err(ScribeError::OutOfRange {
                            position: *position,
                            length: 0,
                            len,
                        });
                    }
                }
                OpKind::Delete { position, length } | OpKind::Retain { position, length } => {
                    if position + length > len {
                        return Err(ScribeError::OutOfRange {
                            position: *position,
                            length: *length,
                            len,
                        });
                    }
                }
            }
        }

        for op in &ops {
            self.splice(&op.kind);
            self.clock.merge(&op.vector_clock);
        }

        self.revision += 1;
        self.history.push_back(CommittedOp {
            revision: self.revision,
            ops,
        });
        Ok(self.revision)
    }

    /// Drop history entries the whole session has acknowledged, but only
    /// while the bound is exceeded.
    pub fn evict_acknowledged(&mut self, min_acked: Revision) -> usize {
        let mut evicted = 0;
        while self.history.len() > self.history_limit {
            match self.history.front() {
                Some(front) if front.revision <= min_acked => {
                    self.history.pop_front();
                    evicted += 1;
                }
                _ => break,
            }
        }
        evicted
    }

    /// Force the oldest entry out regardless of acknowledgements. Clients
    /// whose last ack predates the new [`Self::oldest_base`] can no longer
    /// rebase and must resync.
    pub fn force_evict(&mut self) -> Option<CommittedOp> {
        if self.history.len() > self.history_limit {
            self.history.pop_front()
        } else {
            None
        }
    }

    /// True when the history bound is exceeded.
    pub fn over_limit(&self) -> bool {
        self.history.len() > self.history_limit
    }

    fn splice(&mut self, kind: &OpKind) {
        match kind {
            OpKind::Insert { position, content } => {
                let byte = self
                    .content
                    .char_indices()
                    .nth(*position)
                    .map(|(b, _)| b)
                    .unwrap_or(self.content.len());
                self.content.insert_str(byte, content);
            }
            OpKind::Delete { position, length } => {
                let start = self
                    .content
                    .char_indices()
                    .nth(*position)
                    .map(|(b, _)| b)
                    .unwrap_or(self.content.len());
                let end = self
                    .content
                    .char_indices()
                    .nth(*position + *length)
                    .map(|(b, _)| b)
                    .unwrap_or(self.content.len());
                let tail = self.content.split_off(end);
                self.content.truncate(start);
                self.content.push_str(&tail);
            }
            OpKind::Retain { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(client: &str, base: Revision, pos: usize, content: &str) -> Operation {
        let clock: VectorClock = [(client.to_string(), 1)].into_iter().collect();
        Operation::insert(client, base, clock, pos, content)
    }

    fn delete(client: &str, base: Revision, pos: usize, len: usize) -> Operation {
        let clock: VectorClock = [(client.to_string(), 1)].into_iter().collect();
        Operation::delete(client, base, clock, pos, len)
    }

    #[test]
    fn test_apply_advances_revision_and_content() {
        let mut doc = DocumentState::new(16);
        assert_eq!(doc.revision(), 0);

        let rev = doc.apply(vec![insert("c1", 0, 0, "hello")]).unwrap();
        assert_eq!(rev, 1);
        assert_eq!(doc.content(), "hello");

        let rev = doc.apply(vec![insert("c2", 1, 5, " world")]).unwrap();
        assert_eq!(rev, 2);
        assert_eq!(doc.content(), "hello world");
        assert_eq!(doc.history_len(), 2);
    }

    #[test]
    fn test_apply_merges_clocks() {
        let mut doc = DocumentState::new(16);
        doc.apply(vec![insert("c1", 0, 0, "a")]).unwrap();
        doc.apply(vec![insert("c2", 1, 1, "b")]).unwrap();
        assert_eq!(doc.clock().get("c1"), 1);
        assert_eq!(doc.clock().get("c2"), 1);
    }

    #[test]
    fn test_apply_rejects_out_of_range() {
        let mut doc = DocumentState::new(16);
        doc.apply(vec![insert("c1", 0, 0, "abc")]).unwrap();

        let err = doc.apply(vec![insert("c1", 1, 9, "x")]).unwrap_err();
        assert!(matches!(err, ScribeError::OutOfRange { .. }));

        let err = doc.apply(vec![delete("c1", 1, 2, 5)]).unwrap_err();
        assert!(matches!(err, ScribeError::OutOfRange { .. }));

        // Nothing mutated, revision unchanged.
        assert_eq!(doc.content(), "abc");
        assert_eq!(doc.revision(), 1);
    }

    #[test]
    fn test_split_commit_applies_descending() {
        let mut doc = DocumentState::new(16);
        doc.apply(vec![insert("c1", 0, 0, "01234XY56789")]).unwrap();

        // Fragments of one commit share a base state.
        let rev = doc
            .apply(vec![delete("c1", 1, 2, 3), delete("c1", 1, 7, 3)])
            .unwrap();
        assert_eq!(rev, 2);
        assert_eq!(doc.content(), "01XY89");
        assert_eq!(doc.history_len(), 2);
    }

    #[test]
    fn test_unicode_positions() {
        let mut doc = DocumentState::new(16);
        doc.apply(vec![insert("c1", 0, 0, "日本語")]).unwrap();
        doc.apply(vec![insert("c1", 1, 1, "=")]).unwrap();
        assert_eq!(doc.content(), "日=本語");
        doc.apply(vec![delete("c1", 2, 0, 2)]).unwrap();
        assert_eq!(doc.content(), "本語");
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_operations_since() {
        let mut doc = DocumentState::new(16);
        for i in 0..4 {
            doc.apply(vec![insert("c1", i, 0, "x")]).unwrap();
        }

        let since = doc.operations_since(2).unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].revision, 3);
        assert_eq!(since[1].revision, 4);

        assert!(doc.operations_since(4).unwrap().is_empty());
        assert!(matches!(
            doc.operations_since(9),
            Err(ScribeError::FutureRevision { .. })
        ));
    }

    #[test]
    fn test_history_exhausted_after_eviction() {
        let mut doc = DocumentState::new(2);
        for i in 0..5 {
            doc.apply(vec![insert("c1", i, 0, "x")]).unwrap();
        }
        // Everyone acked revision 5; the bound forces eviction down to 2.
        assert_eq!(doc.evict_acknowledged(5), 3);
        assert_eq!(doc.oldest_base(), 3);

        assert!(doc.operations_since(3).is_ok());
        assert!(matches!(
            doc.operations_since(2),
            Err(ScribeError::HistoryExhausted { .. })
        ));
    }

    #[test]
    fn test_eviction_respects_unacked_history() {
        let mut doc = DocumentState::new(2);
        for i in 0..5 {
            doc.apply(vec![insert("c1", i, 0, "x")]).unwrap();
        }
        // A laggard acked only revision 1: nothing below it may go.
        assert_eq!(doc.evict_acknowledged(1), 1);
        assert!(doc.over_limit());

        // Forcing eviction is the session's resync path.
        assert!(doc.force_evict().is_some());
        assert!(doc.force_evict().is_some());
        assert!(doc.force_evict().is_none());
        assert_eq!(doc.history_len(), 2);
    }

    #[test]
    fn test_replay_matches_content() {
        let mut doc = DocumentState::new(64);
        doc.apply(vec![insert("c1", 0, 0, "hello world")]).unwrap();
        doc.apply(vec![delete("c2", 1, 5, 6)]).unwrap();
        doc.apply(vec![insert("c1", 2, 5, "!")]).unwrap();

        let mut replayed = DocumentState::new(64);
        for entry in doc.operations_since(0).unwrap() {
            replayed.apply(entry.ops).unwrap();
        }
        assert_eq!(replayed.content(), doc.content());
        assert_eq!(replayed.revision(), doc.revision());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut doc = DocumentState::new(16);
        doc.apply(vec![insert("c1", 0, 0, "persist me")]).unwrap();

        let snap = doc.snapshot();
        let restored = DocumentState::from_snapshot(snap.clone(), 16);
        assert_eq!(restored.content(), "persist me");
        assert_eq!(restored.revision(), 1);
        assert_eq!(restored.oldest_base(), 1);
        assert_eq!(restored.snapshot(), snap);
    }
}
