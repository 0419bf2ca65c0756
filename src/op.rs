//! Edit operations and their validity rules.
//!
//! An [`Operation`] is the atomic unit of editing: one insert, delete, or
//! retain, stamped with the originating client, a wall-clock hint, the
//! client's vector clock, and the revision the client believed it was
//! editing. Field presence is total per variant (content only exists on
//! inserts, lengths only on deletes and retains), so shape validation
//! happens once at the parse boundary and the rest of the engine works
//! with well-formed values.
//!
//! All positions and lengths count Unicode scalar values, not bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;
use crate::error::{Result, ScribeError};
use crate::types::{ClientId, Revision};

/// The edit payload of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpKind {
    /// Insert `content` before the character at `position`.
    Insert { position: usize, content: String },
    /// Delete `length` characters starting at `position`.
    Delete { position: usize, length: usize },
    /// Positional no-op left behind when a transform annihilates an
    /// operation entirely.
    Retain { position: usize, length: usize },
}

impl OpKind {
    /// The position the operation acts at.
    pub fn position(&self) -> usize {
        match self {
            OpKind::Insert { position, .. }
            | OpKind::Delete { position, .. }
            | OpKind::Retain { position, .. } => *position,
        }
    }

    /// True when applying the operation would change document content.
    pub fn has_effect(&self) -> bool {
        match self {
            OpKind::Insert { content, .. } => !content.is_empty(),
            OpKind::Delete { length, .. } => *length > 0,
            OpKind::Retain { .. } => false,
        }
    }
}

/// An atomic edit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Originating client.
    pub client_id: ClientId,
    /// Wall-clock hint. Used only as the last tie-breaker after vector
    /// clock comparison and client id; never to establish causality.
    pub timestamp: DateTime<Utc>,
    /// The client's causal clock at emission time, with its own counter
    /// already incremented.
    pub vector_clock: VectorClock,
    /// The document revision the client composed this edit against.
    pub base_revision: Revision,
    /// The edit itself.
    #[serde(flatten)]
    pub kind: OpKind,
}

impl Operation {
    /// Build an insert operation.
    pub fn insert(
        client_id: impl Into<ClientId>,
        base_revision: Revision,
        vector_clock: VectorClock,
        position: usize,
        content: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            timestamp: Utc::now(),
            vector_clock,
            base_revision,
            kind: OpKind::Insert {
                position,
                content: content.into(),
            },
        }
    }

    /// Build a delete operation.
    pub fn delete(
        client_id: impl Into<ClientId>,
        base_revision: Revision,
        vector_clock: VectorClock,
        position: usize,
        length: usize,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            timestamp: Utc::now(),
            vector_clock,
            base_revision,
            kind: OpKind::Delete { position, length },
        }
    }

    /// Build a retain (no-op) operation at a position.
    pub fn retain(
        client_id: impl Into<ClientId>,
        base_revision: Revision,
        vector_clock: VectorClock,
        position: usize,
        length: usize,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            timestamp: Utc::now(),
            vector_clock,
            base_revision,
            kind: OpKind::Retain { position, length },
        }
    }

    /// Replace the edit payload, keeping all metadata. Transform results
    /// inherit the identity of the operation they were derived from.
    pub fn with_kind(&self, kind: OpKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// The position the operation acts at.
    pub fn position(&self) -> usize {
        self.kind.position()
    }

    /// True when the operation is a retain.
    pub fn is_retain(&self) -> bool {
        matches!(self.kind, OpKind::Retain { .. })
    }

    /// Validate shape invariants that hold for any document.
    ///
    /// Position bounds against actual content are checked at apply time;
    /// this rejects operations that could never be meaningful: empty
    /// inserts, zero-length deletes, empty client ids.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(ScribeError::InvalidOperation(
                "client_id must be non-empty".into(),
            ));
        }
        match &self.kind {
            OpKind::Insert { content, .. } => {
                if content.is_empty() {
                    return Err(ScribeError::InvalidOperation(
                        "insert content must be non-empty".into(),
                    ));
                }
            }
            OpKind::Delete { length, .. } => {
                if *length == 0 {
                    return Err(ScribeError::InvalidOperation(
                        "delete length must be positive".into(),
                    ));
                }
            }
            OpKind::Retain { .. } => {}
        }
        Ok(())
    }
}

/// Character count of a string, in Unicode scalar values.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_insert() {
        let op = Operation::insert("c1", 0, VectorClock::new(), 0, "");
        assert!(matches!(
            op.validate(),
            Err(ScribeError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_delete() {
        let op = Operation::delete("c1", 0, VectorClock::new(), 3, 0);
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_client() {
        let op = Operation::insert("", 0, VectorClock::new(), 0, "x");
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_zero_length_retain() {
        let op = Operation::retain("c1", 0, VectorClock::new(), 4, 0);
        assert!(op.validate().is_ok());
        assert!(op.is_retain());
        assert!(!op.kind.has_effect());
    }

    #[test]
    fn test_wire_shape_is_flat_and_tagged() {
        let mut clock = VectorClock::new();
        clock.increment("c1");
        let op = Operation::insert("c1", 7, clock, 5, "hello");

        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "insert");
        assert_eq!(json["position"], 5);
        assert_eq!(json["content"], "hello");
        assert_eq!(json["base_revision"], 7);
        assert_eq!(json["vector_clock"]["c1"], 1);

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_deserialize_rejects_missing_variant_fields() {
        // A delete frame carrying insert fields must not parse.
        let frame = serde_json::json!({
            "client_id": "c1",
            "timestamp": Utc::now(),
            "vector_clock": {},
            "base_revision": 0,
            "kind": "delete",
            "content": "oops"
        });
        assert!(serde_json::from_value::<Operation>(frame).is_err());
    }

    #[test]
    fn test_char_len_counts_scalars() {
        assert_eq!(char_len("héllo"), 5);
        assert_eq!(char_len(""), 0);
        assert_eq!(char_len("日本語"), 3);
    }
}
