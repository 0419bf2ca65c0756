//! Wire protocol: one JSON object per transport frame.
//!
//! Frames are tagged by `kind` on both directions. The operation payload
//! is the [`Operation`] wire shape from [`crate::op`]; snapshots and
//! resyncs carry the full document so a client can always rebuild local
//! state from a single frame plus subsequent ops.
//!
//! A commit that produced multiple fragments (a delete split by a
//! concurrent insert) is delivered as consecutive `op` frames sharing the
//! producing revision, already in application order.

use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;
use crate::error::{Result, ScribeError};
use crate::op::Operation;
use crate::types::{ClientId, CursorPosition, DocumentId, Revision};

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open or rejoin a document.
    Join {
        document_id: DocumentId,
        client_id: ClientId,
    },
    /// Submit an edit.
    Op { op: Operation },
    /// Acknowledge everything up to a revision.
    Ack { revision: Revision },
    /// Presence update, relayed opaquely to the other clients.
    Cursor {
        #[serde(flatten)]
        cursor: CursorPosition,
    },
    /// Leave the document.
    Leave,
}

/// Frames the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Initial state after a join.
    Snapshot {
        revision: Revision,
        content: String,
        clock: VectorClock,
    },
    /// A committed operation from another client, rebased onto the
    /// revision it produced.
    Op { op: Operation, revision: Revision },
    /// Acknowledgement of the receiving client's own submission.
    Ack { revision: Revision },
    /// Full state push after history exhaustion; the client must rebase
    /// its pending edits onto this and retry.
    Resync {
        revision: Revision,
        content: String,
        clock: VectorClock,
    },
    /// Relayed presence from another client.
    Cursor {
        client_id: ClientId,
        #[serde(flatten)]
        cursor: CursorPosition,
    },
    /// An error scoped to this client.
    Error { code: String, message: String },
}

impl ServerFrame {
    /// Build an error frame from a [`ScribeError`].
    pub fn error(err: &ScribeError) -> Self {
        ServerFrame::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Decode one client frame.
pub fn decode_client_frame(raw: &str) -> Result<ClientFrame> {
    serde_json::from_str(raw)
        .map_err(|e| ScribeError::InvalidOperation(format!("malformed frame: {e}")))
}

/// Encode one server frame.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}
