//! Core type definitions for the Scribe collaborative editing server.
//!
//! This module contains the fundamental identifiers used throughout Scribe.
//!
//! # Type Aliases
//!
//! Common identifiers are defined as type aliases for clarity:
//!
//! - [`DocumentId`] = `String`: opaque document identifier chosen by clients
//! - [`ClientId`] = `String`: stable identifier of an editing client
//! - [`Revision`] = `u64`: monotonic per-document commit counter

use serde::{Deserialize, Serialize};

/// Opaque document identifier.
pub type DocumentId = String;

/// Stable client identifier. Survives reconnects of the same client.
pub type ClientId = String;

/// Monotonic per-document revision counter. Revision 0 is the empty
/// document before any commit.
pub type Revision = u64;

/// Cursor/presence payload relayed between clients of a session.
///
/// The server forwards this as-is; positions are never transformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Caret position in Unicode scalar values.
    pub position: usize,
    /// Optional selection range `[start, end]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<[usize; 2]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_serialization() {
        let cursor = CursorPosition {
            position: 5,
            selection: Some([2, 8]),
        };
        let json = serde_json::to_value(&cursor).unwrap();
        assert_eq!(json["position"], 5);
        assert_eq!(json["selection"][1], 8);

        let bare = CursorPosition {
            position: 0,
            selection: None,
        };
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("selection").is_none());
    }
}
