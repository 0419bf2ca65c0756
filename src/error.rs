//! Error types for the Scribe collaborative editing server.
//!
//! This module provides a unified error type [`ScribeError`] for all Scribe
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Protocol**: malformed or stale client operations
//! - **Flow control**: rate limiting and slow-consumer backpressure
//! - **Session**: capacity and lifecycle errors
//! - **Storage**: external store failures (sessions degrade, never die)
//! - **Configuration**: invalid settings
//!
//! Errors carried back to clients map onto a small wire taxonomy via
//! [`ScribeError::code`]; errors local to one client never affect the other
//! clients of a session.
//!
//! # Example
//!
//! ```rust
//! use scribe::error::{Result, ScribeError};
//!
//! fn check_content(content: &str) -> Result<()> {
//!     if content.is_empty() {
//!         return Err(ScribeError::InvalidOperation(
//!             "insert content must be non-empty".into(),
//!         ));
//!     }
//!     Ok(())
//! }
//!
//! let err = check_content("").unwrap_err();
//! assert_eq!(err.code(), "InvalidOperation");
//! assert!(!err.is_fatal());
//! ```

use std::io;
use thiserror::Error;

use crate::types::Revision;

/// Main error type for Scribe operations.
#[derive(Error, Debug)]
pub enum ScribeError {
    // Protocol errors
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Base revision {base} is ahead of server revision {server}")]
    FutureRevision { base: Revision, server: Revision },

    #[error("History exhausted: base revision {base} older than retained history (oldest {oldest})")]
    HistoryExhausted { base: Revision, oldest: Revision },

    #[error("Position out of range: {position} (+{length}) exceeds document length {len}")]
    OutOfRange {
        position: usize,
        length: usize,
        len: usize,
    },

    // Flow control
    #[error("Rate limited: client {0} exceeded its operation quota")]
    RateLimited(String),

    #[error("Slow consumer: outbound queue full for client {0}")]
    SlowConsumer(String),

    // Session errors
    #[error("Document full: {document} already has {limit} clients")]
    DocumentFull { document: String, limit: usize },

    #[error("Session closed: {0}")]
    SessionClosed(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Transport and serialization
    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScribeError {
    /// Wire error code for the client-facing taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            ScribeError::InvalidOperation(_) | ScribeError::OutOfRange { .. } => "InvalidOperation",
            ScribeError::FutureRevision { .. } => "FutureRevision",
            ScribeError::HistoryExhausted { .. } => "HistoryExhausted",
            ScribeError::RateLimited(_) => "RateLimited",
            ScribeError::SlowConsumer(_) => "SlowConsumer",
            ScribeError::DocumentFull { .. } => "DocumentFull",
            _ => "InternalError",
        }
    }

    /// Check if the error closes the client connection.
    ///
    /// Non-fatal errors discard the offending operation and keep the client
    /// connected.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScribeError::SlowConsumer(_)
                | ScribeError::SessionClosed(_)
                | ScribeError::Network(_)
                | ScribeError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for ScribeError {
    fn from(e: serde_json::Error) -> Self {
        ScribeError::Serialization(e.to_string())
    }
}

/// Result type alias for Scribe operations.
pub type Result<T> = std::result::Result<T, ScribeError>;
