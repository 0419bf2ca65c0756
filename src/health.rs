//! Health probe types for the Scribe server.
//!
//! The `/health` endpoint answers 200 while the process accepts new
//! sessions and 503 once graceful shutdown has begun.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Accepting new sessions.
    Healthy,
    /// Graceful shutdown in progress; no new sessions.
    ShuttingDown,
}

impl HealthStatus {
    /// Convert to HTTP status code.
    pub fn to_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::ShuttingDown => 503,
        }
    }
}

/// Full health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Live sessions.
    pub sessions: usize,
    /// Timestamp.
    pub timestamp: String,
}

impl HealthResponse {
    /// Build a response for the current process state.
    pub fn new(status: HealthStatus, start_time: Instant, sessions: usize) -> Self {
        Self {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: start_time.elapsed().as_secs(),
            sessions,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
