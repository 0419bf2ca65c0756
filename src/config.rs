//! Configuration module for Scribe.
//!
//! Configuration is layered: built-in defaults, an optional JSON config
//! file, then `SCRIBE_*` environment variable overrides. Every knob has a
//! documented default:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `SCRIBE_BIND_ADDR` | `0.0.0.0:7070` | WebSocket/health listen address |
//! | `SCRIBE_STORE_URL` | unset | External session store URL |
//! | `SCRIBE_MAX_OPS_PER_SEC` | `100` | Per-client edit admission rate |
//! | `SCRIBE_MAX_CLIENTS` | `128` | Clients per document |
//! | `SCRIBE_HISTORY_LIMIT` | `10000` | Retained history entries per document |
//! | `SCRIBE_IDLE_TIMEOUT` | `10m` | Session retirement after last client leaves (`ms`/`s`/`m`/`h` suffixes; bare number is seconds) |
//! | `SCRIBE_OUTBOUND_QUEUE` | `1024` | Per-client outbound frame bound |
//! | `SCRIBE_LOG_LEVEL` | `info` | Log filter when `RUST_LOG` is unset |
//! | `SCRIBE_JSON_LOGS` | `false` | Structured JSON log output |
//! | `SCRIBE_METRICS_ADDR` | `0.0.0.0:9090` | Prometheus metrics listener |

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::DEFAULT_HISTORY_LIMIT;
use crate::error::{Result, ScribeError};
use crate::ratelimit::RateLimitConfig;

/// Main configuration for a Scribe server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScribeConfig {
    /// HTTP/WebSocket server configuration.
    pub server: ServerConfig,
    /// Per-document session configuration.
    pub session: SessionConfig,
    /// Per-client rate limiting.
    pub ratelimit: RateLimitConfig,
    /// External store configuration.
    pub store: StoreConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl ScribeConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScribeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ScribeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `SCRIBE_*` environment variable overrides.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(addr) = env_parsed::<SocketAddr>("SCRIBE_BIND_ADDR")? {
            self.server.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("SCRIBE_STORE_URL") {
            self.store.url = Some(url);
        }
        if let Some(max_ops) = env_parsed::<u64>("SCRIBE_MAX_OPS_PER_SEC")? {
            self.ratelimit.max_ops = max_ops;
        }
        if let Some(max_clients) = env_parsed::<usize>("SCRIBE_MAX_CLIENTS")? {
            self.session.max_clients = max_clients;
        }
        if let Some(history_limit) = env_parsed::<usize>("SCRIBE_HISTORY_LIMIT")? {
            self.session.history_limit = history_limit;
        }
        if let Ok(raw) = std::env::var("SCRIBE_IDLE_TIMEOUT") {
            self.session.idle_timeout = duration_fmt::parse(&raw)
                .map_err(|e| ScribeError::Config(format!("SCRIBE_IDLE_TIMEOUT: {}", e)))?;
        }
        if let Some(queue) = env_parsed::<usize>("SCRIBE_OUTBOUND_QUEUE")? {
            self.session.outbound_queue = queue;
        }
        if let Ok(level) = std::env::var("SCRIBE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(json_logs) = env_parsed::<bool>("SCRIBE_JSON_LOGS")? {
            self.observability.json_logs = json_logs;
        }
        if let Some(addr) = env_parsed::<SocketAddr>("SCRIBE_METRICS_ADDR")? {
            self.observability.metrics_addr = addr;
        }
        self.validate()?;
        Ok(self)
    }

    /// Load from environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.session.history_limit == 0 {
            return Err(ScribeError::InvalidConfig {
                field: "session.history_limit".to_string(),
                reason: "History bound must be non-zero".to_string(),
            });
        }
        if self.session.max_clients == 0 {
            return Err(ScribeError::InvalidConfig {
                field: "session.max_clients".to_string(),
                reason: "At least one client per document is required".to_string(),
            });
        }
        if self.session.outbound_queue == 0 {
            return Err(ScribeError::InvalidConfig {
                field: "session.outbound_queue".to_string(),
                reason: "Outbound queue must hold at least one frame".to_string(),
            });
        }
        if self.ratelimit.enabled && self.ratelimit.max_ops == 0 {
            return Err(ScribeError::InvalidConfig {
                field: "ratelimit.max_ops".to_string(),
                reason: "Enabled rate limiting needs a non-zero quota".to_string(),
            });
        }
        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1:7070".parse().expect("valid socket address"),
            },
            session: SessionConfig {
                history_limit: 1000,
                idle_timeout: Duration::from_secs(60),
                max_clients: 16,
                outbound_queue: 256,
                command_queue: 64,
            },
            ratelimit: RateLimitConfig::relaxed(),
            store: StoreConfig { url: None },
            observability: ObservabilityConfig {
                log_level: "debug".to_string(),
                ..Default::default()
            },
        }
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the WebSocket and health endpoints.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7070".parse().expect("valid socket address"),
        }
    }
}

/// Per-document session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Retained history entries per document.
    pub history_limit: usize,
    /// Retirement delay after the last client leaves.
    #[serde(with = "duration_fmt")]
    pub idle_timeout: Duration,
    /// Maximum clients per document.
    pub max_clients: usize,
    /// Per-client outbound frame queue bound.
    pub outbound_queue: usize,
    /// Session command queue bound (FIFO admission).
    pub command_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            idle_timeout: Duration::from_secs(600),
            max_clients: 128,
            outbound_queue: 1024,
            command_queue: 256,
        }
    }
}

/// External store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store URL. When unset, documents live in memory only.
    pub url: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9090".parse().expect("valid socket address"),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ScribeError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Serde helper for the human-readable durations on config fields.
///
/// Scribe's duration knobs span four orders of magnitude: rate-limit
/// windows are sub-second, idle timeouts are minutes, and operators have
/// asked hour-scale retirement windows of comparable servers. `parse`
/// therefore accepts `ms`, `s`, `m`, and `h` suffixes, and a bare number
/// means seconds, the scale of most knobs here. `format` renders the
/// largest unit that divides evenly, so a default idle timeout
/// round-trips through a config file as `"10m"`, not a millisecond count.
pub mod duration_fmt {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Render a duration in the largest unit that divides it evenly.
    pub fn format(duration: &Duration) -> String {
        let ms = duration.as_millis();
        if ms == 0 {
            "0s".to_string()
        } else if ms % 3_600_000 == 0 {
            format!("{}h", ms / 3_600_000)
        } else if ms % 60_000 == 0 {
            format!("{}m", ms / 60_000)
        } else if ms % 1_000 == 0 {
            format!("{}s", ms / 1_000)
        } else {
            format!("{}ms", ms)
        }
    }

    /// Parse a duration with an optional `ms`/`s`/`m`/`h` suffix. A bare
    /// number is seconds.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, unit_ms) = if let Some(v) = s.strip_suffix("ms") {
            (v, 1)
        } else if let Some(v) = s.strip_suffix('h') {
            (v, 3_600_000)
        } else if let Some(v) = s.strip_suffix('m') {
            (v, 60_000)
        } else if let Some(v) = s.strip_suffix('s') {
            (v, 1_000)
        } else {
            (s, 1_000)
        };
        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration {s:?} (expected ms/s/m/h)"))?;
        value
            .checked_mul(unit_ms)
            .map(Duration::from_millis)
            .ok_or_else(|| format!("duration {s:?} overflows"))
    }
}
