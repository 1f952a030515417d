//! Cache error types
//!
//! Errors in this crate exist for the plumbing *behind* the cache contract.
//! The contract itself (`CacheBackend`, `CacheContext`, memoized calls)
//! never hands a `CacheError` to its caller: every failure at a backend
//! boundary is logged, counted, and turned into a miss or a no-op. A cache
//! failure is therefore indistinguishable from a cold cache.
//!
//! | Variant | Raised by | Surfaced? |
//! |---------|-----------|-----------|
//! | `BackendUnavailable` | remote connect/IO failures | no, degrades to miss |
//! | `Redis` | redis client errors | no, degrades to miss |
//! | `Serialization` | value or key encoding/decoding | no, degrades to miss |
//! | `Io` | disk tier reads and writes | no, logged |
//! | `CapacityExceeded` | internal eviction signal | never |
//! | `Config` | settings validation and loading | yes, at startup |

use std::fmt;

use thiserror::Error;

/// Severity level used for monitoring and log routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Errors produced inside the cache tiers
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: &'static str, reason: String },

    #[error("Cache serialization error: {0}")]
    Serialization(String),

    #[error("Cache capacity of {capacity} entries exceeded")]
    CapacityExceeded { capacity: usize },

    #[error("Invalid cache configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Cache result type
pub type CacheResult<T> = Result<T, CacheError>;

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Invalid TOML format: {err}"))
    }
}

impl CacheError {
    /// Create a backend-unavailable error
    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable { backend, reason: reason.into() }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BackendUnavailable { .. } | Self::Io(_) => true,
            Self::Redis(err) => {
                err.is_io_error() || err.is_timeout() || err.is_connection_dropped()
            }
            Self::Serialization(_) | Self::CapacityExceeded { .. } | Self::Config(_) => false,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CapacityExceeded { .. } => ErrorSeverity::Info,
            Self::BackendUnavailable { .. } | Self::Redis(_) => ErrorSeverity::Warning,
            Self::Serialization(_) | Self::Io(_) => ErrorSeverity::Error,
            Self::Config(_) => ErrorSeverity::Critical,
        }
    }

    /// Stable label suitable for metrics and structured logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Serialization(_) => "serialization",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Redis(_) => "redis",
        }
    }
}
