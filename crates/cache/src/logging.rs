//! Structured logging helpers
//!
//! Backend boundaries report failures through [`log_backend_failure`] so
//! every degraded read or write carries the same fields: `operation`,
//! `key`, `backend`, `error_kind` and `error`.

use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::error::CacheError;

/// Log a failure that a backend absorbed instead of raising.
///
/// `operation` is a stable verb (`"get"`, `"set"`, `"delete"`, `"clear"`).
/// Callers pass the cache key as-is; keys are derived from call arguments
/// and must not embed secrets.
#[inline]
pub fn log_backend_failure(operation: &str, key: &str, backend: &str, error: &CacheError) {
    warn!(
        operation,
        key,
        backend,
        error_kind = error.label(),
        severity = %error.severity(),
        error = %error,
        "cache_backend_failure"
    );
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a human-readable fmt subscriber.
///
/// `RUST_LOG` wins over `default_directive`. Returns `false` when a global
/// subscriber was already installed, which makes repeated calls harmless.
pub fn init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::fmt().with_env_filter(env_filter(default_directive)).try_init().is_ok()
}

/// Install a JSON fmt subscriber (one object per line).
pub fn init_json_tracing(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(default_directive))
        .try_init()
        .is_ok()
}
