//! Cache settings and builder
//!
//! [`CacheSettings`] carries every recognized option; [`loader`] fills it
//! from the environment or a TOML/JSON file.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

pub mod loader;

/// Which tier a [`crate::context::CacheContext`] is built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Bounded in-process LRU
    #[default]
    Memory,
    /// Shared networked store only
    Remote,
    /// Memory in front of the remote store
    Hybrid,
    /// No caching; every lookup misses
    Disabled,
}

impl BackendKind {
    /// Name used in config files and `MEMOTIER_BACKEND`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Remote => "remote",
            Self::Hybrid => "hybrid",
            Self::Disabled => "disabled",
        }
    }

    /// Whether this backend talks to the remote store
    pub fn uses_remote(&self) -> bool {
        matches!(self, Self::Remote | Self::Hybrid)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "remote" | "redis" => Ok(Self::Remote),
            "hybrid" => Ok(Self::Hybrid),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(CacheError::Config(format!("Unknown cache backend: {other}"))),
        }
    }
}

/// Recognized cache options
///
/// Missing fields in a config file fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory for persistent caches
    pub storage_dir: PathBuf,

    /// TTL applied when a caller gives none, in seconds
    pub default_ttl: u64,

    /// Capacity of the in-memory tier
    pub max_entries: usize,

    /// Tier selection
    pub backend: BackendKind,

    /// Remote store connection string
    pub remote_url: String,

    /// Namespace prepended to every remote key
    pub key_prefix: String,

    /// Connect/read/write timeout for the remote store, in milliseconds
    pub remote_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./cache"),
            default_ttl: 3600,
            max_entries: 1000,
            backend: BackendKind::Memory,
            remote_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "memotier".to_string(),
            remote_timeout_ms: 500,
        }
    }
}

impl CacheSettings {
    /// Create a new settings builder
    pub fn builder() -> CacheSettingsBuilder {
        CacheSettingsBuilder::default()
    }

    /// Memory-only preset
    pub fn memory(max_entries: usize, default_ttl: Duration) -> Self {
        Self::builder()
            .backend(BackendKind::Memory)
            .max_entries(max_entries)
            .default_ttl(default_ttl)
            .build()
    }

    /// Preset that caches nothing
    pub fn disabled() -> Self {
        Self::builder().backend(BackendKind::Disabled).build()
    }

    /// Default TTL as a [`Duration`]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    /// Bound on each remote connect, read and write
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Reject settings no backend can run with
    ///
    /// # Errors
    /// Returns `CacheError::Config` for a zero capacity, an empty key
    /// prefix, or a remote-backed tier without a connection string.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_entries == 0 {
            return Err(CacheError::Config("max_entries must be greater than zero".into()));
        }
        if self.key_prefix.trim().is_empty() {
            return Err(CacheError::Config("key_prefix must not be empty".into()));
        }
        if self.backend.uses_remote() && self.remote_url.trim().is_empty() {
            return Err(CacheError::Config(format!(
                "backend '{}' requires a remote_url",
                self.backend
            )));
        }
        Ok(())
    }
}

/// Builder for [`CacheSettings`] with fluent API
#[derive(Debug, Default)]
pub struct CacheSettingsBuilder {
    settings: CacheSettings,
}

impl CacheSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory for persistent stores
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.storage_dir = dir.into();
        self
    }

    /// Set the default TTL (whole seconds; sub-second parts are dropped)
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.settings.default_ttl = ttl.as_secs();
        self
    }

    /// Capacity of the in-memory tier and of each persistent index
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.settings.max_entries = max_entries;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.settings.backend = backend;
        self
    }

    /// Connection string for the shared tier
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.settings.remote_url = url.into();
        self
    }

    /// Namespace for every key written to the shared tier
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.key_prefix = prefix.into();
        self
    }

    /// Timeout for remote operations (stored as whole milliseconds)
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.settings.remote_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build the settings (call [`CacheSettings::validate`] before use)
    pub fn build(self) -> CacheSettings {
        self.settings
    }
}
