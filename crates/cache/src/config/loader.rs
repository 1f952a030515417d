//! Settings loader
//!
//! Loads [`CacheSettings`] from environment variables or a file.
//!
//! ## Loading Strategy
//! 1. If `MEMOTIER_CONFIG` names a file, load it (`.toml` or `.json`)
//! 2. Otherwise start from defaults and apply environment overrides
//! 3. Validate the result
//!
//! ## Environment Variables
//! - `MEMOTIER_CACHE_DIR`: storage directory for persistent caches
//! - `MEMOTIER_DEFAULT_TTL`: default TTL in seconds
//! - `MEMOTIER_MAX_ENTRIES`: in-memory capacity
//! - `MEMOTIER_BACKEND`: `memory`, `remote`, `hybrid` or `disabled`
//! - `MEMOTIER_REMOTE_URL`: remote store connection string
//! - `MEMOTIER_KEY_PREFIX`: namespace for remote keys
//! - `MEMOTIER_REMOTE_TIMEOUT_MS`: remote timeout in milliseconds

use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{BackendKind, CacheSettings};
use crate::error::{CacheError, CacheResult};

/// Names a settings file that takes precedence over the environment
pub const CONFIG_PATH_VAR: &str = "MEMOTIER_CONFIG";

/// Load settings with the file-then-environment strategy
///
/// # Errors
/// Returns `CacheError::Config` if the named file is missing or invalid,
/// an environment value cannot be parsed, or validation fails.
pub fn load() -> CacheResult<CacheSettings> {
    let settings = match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) if !path.trim().is_empty() => load_from_file(PathBuf::from(path))?,
        _ => {
            let settings = load_from_env()?;
            tracing::info!(backend = %settings.backend, "Cache settings loaded from environment");
            settings
        }
    };
    settings.validate()?;
    Ok(settings)
}

/// Load settings from environment variables
///
/// Unset variables keep their defaults.
///
/// # Errors
/// Returns `CacheError::Config` when a set variable has an invalid value.
pub fn load_from_env() -> CacheResult<CacheSettings> {
    let mut settings = CacheSettings::default();

    if let Some(dir) = env_var("MEMOTIER_CACHE_DIR") {
        settings.storage_dir = PathBuf::from(dir);
    }
    if let Some(ttl) = env_parse::<u64>("MEMOTIER_DEFAULT_TTL")? {
        settings.default_ttl = ttl;
    }
    if let Some(max_entries) = env_parse::<usize>("MEMOTIER_MAX_ENTRIES")? {
        settings.max_entries = max_entries;
    }
    if let Some(backend) = env_var("MEMOTIER_BACKEND") {
        settings.backend = backend.parse::<BackendKind>()?;
    }
    if let Some(url) = env_var("MEMOTIER_REMOTE_URL") {
        settings.remote_url = url;
    }
    if let Some(prefix) = env_var("MEMOTIER_KEY_PREFIX") {
        settings.key_prefix = prefix;
    }
    if let Some(timeout) = env_parse::<u64>("MEMOTIER_REMOTE_TIMEOUT_MS")? {
        settings.remote_timeout_ms = timeout;
    }

    Ok(settings)
}

/// Load settings from a `.toml` or `.json` file
///
/// # Errors
/// Returns `CacheError::Config` if the file does not exist, cannot be read,
/// or does not parse.
pub fn load_from_file(path: impl AsRef<Path>) -> CacheResult<CacheSettings> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CacheError::Config(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading cache settings from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| CacheError::Config(format!("Failed to read config file: {e}")))?;

    parse_settings(&contents, path)
}

/// Parse settings from string content, format chosen by extension
fn parse_settings(contents: &str, path: &Path) -> CacheResult<CacheSettings> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => Ok(toml::from_str(contents)?),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CacheError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CacheError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Non-empty environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse an optional environment variable
///
/// # Errors
/// Returns `CacheError::Config` naming the variable if it does not parse.
fn env_parse<T>(key: &str) -> CacheResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| CacheError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}
