//! Deterministic cache key derivation
//!
//! A key is `namespace:` followed by a canonical JSON rendering of the call
//! arguments. Objects are rebuilt with sorted keys at every depth, so keyword
//! arguments in any order (and nested maps) render identically, and nothing
//! depends on per-process hash seeds. Keys longer than [`MAX_KEY_LENGTH`] are condensed
//! to `namespace:#<sha256>`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CacheResult;

/// Longest key stored verbatim
pub const MAX_KEY_LENGTH: usize = 250;

/// A derived cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-derived key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the key text
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hex-encoded SHA-256 of arbitrary text
pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild objects with sorted keys at every depth
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Builds [`CacheKey`]s from a namespace and call arguments
///
/// # Example
/// ```
/// use memotier_cache::cache::KeyBuilder;
///
/// let a = KeyBuilder::new("define").arg("lemma").kwarg("lang", "nl").kwarg("tone", "formal");
/// let b = KeyBuilder::new("define").arg("lemma").kwarg("tone", "formal").kwarg("lang", "nl");
/// assert_eq!(a.finish(), b.finish());
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: String,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl KeyBuilder {
    /// Start a key in `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), args: Vec::new(), kwargs: BTreeMap::new() }
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Add a keyword argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Produce the key
    pub fn finish(&self) -> CacheKey {
        Self::build(&self.namespace, &self.args, &self.kwargs)
    }

    /// Derive a key from positional and keyword arguments
    pub fn build(namespace: &str, args: &[Value], kwargs: &BTreeMap<String, Value>) -> CacheKey {
        let args: Vec<Value> = args.iter().map(canonicalize).collect();
        let kwargs: Map<String, Value> =
            kwargs.iter().map(|(name, value)| (name.clone(), canonicalize(value))).collect();
        let canonical = json!({ "a": args, "k": kwargs }).to_string();
        Self::condense(namespace, &canonical)
    }

    /// Derive a key for a memoized call from its serializable arguments
    ///
    /// Tuples and sequences become positional arguments, maps and structs
    /// become keyword arguments, and anything else is a single positional
    /// argument.
    pub fn for_call<A: Serialize + ?Sized>(namespace: &str, args: &A) -> CacheResult<CacheKey> {
        let key = match serde_json::to_value(args)? {
            Value::Array(items) => Self::build(namespace, &items, &BTreeMap::new()),
            Value::Object(map) => {
                let kwargs: BTreeMap<String, Value> = map.into_iter().collect();
                Self::build(namespace, &[], &kwargs)
            }
            Value::Null => Self::build(namespace, &[], &BTreeMap::new()),
            other => Self::build(namespace, &[other], &BTreeMap::new()),
        };
        Ok(key)
    }

    fn condense(namespace: &str, canonical: &str) -> CacheKey {
        let key = format!("{namespace}:{canonical}");
        if key.len() <= MAX_KEY_LENGTH {
            CacheKey(key)
        } else {
            CacheKey(format!("{namespace}:#{}", sha256_hex(canonical)))
        }
    }
}
