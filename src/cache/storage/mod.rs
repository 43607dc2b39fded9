//! Storage abstraction for cached responses.
//!
//! [`Storage`] is the extension point for backends. The contract every implementation
//! must honor:
//!
//! - `get` never returns a record past its TTL.
//! - `set` applies the TTL together with the write; a key never exists without expiry.
//! - `delete` and `delete_matching` report how many entries they removed, and removing
//!   something that is not there is not an error.
//!
//! [`MemoryStorage`] is the bundled backend. With the `redis` feature, `RedisStorage`
//! shares a cache across processes; it encodes records with
//! [`CacheRecord::to_bytes`](super::CacheRecord::to_bytes) and maps its transport
//! failures to [`StorageError::Unavailable`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use super::record::{CacheRecord, SerializationError};

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStorage;
#[cfg(feature = "redis")]
pub use self::redis::RedisStorage;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend failures. The controller logs these and carries on as if caching were absent.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend `{backend}` unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("ttl must be greater than zero")]
    InvalidTtl,

    #[error("record codec error: {0}")]
    Codec(#[from] SerializationError),
}

/// Selects keys for bulk removal.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Keys starting with the given string.
    Prefix(String),
    /// Keys matched by the expression.
    Regex(Regex),
}

impl KeyPattern {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    /// `*` matches any run of characters; everything else is literal. The whole key
    /// has to match.
    ///
    /// ```
    /// use rttp_cache::cache::KeyPattern;
    ///
    /// let pattern = KeyPattern::glob("user_*.json").unwrap();
    /// assert!(pattern.matches("user_42.json"));
    /// assert!(!pattern.matches("user_42.json.bak"));
    /// ```
    pub fn glob(glob: &str) -> Result<Self, regex::Error> {
        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Self::regex(&format!("^{body}$"))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Regex(re) => re.is_match(key),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Regex(re) => f.write_str(re.as_str()),
        }
    }
}

/// An async key/value store for [`CacheRecord`]s with per-entry TTL.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> StorageResult<Option<CacheRecord>>;

    async fn set(&self, key: &str, record: CacheRecord, ttl: Duration) -> StorageResult<()>;

    /// Returns the number of entries removed (0 or 1).
    async fn delete(&self, key: &str) -> StorageResult<usize>;

    async fn delete_matching(&self, pattern: &KeyPattern) -> StorageResult<usize>;

    /// Release resources. Backends without any keep the default.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// The default backend plus any named backends routes can opt into.
#[derive(Clone)]
pub struct Backends {
    default: Arc<dyn Storage>,
    named: HashMap<String, Arc<dyn Storage>>,
}

impl Backends {
    pub fn new(default: Arc<dyn Storage>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, storage: Arc<dyn Storage>) {
        self.named.insert(name.into(), storage);
    }

    pub fn default_backend(&self) -> &Arc<dyn Storage> {
        &self.default
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Storage>> {
        self.named.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// The backend for `backend_override`, falling back to the default.
    pub fn select(&self, backend_override: Option<&str>) -> &Arc<dyn Storage> {
        backend_override
            .and_then(|name| self.named.get(name))
            .unwrap_or(&self.default)
    }

    /// Every registered backend, default first.
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Storage>> {
        std::iter::once(&self.default).chain(self.named.values())
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("default", &self.default.name())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pattern() {
        let p = KeyPattern::prefix("GET:/data");
        assert!(p.matches("GET:/data/1:"));
        assert!(!p.matches("HEAD:/data/1:"));
        assert_eq!(p.to_string(), "GET:/data*");
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let p = KeyPattern::glob("a.b(*)").unwrap();
        assert!(p.matches("a.b(anything)"));
        assert!(!p.matches("aXb(anything)"));
    }

    #[test]
    fn glob_without_star_is_exact() {
        let p = KeyPattern::glob("exact").unwrap();
        assert!(p.matches("exact"));
        assert!(!p.matches("exactly"));
    }

    #[test]
    fn backends_select_and_iterate() {
        let default: Arc<dyn Storage> = Arc::new(MemoryStorage::new(10).unwrap().named("default"));
        let sessions: Arc<dyn Storage> = Arc::new(MemoryStorage::new(10).unwrap().named("sessions"));
        let mut backends = Backends::new(default);
        backends.insert("sessions", sessions);

        assert!(backends.contains("sessions"));
        assert!(!backends.contains("missing"));
        assert_eq!(backends.select(None).name(), "default");
        assert_eq!(backends.select(Some("sessions")).name(), "sessions");
        assert_eq!(backends.select(Some("missing")).name(), "default");
        assert_eq!(backends.all().count(), 2);
        assert_eq!(backends.all().next().map(|s| s.name()), Some("default"));
    }
}
