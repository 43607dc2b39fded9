//! Engine settings and configuration errors.
//!
//! Settings are plain serde data so they can live next to the rest of a service's
//! configuration. Every field has a default; a JSON document only needs to name what it
//! changes.
//!
//! ```
//! use rttp_cache::cache::CacheSettings;
//!
//! let settings = CacheSettings::from_json(r#"{
//!     "outcome_header": "X-Edge-Cache",
//!     "memory": { "max_entries": 5000 }
//! }"#).unwrap();
//!
//! assert_eq!(settings.outcome_header, "X-Edge-Cache");
//! assert_eq!(settings.memory.max_entries, 5000);
//! assert_eq!(settings.memory.effective_evict_batch(), 500);
//! assert_eq!(settings.cacheable_status_codes, vec![200, 301, 308]);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems found while building the engine. These are fatal at startup and always
/// name the offending route or setting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("route `{route}`: key template references undeclared parameter `{placeholder}`")]
    UnknownPlaceholder { route: String, placeholder: String },

    #[error("route `{route}`: more than one {kind} policy attached")]
    DuplicatePolicy { route: String, kind: &'static str },

    #[error("route `{route}`: backend `{backend}` is not registered")]
    UnknownBackend { route: String, backend: String },

    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no route source available to build the route index")]
    NoRouteSource,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSetting {
        field,
        reason: reason.into(),
    }
}

/// Behaviour of the request-time engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Response header carrying HIT, MISS, EXPIRED or BYPASS.
    pub outcome_header: String,
    /// Only responses with one of these statuses are stored.
    pub cacheable_status_codes: Vec<u16>,
    /// Bodies above this size are not cached.
    pub max_body_bytes: usize,
    /// Response headers retained on top of the built-in allow-list.
    pub extra_cached_headers: Vec<String>,
    /// How long a record outlives its `max_age` in storage so a late read can report
    /// EXPIRED. `None` keeps it for another `max_age`. Once this window has passed the
    /// backend has dropped the record and the next read is a plain MISS.
    pub stale_grace_secs: Option<u64>,
    /// Sizing of the default backend built by
    /// [`CacheInterceptor::in_memory`](super::CacheInterceptor::in_memory).
    pub memory: MemorySettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            outcome_header: "X-Cache".to_string(),
            cacheable_status_codes: vec![200, 301, 308],
            max_body_bytes: 1024 * 1024,
            extra_cached_headers: Vec::new(),
            stale_grace_secs: None,
            memory: MemorySettings::default(),
        }
    }
}

impl CacheSettings {
    /// Parse and validate settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outcome_header.trim().is_empty() {
            return Err(invalid("outcome_header", "must not be empty"));
        }
        if let Some(code) = self
            .cacheable_status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(invalid(
                "cacheable_status_codes",
                format!("{code} is not an HTTP status"),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(invalid("max_body_bytes", "must be greater than zero"));
        }
        if self.extra_cached_headers.iter().any(|h| h.trim().is_empty()) {
            return Err(invalid("extra_cached_headers", "header names must not be empty"));
        }
        self.memory.validate()
    }

    pub fn is_cacheable_status(&self, code: u16) -> bool {
        self.cacheable_status_codes.contains(&code)
    }

    /// Storage TTL for a record with the given freshness lifetime.
    pub fn storage_ttl(&self, max_age: Duration) -> Duration {
        let grace = self
            .stale_grace_secs
            .map_or(max_age, Duration::from_secs);
        max_age.saturating_add(grace)
    }
}

/// Sizing of the bundled in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub max_entries: usize,
    /// Entries evicted at once when full. Defaults to a tenth of `max_entries`.
    pub evict_batch: Option<usize>,
    pub sweep_interval_secs: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            evict_batch: None,
            sweep_interval_secs: 60,
        }
    }
}

impl MemorySettings {
    pub fn effective_evict_batch(&self) -> usize {
        self.evict_batch
            .unwrap_or(self.max_entries / 10)
            .clamp(1, self.max_entries.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(invalid("memory.max_entries", "must be greater than zero"));
        }
        if self.evict_batch == Some(0) {
            return Err(invalid("memory.evict_batch", "must be greater than zero"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("memory.sweep_interval_secs", "must be greater than zero"));
        }
        Ok(())
    }
}
