//! Stored form of a cached response and the codec that produces it.
//!
//! Only an allow-list of headers survives encoding. Hop-by-hop and per-connection
//! headers (`connection`, `set-cookie`, ...) are never replayed from cache.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::CacheSettings;
use crate::http::{Response, StatusCode};

/// Response headers retained by default. Names are lowercase.
pub const DEFAULT_CACHED_HEADERS: &[&str] = &[
    "content-type",
    "content-encoding",
    "content-language",
    "etag",
    "last-modified",
    "cache-control",
    "expires",
    "vary",
];

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("body of {size} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("status code {0} cannot be represented")]
    UnknownStatus(u16),

    #[error("record encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A cached response plus the metadata needed to judge its freshness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub status_code: u16,
    /// Allow-listed headers, lowercase names, multiple values joined with `", "`.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub stored_at: SystemTime,
    pub max_age: Duration,
}

impl CacheRecord {
    /// Time since the record was stored. Zero if `now` is before `stored_at`.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.stored_at).unwrap_or_default()
    }

    /// `true` while `now - stored_at < max_age`.
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        self.age(now) < self.max_age
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag").map(String::as_str)
    }

    /// Encode for byte-oriented backends.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Converts responses to [`CacheRecord`]s and back.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, SystemTime};
/// use rttp_cache::cache::Serializer;
/// use rttp_cache::http::{Response, StatusCode};
///
/// let serializer = Serializer::default();
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .header("Connection", "keep-alive")
///     .body(r#"{"id":"42"}"#);
///
/// let record = serializer
///     .encode("GET:/data/42:", &response, Duration::from_secs(60), SystemTime::now())
///     .unwrap();
/// assert!(record.headers.contains_key("content-type"));
/// assert!(!record.headers.contains_key("connection"));
///
/// let restored = serializer.decode(&record).unwrap();
/// assert_eq!(restored.body_ref(), response.body_ref());
/// ```
#[derive(Debug, Clone)]
pub struct Serializer {
    allowed: Vec<String>,
    max_body_bytes: usize,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new(CacheSettings::default().max_body_bytes)
    }
}

impl Serializer {
    pub fn new(max_body_bytes: usize) -> Self {
        Self {
            allowed: DEFAULT_CACHED_HEADERS.iter().map(|h| h.to_string()).collect(),
            max_body_bytes,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        settings
            .extra_cached_headers
            .iter()
            .fold(Self::new(settings.max_body_bytes), |s, h| s.allow_header(h))
    }

    /// Retain `name` in addition to the defaults.
    #[must_use]
    pub fn allow_header(mut self, name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        if !self.allowed.contains(&name) {
            self.allowed.push(name);
        }
        self
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed.iter().any(|h| h.eq_ignore_ascii_case(name))
    }

    pub fn encode(
        &self,
        key: &str,
        response: &Response,
        max_age: Duration,
        stored_at: SystemTime,
    ) -> Result<CacheRecord, SerializationError> {
        let body = response.body_ref();
        if body.len() > self.max_body_bytes {
            return Err(SerializationError::BodyTooLarge {
                size: body.len(),
                limit: self.max_body_bytes,
            });
        }

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers().iter() {
            if !self.is_allowed(name) {
                continue;
            }
            headers
                .entry(name.to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Ok(CacheRecord {
            key: key.to_string(),
            status_code: response.status().as_u16(),
            headers,
            body: body.clone(),
            stored_at,
            max_age,
        })
    }

    pub fn decode(&self, record: &CacheRecord) -> Result<Response, SerializationError> {
        let status = StatusCode::from_u16(record.status_code)
            .ok_or(SerializationError::UnknownStatus(record.status_code))?;
        let mut response = Response::new(status).body_bytes(record.body.clone());
        for (name, value) in &record.headers {
            response.set_header(name.as_str(), value.as_str());
        }
        Ok(response)
    }
}
