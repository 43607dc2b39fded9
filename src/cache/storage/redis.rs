//! Redis backend, compiled with the `redis` feature.
//!
//! Records are stored as JSON under `{namespace}:{key}`, and the expiry is set by the
//! same `SET ... EX` that writes the value. Pattern removal walks the namespace with
//! `SCAN` and deletes what matches in batches. Every transport failure comes back as
//! [`StorageError::Unavailable`] naming this backend, so the controller can fail open.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, RedisError};
use async_trait::async_trait;
use tracing::debug;

use super::{KeyPattern, Storage, StorageError, StorageResult};
use crate::cache::record::CacheRecord;

const SCAN_COUNT: usize = 250;

/// [`Storage`] on a shared Redis server. Several processes pointing at the same server
/// and namespace share one cache.
///
/// ```no_run
/// use rttp_cache::cache::{CacheInterceptor, RedisStorage};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let redis = RedisStorage::connect("redis://127.0.0.1/", "api-cache").await?;
/// let interceptor = CacheInterceptor::builder(Arc::new(redis)).build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedisStorage {
    name: String,
    namespace: String,
    conn: MultiplexedConnection,
}

impl RedisStorage {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> StorageResult<Self> {
        let client = Client::open(url).map_err(|e| unavailable("redis", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| unavailable("redis", e))?;
        Ok(Self::new(conn, namespace))
    }

    /// Wrap an existing connection. Clones of it are used per operation.
    pub fn new(conn: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            name: "redis".to_string(),
            namespace: namespace.into(),
            conn,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn failed(&self, e: RedisError) -> StorageError {
        unavailable(&self.name, e)
    }

    async fn scan(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.failed(e))?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    async fn delete_all(&self, keys: &[String]) -> StorageResult<usize> {
        let mut conn = self.conn.clone();
        let mut removed = 0;
        for chunk in keys.chunks(SCAN_COUNT) {
            let deleted: usize = ::redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.failed(e))?;
            removed += deleted;
        }
        Ok(removed)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> StorageResult<Option<CacheRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = ::redis::cmd("GET")
            .arg(namespaced(&self.namespace, key))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.failed(e))?;
        raw.as_deref().map(decode).transpose()
    }

    async fn set(&self, key: &str, record: CacheRecord, ttl: Duration) -> StorageResult<()> {
        if ttl.is_zero() {
            return Err(StorageError::InvalidTtl);
        }
        let value = encode(&record)?;
        let mut conn = self.conn.clone();
        let _: () = ::redis::cmd("SET")
            .arg(namespaced(&self.namespace, key))
            .arg(value)
            .arg("EX")
            .arg(expiry_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.failed(e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<usize> {
        let mut conn = self.conn.clone();
        ::redis::cmd("DEL")
            .arg(namespaced(&self.namespace, key))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.failed(e))
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> StorageResult<usize> {
        let candidates = self.scan(&scan_match(&self.namespace, pattern)).await?;
        let prefix = namespaced(&self.namespace, "");
        let doomed: Vec<String> = candidates
            .into_iter()
            .filter(|full| {
                full.strip_prefix(prefix.as_str())
                    .is_some_and(|key| pattern.matches(key))
            })
            .collect();
        let removed = self.delete_all(&doomed).await?;
        debug!(backend = %self.name, %pattern, removed, "removed matching keys");
        Ok(removed)
    }

    /// Drops this namespace only; other data on the server is left alone.
    async fn close(&self) -> StorageResult<()> {
        let keys = self.scan(&format!("{}:*", escape_glob(&self.namespace))).await?;
        let removed = self.delete_all(&keys).await?;
        debug!(backend = %self.name, removed, "namespace cleared");
        Ok(())
    }
}

fn unavailable(backend: &str, e: RedisError) -> StorageError {
    StorageError::Unavailable {
        backend: backend.to_string(),
        reason: e.to_string(),
    }
}

fn namespaced(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

fn encode(record: &CacheRecord) -> StorageResult<Vec<u8>> {
    Ok(record.to_bytes()?)
}

fn decode(raw: &[u8]) -> StorageResult<CacheRecord> {
    Ok(CacheRecord::from_bytes(raw)?)
}

// Redis only takes whole seconds here; round up so a record never expires early.
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

// `SCAN MATCH` narrows by prefix where it can; regexes are filtered after the scan.
fn scan_match(namespace: &str, pattern: &KeyPattern) -> String {
    let namespace = escape_glob(namespace);
    match pattern {
        KeyPattern::Prefix(prefix) => format!("{namespace}:{}*", escape_glob(prefix)),
        KeyPattern::Regex(_) => format!("{namespace}:*"),
    }
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
