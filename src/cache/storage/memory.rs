//! Bounded in-memory backend.
//!
//! Entries live in a recency-ordered map behind one mutex, held only for the map
//! operation itself. Expiry is checked lazily on every read; a full sweep of expired
//! entries runs at most once per `sweep_interval`, piggybacked on writes. When a write
//! finds the map full, a batch of least recently used entries is evicted at once so the
//! next `evict_batch - 1` inserts do not have to evict again.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{KeyPattern, Storage, StorageError, StorageResult};
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::config::{ConfigError, MemorySettings};
use crate::cache::record::CacheRecord;

struct Slot {
    record: CacheRecord,
    expires_at: SystemTime,
}

impl Slot {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

struct Inner {
    entries: LruCache<String, Slot>,
    last_sweep: SystemTime,
}

/// In-process [`Storage`] with a maximum entry count and LRU eviction.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, SystemTime};
/// use rttp_cache::cache::{CacheRecord, MemoryStorage, Storage};
///
/// # async fn example() {
/// let storage = MemoryStorage::new(1_000).unwrap();
/// let record = CacheRecord {
///     key: "greeting".into(),
///     status_code: 200,
///     headers: Default::default(),
///     body: "hello".into(),
///     stored_at: SystemTime::now(),
///     max_age: Duration::from_secs(60),
/// };
/// storage.set("greeting", record, Duration::from_secs(60)).await.unwrap();
/// assert!(storage.get("greeting").await.unwrap().is_some());
/// # }
/// ```
pub struct MemoryStorage {
    name: String,
    max_entries: usize,
    evict_batch: usize,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    /// A backend holding at most `max_entries`, with default batching and the system clock.
    pub fn new(max_entries: usize) -> Result<Self, ConfigError> {
        let settings = MemorySettings {
            max_entries,
            ..MemorySettings::default()
        };
        Self::from_settings(&settings, Arc::new(SystemClock))
    }

    pub fn from_settings(settings: &MemorySettings, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        settings.validate()?;
        let now = clock.now();
        Ok(Self {
            name: "memory".to_string(),
            max_entries: settings.max_entries,
            evict_batch: settings.effective_evict_batch(),
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs),
            clock,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                last_sweep: now,
            }),
        })
    }

    /// Rename the backend as it appears in logs.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.inner.get_mut().last_sweep = clock.now();
        self.clock = clock;
        self
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if a live entry exists for `key`. Does not touch recency.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.inner
            .lock()
            .entries
            .peek(key)
            .is_some_and(|slot| !slot.is_expired(now))
    }

    /// Remove every expired entry now, regardless of the sweep interval.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_sweep = now;
        remove_expired(&mut inner.entries, now)
    }

    fn sweep_if_due(&self, inner: &mut Inner, now: SystemTime) {
        let due = now
            .duration_since(inner.last_sweep)
            .is_ok_and(|elapsed| elapsed >= self.sweep_interval);
        if !due {
            return;
        }
        inner.last_sweep = now;
        let removed = remove_expired(&mut inner.entries, now);
        if removed > 0 {
            debug!(backend = %self.name, removed, "swept expired entries");
        }
    }
}

fn remove_expired(entries: &mut LruCache<String, Slot>, now: SystemTime) -> usize {
    let expired: Vec<String> = entries
        .iter()
        .filter(|(_, slot)| slot.is_expired(now))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        entries.pop(key);
    }
    expired.len()
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> StorageResult<Option<CacheRecord>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.peek(key) {
            None => return Ok(None),
            Some(slot) => slot.is_expired(now),
        };
        if expired {
            inner.entries.pop(key);
            trace!(backend = %self.name, key, "dropped expired entry on read");
            return Ok(None);
        }

        Ok(inner.entries.get(key).map(|slot| slot.record.clone()))
    }

    async fn set(&self, key: &str, record: CacheRecord, ttl: Duration) -> StorageResult<()> {
        if ttl.is_zero() {
            return Err(StorageError::InvalidTtl);
        }
        let now = self.clock.now();
        // Saturate absurd TTLs instead of overflowing SystemTime.
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX.into()));

        let mut inner = self.inner.lock();
        self.sweep_if_due(&mut inner, now);

        if !inner.entries.contains(key) && inner.entries.len() >= self.max_entries {
            let mut evicted = 0;
            while evicted < self.evict_batch && inner.entries.pop_lru().is_some() {
                evicted += 1;
            }
            debug!(backend = %self.name, evicted, "evicted least recently used entries");
        }

        inner
            .entries
            .put(key.to_string(), Slot { record, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<usize> {
        let now = self.clock.now();
        let removed = self.inner.lock().entries.pop(key);
        Ok(usize::from(removed.is_some_and(|slot| !slot.is_expired(now))))
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> StorageResult<usize> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in &keys {
            if inner.entries.pop(key).is_some_and(|slot| !slot.is_expired(now)) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.lock().entries.clear();
        debug!(backend = %self.name, "storage cleared");
        Ok(())
    }
}
