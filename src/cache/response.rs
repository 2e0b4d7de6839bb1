use super::backing::KeyValueStore;
use crate::core::clock::{Clock, elapsed_millis};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Prefix applied to keys written to the backing store.
const BACKING_PREFIX: &str = "crm-sync:cache:";

/// Derives the cache key of a request from its method, URL and body.
pub fn request_key(method: &str, url: &str, body: Option<&JsonValue>) -> String {
    match body {
        Some(body) if !body.is_null() => format!("{} {} {}", method.to_uppercase(), url, body),
        _ => format!("{} {}", method.to_uppercase(), url),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<T> {
    value: T,
    stored_at: DateTime<Utc>,
    ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        elapsed_millis(self.stored_at, now) > self.ttl_ms
    }
}

/// TTL-bounded, size-bounded cache of fetch responses.
///
/// When full, the entry stored longest ago is evicted; reads never refresh an
/// entry's age. All operations are infallible: problems with
/// the backing store are logged and the cache keeps working in memory.
pub struct ResponseCache<T> {
    entries: Mutex<LruCache<String, CacheEntry<T>>>,
    backing: Option<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl<T> ResponseCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send,
{
    pub fn new(max_entries: NonZeroUsize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(max_entries)),
            backing: None,
            clock,
            default_ttl,
        }
    }

    /// Mirrors entries into `store`.
    pub fn with_backing(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.backing = Some(store);
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the cached value unless it is missing or expired.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        {
            let mut entries = self.entries();
            let expired = match entries.peek(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => true,
                None => false,
            };
            if expired {
                entries.pop(key);
                drop(entries);
                debug!("cache entry expired: {}", key);
                self.backing_remove(key);
                return None;
            }
        }

        let entry = self.backing_get(key)?;
        if entry.is_expired(now) {
            self.backing_remove(key);
            return None;
        }
        let value = entry.value.clone();
        self.store_in_memory(key.to_string(), entry);
        Some(value)
    }

    /// Stores `value` with the default TTL.
    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.set(key, value, self.default_ttl);
    }

    pub fn set(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
        };
        self.backing_set(&key, &entry);
        self.store_in_memory(key, entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries().pop(key).is_some();
        self.backing_remove(key);
        removed
    }

    /// Drops every entry whose key contains `pattern`. Returns how many
    /// in-memory entries were removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let removed = {
            let mut entries = self.entries();
            let doomed: Vec<String> = entries
                .iter()
                .filter(|(key, _)| key.contains(pattern))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &doomed {
                entries.pop(key);
            }
            doomed.len()
        };

        if let Some(backing) = &self.backing {
            match backing.keys() {
                Ok(keys) => {
                    for key in keys {
                        if let Some(plain) = key.strip_prefix(BACKING_PREFIX) {
                            if plain.contains(pattern) {
                                self.backing_remove(plain);
                            }
                        }
                    }
                }
                Err(err) => warn!("cache backing unavailable, skipping invalidation: {}", err),
            }
        }

        if removed > 0 {
            debug!("invalidated {} cache entries matching '{}'", removed, pattern);
        }
        removed
    }

    /// Removes every expired in-memory entry.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = {
            let mut entries = self.entries();
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                entries.pop(key);
            }
            expired
        };
        for key in &expired {
            self.backing_remove(key);
        }
        expired.len()
    }

    /// Number of entries held in memory, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `key` is held in memory, without expiry checks or side effects.
    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains(key)
    }

    pub fn clear(&self) {
        let keys: Vec<String> = {
            let mut entries = self.entries();
            let keys = entries.iter().map(|(key, _)| key.clone()).collect();
            entries.clear();
            keys
        };
        for key in &keys {
            self.backing_remove(key);
        }
    }

    /// Inserts `entry`, first evicting the entry stored longest ago when the
    /// cache is full. Entries restored from the backing store keep their
    /// original age, so they are not mistaken for fresh ones.
    fn store_in_memory(&self, key: String, entry: CacheEntry<T>) {
        let evicted = {
            let mut entries = self.entries();
            let evicted = if !entries.contains(&key) && entries.len() >= entries.cap().get() {
                oldest_key(&entries).and_then(|oldest| entries.pop_entry(&oldest))
            } else {
                None
            };
            entries.push(key, entry);
            evicted
        };
        if let Some((evicted_key, _)) = evicted {
            debug!("cache full, evicted oldest entry: {}", evicted_key);
            self.backing_remove(&evicted_key);
        }
    }

    fn backing_get(&self, key: &str) -> Option<CacheEntry<T>> {
        let backing = self.backing.as_ref()?;
        let raw = match backing.get(&backing_key(key)) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("cache backing read failed for '{}': {}", key, err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("discarding unreadable cache entry '{}': {}", key, err);
                self.backing_remove(key);
                None
            }
        }
    }

    fn backing_set(&self, key: &str, entry: &CacheEntry<T>) {
        let Some(backing) = &self.backing else {
            return;
        };
        let result = serde_json::to_string(entry)
            .map_err(crate::core::SyncError::from)
            .and_then(|raw| backing.set(&backing_key(key), raw));
        if let Err(err) = result {
            warn!("cache backing write failed for '{}': {}", key, err);
        }
    }

    fn backing_remove(&self, key: &str) {
        if let Some(backing) = &self.backing {
            if let Err(err) = backing.remove(&backing_key(key)) {
                warn!("cache backing delete failed for '{}': {}", key, err);
            }
        }
    }
}

/// Key with the earliest `stored_at`; ties go to the least recently pushed.
fn oldest_key<T>(entries: &LruCache<String, CacheEntry<T>>) -> Option<String> {
    entries
        .iter()
        .rev()
        .reduce(|oldest, candidate| {
            if candidate.1.stored_at < oldest.1.stored_at {
                candidate
            } else {
                oldest
            }
        })
        .map(|(key, _)| key.clone())
}

fn backing_key(key: &str) -> String {
    format!("{}{}", BACKING_PREFIX, key)
}
