//! In-memory TTL cache
//!
//! Key-to-JSON store with expiry on read, capacity eviction that spares
//! persistent entries, glob lookup, and eviction notifications.

use crate::entry::CacheEntry;
use crate::pattern::PatternSet;
use accord_core::{validate, AccordResult};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback invoked with (key, value) when an entry leaves the cache
pub type EvictionCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Capacity; insertions beyond this evict the oldest non-persistent entries
    pub max_entries: usize,
    /// TTL applied by `set` when none is given
    pub default_ttl: Duration,
    /// Minimum interval between opportunistic expired-entry sweeps
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub persistent_entries: usize,
    pub compiled_patterns: usize,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    insert_seq: u64,
    last_cleanup: Instant,
}

/// Thread-safe in-memory TTL cache
///
/// Lookups take the read lock; expiry removal and mutation take the write
/// lock. Eviction callbacks run outside any lock on a snapshot of the
/// removed entries.
pub struct MemoryCache {
    config: CacheConfig,
    inner: RwLock<Inner>,
    patterns: PatternSet,
    callbacks: RwLock<Vec<EvictionCallback>>,
}

impl MemoryCache {
    /// Create a cache with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with the given configuration
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                insert_seq: 0,
                last_cleanup: Instant::now(),
            }),
            patterns: PatternSet::new(),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Register an eviction observer
    pub fn on_eviction(&self, callback: EvictionCallback) {
        self.callbacks.write().push(callback);
    }

    /// Store a value with the default TTL
    ///
    /// # Errors
    /// Returns a validation error for an empty key.
    pub fn set(&self, key: &str, value: Value) -> AccordResult<()> {
        self.set_with_ttl(key, value, self.config.default_ttl)
    }

    /// Store a value with an explicit TTL
    ///
    /// # Errors
    /// Returns a validation error for an empty key.
    pub fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> AccordResult<()> {
        validate::cache_key(key)?;

        let evicted = {
            let mut inner = self.inner.write();
            let evicted = self.make_room(&mut inner, key);
            inner.insert_seq += 1;
            let seq = inner.insert_seq;
            inner.entries.insert(key.to_string(), CacheEntry::new(value, ttl, seq));
            evicted
        };

        self.notify(evicted);
        tracing::trace!(key = %key, "Cache entry set");
        Ok(())
    }

    /// Store a value exempt from expiry and eviction
    ///
    /// # Errors
    /// Returns a validation error for an empty key.
    pub fn set_persistent(&self, key: &str, value: Value) -> AccordResult<()> {
        validate::cache_key(key)?;

        let evicted = {
            let mut inner = self.inner.write();
            let evicted = self.make_room(&mut inner, key);
            inner.insert_seq += 1;
            let seq = inner.insert_seq;
            inner
                .entries
                .insert(key.to_string(), CacheEntry::persistent(value, seq));
            evicted
        };

        self.notify(evicted);
        tracing::trace!(key = %key, "Persistent cache entry set");
        Ok(())
    }

    /// Fetch a value; an expired entry is removed and yields None
    pub fn get(&self, key: &str) -> Option<Value> {
        {
            let inner = self.inner.read();
            match inner.entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Entry was present but expired: remove it under the write lock
        let removed = {
            let mut inner = self.inner.write();
            match inner.entries.get(key) {
                Some(entry) if entry.is_expired() => inner
                    .entries
                    .remove(key)
                    .map(|e| (key.to_string(), e.value)),
                // Re-set concurrently between the locks
                Some(entry) => return Some(entry.value.clone()),
                None => None,
            }
        };

        self.notify(removed.into_iter().collect());
        None
    }

    /// Whether a non-expired entry exists for the key
    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove an entry, returning whether one was present
    pub fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            inner.entries.remove(key).map(|e| (key.to_string(), e.value))
        };

        let was_present = removed.is_some();
        self.notify(removed.into_iter().collect());
        was_present
    }

    /// Remove every entry
    pub fn clear(&self) {
        let drained: Vec<(String, Value)> = {
            let mut inner = self.inner.write();
            inner
                .entries
                .drain()
                .map(|(k, e)| (k, e.value))
                .collect()
        };

        tracing::debug!(count = drained.len(), "Cache cleared");
        self.notify(drained);
    }

    /// Non-expired keys matching an anchored glob pattern
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        self.maybe_sweep();

        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .filter(|(k, _)| self.patterns.matches(pattern, k))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Non-expired (key, value) pairs matching an anchored glob pattern
    pub fn get_matching(&self, pattern: &str) -> Vec<(String, Value)> {
        self.maybe_sweep();

        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .filter(|(k, _)| self.patterns.matches(pattern, k))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Fetch several keys at once; absent and expired keys are omitted
    pub fn get_multiple(&self, keys: &[&str]) -> HashMap<String, Value> {
        let inner = self.inner.read();
        keys.iter()
            .filter_map(|k| {
                inner
                    .entries
                    .get(*k)
                    .filter(|e| !e.is_expired())
                    .map(|e| ((*k).to_string(), e.value.clone()))
            })
            .collect()
    }

    /// Store several entries with a shared TTL; empty keys are skipped
    pub fn set_multiple(&self, entries: Vec<(String, Value)>, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let mut evicted = Vec::new();

        {
            let mut inner = self.inner.write();
            for (key, value) in entries {
                if key.is_empty() {
                    continue;
                }
                evicted.extend(self.make_room(&mut inner, &key));
                inner.insert_seq += 1;
                let seq = inner.insert_seq;
                inner.entries.insert(key, CacheEntry::new(value, ttl, seq));
            }
        }

        self.notify(evicted);
    }

    /// Remove several keys, returning how many were present
    pub fn remove_multiple(&self, keys: &[&str]) -> usize {
        let removed: Vec<(String, Value)> = {
            let mut inner = self.inner.write();
            keys.iter()
                .filter_map(|k| inner.entries.remove(*k).map(|e| ((*k).to_string(), e.value)))
                .collect()
        };

        let count = removed.len();
        self.notify(removed);
        count
    }

    /// Remaining TTL for a key
    ///
    /// Outer None: key absent or expired. Inner None: entry never expires.
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let inner = self.inner.read();
        let entry = inner.entries.get(key)?;
        if entry.is_expired() {
            return None;
        }
        Some(entry.remaining_ttl())
    }

    /// Replace the TTL of an existing non-persistent entry
    ///
    /// `None` makes the entry never expire. Persistent entries are unaffected.
    /// Returns whether the entry was updated.
    pub fn update_ttl(&self, key: &str, ttl: Option<Duration>) -> bool {
        let mut inner = self.inner.write();
        match inner.entries.get_mut(key) {
            Some(entry) if !entry.persistent && !entry.is_expired() => {
                entry.expires_at = ttl
                    .and_then(|d| chrono::Duration::from_std(d).ok())
                    .and_then(|d| Utc::now().checked_add_signed(d));
                true
            }
            _ => false,
        }
    }

    /// Serialize all non-expired entries plus configuration
    pub fn export(&self) -> Value {
        let inner = self.inner.read();

        let mut entries = serde_json::Map::new();
        for (key, entry) in &inner.entries {
            if !entry.is_expired() {
                entries.insert(key.clone(), entry.to_export());
            }
        }

        serde_json::json!({
            "entries": entries,
            "config": {
                "max_entries": self.config.max_entries,
                "default_ttl": self.config.default_ttl.as_secs(),
                "cleanup_interval": self.config.cleanup_interval.as_secs(),
            },
        })
    }

    /// Load entries from an export
    ///
    /// With `overwrite` false, keys already present are skipped. Returns the
    /// number of entries imported; malformed entries are logged and skipped.
    pub fn import(&self, data: &Value, overwrite: bool) -> usize {
        let Some(entries) = data.get("entries").and_then(Value::as_object) else {
            return 0;
        };

        let mut imported = 0;
        let mut evicted = Vec::new();

        {
            let mut inner = self.inner.write();
            for (key, entry_data) in entries {
                if key.is_empty() {
                    continue;
                }
                if !overwrite && inner.entries.contains_key(key) {
                    continue;
                }

                inner.insert_seq += 1;
                let seq = inner.insert_seq;
                match CacheEntry::from_export(entry_data, seq) {
                    Some(entry) => {
                        evicted.extend(self.make_room(&mut inner, key));
                        inner.entries.insert(key.clone(), entry);
                        imported += 1;
                    }
                    None => {
                        tracing::warn!(key = %key, "Skipping malformed cache import entry");
                    }
                }
            }
        }

        self.notify(evicted);
        tracing::debug!(imported = imported, "Cache import completed");
        imported
    }

    /// Number of stored entries, including not-yet-swept expired ones
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            total_entries: inner.entries.len(),
            persistent_entries: inner.entries.values().filter(|e| e.persistent).count(),
            compiled_patterns: self.patterns.len(),
        }
    }

    /// Drop every expired entry now, regardless of the sweep interval
    pub fn force_cleanup(&self) -> usize {
        let removed = self.sweep_expired();
        let count = removed.len();
        self.notify(removed);
        count
    }

    /// Evict the oldest non-persistent entries until a new key fits.
    /// Returns the evicted pairs for notification outside the lock.
    fn make_room(&self, inner: &mut Inner, incoming_key: &str) -> Vec<(String, Value)> {
        if inner.entries.contains_key(incoming_key) || inner.entries.len() < self.config.max_entries
        {
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while inner.entries.len() >= self.config.max_entries {
            let victim = inner
                .entries
                .iter()
                .filter(|(_, e)| !e.persistent)
                .min_by_key(|(_, e)| e.access_seq)
                .map(|(k, _)| k.clone());

            match victim {
                Some(key) => {
                    if let Some(entry) = inner.entries.remove(&key) {
                        evicted.push((key, entry.value));
                    }
                }
                // Everything left is persistent; allow growth past capacity
                None => break,
            }
        }

        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Evicted cache entries");
        }
        evicted
    }

    fn maybe_sweep(&self) {
        let due = {
            let inner = self.inner.read();
            inner.last_cleanup.elapsed() >= self.config.cleanup_interval
        };
        if due {
            let removed = self.sweep_expired();
            self.notify(removed);
        }
    }

    fn sweep_expired(&self) -> Vec<(String, Value)> {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        let removed: Vec<(String, Value)> = expired
            .into_iter()
            .filter_map(|k| inner.entries.remove(&k).map(|e| (k, e.value)))
            .collect();

        inner.last_cleanup = Instant::now();
        removed
    }

    fn notify(&self, removed: Vec<(String, Value)>) {
        if removed.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read().clone();
        for (key, value) in &removed {
            for callback in &callbacks {
                callback(key, value);
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.len())
            .field("max_entries", &self.config.max_entries)
            .finish()
    }
}
