//! In-memory TTL response cache
//!
//! Bounded key → value store whose entries expire a fixed time after insertion.
//! The cache is an optimization layer only: a disabled cache reports every key as
//! absent and ignores writes, and no operation returns an error.
//!
//! Keys are content-addressed (see [`derive_key`]) so two requests carrying identical
//! document text share results for the same operation.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Derive the cache key for `text` under `operation`
///
/// The full text is hashed (SHA-256) after trimming surrounding whitespace; the
/// operation tag is kept as a readable prefix. The digest has fixed length, so two
/// keys are equal only when both the operation tag and the text digest are equal.
pub fn derive_key(text: &str, operation: &str) -> String {
    let digest = Sha256::digest(text.trim().as_bytes());
    format!("{}:{:x}", operation, digest)
}

/// Snapshot of cache configuration and occupancy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    /// Live (unexpired) entries
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    /// Insertion sequence number; matches exactly one record in `CacheState::order`
    seq: u64,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion order, oldest first. Records whose seq no longer matches the
    /// entry (overwritten or removed keys) are skipped and compacted lazily.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
        }
    }

    fn purge_expired(&mut self, ttl: Duration, now: Instant) {
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
        self.compact();
    }

    /// Remove the least-recently-inserted live entry
    fn evict_oldest(&mut self) -> bool {
        while let Some((key, seq)) = self.order.pop_front() {
            let is_current = self
                .entries
                .get(&key)
                .map(|entry| entry.seq == seq)
                .unwrap_or(false);
            if is_current {
                self.entries.remove(&key);
                return true;
            }
        }
        false
    }

    fn compact(&mut self) {
        if self.order.len() > self.entries.len() * 2 + 16 {
            let entries = &self.entries;
            self.order.retain(|(key, seq)| {
                entries.get(key).map(|entry| entry.seq == *seq).unwrap_or(false)
            });
        }
    }
}

/// Thread-safe TTL cache
///
/// `get` returns clones; callers never hold references into the cache.
pub struct TtlCache<V> {
    enabled: bool,
    max_size: usize,
    ttl: Duration,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache holding at most `max_size` entries for `ttl_seconds` each
    pub fn new(enabled: bool, max_size: usize, ttl_seconds: u64) -> Self {
        Self::with_ttl(enabled, max_size, Duration::from_secs(ttl_seconds))
    }

    /// Create a cache with a sub-second TTL
    pub fn with_ttl(enabled: bool, max_size: usize, ttl: Duration) -> Self {
        Self {
            enabled,
            max_size: max_size.max(1),
            ttl,
            state: Mutex::new(CacheState::new()),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self::with_ttl(false, 1, Duration::ZERO)
    }

    /// Look up `key`; expired entries are removed and reported absent
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }

        let now = Instant::now();
        let mut state = self.lock();
        let expired = match state.entries.get(key) {
            Some(entry) if now.saturating_duration_since(entry.inserted_at) < self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
            state.compact();
        }
        None
    }

    /// Store `value` under `key`, evicting the oldest entry when full
    pub fn set(&self, key: impl Into<String>, value: V) {
        if !self.enabled {
            return;
        }

        let key = key.into();
        let now = Instant::now();
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            state.purge_expired(self.ttl, now);
            while state.entries.len() >= self.max_size {
                if !state.evict_oldest() {
                    break;
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.push_back((key.clone(), seq));
        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                seq,
            },
        );
        state.compact();
    }

    pub fn delete(&self, key: &str) {
        if !self.enabled {
            return;
        }
        let mut state = self.lock();
        state.entries.remove(key);
        state.compact();
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        if !self.enabled {
            return CacheStats {
                enabled: false,
                size: 0,
                max_size: self.max_size,
                ttl_seconds: self.ttl.as_secs(),
            };
        }

        let mut state = self.lock();
        state.purge_expired(self.ttl, Instant::now());
        CacheStats {
            enabled: true,
            size: state.entries.len(),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
        }
    }

    // A panic while holding the lock leaves the map structurally intact, so keep serving.
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
