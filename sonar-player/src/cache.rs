//! Decoded-buffer cache shared between sounds
//!
//! Bounded by entry count with least-recently-used eviction; entries older
//! than the TTL are treated as absent and dropped on the next lookup. The
//! cache does not de-duplicate concurrent misses: two requesters missing
//! the same key both fetch and decode, and the later insert wins.

use crate::audio::types::SampleBuffer;
use crate::config::CacheConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Counters for cache behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their TTL ran out
    pub expirations: u64,
}

struct CacheEntry {
    buffer: Arc<SampleBuffer>,
    inserted_at: Instant,
    last_used: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
    stats: CacheStats,
}

/// Source locator → decoded buffer
pub struct DecodeCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    ttl: Duration,
}

impl DecodeCache {
    /// Creates a cache holding at most `capacity` buffers for `ttl` each
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity,
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl
    }

    /// Looks up a buffer, refreshing its recency on a hit
    pub fn get(&self, src: &str) -> Option<Arc<SampleBuffer>> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let expired = inner.entries.get(src).map(|entry| self.is_expired(entry, now));
        let Some(expired) = expired else {
            inner.stats.misses += 1;
            return None;
        };

        if expired {
            inner.entries.remove(src);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            debug!("Cache entry expired: {}", src);
            return None;
        }

        inner.stats.hits += 1;
        let entry = inner.entries.get_mut(src)?;
        entry.last_used = tick;
        Some(Arc::clone(&entry.buffer))
    }

    /// Stores a buffer, replacing any previous entry for `src`
    pub fn insert(&self, src: impl Into<String>, buffer: Arc<SampleBuffer>) {
        if self.capacity == 0 {
            return;
        }

        let src = src.into();
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(&src) {
            self.make_room(inner, now);
        }

        inner.entries.insert(
            src,
            CacheEntry {
                buffer,
                inserted_at: now,
                last_used: tick,
            },
        );
    }

    fn make_room(&self, inner: &mut CacheInner, now: Instant) {
        if inner.entries.len() < self.capacity {
            return;
        }

        // Expired entries go first
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
        inner.stats.expirations += (before - inner.entries.len()) as u64;

        while inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    debug!("Evicting cached buffer: {}", key);
                    inner.entries.remove(&key);
                    inner.stats.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// True if `src` is cached and not expired (does not touch recency)
    pub fn contains(&self, src: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(src)
            .map(|entry| !self.is_expired(entry, now))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for DecodeCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl std::fmt::Debug for DecodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}
