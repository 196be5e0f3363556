//! Bounded response cache with LRU eviction and per-entry TTL.
//!
//! Both limits apply independently: an entry leaves the cache when it is the
//! least recently used one at capacity, or when its TTL has elapsed,
//! whichever comes first. Expired entries are never returned; they are
//! dropped lazily on lookup or by [`ResponseCache::purge_expired`].
//!
//! All bookkeeping sits behind one short mutex. Values should be cheap to
//! clone (`Arc`-backed) since a hit clones the value out of the lock.
//!
//! Callers embed a version token (the index generation) in their keys, so a
//! value computed against an older snapshot can never answer a lookup made
//! against a newer one.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    /// `None` when `now + ttl` is past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSummary {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Values stored.
    pub inserts: u64,
    /// Entries pushed out by capacity.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Entries removed by invalidation.
    pub invalidations: u64,
    /// Live entry count, expired-but-unpurged entries included.
    pub entries: usize,
    /// Maximum entry count.
    pub capacity: usize,
    /// `hits / (hits + misses)`, 0 when there were no lookups.
    pub hit_rate: f64,
}

/// LRU + TTL cache keyed by strings.
pub struct ResponseCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    default_ttl: Duration,
    stats: CacheStats,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            stats: CacheStats::default(),
        }
    }

    /// TTL applied by [`insert`](Self::insert).
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Store `value` under `key` for `ttl`.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.put_at(key.into(), value, ttl, Instant::now());
    }

    /// Store `value` with the default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.put(key, value, self.default_ttl);
    }

    /// Remove every entry whose key satisfies `predicate`. Returns the count.
    pub fn invalidate(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        drop(entries);
        self.record_invalidation(doomed.len())
    }

    /// Remove everything. Returns the count.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        drop(entries);
        self.record_invalidation(removed)
    }

    /// Drop expired entries now rather than on their next lookup.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        self.stats
            .expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Live and expired entries not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Counters since construction.
    pub fn stats(&self) -> CacheStatsSummary {
        let (entries, capacity) = {
            let guard = self.entries.lock();
            (guard.len(), guard.cap().get())
        };
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        CacheStatsSummary {
            hits,
            misses,
            inserts: self.stats.inserts.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            entries,
            capacity,
            hit_rate,
        }
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            },
            Some(entry) if !entry.is_expired(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            },
            Some(_) => {},
        }
        entries.pop(key);
        self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        debug!("cache entry expired: {key}");
        None
    }

    pub(crate) fn put_at(&self, key: String, value: V, ttl: Duration, now: Instant) {
        let entry = CacheEntry {
            value,
            expires_at: now.checked_add(ttl),
        };
        let displaced = self.entries.lock().push(key.clone(), entry);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("cache evicted LRU entry: {old_key}");
            }
        }
    }

    fn record_invalidation(&self, removed: usize) -> usize {
        self.stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            debug!("cache invalidated {removed} entries");
        }
        removed
    }
}
