// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU-bounded key-value cache with a per-entry time-to-live.
//!
//! Used by the key manager for personal and workspace keys. Entries older
//! than the TTL are treated as absent and evicted on the next lookup.

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Cached value + insertion timestamp.
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// In-process LRU cache whose entries expire after a fixed TTL.
pub struct TtlCache<K: Hash + Eq, V: Clone> {
    cache: Mutex<LruCache<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// Create a new cache with the given capacity and TTL.
    ///
    /// - `capacity`: Max number of entries kept (least recently used evicted first).
    /// - `ttl`: Time-to-live for each entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a live entry.
    ///
    /// Returns `None` if not cached or expired.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
            // Expired, drop it
            cache.pop(key);
        }
        None
    }

    /// Store a value, replacing any previous entry for the key.
    pub fn insert(&self, key: K, value: V) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CacheEntry {
                    value,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Drop the entry for a key. Returns whether an entry was present.
    pub fn invalidate<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.cache.lock() {
            Ok(mut cache) => cache.pop(key).is_some(),
            Err(_) => false,
        }
    }

    /// Drop every entry whose key matches. Returns how many were dropped.
    pub fn invalidate_where(&self, mut matches: impl FnMut(&K) -> bool) -> usize
    where
        K: Clone,
    {
        let Ok(mut cache) = self.cache.lock() else {
            return 0;
        };
        let doomed: Vec<K> = cache
            .iter()
            .filter(|(key, _)| matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            cache.pop(key);
        }
        doomed.len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_put_and_get() {
        let cache = TtlCache::new(10, Duration::from_secs(300));
        assert!(cache.get(&"user-1".to_string()).is_none());

        cache.insert("user-1".to_string(), 42u32);
        assert_eq!(cache.get(&"user-1".to_string()), Some(42));
    }

    #[test]
    fn cache_invalidate() {
        let cache = TtlCache::new(10, Duration::from_secs(300));
        cache.insert("ws-a", vec![1u8, 2, 3]);
        assert!(cache.get(&"ws-a").is_some());

        assert!(cache.invalidate(&"ws-a"));
        assert!(cache.get(&"ws-a").is_none());
        assert!(!cache.invalidate(&"ws-a"));
    }

    #[test]
    fn invalidate_where_drops_matching_keys() {
        let cache = TtlCache::new(10, Duration::from_secs(300));
        cache.insert(("alice", "ws-a"), 1);
        cache.insert(("bob", "ws-a"), 2);
        cache.insert(("alice", "ws-b"), 3);

        assert_eq!(cache.invalidate_where(|(_, ws)| *ws == "ws-a"), 2);
        assert!(cache.get(&("alice", "ws-a")).is_none());
        assert!(cache.get(&("bob", "ws-a")).is_none());
        assert_eq!(cache.get(&("alice", "ws-b")), Some(3));
    }

    #[test]
    fn cache_ttl_expiry() {
        let cache = TtlCache::new(10, Duration::from_millis(1));
        cache.insert("ws-a", 1);

        // Wait for TTL to expire
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get(&"ws-a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_clear_drops_everything() {
        let cache = TtlCache::new(10, Duration::from_secs(300));
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.get(&"a").is_none());
        assert!(cache.get(&"b").is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = TtlCache::new(2, Duration::from_secs(300));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        assert!(cache.get(&"b").is_none());
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = TtlCache::new(0, Duration::from_secs(1));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
    }
}
