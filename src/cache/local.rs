//! In-process LRU tier with per-entry TTL.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use crate::metrics::metrics;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub tags: HashSet<String>,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Counters and occupancy, derived on demand.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: usize,
}

/// Bounded LRU map with lazy TTL expiry and a tag index.
///
/// All methods take `&mut self`; the cache manager wraps this in a single
/// mutex so LRU reordering and eviction stay atomic with the lookup. The
/// tag index mirrors the distributed one so tag invalidation keeps working
/// when the shared store is down.
pub struct LocalCache {
    entries: LruCache<String, CacheEntry>,
    /// tag -> keys currently cached under it
    tag_index: HashMap<String, HashSet<String>>,
    /// tag -> longest TTL seconds seen, drives the distributed index expiry
    tag_ttls: HashMap<String, u64>,
    max_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl LocalCache {
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::new(1_000).unwrap());
        Self {
            entries: LruCache::new(capacity),
            tag_index: HashMap::new(),
            tag_ttls: HashMap::new(),
            max_size: capacity.get(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look a key up, refreshing LRU order. Expired entries are removed and
    /// read as absent. Misses are not counted here; the manager records a
    /// miss only when the distributed tier also comes up empty.
    pub fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        self.hits += 1;
        Some(entry.value.clone())
    }

    /// Insert a value, evicting the least-recently-used entry when full.
    pub fn insert(
        &mut self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
        tags: HashSet<String>,
    ) {
        for tag in &tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
            let longest = self.tag_ttls.entry(tag.clone()).or_insert(0);
            *longest = (*longest).max(ttl.as_secs());
        }

        let entry = CacheEntry {
            value,
            tags,
            inserted_at: Instant::now(),
            ttl,
            access_count: 0,
        };
        if let Some((old_key, old_entry)) = self.entries.push(key.to_string(), entry) {
            // push returns the displaced pair: either the previous value for
            // this key or the evicted LRU victim.
            if old_key != key {
                self.evictions += 1;
                metrics().record_cache_eviction();
                self.unlink_tags(&old_key, &old_entry.tags);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.unlink_tags(key, &entry.tags);
                true
            }
            None => false,
        }
    }

    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tag_index
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Longest TTL seconds recorded for a tag since startup.
    pub fn longest_ttl_for_tag(&self, tag: &str) -> u64 {
        self.tag_ttls.get(tag).copied().unwrap_or(0)
    }

    /// Drop the index entry for a tag. Entries cached under it are not
    /// touched; the manager removes those first.
    pub fn clear_tag(&mut self, tag: &str) {
        self.tag_index.remove(tag);
    }

    pub fn note_distributed_hit(&mut self) {
        self.hits += 1;
    }

    pub fn note_full_miss(&mut self) {
        self.misses += 1;
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate: if total > 0 {
                self.hits as f64 / total as f64
            } else {
                0.0
            },
            evictions: self.evictions,
            size: self.entries.len(),
            max_size: self.max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.tag_index.clear();
    }

    fn unlink_tags(&mut self, key: &str, tags: &HashSet<String>) {
        for tag in tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }
}
