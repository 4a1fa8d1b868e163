//! Two-tier cache with tag invalidation
//!
//! This module provides:
//! - Tier-1: bounded in-process LRU with per-entry TTL
//! - Tier-2: the shared distributed store, written through on every set
//! - Tag to key-set indexes in both tiers for group invalidation
//!
//! Tier-1 removes network round-trips for hot keys; tier-2 keeps processes
//! consistent. Tier-1 is repopulated lazily on a tier-2 hit rather than
//! broadcast on every set. The cache is best-effort, never a source of
//! truth: tier-2 failures are logged and the caller is not interrupted.

mod local;

pub use local::{CacheEntry, CacheStats, LocalCache};

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::metrics::metrics;
use crate::store::SharedStore;

/// Tier-2 record. Remaining TTL on a hit is derived from `created_at` and
/// `ttl_seconds`, so repopulating tier-1 needs no extra store primitive.
#[derive(Debug, Serialize, Deserialize)]
struct DistributedRecord {
    value: serde_json::Value,
    tags: Vec<String>,
    created_at: i64,
    ttl_seconds: u64,
}

/// Which tier served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Local,
    Distributed,
}

fn value_key(key: &str) -> String {
    format!("cache:{key}")
}

fn tag_key(tag: &str) -> String {
    format!("cache:tag:{tag}")
}

/// Two-tier cache facade.
pub struct CacheManager {
    config: CacheConfig,
    local: Mutex<LocalCache>,
    store: SharedStore,
}

impl CacheManager {
    pub fn new(config: CacheConfig, store: SharedStore) -> Self {
        let local = Mutex::new(LocalCache::new(config.max_size));
        Self {
            config,
            local,
            store,
        }
    }

    /// Fetch a key, trying tier-1 then tier-2.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.get_with_tier(key).await.map(|(value, _)| value)
    }

    /// Like [`get`](Self::get), also reporting which tier served the hit.
    ///
    /// The tier-1 lock is released before the store round-trip and
    /// re-acquired only to repopulate, so local lookups never wait on the
    /// network. A tier-2 hit repopulates tier-1 with the remaining TTL.
    pub async fn get_with_tier(&self, key: &str) -> Option<(serde_json::Value, CacheTier)> {
        {
            let mut local = self.local.lock();
            if let Some(value) = local.get(key) {
                metrics().record_cache_hit("local");
                return Some((value, CacheTier::Local));
            }
        }

        let raw = match self.store.get(&value_key(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.record_miss(),
            Err(e) => {
                warn!(key = key, error = %e, "Distributed cache read failed");
                return self.record_miss();
            }
        };

        let record: DistributedRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = key, error = %e, "Discarding undecodable cache record");
                return self.record_miss();
            }
        };

        let remaining = record.created_at + record.ttl_seconds as i64 - Utc::now().timestamp();
        if remaining <= 0 {
            return self.record_miss();
        }

        let mut local = self.local.lock();
        local.insert(
            key,
            record.value.clone(),
            Duration::from_secs(remaining as u64),
            record.tags.iter().cloned().collect(),
        );
        local.note_distributed_hit();
        drop(local);

        metrics().record_cache_hit("distributed");
        debug!(key = key, remaining_secs = remaining, "Tier-1 repopulated from store");
        Some((record.value, CacheTier::Distributed))
    }

    /// Write a value through both tiers.
    ///
    /// Tagged sets also record the key under each tag's index; the
    /// distributed index expires at `tag_index_ttl_factor` times the longest
    /// TTL seen for that tag, so it neither outlives its members for long
    /// nor expires before them.
    pub async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl_secs: Option<u64>,
        tags: &[String],
    ) {
        let ttl_secs = ttl_secs.unwrap_or(self.config.default_ttl_secs);
        let tag_set: HashSet<String> = tags.iter().cloned().collect();

        let tag_expiries: Vec<(String, u64)> = {
            let mut local = self.local.lock();
            local.insert(
                key,
                value.clone(),
                Duration::from_secs(ttl_secs),
                tag_set.clone(),
            );
            tag_set
                .iter()
                .map(|tag| {
                    let longest = local.longest_ttl_for_tag(tag).max(ttl_secs);
                    (
                        tag.clone(),
                        longest * u64::from(self.config.tag_index_ttl_factor),
                    )
                })
                .collect()
        };

        let record = DistributedRecord {
            value,
            tags: tags.to_vec(),
            created_at: Utc::now().timestamp(),
            ttl_seconds: ttl_secs,
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to encode cache record");
                return;
            }
        };

        if let Err(e) = self
            .store
            .set_ex(&value_key(key), &raw, Duration::from_secs(ttl_secs))
            .await
        {
            warn!(key = key, error = %e, "Distributed cache write failed");
        }

        for (tag, expiry_secs) in tag_expiries {
            let index_key = tag_key(&tag);
            if let Err(e) = self.store.sadd(&index_key, key).await {
                warn!(tag = %tag, error = %e, "Tag index update failed");
                continue;
            }
            if let Err(e) = self
                .store
                .expire(&index_key, Duration::from_secs(expiry_secs))
                .await
            {
                warn!(tag = %tag, error = %e, "Tag index expiry update failed");
            }
        }
    }

    /// Remove a single key from both tiers.
    pub async fn invalidate(&self, key: &str) {
        self.local.lock().remove(key);
        if let Err(e) = self.store.delete(&value_key(key)).await {
            warn!(key = key, error = %e, "Distributed cache delete failed");
        }
    }

    /// Remove every key associated with any of the tags, in both tiers,
    /// then clear the tag indexes themselves. Returns the number of
    /// distinct keys removed.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        let mut keys: HashSet<String> = HashSet::new();

        for tag in tags {
            keys.extend(self.local.lock().keys_for_tag(tag));
            match self.store.smembers(&tag_key(tag)).await {
                Ok(members) => keys.extend(members),
                Err(e) => {
                    warn!(tag = %tag, error = %e, "Tag index read failed, invalidating tier-1 only")
                }
            }
        }

        for key in &keys {
            self.invalidate(key).await;
        }

        for tag in tags {
            self.local.lock().clear_tag(tag);
            if let Err(e) = self.store.delete(&tag_key(tag)).await {
                warn!(tag = %tag, error = %e, "Tag index delete failed");
            }
        }

        debug!(tags = ?tags, removed = keys.len(), "Tag invalidation completed");
        keys.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.local.lock().stats()
    }

    /// Drop every tier-1 entry. Distributed records are untouched.
    pub fn clear_local(&self) {
        self.local.lock().clear();
    }

    fn record_miss(&self) -> Option<(serde_json::Value, CacheTier)> {
        self.local.lock().note_full_miss();
        metrics().record_cache_miss();
        None
    }
}
