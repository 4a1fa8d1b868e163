//! In-process store backend.
//!
//! Single-node stand-in for Redis with the same observable semantics:
//! TTL expiry, set membership, and atomic sliding-window updates. Atomicity
//! comes from one mutex over the whole keyspace, which is plenty at the
//! request rates a single process sees.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{StoreError, WindowOutcome, WindowUsage};

#[derive(Debug, Default)]
struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<String, ValueEntry>,
    sets: HashMap<String, SetEntry>,
    windows: HashMap<String, Vec<u64>>,
}

/// Single-process store keeping everything behind one mutex.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        let expired = matches!(
            inner.values.get(key),
            Some(entry) if entry.expires_at.is_some_and(|at| at <= Instant::now())
        );
        if expired {
            inner.values.remove(key);
            return Ok(None);
        }
        Ok(inner.values.get(key).map(|entry| entry.value.clone()))
    }

    pub async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.values.remove(key);
        inner.sets.remove(key);
        inner.windows.remove(key);
        Ok(())
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let entry = inner.sets.entry(key.to_string()).or_default();
        entry.members.insert(member.to_string());
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock();
        let expired = matches!(
            inner.sets.get(key),
            Some(entry) if entry.expires_at.is_some_and(|at| at <= Instant::now())
        );
        if expired {
            inner.sets.remove(key);
            return Ok(Vec::new());
        }
        Ok(inner
            .sets
            .get(key)
            .map(|entry| entry.members.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let at = Instant::now() + ttl;
        if let Some(entry) = inner.values.get_mut(key) {
            entry.expires_at = Some(at);
        }
        if let Some(entry) = inner.sets.get_mut(key) {
            entry.expires_at = Some(at);
        }
        Ok(())
    }

    pub async fn window_add(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
    ) -> Result<WindowOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let entries = inner.windows.entry(key.to_string()).or_default();
        let cutoff = now_ms.saturating_sub(window_ms);
        entries.retain(|&t| t > cutoff);
        let count = entries.len() as u64;
        let oldest_ms = entries.iter().min().copied();
        let allowed = count < limit;
        if allowed {
            entries.push(now_ms);
        }
        Ok(WindowOutcome {
            allowed,
            count,
            oldest_ms,
        })
    }

    pub async fn window_peek(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowUsage, StoreError> {
        let mut inner = self.inner.lock();
        let entries = inner.windows.entry(key.to_string()).or_default();
        let cutoff = now_ms.saturating_sub(window_ms);
        entries.retain(|&t| t > cutoff);
        Ok(WindowUsage {
            count: entries.len() as u64,
            oldest_ms: entries.iter().min().copied(),
        })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete_round_trip() {
        let store = MemoryStore::new();
        store
            .set_ex("k1", "v1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some("v1".to_string()));

        store.delete("k1").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("never-set").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set_ex("short", "v", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(store.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_members_dedupe() {
        let store = MemoryStore::new();
        store.sadd("tag:story", "story:1").await.unwrap();
        store.sadd("tag:story", "story:2").await.unwrap();
        store.sadd("tag:story", "story:1").await.unwrap();

        let mut members = store.smembers("tag:story").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["story:1", "story:2"]);
    }

    #[tokio::test]
    async fn test_set_expiry() {
        let store = MemoryStore::new();
        store.sadd("tag:t", "k").await.unwrap();
        store
            .expire("tag:t", Duration::from_millis(30))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.smembers("tag:t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_window_admits_up_to_limit() {
        let store = MemoryStore::new();
        let window_ms = 60_000;

        for i in 0..3 {
            let outcome = store
                .window_add("w", 1_000 + i, window_ms, 3)
                .await
                .unwrap();
            assert!(outcome.allowed, "request {i} should be admitted");
            assert_eq!(outcome.count, i);
        }

        let fourth = store.window_add("w", 1_004, window_ms, 3).await.unwrap();
        assert!(!fourth.allowed);
        assert_eq!(fourth.count, 3);
        assert_eq!(fourth.oldest_ms, Some(1_000));
    }

    #[tokio::test]
    async fn test_window_prunes_expired_entries() {
        let store = MemoryStore::new();
        let window_ms = 1_000;

        for _ in 0..2 {
            store.window_add("w", 500, window_ms, 2).await.unwrap();
        }
        let full = store.window_add("w", 600, window_ms, 2).await.unwrap();
        assert!(!full.allowed);

        // Past the window the old entries no longer count.
        let later = store.window_add("w", 1_600, window_ms, 2).await.unwrap();
        assert!(later.allowed);
        assert_eq!(later.count, 0);
    }

    #[tokio::test]
    async fn test_window_peek_never_records() {
        let store = MemoryStore::new();
        store.window_add("w", 100, 1_000, 10).await.unwrap();

        for _ in 0..5 {
            let usage = store.window_peek("w", 200, 1_000).await.unwrap();
            assert_eq!(usage.count, 1);
            assert_eq!(usage.oldest_ms, Some(100));
        }
    }

    #[tokio::test]
    async fn test_independent_window_keys() {
        let store = MemoryStore::new();
        store.window_add("user:a", 100, 1_000, 1).await.unwrap();
        let blocked = store.window_add("user:a", 101, 1_000, 1).await.unwrap();
        assert!(!blocked.allowed);

        let other = store.window_add("user:b", 102, 1_000, 1).await.unwrap();
        assert!(other.allowed);
    }
}
