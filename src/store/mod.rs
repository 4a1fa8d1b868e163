//! Shared distributed store.
//!
//! One keyspace backs the tier-2 cache and the distributed rate-limit
//! counters. Dispatch is a plain enum over the available backends; the
//! `Disabled` variant is an always-miss, always-succeed stand-in so callers
//! degrade without branching on store availability themselves.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::StoreConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),
    #[error("Store operation failed: {0}")]
    Backend(String),
}

/// Result of an atomic sliding-window update.
///
/// `count` is the number of entries surviving the prune, before any new
/// timestamp is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    pub allowed: bool,
    pub count: u64,
    pub oldest_ms: Option<u64>,
}

/// Read-only view of a sliding window after pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub count: u64,
    pub oldest_ms: Option<u64>,
}

/// Store handle shared by the cache and the rate limiter.
#[derive(Debug, Clone)]
pub enum SharedStore {
    Redis(Box<RedisStore>),
    Memory(MemoryStore),
    Disabled,
}

impl SharedStore {
    /// Build a store from configuration with graceful degradation.
    ///
    /// A missing URL, an unknown backend, or a failed connection logs a
    /// warning and yields `Disabled`; startup never fails because of the
    /// store.
    pub async fn connect(config: &StoreConfig) -> Self {
        if !config.enabled {
            info!("Shared store disabled by configuration");
            return Self::Disabled;
        }

        match config.backend.as_str() {
            "redis" => {
                let url = match &config.url {
                    Some(url) => url,
                    None => {
                        warn!("Redis store selected but no [store] url set, continuing without a shared store");
                        return Self::Disabled;
                    }
                };
                let timeout = Duration::from_millis(config.connect_timeout_ms);
                match RedisStore::connect(url, timeout).await {
                    Ok(store) => {
                        info!(backend = "redis", "Shared store connected");
                        Self::Redis(Box::new(store))
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            "Failed to connect to Redis, continuing without a shared store"
                        );
                        Self::Disabled
                    }
                }
            }
            "memory" => {
                info!(backend = "memory", "Shared store connected");
                Self::Memory(MemoryStore::new())
            }
            other => {
                warn!(
                    backend = other,
                    "Unknown store backend, continuing without a shared store"
                );
                Self::Disabled
            }
        }
    }

    /// In-process store, mainly for tests and single-node deployments.
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub fn disabled() -> Self {
        Self::Disabled
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Memory(_) => "memory",
            Self::Disabled => "disabled",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
            Self::Disabled => Ok(None),
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            Self::Redis(s) => s.set_ex(key, value, ttl).await,
            Self::Memory(s) => s.set_ex(key, value, ttl).await,
            Self::Disabled => Ok(()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Redis(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
            Self::Disabled => Ok(()),
        }
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            Self::Redis(s) => s.sadd(key, member).await,
            Self::Memory(s) => s.sadd(key, member).await,
            Self::Disabled => Ok(()),
        }
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(s) => s.smembers(key).await,
            Self::Memory(s) => s.smembers(key).await,
            Self::Disabled => Ok(Vec::new()),
        }
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            Self::Redis(s) => s.expire(key, ttl).await,
            Self::Memory(s) => s.expire(key, ttl).await,
            Self::Disabled => Ok(()),
        }
    }

    /// Atomically prune the window, count survivors, and record the new
    /// timestamp when under `limit`. The `Disabled` variant always admits,
    /// which is the fail-open behavior the limiter wants.
    pub async fn window_add(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
    ) -> Result<WindowOutcome, StoreError> {
        match self {
            Self::Redis(s) => s.window_add(key, now_ms, window_ms, limit).await,
            Self::Memory(s) => s.window_add(key, now_ms, window_ms, limit).await,
            Self::Disabled => Ok(WindowOutcome {
                allowed: true,
                count: 0,
                oldest_ms: None,
            }),
        }
    }

    /// Prune and report window usage without recording an attempt.
    pub async fn window_peek(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowUsage, StoreError> {
        match self {
            Self::Redis(s) => s.window_peek(key, now_ms, window_ms).await,
            Self::Memory(s) => s.window_peek(key, now_ms, window_ms).await,
            Self::Disabled => Ok(WindowUsage {
                count: 0,
                oldest_ms: None,
            }),
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Redis(s) => s.ping().await,
            Self::Memory(s) => s.ping().await,
            Self::Disabled => Ok(()),
        }
    }
}
