//! Sliding-window admission control
//!
//! This module provides:
//! - Per-user and global request ceilings over one shared sliding window
//! - Per-client-type limits (mobile clients get the higher ceiling)
//! - Distributed enforcement through the shared store
//!
//! A sliding window avoids the burst-at-boundary problem of fixed buckets.
//! Both the per-user and the global ceiling must admit a request; either
//! rejection rejects the whole call. When the store is unreachable the
//! limiter fails open: availability wins over strict enforcement during
//! store outages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LimiterConfig;
use crate::metrics::metrics;
use crate::store::{SharedStore, WindowOutcome};

const GLOBAL_KEY: &str = "global";

/// Caller platform. Unknown platforms are a deserialization error, not a
/// runtime fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Web,
    Ios,
    Android,
}

impl ClientType {
    fn key_suffix(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }

    fn is_mobile(self) -> bool {
        matches!(self, Self::Ios | Self::Android)
    }
}

/// Admission decision with quota accounting for response headers.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Ceiling of the scope that decided (user scope unless the global
    /// ceiling rejected)
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// Seconds until a retry can succeed, set only on rejection
    pub retry_after: Option<u64>,
}

/// Read-only usage projection for quota endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct LimitInfo {
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Sliding-window rate limiter over the shared store.
pub struct RateLimiter {
    config: LimiterConfig,
    store: SharedStore,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig, store: SharedStore) -> Self {
        Self { config, store }
    }

    /// Decide whether a request is admitted.
    ///
    /// # Behavior
    /// - Admin callers bypass every check when configured, as does a
    ///   disabled limiter
    /// - The per-user window is checked first, then the global window
    /// - Store failures admit the request (fail open) with a warning
    pub async fn allow_request(
        &self,
        user_id: &str,
        is_admin: bool,
        client_type: ClientType,
    ) -> RateLimitResult {
        let limit = self.limit_for(client_type);
        let window_ms = self.config.window_secs * 1_000;
        let now_ms = Utc::now().timestamp_millis() as u64;

        if !self.config.enabled || (is_admin && self.config.admin_bypass) {
            metrics().record_limiter_allowed("bypass");
            return RateLimitResult {
                allowed: true,
                limit,
                remaining: limit,
                reset_at: to_datetime(now_ms + window_ms),
                retry_after: None,
            };
        }

        let user_key = self.user_key(user_id, client_type);
        let user = match self
            .store
            .window_add(&user_key, now_ms, window_ms, limit)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail_open(&user_key, limit, now_ms, window_ms, e),
        };
        if !user.allowed {
            metrics().record_limiter_rejected("user");
            debug!(user = user_id, count = user.count, "Per-user limit rejected request");
            return rejected(limit, &user, now_ms, window_ms);
        }

        let global = match self
            .store
            .window_add(GLOBAL_KEY, now_ms, window_ms, self.config.global_limit)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail_open(GLOBAL_KEY, limit, now_ms, window_ms, e),
        };
        if !global.allowed {
            metrics().record_limiter_rejected("global");
            warn!(
                user = user_id,
                count = global.count,
                "Global limit rejected request"
            );
            return rejected(self.config.global_limit, &global, now_ms, window_ms);
        }

        metrics().record_limiter_allowed("user");
        RateLimitResult {
            allowed: true,
            limit,
            // The survivor count excludes the attempt just recorded.
            remaining: limit.saturating_sub(user.count + 1),
            reset_at: to_datetime(user.oldest_ms.unwrap_or(now_ms) + window_ms),
            retry_after: None,
        }
    }

    /// Current usage for the user's window. Prunes like `allow_request` but
    /// never records an attempt.
    pub async fn get_limit_info(&self, user_id: &str, client_type: ClientType) -> LimitInfo {
        let limit = self.limit_for(client_type);
        let window_ms = self.config.window_secs * 1_000;
        let now_ms = Utc::now().timestamp_millis() as u64;

        let usage = match self
            .store
            .window_peek(&self.user_key(user_id, client_type), now_ms, window_ms)
            .await
        {
            Ok(usage) => usage,
            Err(e) => {
                warn!(user = user_id, error = %e, "Limit info unavailable, reporting empty window");
                return LimitInfo {
                    limit,
                    used: 0,
                    remaining: limit,
                    reset_at: to_datetime(now_ms + window_ms),
                };
            }
        };

        LimitInfo {
            limit,
            used: usage.count,
            remaining: limit.saturating_sub(usage.count),
            reset_at: to_datetime(usage.oldest_ms.unwrap_or(now_ms) + window_ms),
        }
    }

    fn limit_for(&self, client_type: ClientType) -> u64 {
        if client_type.is_mobile() {
            self.config.mobile_limit
        } else {
            self.config.user_limit
        }
    }

    /// Web traffic shares the base per-user key; mobile traffic is keyed by
    /// platform so its higher ceiling is tracked separately.
    fn user_key(&self, user_id: &str, client_type: ClientType) -> String {
        if client_type.is_mobile() {
            format!("user:{user_id}:{}", client_type.key_suffix())
        } else {
            format!("user:{user_id}")
        }
    }

    fn fail_open(
        &self,
        key: &str,
        limit: u64,
        now_ms: u64,
        window_ms: u64,
        error: crate::store::StoreError,
    ) -> RateLimitResult {
        warn!(key = key, error = %error, "Store unavailable, admitting request");
        metrics().record_limiter_allowed("fail_open");
        RateLimitResult {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: to_datetime(now_ms + window_ms),
            retry_after: None,
        }
    }
}

fn rejected(limit: u64, outcome: &WindowOutcome, now_ms: u64, window_ms: u64) -> RateLimitResult {
    // A full window always has an oldest entry; its expiry is when a slot
    // frees up.
    let expiry_ms = outcome.oldest_ms.unwrap_or(now_ms) + window_ms;
    RateLimitResult {
        allowed: false,
        limit,
        remaining: 0,
        reset_at: to_datetime(expiry_ms),
        retry_after: Some((expiry_ms.saturating_sub(now_ms) + 999) / 1_000),
    }
}

fn to_datetime(unix_ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(unix_ms as i64).unwrap_or_else(Utc::now)
}
