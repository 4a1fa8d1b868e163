//! The read path, end to end
//!
//! This module provides:
//! - `ReadPath`, a facade over cache, limiter, balancer, monitor, and
//!   optimizer in their production order
//! - The `QueryExecutor` seam through which queries reach an instance
//!
//! A read first tries the cache; on a miss the limiter admits or rejects
//! the caller; admitted reads run on a balancer-selected replica, feed
//! their timing to the optimizer, and write the result back through the
//! cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::balancer::LoadBalancer;
use crate::cache::{CacheManager, CacheTier};
use crate::config::InstanceConfig;
use crate::health::HealthMonitor;
use crate::limiter::{ClientType, RateLimitResult, RateLimiter};
use crate::optimizer::QueryOptimizer;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("instance unreachable: {0}")]
    Unreachable(String),
    #[error("query execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("rate limited, {remaining} of {limit} remaining", remaining = .0.remaining, limit = .0.limit)]
    RateLimited(RateLimitResult),
    #[error("query on {instance} failed")]
    Query {
        instance: String,
        #[source]
        source: QueryError,
    },
}

/// What the executor reports back for one query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub value: serde_json::Value,
    pub execution_time_ms: f64,
}

/// Runs a query against a concrete instance. Production wiring points
/// this at the database driver; tests script it.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        instance: &InstanceConfig,
        query: &str,
    ) -> Result<QueryOutcome, QueryError>;
}

/// One inbound read.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub cache_key: String,
    pub query: String,
    pub user_id: String,
    pub is_admin: bool,
    pub client_type: ClientType,
    /// None falls back to the cache's default TTL
    pub cache_ttl_secs: Option<u64>,
    pub cache_tags: Vec<String>,
    pub parameters: Option<serde_json::Value>,
    pub request_id: Option<String>,
}

impl ReadRequest {
    pub fn new(cache_key: &str, query: &str, user_id: &str) -> Self {
        Self {
            cache_key: cache_key.to_string(),
            query: query.to_string(),
            user_id: user_id.to_string(),
            is_admin: false,
            client_type: ClientType::Web,
            cache_ttl_secs: None,
            cache_tags: Vec::new(),
            parameters: None,
            request_id: None,
        }
    }
}

/// Where a served value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    Tier1,
    Tier2,
    Database { instance: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadOutcome {
    pub value: serde_json::Value,
    pub source: ReadSource,
}

// ============================================================================
// Read path
// ============================================================================

/// Facade owning the per-request pipeline.
///
/// Components are injected, never global; every collaborator is shared so
/// the same instances can serve other surfaces (admin endpoints, the
/// monitor's background loop) concurrently.
pub struct ReadPath {
    cache: Arc<CacheManager>,
    limiter: Arc<RateLimiter>,
    balancer: Arc<LoadBalancer>,
    monitor: Arc<HealthMonitor>,
    optimizer: Arc<QueryOptimizer>,
    executor: Arc<dyn QueryExecutor>,
}

impl ReadPath {
    pub fn new(
        cache: Arc<CacheManager>,
        limiter: Arc<RateLimiter>,
        balancer: Arc<LoadBalancer>,
        monitor: Arc<HealthMonitor>,
        optimizer: Arc<QueryOptimizer>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            cache,
            limiter,
            balancer,
            monitor,
            optimizer,
            executor,
        }
    }

    /// Serve one read.
    ///
    /// # Behavior
    /// 1. Cache lookup; a hit in either tier returns immediately and never
    ///    touches the limiter or a database.
    /// 2. On a miss the rate limiter decides admission; rejection carries
    ///    the full quota decision for response headers.
    /// 3. The balancer picks a replica (primary when none is healthy).
    /// 4. The executor runs the query; its timing feeds the balancer's
    ///    response window and the optimizer's history.
    /// 5. The result is written back through both cache tiers.
    pub async fn fetch(&self, request: &ReadRequest) -> Result<ReadOutcome, ReadError> {
        if let Some((value, tier)) = self.cache.get_with_tier(&request.cache_key).await {
            let source = match tier {
                CacheTier::Local => ReadSource::Tier1,
                CacheTier::Distributed => ReadSource::Tier2,
            };
            debug!(key = %request.cache_key, source = ?source, "Read served from cache");
            return Ok(ReadOutcome { value, source });
        }

        let decision = self
            .limiter
            .allow_request(&request.user_id, request.is_admin, request.client_type)
            .await;
        if !decision.allowed {
            debug!(user_id = %request.user_id, "Read rejected by rate limiter");
            return Err(ReadError::RateLimited(decision));
        }

        let instance = self.balancer.select_replica(&self.monitor);
        let outcome = match self.executor.execute(&instance, &request.query).await {
            Ok(outcome) => outcome,
            Err(source) => {
                warn!(instance = %instance.id, error = %source, "Query execution failed");
                return Err(ReadError::Query {
                    instance: instance.id,
                    source,
                });
            }
        };

        self.balancer
            .record_response_time(&instance.id, outcome.execution_time_ms);
        self.optimizer.track_query(
            &request.query,
            outcome.execution_time_ms,
            request.parameters.clone(),
            request.request_id.clone(),
            Some(request.user_id.clone()),
        );

        self.cache
            .set(
                &request.cache_key,
                outcome.value.clone(),
                request.cache_ttl_secs,
                &request.cache_tags,
            )
            .await;

        debug!(
            key = %request.cache_key,
            instance = %instance.id,
            execution_time_ms = outcome.execution_time_ms,
            "Read served from database"
        );
        Ok(ReadOutcome {
            value: outcome.value,
            source: ReadSource::Database {
                instance: instance.id,
            },
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
