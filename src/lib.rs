//! Resilience and read-path acceleration for replicated SQL clusters
//!
//! Five cooperating components wrap a primary-plus-replicas database
//! cluster:
//! - [`health`] — periodic probing, debounced automatic failover, and
//!   replication-lag remediation
//! - [`balancer`] — weighted round-robin replica selection fed by health
//!   state
//! - [`cache`] — two-tier caching (in-process LRU plus shared store) with
//!   tag invalidation
//! - [`limiter`] — sliding-window rate limiting over the shared store
//! - [`optimizer`] — passive query tracking with N+1 and index heuristics
//!
//! [`access::ReadPath`] composes them in production order. [`config`]
//! loads and validates every tunable, [`store`] provides the distributed
//! key-value backend, and [`metrics`] exposes Prometheus counters for the
//! whole layer.
//!
//! Everything degrades toward availability: store outages fall back to
//! tier-1-only caching and fail-open rate limiting, and only the health
//! monitor's debounced failover may change routing state.

pub mod access;
pub mod balancer;
pub mod cache;
pub mod config;
pub mod health;
pub mod limiter;
pub mod metrics;
pub mod optimizer;
pub mod store;

pub use access::{QueryExecutor, QueryOutcome, ReadError, ReadOutcome, ReadPath, ReadRequest, ReadSource};
pub use balancer::{LoadBalancer, ReplicaInfo};
pub use cache::{CacheManager, CacheStats, CacheTier};
pub use config::{load_config, Config};
pub use health::{AlertDispatcher, HealthMonitor, HealthStats};
pub use limiter::{ClientType, LimitInfo, RateLimitResult, RateLimiter};
pub use optimizer::{PlanProvider, QueryOptimizer};
pub use store::SharedStore;
