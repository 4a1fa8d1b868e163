//! Prometheus metrics for the resilience layer.
//!
//! The registry is embedded; exposition (HTTP scrape endpoint) belongs to
//! the hosting application, which calls [`Metrics::gather`].

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Metrics collection for all five components
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Cache metrics
    /// Cache hits by tier
    pub cache_hits_total: IntCounterVec,
    /// Full cache misses
    pub cache_misses_total: IntCounter,
    /// Tier-1 LRU evictions
    pub cache_evictions_total: IntCounter,

    // Rate limiting metrics
    /// Requests admitted by scope
    pub limiter_allowed_total: IntCounterVec,
    /// Requests rejected by scope
    pub limiter_rejected_total: IntCounterVec,

    // Health metrics
    /// Health check results by outcome
    pub health_check_total: IntCounterVec,
    /// Current instance counts by health status
    pub health_instances: IntGaugeVec,
    /// Failovers attempted
    pub failovers_total: IntCounterVec,
    /// Replica resyncs started
    pub resyncs_total: IntCounter,

    // Balancer metrics
    /// Read selections by instance
    pub selections_total: IntCounterVec,

    // Optimizer metrics
    /// Queries tracked by kind
    pub queries_tracked_total: IntCounterVec,
    /// Queries exceeding the slow threshold
    pub slow_queries_total: IntCounter,
    /// Query latency histogram (in seconds)
    pub query_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        // Cache metrics
        let cache_hits_total = IntCounterVec::new(
            Opts::new("argus_cache_hits_total", "Total cache hits by tier"),
            &["tier"], // tier1, tier2
        )
        .unwrap();

        let cache_misses_total = IntCounter::new(
            "argus_cache_misses_total",
            "Total cache lookups missing both tiers",
        )
        .unwrap();

        let cache_evictions_total = IntCounter::new(
            "argus_cache_evictions_total",
            "Total tier-1 LRU evictions",
        )
        .unwrap();

        // Rate limiting metrics
        let limiter_allowed_total = IntCounterVec::new(
            Opts::new(
                "argus_limiter_allowed_total",
                "Total requests admitted by the rate limiter",
            ),
            &["scope"], // user, global, bypass, fail_open
        )
        .unwrap();

        let limiter_rejected_total = IntCounterVec::new(
            Opts::new(
                "argus_limiter_rejected_total",
                "Total requests rejected by the rate limiter",
            ),
            &["scope"], // user, global
        )
        .unwrap();

        // Health metrics
        let health_check_total = IntCounterVec::new(
            Opts::new(
                "argus_health_check_total",
                "Total instance health checks by outcome",
            ),
            &["result"], // healthy, unhealthy
        )
        .unwrap();

        let health_instances = IntGaugeVec::new(
            Opts::new(
                "argus_health_instances",
                "Current number of instances by health status",
            ),
            &["status"], // healthy, unhealthy, unknown
        )
        .unwrap();

        let failovers_total = IntCounterVec::new(
            Opts::new(
                "argus_failovers_total",
                "Total failover attempts by outcome",
            ),
            &["outcome"], // completed, failed
        )
        .unwrap();

        let resyncs_total = IntCounter::new(
            "argus_resyncs_total",
            "Total automatic replica resyncs started",
        )
        .unwrap();

        // Balancer metrics
        let selections_total = IntCounterVec::new(
            Opts::new(
                "argus_selections_total",
                "Total read-target selections by instance",
            ),
            &["instance"],
        )
        .unwrap();

        // Optimizer metrics
        let queries_tracked_total = IntCounterVec::new(
            Opts::new(
                "argus_queries_tracked_total",
                "Total queries tracked by kind",
            ),
            &["kind"], // select, insert, update, delete, other
        )
        .unwrap();

        let slow_queries_total = IntCounter::new(
            "argus_slow_queries_total",
            "Total queries exceeding the slow-query threshold",
        )
        .unwrap();

        let query_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "argus_query_duration_seconds",
                "Tracked query latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["kind"],
        )
        .unwrap();

        // Register all metrics
        registry
            .register(Box::new(cache_hits_total.clone()))
            .unwrap();
        registry
            .register(Box::new(cache_misses_total.clone()))
            .unwrap();
        registry
            .register(Box::new(cache_evictions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(limiter_allowed_total.clone()))
            .unwrap();
        registry
            .register(Box::new(limiter_rejected_total.clone()))
            .unwrap();
        registry
            .register(Box::new(health_check_total.clone()))
            .unwrap();
        registry
            .register(Box::new(health_instances.clone()))
            .unwrap();
        registry
            .register(Box::new(failovers_total.clone()))
            .unwrap();
        registry.register(Box::new(resyncs_total.clone())).unwrap();
        registry
            .register(Box::new(selections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(queries_tracked_total.clone()))
            .unwrap();
        registry
            .register(Box::new(slow_queries_total.clone()))
            .unwrap();
        registry
            .register(Box::new(query_duration_seconds.clone()))
            .unwrap();

        Self {
            registry,
            cache_hits_total,
            cache_misses_total,
            cache_evictions_total,
            limiter_allowed_total,
            limiter_rejected_total,
            health_check_total,
            health_instances,
            failovers_total,
            resyncs_total,
            selections_total,
            queries_tracked_total,
            slow_queries_total,
            query_duration_seconds,
        }
    }

    /// Record a cache hit at the given tier
    pub fn record_cache_hit(&self, tier: &str) {
        self.cache_hits_total.with_label_values(&[tier]).inc();
    }

    /// Record a lookup that missed both tiers
    pub fn record_cache_miss(&self) {
        self.cache_misses_total.inc();
    }

    /// Record a tier-1 eviction
    pub fn record_cache_eviction(&self) {
        self.cache_evictions_total.inc();
    }

    /// Record an admitted request
    pub fn record_limiter_allowed(&self, scope: &str) {
        self.limiter_allowed_total.with_label_values(&[scope]).inc();
    }

    /// Record a rejected request
    pub fn record_limiter_rejected(&self, scope: &str) {
        self.limiter_rejected_total
            .with_label_values(&[scope])
            .inc();
    }

    /// Record a health check result
    pub fn record_health_check(&self, result: &str) {
        self.health_check_total.with_label_values(&[result]).inc();
    }

    /// Update health instance counts
    pub fn set_health_instances(&self, healthy: i64, unhealthy: i64, unknown: i64) {
        self.health_instances
            .with_label_values(&["healthy"])
            .set(healthy);
        self.health_instances
            .with_label_values(&["unhealthy"])
            .set(unhealthy);
        self.health_instances
            .with_label_values(&["unknown"])
            .set(unknown);
    }

    /// Record a failover attempt
    pub fn record_failover(&self, outcome: &str) {
        self.failovers_total.with_label_values(&[outcome]).inc();
    }

    /// Record an automatic resync start
    pub fn record_resync(&self) {
        self.resyncs_total.inc();
    }

    /// Record a read-target selection
    pub fn record_selection(&self, instance: &str) {
        self.selections_total.with_label_values(&[instance]).inc();
    }

    /// Record a tracked query
    pub fn record_query(&self, kind: &str, duration_secs: f64) {
        self.queries_tracked_total.with_label_values(&[kind]).inc();
        self.query_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    /// Record a slow query
    pub fn record_slow_query(&self) {
        self.slow_queries_total.inc();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
