//! Integration test entry point
//!
//! Run with: cargo test --test integration
//!
//! These tests drive the public crate surface end to end: a running health
//! monitor, the balancer, both cache tiers, the rate limiter, and the
//! optimizer wired through `ReadPath`. Everything runs against the
//! in-memory store backend and scripted collaborator seams, so no external
//! services are required.

mod failover;
mod limits;
mod read_path;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use argus::access::{QueryError, QueryExecutor, QueryOutcome};
use argus::config::{
    BalancerConfig, CacheConfig, ClusterConfig, HealthMonitorConfig, InstanceConfig,
    LimiterConfig, OptimizerConfig,
};
use argus::health::{
    AdminError, AlertDispatcher, ClusterAdmin, DatabaseProbe, ProbeError, ProbeReading,
};
use argus::{
    CacheManager, HealthMonitor, LoadBalancer, QueryOptimizer, RateLimiter, ReadPath, SharedStore,
};

/// Install the fmt subscriber once; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn instance(id: &str, port: u16) -> InstanceConfig {
    InstanceConfig {
        id: id.to_string(),
        host: "127.0.0.1".to_string(),
        port,
    }
}

/// Primary plus the given replicas, ports assigned sequentially.
pub fn cluster(replica_ids: &[&str]) -> ClusterConfig {
    ClusterConfig {
        primary: instance("primary", 5432),
        replicas: replica_ids
            .iter()
            .enumerate()
            .map(|(i, id)| instance(id, 5433 + i as u16))
            .collect(),
    }
}

pub fn reading(cpu: f64, lag: Option<f64>) -> ProbeReading {
    ProbeReading {
        cpu_percent: cpu,
        memory_percent: 40.0,
        disk_percent: 50.0,
        replication_lag_seconds: lag,
    }
}

/// Probe whose answers are scripted per instance id. Instances without a
/// script read as unreachable.
pub struct ScriptedProbe {
    readings: DashMap<String, Result<ProbeReading, String>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self {
            readings: DashMap::new(),
        }
    }

    pub fn set_healthy(&self, id: &str, reading: ProbeReading) {
        self.readings.insert(id.to_string(), Ok(reading));
    }

    pub fn set_down(&self, id: &str, reason: &str) {
        self.readings.insert(id.to_string(), Err(reason.to_string()));
    }
}

#[async_trait]
impl DatabaseProbe for ScriptedProbe {
    async fn check_instance(&self, instance: &InstanceConfig) -> Result<ProbeReading, ProbeError> {
        match self.readings.get(&instance.id) {
            Some(entry) => match entry.value() {
                Ok(reading) => Ok(*reading),
                Err(reason) => Err(ProbeError::Unreachable(reason.clone())),
            },
            None => Err(ProbeError::Unreachable("no scripted reading".to_string())),
        }
    }
}

/// Admin that records topology operations instead of performing them.
pub struct RecordingAdmin {
    pub promotions: Mutex<Vec<String>>,
    pub resyncs: Mutex<Vec<String>>,
}

impl RecordingAdmin {
    pub fn new() -> Self {
        Self {
            promotions: Mutex::new(Vec::new()),
            resyncs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ClusterAdmin for RecordingAdmin {
    async fn promote(&self, replica: &InstanceConfig) -> Result<(), AdminError> {
        self.promotions.lock().push(replica.id.clone());
        Ok(())
    }

    async fn resync(&self, replica: &InstanceConfig) -> Result<(), AdminError> {
        self.resyncs.lock().push(replica.id.clone());
        Ok(())
    }
}

/// Executor returning a fixed value and timing, counting invocations.
pub struct CountingExecutor {
    value: serde_json::Value,
    execution_time_ms: f64,
    calls: AtomicUsize,
}

impl CountingExecutor {
    pub fn new(value: serde_json::Value, execution_time_ms: f64) -> Self {
        Self {
            value,
            execution_time_ms,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn execute(
        &self,
        _instance: &InstanceConfig,
        _query: &str,
    ) -> Result<QueryOutcome, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(QueryOutcome {
            value: self.value.clone(),
            execution_time_ms: self.execution_time_ms,
        })
    }
}

/// A fully wired read path over one healthy replica.
pub struct TestStack {
    pub path: ReadPath,
    pub cache: Arc<CacheManager>,
    pub limiter: Arc<RateLimiter>,
    pub balancer: Arc<LoadBalancer>,
    pub monitor: Arc<HealthMonitor>,
    pub optimizer: Arc<QueryOptimizer>,
    pub executor: Arc<CountingExecutor>,
}

impl TestStack {
    pub fn stop(&self) {
        self.monitor.stop_monitoring();
    }
}

/// Build the stack on the given store with a monitor that has already
/// completed at least one check cycle.
pub async fn stack(
    store: SharedStore,
    limiter_config: LimiterConfig,
    executor: CountingExecutor,
) -> TestStack {
    init_tracing();
    let cluster = cluster(&["replica-1"]);

    let probe = ScriptedProbe::new();
    probe.set_healthy("primary", reading(20.0, None));
    probe.set_healthy("replica-1", reading(30.0, Some(0.5)));

    let monitor = Arc::new(HealthMonitor::new(
        HealthMonitorConfig {
            check_interval_ms: 20,
            ..HealthMonitorConfig::default()
        },
        &cluster,
        Arc::new(probe),
        Arc::new(RecordingAdmin::new()),
        Arc::new(AlertDispatcher::new(Vec::new())),
    ));
    monitor.start_monitoring();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let cache = Arc::new(CacheManager::new(CacheConfig::default(), store.clone()));
    let limiter = Arc::new(RateLimiter::new(limiter_config, store));
    let balancer = Arc::new(LoadBalancer::new(BalancerConfig::default(), &cluster));
    let optimizer = Arc::new(QueryOptimizer::new(OptimizerConfig::default()));
    let executor = Arc::new(executor);

    let path = ReadPath::new(
        cache.clone(),
        limiter.clone(),
        balancer.clone(),
        monitor.clone(),
        optimizer.clone(),
        executor.clone(),
    );

    TestStack {
        path,
        cache,
        limiter,
        balancer,
        monitor,
        optimizer,
        executor,
    }
}
