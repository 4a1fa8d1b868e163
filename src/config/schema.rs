use serde::Deserialize;

use super::ConfigError;
use crate::health::ChannelKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Cluster topology (primary + replicas)
    pub cluster: ClusterConfig,
    /// Shared distributed store (tier-2 cache + limiter counters)
    #[serde(default)]
    pub store: StoreConfig,
    /// Health monitoring and failover
    #[serde(default)]
    pub health: HealthMonitorConfig,
    /// Read load balancing
    #[serde(default)]
    pub balancer: BalancerConfig,
    /// Two-tier cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Sliding-window rate limiting
    #[serde(default)]
    pub limiter: LimiterConfig,
    /// Query tracking and analysis
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Alert delivery channels
    #[serde(default)]
    pub alerts: Vec<AlertChannelConfig>,
}

// ============================================================================
// Cluster Topology
// ============================================================================

/// Cluster topology: one writable primary plus any number of read replicas
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// The writable primary instance
    pub primary: InstanceConfig,
    /// Read replicas
    #[serde(default)]
    pub replicas: Vec<InstanceConfig>,
}

/// A single database instance
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstanceConfig {
    /// Unique instance identifier (used in health state, events, metrics)
    pub id: String,
    /// Hostname or IP
    pub host: String,
    /// Port number
    pub port: u16,
}

impl InstanceConfig {
    /// Get the address string (host:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Health Monitor Configuration
// ============================================================================

/// Health monitoring, failover, and replica-lag remediation
#[derive(Debug, Clone, Deserialize)]
pub struct HealthMonitorConfig {
    /// Whether background monitoring is enabled
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    /// Interval between check cycles (milliseconds)
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Timeout for each instance probe (milliseconds)
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    /// Continuous primary unhealthiness required before failover (milliseconds)
    #[serde(default = "default_failover_timeout_ms")]
    pub failover_timeout_ms: u64,
    /// Replication lag that emits a warning alert (seconds)
    #[serde(default = "default_lag_warn_secs")]
    pub replication_lag_threshold_secs: f64,
    /// Replication lag that triggers an automatic resync (seconds)
    #[serde(default = "default_lag_resync_secs")]
    pub auto_resync_lag_threshold_secs: f64,
    /// Minimum pause between resyncs of the same replica (milliseconds)
    #[serde(default = "default_resync_cooldown_ms")]
    pub resync_cooldown_ms: u64,
    /// Advisory minimum count of live replicas
    #[serde(default = "default_min_replicas")]
    pub min_replicas: usize,
}

fn default_health_enabled() -> bool {
    true
}

fn default_check_interval_ms() -> u64 {
    10_000
}

fn default_check_timeout_ms() -> u64 {
    3000
}

fn default_failover_timeout_ms() -> u64 {
    30_000
}

fn default_lag_warn_secs() -> f64 {
    5.0
}

fn default_lag_resync_secs() -> f64 {
    30.0
}

fn default_resync_cooldown_ms() -> u64 {
    300_000
}

fn default_min_replicas() -> usize {
    1
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            check_interval_ms: default_check_interval_ms(),
            check_timeout_ms: default_check_timeout_ms(),
            failover_timeout_ms: default_failover_timeout_ms(),
            replication_lag_threshold_secs: default_lag_warn_secs(),
            auto_resync_lag_threshold_secs: default_lag_resync_secs(),
            resync_cooldown_ms: default_resync_cooldown_ms(),
            min_replicas: default_min_replicas(),
        }
    }
}

// ============================================================================
// Load Balancer Configuration
// ============================================================================

/// Weighted round-robin balancing tunables
#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    /// Response-time samples kept per replica
    #[serde(default = "default_response_window")]
    pub response_window: usize,
    /// CPU percentage at which a replica sheds traffic
    #[serde(default = "default_cpu_shed_threshold")]
    pub cpu_shed_threshold: f64,
    /// Weight multiplier applied when shedding
    #[serde(default = "default_cpu_shed_factor")]
    pub cpu_shed_factor: f64,
    /// Lower weight clamp
    #[serde(default = "default_weight_min")]
    pub weight_min: f64,
    /// Upper weight clamp
    #[serde(default = "default_weight_max")]
    pub weight_max: f64,
    /// Selection-list slots granted per unit of weight
    #[serde(default = "default_slots_per_weight")]
    pub slots_per_weight: usize,
}

fn default_response_window() -> usize {
    100
}

fn default_cpu_shed_threshold() -> f64 {
    80.0
}

fn default_cpu_shed_factor() -> f64 {
    0.5
}

fn default_weight_min() -> f64 {
    0.1
}

fn default_weight_max() -> f64 {
    10.0
}

fn default_slots_per_weight() -> usize {
    10
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            response_window: default_response_window(),
            cpu_shed_threshold: default_cpu_shed_threshold(),
            cpu_shed_factor: default_cpu_shed_factor(),
            weight_min: default_weight_min(),
            weight_max: default_weight_max(),
            slots_per_weight: default_slots_per_weight(),
        }
    }
}

// ============================================================================
// Cache Configuration
// ============================================================================

/// Two-tier cache tunables
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum tier-1 entries before LRU eviction
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    /// TTL applied when the caller does not specify one (seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Tag index expiry as a multiple of the longest member TTL
    #[serde(default = "default_tag_index_ttl_factor")]
    pub tag_index_ttl_factor: u32,
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_tag_index_ttl_factor() -> u32 {
    2
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            default_ttl_secs: default_cache_ttl_secs(),
            tag_index_ttl_factor: default_tag_index_ttl_factor(),
        }
    }
}

// ============================================================================
// Rate Limiter Configuration
// ============================================================================

/// Sliding-window admission control
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    /// Whether rate limiting is enforced
    #[serde(default = "default_limiter_enabled")]
    pub enabled: bool,
    /// Requests per window for web clients
    #[serde(default = "default_user_limit")]
    pub user_limit: u64,
    /// Requests per window for mobile clients (iOS/Android)
    #[serde(default = "default_mobile_limit")]
    pub mobile_limit: u64,
    /// Requests per window across all callers
    #[serde(default = "default_global_limit")]
    pub global_limit: u64,
    /// Window length (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Whether admin callers skip all checks
    #[serde(default = "default_admin_bypass")]
    pub admin_bypass: bool,
}

fn default_limiter_enabled() -> bool {
    true
}

fn default_user_limit() -> u64 {
    100
}

fn default_mobile_limit() -> u64 {
    300
}

fn default_global_limit() -> u64 {
    10_000
}

fn default_window_secs() -> u64 {
    3600
}

fn default_admin_bypass() -> bool {
    true
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_limiter_enabled(),
            user_limit: default_user_limit(),
            mobile_limit: default_mobile_limit(),
            global_limit: default_global_limit(),
            window_secs: default_window_secs(),
            admin_bypass: default_admin_bypass(),
        }
    }
}

// ============================================================================
// Query Optimizer Configuration
// ============================================================================

/// Query tracking and analysis thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    /// Execution time above which a query is logged as slow (milliseconds)
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_threshold_ms: u64,
    /// Bounded query history length (oldest evicted past this)
    #[serde(default = "default_max_query_history")]
    pub max_query_history: usize,
    /// Pattern repetitions above which N+1 is suspected
    #[serde(default = "default_n_plus_one_threshold")]
    pub n_plus_one_threshold: usize,
    /// Maximum index distance between repetitions for N+1 grouping
    #[serde(default = "default_n_plus_one_window")]
    pub n_plus_one_index_window: usize,
    /// Column references required before suggesting an index
    #[serde(default = "default_index_min_refs")]
    pub index_min_references: usize,
    /// Ceiling on estimated improvement (percent)
    #[serde(default = "default_improvement_cap")]
    pub estimated_improvement_cap: f64,
}

fn default_slow_query_ms() -> u64 {
    100
}

fn default_max_query_history() -> usize {
    1000
}

fn default_n_plus_one_threshold() -> usize {
    5
}

fn default_n_plus_one_window() -> usize {
    10
}

fn default_index_min_refs() -> usize {
    3
}

fn default_improvement_cap() -> f64 {
    80.0
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: default_slow_query_ms(),
            max_query_history: default_max_query_history(),
            n_plus_one_threshold: default_n_plus_one_threshold(),
            n_plus_one_index_window: default_n_plus_one_window(),
            index_min_references: default_index_min_refs(),
            estimated_improvement_cap: default_improvement_cap(),
        }
    }
}

// ============================================================================
// Shared Store Configuration
// ============================================================================

/// Backing store for tier-2 cache and distributed limiter counters
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Whether any shared store is used at all
    #[serde(default = "default_store_enabled")]
    pub enabled: bool,
    /// Backend selector: "redis" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Connection URL for distributed backends
    #[serde(default)]
    pub url: Option<String>,
    /// Connection timeout (milliseconds)
    #[serde(default = "default_store_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_store_enabled() -> bool {
    true
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_store_connect_timeout_ms() -> u64 {
    3000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: default_store_enabled(),
            backend: default_store_backend(),
            url: None,
            connect_timeout_ms: default_store_connect_timeout_ms(),
        }
    }
}

// ============================================================================
// Alert Channel Configuration
// ============================================================================

/// A named alert delivery channel
#[derive(Debug, Clone, Deserialize)]
pub struct AlertChannelConfig {
    /// Channel name (appears in logs and delivery errors)
    pub name: String,
    /// Channel kind; unknown kinds are rejected at parse time
    pub kind: ChannelKind,
    /// Delivery endpoint (address, webhook URL, routing key)
    #[serde(default)]
    pub endpoint: Option<String>,
}

// ============================================================================
// Validation
// ============================================================================

impl Config {
    /// Validate cross-field constraints once at load time.
    ///
    /// Serde defaults guarantee well-typed values; this catches the
    /// combinations that would only surface as runtime surprises.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = vec![self.cluster.primary.id.as_str()];
        for replica in &self.cluster.replicas {
            if ids.contains(&replica.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate instance id: {}",
                    replica.id
                )));
            }
            ids.push(replica.id.as_str());
        }
        if self.health.check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "health.check_interval_ms must be positive".to_string(),
            ));
        }
        if self.health.auto_resync_lag_threshold_secs < self.health.replication_lag_threshold_secs {
            return Err(ConfigError::Invalid(
                "health.auto_resync_lag_threshold_secs must not be below the warning threshold"
                    .to_string(),
            ));
        }
        if self.balancer.weight_min <= 0.0 || self.balancer.weight_min > self.balancer.weight_max {
            return Err(ConfigError::Invalid(
                "balancer weight clamp must satisfy 0 < weight_min <= weight_max".to_string(),
            ));
        }
        if self.balancer.response_window == 0 {
            return Err(ConfigError::Invalid(
                "balancer.response_window must be positive".to_string(),
            ));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_size must be positive".to_string(),
            ));
        }
        if self.limiter.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "limiter.window_secs must be positive".to_string(),
            ));
        }
        if self.optimizer.max_query_history == 0 {
            return Err(ConfigError::Invalid(
                "optimizer.max_query_history must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig {
                primary: InstanceConfig {
                    id: "primary".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 5432,
                },
                replicas: Vec::new(),
            },
            store: StoreConfig::default(),
            health: HealthMonitorConfig::default(),
            balancer: BalancerConfig::default(),
            cache: CacheConfig::default(),
            limiter: LimiterConfig::default(),
            optimizer: OptimizerConfig::default(),
            alerts: Vec::new(),
        }
    }
}
