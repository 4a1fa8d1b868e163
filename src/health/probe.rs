//! Collaborator seams for instance probing and topology changes.
//!
//! The monitor decides *when* to probe, fail over, or resync; *how* those
//! touch the actual database is injected through these traits. Production
//! wiring points them at the cluster's management API; tests script them.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::InstanceConfig;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("instance unreachable: {0}")]
    Unreachable(String),
    #[error("metrics query failed: {0}")]
    Metrics(String),
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("promotion failed: {0}")]
    Promotion(String),
    #[error("resync failed: {0}")]
    Resync(String),
}

/// Raw measurements from one successful probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeReading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// None when the instance does not replicate from anything
    pub replication_lag_seconds: Option<f64>,
}

/// Per-instance liveness and metrics probe.
///
/// An `Err` means the instance is not connectable; the monitor records it
/// as unhealthy with the error text preserved.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn check_instance(&self, instance: &InstanceConfig) -> Result<ProbeReading, ProbeError>;
}

/// Replication topology operations the monitor delegates.
///
/// Promotion and resync mechanics live outside this layer; the monitor only
/// sequences them and reports the outcome.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    async fn promote(&self, replica: &InstanceConfig) -> Result<(), AdminError>;
    async fn resync(&self, replica: &InstanceConfig) -> Result<(), AdminError>;
}
