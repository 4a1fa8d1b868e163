//! Health monitoring for cluster instances
//!
//! This module provides:
//! - Periodic health checks for the primary and all replicas
//! - Debounced automatic failover with best-replica promotion
//! - Replication lag alerts and automatic resync
//! - Alert fan-out to configured notification channels

mod alerts;
mod monitor;
mod probe;
mod state;

pub use alerts::{AlertDispatcher, AlertError, AlertSink, ChannelKind, LogAlertSink};
pub use monitor::{FailoverError, HealthMonitor, HealthStats};
pub use probe::{AdminError, ClusterAdmin, DatabaseProbe, ProbeError, ProbeReading};
pub use state::{ClusterView, HealthEvent, HealthEventType, InstanceHealth, Severity};
