//! Health snapshots, cluster topology, and alertable events.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::InstanceConfig;

/// Point-in-time health of a single instance.
///
/// Owned by the monitor and overwritten on every check cycle; everyone else
/// sees cloned snapshots, so staleness is bounded by the check interval.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealth {
    /// Instance identifier
    pub instance_id: String,
    /// Whether the last probe succeeded
    pub is_healthy: bool,
    /// CPU utilization percentage
    pub cpu_percent: f64,
    /// Memory utilization percentage
    pub memory_percent: f64,
    /// Disk utilization percentage
    pub disk_percent: f64,
    /// Replication lag in seconds; None for the primary
    pub replication_lag_seconds: Option<f64>,
    /// When the instance was last probed
    pub last_check: Option<DateTime<Utc>>,
    /// Probe failure detail, if any
    pub error_message: Option<String>,
}

impl InstanceHealth {
    /// Synthetic status for an instance that was never checked.
    pub fn no_data(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            is_healthy: false,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            replication_lag_seconds: None,
            last_check: None,
            error_message: Some("no data".to_string()),
        }
    }
}

/// Current cluster topology as the monitor sees it.
///
/// Changes only on failover; the balancer pulls this to reconcile its
/// replica set.
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub primary: InstanceConfig,
    pub replicas: Vec<InstanceConfig>,
}

/// Severity attached to a health event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// What a health event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventType {
    PrimaryFailureDetected,
    FailoverCompleted,
    FailoverFailed,
    ReplicaLag,
    ResyncStarted,
}

/// An alertable occurrence. Immutable once created; delivery is
/// best-effort and owned by the alert dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct HealthEvent {
    pub event_type: HealthEventType,
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub metadata: serde_json::Value,
}

impl HealthEvent {
    pub fn new(
        event_type: HealthEventType,
        instance_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            instance_id: instance_id.into(),
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_status_is_unhealthy() {
        let health = InstanceHealth::no_data("replica-1");
        assert_eq!(health.instance_id, "replica-1");
        assert!(!health.is_healthy);
        assert!(health.last_check.is_none());
        assert_eq!(health.error_message.as_deref(), Some("no data"));
    }

    #[test]
    fn test_event_serializes_with_snake_case_type() {
        let event = HealthEvent::new(
            HealthEventType::PrimaryFailureDetected,
            "primary",
            Severity::Warning,
            "primary unreachable",
            serde_json::json!({ "error": "connection refused" }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "primary_failure_detected");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["metadata"]["error"], "connection refused");
    }
}
