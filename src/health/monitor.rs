//! Background health monitoring and failover.
//!
//! One long-lived task probes the primary and every replica sequentially
//! each cycle, so total check load is bounded by the instance count. The
//! loop owns all routing-state changes: debounced failover for the primary,
//! lag alerts and automatic resync for replicas. Stop is cooperative; the
//! in-flight cycle always finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, HealthMonitorConfig, InstanceConfig};
use crate::metrics::metrics;

use super::alerts::AlertDispatcher;
use super::probe::{ClusterAdmin, DatabaseProbe};
use super::state::{ClusterView, HealthEvent, HealthEventType, InstanceHealth, Severity};

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("failover already in progress")]
    InProgress,
    #[error("no healthy replica available for promotion")]
    NoHealthyReplica,
    #[error("promotion of {instance} failed: {reason}")]
    PromotionFailed { instance: String, reason: String },
}

/// Debounce state for primary failure.
///
/// `Exhausted` means a failover attempt already ran for this outage; the
/// timer re-arms only after the primary is seen healthy again, so a failed
/// attempt is never silently retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureTimer {
    Clear,
    Detected(Instant),
    Exhausted,
}

enum TimerAction {
    Announce,
    Failover,
    Wait,
}

#[derive(Debug, Default)]
struct ResyncState {
    in_progress: bool,
    last_started: Option<Instant>,
}

/// Aggregate health counts across the current topology.
#[derive(Debug, Clone)]
pub struct HealthStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

/// Tracks per-instance health and drives failover and resync.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    topology: RwLock<ClusterView>,
    /// Latest snapshot per instance id, overwritten each cycle
    statuses: DashMap<String, InstanceHealth>,
    probe: Arc<dyn DatabaseProbe>,
    admin: Arc<dyn ClusterAdmin>,
    alerts: Arc<AlertDispatcher>,
    failure_timer: Mutex<FailureTimer>,
    failover_in_progress: AtomicBool,
    resyncs: DashMap<String, ResyncState>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        cluster: &ClusterConfig,
        probe: Arc<dyn DatabaseProbe>,
        admin: Arc<dyn ClusterAdmin>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            config,
            topology: RwLock::new(ClusterView {
                primary: cluster.primary.clone(),
                replicas: cluster.replicas.clone(),
            }),
            statuses: DashMap::new(),
            probe,
            admin,
            alerts,
            failure_timer: Mutex::new(FailureTimer::Clear),
            failover_in_progress: AtomicBool::new(false),
            resyncs: DashMap::new(),
            cancel: Mutex::new(None),
        }
    }

    /// Start the periodic check loop. Calling while already running logs a
    /// warning and does nothing.
    pub fn start_monitoring(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Health monitoring disabled by configuration");
            return;
        }

        let token = {
            let mut guard = self.cancel.lock();
            if guard.as_ref().is_some_and(|t| !t.is_cancelled()) {
                warn!("Health monitoring already running");
                return;
            }
            let token = CancellationToken::new();
            *guard = Some(token.clone());
            token
        };

        let monitor = Arc::clone(self);
        let interval = Duration::from_millis(self.config.check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Health monitor loop exiting");
                        break;
                    }
                    _ = ticker.tick() => {
                        monitor.run_cycle().await;
                    }
                }
            }
        });

        info!(
            interval_ms = self.config.check_interval_ms,
            "Health monitoring started"
        );
    }

    /// Cancel the check loop. The in-flight cycle finishes before the task
    /// exits.
    pub fn stop_monitoring(&self) {
        match self.cancel.lock().take() {
            Some(token) => {
                token.cancel();
                info!("Health monitoring stopped");
            }
            None => debug!("Health monitoring was not running"),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.cancel
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Last-known status for an instance, or a synthetic unhealthy status
    /// when it was never checked.
    pub fn check_health(&self, instance_id: &str) -> InstanceHealth {
        self.statuses
            .get(instance_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| InstanceHealth::no_data(instance_id))
    }

    /// Current topology snapshot (changes only on failover).
    pub fn cluster_view(&self) -> ClusterView {
        self.topology.read().clone()
    }

    pub fn stats(&self) -> HealthStats {
        let view = self.cluster_view();
        let mut stats = HealthStats {
            total: 0,
            healthy: 0,
            unhealthy: 0,
            unknown: 0,
        };
        let mut tally = |id: &str| {
            stats.total += 1;
            match self.statuses.get(id) {
                Some(s) if s.is_healthy => stats.healthy += 1,
                Some(_) => stats.unhealthy += 1,
                None => stats.unknown += 1,
            }
        };
        tally(&view.primary.id);
        for replica in &view.replicas {
            tally(&replica.id);
        }
        stats
    }

    /// Compare live replicas against the configured minimum. Advisory only.
    pub fn check_replica_capacity(&self) -> bool {
        let view = self.cluster_view();
        let live = view
            .replicas
            .iter()
            .filter(|r| {
                self.statuses
                    .get(&r.id)
                    .map(|s| s.is_healthy)
                    .unwrap_or(false)
            })
            .count();
        let sufficient = live >= self.config.min_replicas;
        if !sufficient {
            warn!(
                live = live,
                min = self.config.min_replicas,
                "Replica capacity below configured minimum"
            );
        }
        sufficient
    }

    async fn run_cycle(&self) {
        let view = self.cluster_view();

        let primary_health = self.check_instance(&view.primary, true).await;
        let primary_healthy = primary_health.is_healthy;
        self.statuses.insert(view.primary.id.clone(), primary_health);

        for replica in &view.replicas {
            let health = self.check_instance(replica, false).await;
            self.statuses.insert(replica.id.clone(), health);
        }

        if primary_healthy {
            self.reset_failure_timer();
        } else {
            self.advance_failure_timer().await;
        }

        // Lag handling runs against the topology as it stands now; a
        // failover above may have promoted one of this cycle's replicas.
        let current_primary_id = self.cluster_view().primary.id;
        for replica in &view.replicas {
            if replica.id == current_primary_id {
                continue;
            }
            let (healthy, lag) = match self.statuses.get(&replica.id) {
                Some(s) => (s.is_healthy, s.replication_lag_seconds),
                None => continue,
            };
            if healthy {
                if let Some(lag) = lag {
                    self.handle_lag(replica, lag).await;
                }
            }
        }

        self.check_replica_capacity();

        let stats = self.stats();
        metrics().set_health_instances(
            stats.healthy as i64,
            stats.unhealthy as i64,
            stats.unknown as i64,
        );
    }

    async fn check_instance(&self, instance: &InstanceConfig, is_primary: bool) -> InstanceHealth {
        let timeout = Duration::from_millis(self.config.check_timeout_ms);
        let result = tokio::time::timeout(timeout, self.probe.check_instance(instance)).await;

        let health = match result {
            Ok(Ok(reading)) => InstanceHealth {
                instance_id: instance.id.clone(),
                is_healthy: true,
                cpu_percent: reading.cpu_percent,
                memory_percent: reading.memory_percent,
                disk_percent: reading.disk_percent,
                replication_lag_seconds: if is_primary {
                    None
                } else {
                    reading.replication_lag_seconds
                },
                last_check: Some(Utc::now()),
                error_message: None,
            },
            Ok(Err(e)) => InstanceHealth {
                instance_id: instance.id.clone(),
                is_healthy: false,
                cpu_percent: 0.0,
                memory_percent: 0.0,
                disk_percent: 0.0,
                replication_lag_seconds: None,
                last_check: Some(Utc::now()),
                error_message: Some(e.to_string()),
            },
            Err(_) => InstanceHealth {
                instance_id: instance.id.clone(),
                is_healthy: false,
                cpu_percent: 0.0,
                memory_percent: 0.0,
                disk_percent: 0.0,
                replication_lag_seconds: None,
                last_check: Some(Utc::now()),
                error_message: Some(format!(
                    "probe timed out after {}ms",
                    self.config.check_timeout_ms
                )),
            },
        };

        metrics().record_health_check(if health.is_healthy { "healthy" } else { "unhealthy" });

        let changed = self
            .statuses
            .get(&instance.id)
            .map(|prev| prev.is_healthy != health.is_healthy)
            .unwrap_or(true);
        if changed {
            if health.is_healthy {
                info!(instance = %instance.id, "Instance is healthy");
            } else {
                warn!(
                    instance = %instance.id,
                    error = ?health.error_message,
                    "Instance is unhealthy"
                );
            }
        } else {
            debug!(instance = %instance.id, healthy = health.is_healthy, "Health check completed");
        }

        health
    }

    fn reset_failure_timer(&self) {
        let mut timer = self.failure_timer.lock();
        match *timer {
            FailureTimer::Detected(_) => info!("Primary recovered before failover timeout"),
            FailureTimer::Exhausted => info!("Primary recovered after failed failover"),
            FailureTimer::Clear => {}
        }
        *timer = FailureTimer::Clear;
    }

    async fn advance_failure_timer(&self) {
        let timeout = Duration::from_millis(self.config.failover_timeout_ms);
        let primary = self.cluster_view().primary;

        let action = {
            let mut timer = self.failure_timer.lock();
            match *timer {
                FailureTimer::Clear => {
                    *timer = FailureTimer::Detected(Instant::now());
                    TimerAction::Announce
                }
                FailureTimer::Detected(since) if since.elapsed() >= timeout => {
                    *timer = FailureTimer::Exhausted;
                    TimerAction::Failover
                }
                FailureTimer::Detected(_) | FailureTimer::Exhausted => TimerAction::Wait,
            }
        };

        match action {
            TimerAction::Announce => {
                self.emit(HealthEvent::new(
                    HealthEventType::PrimaryFailureDetected,
                    &primary.id,
                    Severity::Warning,
                    "primary failed health check, failover timer started",
                    json!({ "failover_timeout_ms": self.config.failover_timeout_ms }),
                ))
                .await;
            }
            TimerAction::Failover => match self.trigger_failover().await {
                Ok(new_primary) => {
                    info!(new_primary = %new_primary.id, "Failover completed");
                }
                Err(e) => {
                    warn!(error = %e, "Failover attempt failed");
                }
            },
            TimerAction::Wait => {}
        }
    }

    /// Promote the best healthy replica and swap the primary pointer.
    ///
    /// Best means lowest replication lag, ties broken by lowest CPU. The
    /// demoted primary rejoins the replica list and keeps being probed, so
    /// it can come back as a read target once it recovers. Re-entrant
    /// triggers are rejected while an attempt is running.
    pub async fn trigger_failover(&self) -> Result<InstanceConfig, FailoverError> {
        if self
            .failover_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Failover already in progress, ignoring trigger");
            return Err(FailoverError::InProgress);
        }

        let result = self.run_failover().await;
        self.failover_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn run_failover(&self) -> Result<InstanceConfig, FailoverError> {
        let view = self.cluster_view();
        let old_primary = view.primary.clone();

        let mut candidates: Vec<(InstanceConfig, f64, f64)> = view
            .replicas
            .iter()
            .filter_map(|replica| {
                let status = self.statuses.get(&replica.id)?;
                if !status.is_healthy {
                    return None;
                }
                let lag = status.replication_lag_seconds.unwrap_or(f64::MAX);
                Some((replica.clone(), lag, status.cpu_percent))
            })
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.2.total_cmp(&b.2)));

        let (target, lag) = match candidates.into_iter().next() {
            Some((replica, lag, _)) => (replica, lag),
            None => {
                metrics().record_failover("failed");
                self.emit(HealthEvent::new(
                    HealthEventType::FailoverFailed,
                    &old_primary.id,
                    Severity::Critical,
                    "no healthy replica available for promotion",
                    json!({ "replicas": view.replicas.len() }),
                ))
                .await;
                return Err(FailoverError::NoHealthyReplica);
            }
        };

        info!(from = %old_primary.id, to = %target.id, "Promoting replica to primary");
        if let Err(e) = self.admin.promote(&target).await {
            metrics().record_failover("failed");
            self.emit(HealthEvent::new(
                HealthEventType::FailoverFailed,
                &target.id,
                Severity::Critical,
                format!("promotion failed: {}", e),
                json!({ "from": old_primary.id, "to": target.id }),
            ))
            .await;
            return Err(FailoverError::PromotionFailed {
                instance: target.id.clone(),
                reason: e.to_string(),
            });
        }

        {
            let mut topology = self.topology.write();
            topology.replicas.retain(|r| r.id != target.id);
            topology.replicas.push(old_primary.clone());
            topology.primary = target.clone();
        }
        if let Some(mut status) = self.statuses.get_mut(&target.id) {
            status.replication_lag_seconds = None;
        }

        metrics().record_failover("completed");
        self.emit(HealthEvent::new(
            HealthEventType::FailoverCompleted,
            &target.id,
            Severity::Critical,
            format!("replica {} promoted to primary", target.id),
            json!({
                "from": old_primary.id,
                "to": target.id,
                "lag_seconds": (lag != f64::MAX).then_some(lag),
            }),
        ))
        .await;

        Ok(target)
    }

    async fn handle_lag(&self, replica: &InstanceConfig, lag: f64) {
        if lag <= self.config.replication_lag_threshold_secs {
            return;
        }

        self.emit(HealthEvent::new(
            HealthEventType::ReplicaLag,
            &replica.id,
            Severity::Warning,
            format!("replication lag {:.1}s exceeds threshold", lag),
            json!({
                "lag_seconds": lag,
                "threshold_seconds": self.config.replication_lag_threshold_secs,
            }),
        ))
        .await;

        if lag > self.config.auto_resync_lag_threshold_secs {
            self.maybe_resync(replica, lag).await;
        }
    }

    /// Launch a resync unless one is in flight for this replica or the
    /// per-replica cooldown has not elapsed.
    async fn maybe_resync(&self, replica: &InstanceConfig, lag: f64) {
        let cooldown = Duration::from_millis(self.config.resync_cooldown_ms);
        let start = {
            let mut state = self.resyncs.entry(replica.id.clone()).or_default();
            if state.in_progress {
                debug!(instance = %replica.id, "Resync already in progress, skipping");
                false
            } else if state
                .last_started
                .is_some_and(|at| at.elapsed() < cooldown)
            {
                debug!(instance = %replica.id, "Resync cooldown active, skipping");
                false
            } else {
                state.in_progress = true;
                state.last_started = Some(Instant::now());
                true
            }
        };
        if !start {
            return;
        }

        metrics().record_resync();
        self.emit(HealthEvent::new(
            HealthEventType::ResyncStarted,
            &replica.id,
            Severity::Info,
            format!("automatic resync started, lag {:.1}s", lag),
            json!({ "lag_seconds": lag }),
        ))
        .await;

        let result = self.admin.resync(replica).await;
        if let Some(mut state) = self.resyncs.get_mut(&replica.id) {
            state.in_progress = false;
        }
        match result {
            Ok(()) => info!(instance = %replica.id, "Resync completed"),
            Err(e) => warn!(instance = %replica.id, error = %e, "Resync failed"),
        }
    }

    async fn emit(&self, event: HealthEvent) {
        self.alerts.dispatch(&event).await;
    }
}
