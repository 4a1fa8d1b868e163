//! Weighted round-robin replica selection
//!
//! This module provides:
//! - Slot-expansion weighted round-robin over healthy replicas
//! - Feedback-driven weight updates from CPU and response-time samples
//! - Pull-based health reconciliation against the health monitor
//! - Primary fallback when no replica is selectable
//!
//! Weighted round-robin was chosen over random or least-connections: it is
//! deterministic, cheap to rebuild, and reuses the feedback the health
//! monitor already produces.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{BalancerConfig, ClusterConfig, InstanceConfig};
use crate::health::HealthMonitor;
use crate::metrics::metrics;

/// Read-only snapshot of one replica's routing state.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: f64,
    pub is_healthy: bool,
    pub cpu_percent: f64,
    pub avg_response_time_ms: f64,
    pub replication_lag_seconds: Option<f64>,
}

#[derive(Debug)]
struct ReplicaEntry {
    instance: InstanceConfig,
    weight: f64,
    is_healthy: bool,
    cpu_percent: f64,
    replication_lag_seconds: Option<f64>,
    samples: VecDeque<f64>,
}

impl ReplicaEntry {
    fn new(instance: InstanceConfig) -> Self {
        Self {
            instance,
            weight: 1.0,
            is_healthy: true,
            cpu_percent: 0.0,
            replication_lag_seconds: None,
            samples: VecDeque::new(),
        }
    }

    fn avg_response_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    fn info(&self) -> ReplicaInfo {
        ReplicaInfo {
            id: self.instance.id.clone(),
            host: self.instance.host.clone(),
            port: self.instance.port,
            weight: self.weight,
            is_healthy: self.is_healthy,
            cpu_percent: self.cpu_percent,
            avg_response_time_ms: self.avg_response_ms(),
            replication_lag_seconds: self.replication_lag_seconds,
        }
    }
}

/// Everything selection touches lives under one lock, so a pick can never
/// observe the weighted list mid-rebuild.
#[derive(Debug)]
struct BalancerState {
    primary: InstanceConfig,
    replicas: Vec<ReplicaEntry>,
    /// Indexes into `replicas`, one slot per unit of granted capacity
    weighted: Vec<usize>,
    cursor: usize,
}

/// Picks read targets among healthy replicas.
#[derive(Debug)]
pub struct LoadBalancer {
    config: BalancerConfig,
    state: Mutex<BalancerState>,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig, cluster: &ClusterConfig) -> Self {
        let mut state = BalancerState {
            primary: cluster.primary.clone(),
            replicas: cluster
                .replicas
                .iter()
                .map(|r| ReplicaEntry::new(r.clone()))
                .collect(),
            weighted: Vec::new(),
            cursor: 0,
        };
        Self::rebuild_weighted(&config, &mut state);
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Pick a read target.
    ///
    /// # Behavior
    /// - Reconciles health and topology from the monitor first, so staleness
    ///   is bounded by the health-check interval
    /// - Healthy replicas are served weighted round-robin; the slot index
    ///   wraps on overflow
    /// - Empty slot list with healthy replicas falls back to plain
    ///   round-robin
    /// - Zero healthy replicas falls back to the primary
    pub fn select_replica(&self, monitor: &HealthMonitor) -> InstanceConfig {
        self.sync_from_monitor(monitor);

        let mut state = self.state.lock();
        let selected = if !state.weighted.is_empty() {
            let idx = state.weighted[state.cursor % state.weighted.len()];
            state.cursor = state.cursor.wrapping_add(1);
            state.replicas[idx].instance.clone()
        } else {
            let healthy: Vec<usize> = state
                .replicas
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_healthy)
                .map(|(i, _)| i)
                .collect();
            if healthy.is_empty() {
                debug!("No healthy replica, falling back to primary");
                state.primary.clone()
            } else {
                // Slot list empty despite healthy replicas: plain round-robin.
                let idx = healthy[state.cursor % healthy.len()];
                state.cursor = state.cursor.wrapping_add(1);
                state.replicas[idx].instance.clone()
            }
        };
        drop(state);

        metrics().record_selection(&selected.id);
        selected
    }

    /// Reconcile replica health, load figures, and topology against the
    /// monitor's latest snapshots. Explicit `mark_healthy`/`mark_unhealthy`
    /// overrides only survive until this runs.
    pub fn sync_from_monitor(&self, monitor: &HealthMonitor) {
        let view = monitor.cluster_view();
        let mut state = self.state.lock();

        state.primary = view.primary;
        state
            .replicas
            .retain(|r| view.replicas.iter().any(|v| v.id == r.instance.id));
        for instance in &view.replicas {
            if !state.replicas.iter().any(|r| r.instance.id == instance.id) {
                info!(instance = %instance.id, "Replica joined the selection pool");
                state.replicas.push(ReplicaEntry::new(instance.clone()));
            }
        }

        for entry in &mut state.replicas {
            let health = monitor.check_health(&entry.instance.id);
            entry.is_healthy = health.is_healthy;
            entry.cpu_percent = health.cpu_percent;
            entry.replication_lag_seconds = health.replication_lag_seconds;
        }

        Self::rebuild_weighted(&self.config, &mut state);
    }

    /// Record a response-time sample into the replica's bounded window.
    pub fn record_response_time(&self, instance_id: &str, response_time_ms: f64) {
        let mut state = self.state.lock();
        let window = self.config.response_window;
        match state
            .replicas
            .iter_mut()
            .find(|r| r.instance.id == instance_id)
        {
            Some(entry) => {
                entry.samples.push_back(response_time_ms);
                while entry.samples.len() > window {
                    entry.samples.pop_front();
                }
            }
            None => debug!(instance = %instance_id, "Response sample for unknown replica"),
        }
    }

    /// Record the observed sample and recompute the replica's weight.
    ///
    /// # Behavior
    /// - Weight starts from 1.0
    /// - CPU at or above the shed threshold multiplies by the shed factor
    /// - The replica's window average against the fleet mean applies a
    ///   proportional boost (faster) or cut (slower)
    /// - The result is clamped to `[weight_min, weight_max]` and the slot
    ///   list is rebuilt
    pub fn update_replica_weight(
        &self,
        instance_id: &str,
        cpu_percent: f64,
        response_time_ms: f64,
    ) {
        let mut state = self.state.lock();

        let pos = match state
            .replicas
            .iter()
            .position(|r| r.instance.id == instance_id)
        {
            Some(pos) => pos,
            None => {
                debug!(instance = %instance_id, "Weight update for unknown replica");
                return;
            }
        };

        {
            let entry = &mut state.replicas[pos];
            entry.cpu_percent = cpu_percent;
            entry.samples.push_back(response_time_ms);
            while entry.samples.len() > self.config.response_window {
                entry.samples.pop_front();
            }
        }

        let fleet: Vec<f64> = state
            .replicas
            .iter()
            .filter(|r| !r.samples.is_empty())
            .map(|r| r.avg_response_ms())
            .collect();
        let fleet_mean = fleet.iter().sum::<f64>() / fleet.len() as f64;

        let entry = &mut state.replicas[pos];
        let mut weight = 1.0;
        if cpu_percent >= self.config.cpu_shed_threshold {
            weight *= self.config.cpu_shed_factor;
        }
        let own_avg = entry.avg_response_ms();
        if own_avg > 0.0 && fleet_mean > 0.0 {
            weight *= fleet_mean / own_avg;
        }
        entry.weight = weight.clamp(self.config.weight_min, self.config.weight_max);
        debug!(
            instance = %instance_id,
            weight = entry.weight,
            cpu = cpu_percent,
            avg_ms = own_avg,
            "Replica weight updated"
        );

        Self::rebuild_weighted(&self.config, &mut state);
    }

    /// Remove a replica from rotation without waiting for the next sync.
    pub fn mark_unhealthy(&self, instance_id: &str) {
        self.set_health(instance_id, false);
    }

    /// Return a replica to rotation without waiting for the next sync.
    pub fn mark_healthy(&self, instance_id: &str) {
        self.set_health(instance_id, true);
    }

    fn set_health(&self, instance_id: &str, healthy: bool) {
        let mut state = self.state.lock();
        match state
            .replicas
            .iter_mut()
            .find(|r| r.instance.id == instance_id)
        {
            Some(entry) => {
                if entry.is_healthy != healthy {
                    if healthy {
                        info!(instance = %instance_id, "Replica marked healthy");
                    } else {
                        warn!(instance = %instance_id, "Replica marked unhealthy");
                    }
                }
                entry.is_healthy = healthy;
            }
            None => {
                debug!(instance = %instance_id, "Health mark for unknown replica");
                return;
            }
        }
        Self::rebuild_weighted(&self.config, &mut state);
    }

    pub fn primary(&self) -> InstanceConfig {
        self.state.lock().primary.clone()
    }

    pub fn replicas(&self) -> Vec<ReplicaInfo> {
        self.state.lock().replicas.iter().map(|r| r.info()).collect()
    }

    /// Expand healthy replicas into selection slots, `max(1, floor(weight *
    /// slots_per_weight))` each.
    fn rebuild_weighted(config: &BalancerConfig, state: &mut BalancerState) {
        state.weighted.clear();
        for (idx, replica) in state.replicas.iter().enumerate() {
            if !replica.is_healthy {
                continue;
            }
            let slots = ((replica.weight * config.slots_per_weight as f64).floor() as usize).max(1);
            for _ in 0..slots {
                state.weighted.push(idx);
            }
        }
        if !state.weighted.is_empty() {
            state.cursor %= state.weighted.len();
        }
    }

    #[cfg(test)]
    fn pick_without_sync(&self) -> InstanceConfig {
        let mut state = self.state.lock();
        if !state.weighted.is_empty() {
            let idx = state.weighted[state.cursor % state.weighted.len()];
            state.cursor = state.cursor.wrapping_add(1);
            return state.replicas[idx].instance.clone();
        }
        let healthy: Vec<usize> = state
            .replicas
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_healthy)
            .map(|(i, _)| i)
            .collect();
        if healthy.is_empty() {
            return state.primary.clone();
        }
        let idx = healthy[state.cursor % healthy.len()];
        state.cursor = state.cursor.wrapping_add(1);
        state.replicas[idx].instance.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthMonitorConfig;
    use crate::health::{
        AdminError, AlertDispatcher, ClusterAdmin, DatabaseProbe, ProbeError, ProbeReading,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn instance(id: &str) -> InstanceConfig {
        InstanceConfig {
            id: id.to_string(),
            host: format!("{id}.db.local"),
            port: 5432,
        }
    }

    fn cluster(replica_ids: &[&str]) -> ClusterConfig {
        ClusterConfig {
            primary: instance("primary"),
            replicas: replica_ids.iter().map(|id| instance(id)).collect(),
        }
    }

    fn balancer(replica_ids: &[&str]) -> LoadBalancer {
        LoadBalancer::new(BalancerConfig::default(), &cluster(replica_ids))
    }

    fn selection_counts(lb: &LoadBalancer, picks: usize) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..picks {
            *counts.entry(lb.pick_without_sync().id).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_equal_weights_split_evenly() {
        let lb = balancer(&["replica-1", "replica-2"]);
        let counts = selection_counts(&lb, 20);
        assert_eq!(counts["replica-1"], 10);
        assert_eq!(counts["replica-2"], 10);
    }

    #[test]
    fn test_faster_replica_gets_proportional_share() {
        let lb = balancer(&["replica-1", "replica-2"]);
        // Two rounds so both weights see the final fleet mean.
        lb.update_replica_weight("replica-1", 10.0, 40.0);
        lb.update_replica_weight("replica-2", 10.0, 80.0);
        lb.update_replica_weight("replica-1", 10.0, 40.0);
        lb.update_replica_weight("replica-2", 10.0, 80.0);

        // Weights 1.5 and 0.75 give 15 and 7 slots.
        let counts = selection_counts(&lb, 220);
        let fast = counts["replica-1"] as f64;
        let slow = counts["replica-2"] as f64;
        assert!(
            fast > slow * 1.5 && fast < slow * 3.0,
            "expected roughly 2:1 split, got {fast}:{slow}"
        );
    }

    #[test]
    fn test_cpu_shedding_halves_share() {
        let lb = balancer(&["replica-1", "replica-2"]);
        lb.update_replica_weight("replica-1", 85.0, 50.0);
        lb.update_replica_weight("replica-2", 10.0, 50.0);

        // 5 slots vs 10 slots; a full pass over the list is exact.
        let counts = selection_counts(&lb, 15);
        assert_eq!(counts["replica-1"], 5);
        assert_eq!(counts["replica-2"], 10);
    }

    #[test]
    fn test_weight_clamped_to_bounds() {
        let lb = balancer(&["replica-1", "replica-2"]);
        lb.update_replica_weight("replica-1", 10.0, 1.0);
        lb.update_replica_weight("replica-2", 10.0, 1000.0);
        lb.update_replica_weight("replica-1", 10.0, 1.0);

        let info: HashMap<String, f64> = lb
            .replicas()
            .into_iter()
            .map(|r| (r.id, r.weight))
            .collect();
        assert_eq!(info["replica-1"], 10.0);
        assert!(info["replica-2"] >= 0.1 && info["replica-2"] < 1.0);
    }

    #[test]
    fn test_zero_healthy_falls_back_to_primary() {
        let lb = balancer(&["replica-1", "replica-2"]);
        lb.mark_unhealthy("replica-1");
        lb.mark_unhealthy("replica-2");

        for _ in 0..5 {
            assert_eq!(lb.pick_without_sync().id, "primary");
        }
    }

    #[test]
    fn test_mark_healthy_restores_rotation() {
        let lb = balancer(&["replica-1", "replica-2"]);
        lb.mark_unhealthy("replica-1");
        lb.mark_unhealthy("replica-2");
        assert_eq!(lb.pick_without_sync().id, "primary");

        lb.mark_healthy("replica-1");
        for _ in 0..5 {
            assert_eq!(lb.pick_without_sync().id, "replica-1");
        }
    }

    #[test]
    fn test_unhealthy_replica_excluded() {
        let lb = balancer(&["replica-1", "replica-2"]);
        lb.mark_unhealthy("replica-2");

        let counts = selection_counts(&lb, 10);
        assert_eq!(counts["replica-1"], 10);
        assert!(!counts.contains_key("replica-2"));
    }

    #[test]
    fn test_response_window_is_bounded() {
        let mut config = BalancerConfig::default();
        config.response_window = 100;
        let lb = LoadBalancer::new(config, &cluster(&["replica-1"]));

        for _ in 0..100 {
            lb.record_response_time("replica-1", 100.0);
        }
        for _ in 0..50 {
            lb.record_response_time("replica-1", 0.0);
        }

        // Window holds the last 100 samples: 50 at 100ms, 50 at 0ms.
        let info = &lb.replicas()[0];
        assert!((info.avg_response_time_ms - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_replica_ops_are_ignored() {
        let lb = balancer(&["replica-1"]);
        lb.record_response_time("ghost", 10.0);
        lb.update_replica_weight("ghost", 50.0, 10.0);
        lb.mark_unhealthy("ghost");
        assert_eq!(lb.replicas().len(), 1);
        assert_eq!(lb.pick_without_sync().id, "replica-1");
    }

    struct StubProbe;

    #[async_trait]
    impl DatabaseProbe for StubProbe {
        async fn check_instance(
            &self,
            _instance: &InstanceConfig,
        ) -> Result<ProbeReading, ProbeError> {
            Ok(ProbeReading::default())
        }
    }

    struct StubAdmin;

    #[async_trait]
    impl ClusterAdmin for StubAdmin {
        async fn promote(&self, _replica: &InstanceConfig) -> Result<(), AdminError> {
            Ok(())
        }

        async fn resync(&self, _replica: &InstanceConfig) -> Result<(), AdminError> {
            Ok(())
        }
    }

    fn idle_monitor(replica_ids: &[&str]) -> HealthMonitor {
        HealthMonitor::new(
            HealthMonitorConfig::default(),
            &cluster(replica_ids),
            Arc::new(StubProbe),
            Arc::new(StubAdmin),
            Arc::new(AlertDispatcher::new(Vec::new())),
        )
    }

    #[test]
    fn test_sync_overrides_local_marks() {
        let lb = balancer(&["replica-1"]);
        let monitor = idle_monitor(&["replica-1"]);

        // The monitor has never checked anything, so every instance reads
        // as unhealthy and selection lands on the primary.
        lb.mark_healthy("replica-1");
        assert_eq!(lb.select_replica(&monitor).id, "primary");
        assert!(!lb.replicas()[0].is_healthy);
    }
}
