//! The monitoring loop end to end: sustained failure, promotion, and the
//! balancer following the new topology.

use std::sync::Arc;
use std::time::Duration;

use argus::config::{BalancerConfig, HealthMonitorConfig};
use argus::{AlertDispatcher, HealthMonitor, LoadBalancer};

use crate::{cluster, init_tracing, reading, RecordingAdmin, ScriptedProbe};

fn monitor_config(failover_timeout_ms: u64) -> HealthMonitorConfig {
    HealthMonitorConfig {
        check_interval_ms: 25,
        failover_timeout_ms,
        resync_cooldown_ms: 60_000,
        ..HealthMonitorConfig::default()
    }
}

#[tokio::test]
async fn test_sustained_primary_failure_promotes_best_replica() {
    init_tracing();
    let cluster = cluster(&["replica-1", "replica-2"]);

    let probe = ScriptedProbe::new();
    probe.set_down("primary", "connection refused");
    probe.set_healthy("replica-1", reading(35.0, Some(4.0)));
    probe.set_healthy("replica-2", reading(30.0, Some(0.5)));
    let admin = Arc::new(RecordingAdmin::new());

    let monitor = Arc::new(HealthMonitor::new(
        monitor_config(100),
        &cluster,
        Arc::new(probe),
        admin.clone(),
        Arc::new(AlertDispatcher::new(Vec::new())),
    ));
    monitor.start_monitoring();
    tokio::time::sleep(Duration::from_millis(400)).await;
    monitor.stop_monitoring();

    // Many cycles ran past the timeout, yet exactly one promotion
    // happened, and it chose the replica with the least lag.
    assert_eq!(admin.promotions.lock().as_slice(), ["replica-2"]);

    let view = monitor.cluster_view();
    assert_eq!(view.primary.id, "replica-2");
    let replica_ids: Vec<&str> = view.replicas.iter().map(|r| r.id.as_str()).collect();
    assert!(replica_ids.contains(&"replica-1"));
    assert!(replica_ids.contains(&"primary"));
}

#[tokio::test]
async fn test_selection_follows_promoted_topology() {
    init_tracing();
    let cluster = cluster(&["replica-1", "replica-2"]);

    let probe = ScriptedProbe::new();
    probe.set_down("primary", "connection refused");
    probe.set_healthy("replica-1", reading(35.0, Some(1.0)));
    probe.set_healthy("replica-2", reading(30.0, Some(0.5)));
    let admin = Arc::new(RecordingAdmin::new());

    let monitor = Arc::new(HealthMonitor::new(
        monitor_config(100),
        &cluster,
        Arc::new(probe),
        admin.clone(),
        Arc::new(AlertDispatcher::new(Vec::new())),
    ));
    let balancer = LoadBalancer::new(BalancerConfig::default(), &cluster);

    monitor.start_monitoring();
    tokio::time::sleep(Duration::from_millis(400)).await;
    monitor.stop_monitoring();

    assert_eq!(monitor.cluster_view().primary.id, "replica-2");

    // The demoted primary is still down, so selection always lands on the
    // one remaining healthy replica.
    for _ in 0..10 {
        assert_eq!(balancer.select_replica(&monitor).id, "replica-1");
    }
}

#[tokio::test]
async fn test_recovery_before_timeout_avoids_failover() {
    init_tracing();
    let cluster = cluster(&["replica-1"]);

    let probe = Arc::new(ScriptedProbe::new());
    probe.set_down("primary", "connection refused");
    probe.set_healthy("replica-1", reading(30.0, Some(0.5)));
    let admin = Arc::new(RecordingAdmin::new());

    let monitor = Arc::new(HealthMonitor::new(
        monitor_config(300),
        &cluster,
        probe.clone(),
        admin.clone(),
        Arc::new(AlertDispatcher::new(Vec::new())),
    ));
    monitor.start_monitoring();

    // The primary comes back halfway through the debounce window.
    tokio::time::sleep(Duration::from_millis(150)).await;
    probe.set_healthy("primary", reading(20.0, None));
    tokio::time::sleep(Duration::from_millis(200)).await;
    monitor.stop_monitoring();

    assert!(admin.promotions.lock().is_empty());
    assert_eq!(monitor.cluster_view().primary.id, "primary");
    assert!(monitor.check_health("primary").is_healthy);
}

#[tokio::test]
async fn test_lagging_replica_resynced_once_per_cooldown() {
    init_tracing();
    let cluster = cluster(&["replica-1"]);

    let probe = ScriptedProbe::new();
    probe.set_healthy("primary", reading(20.0, None));
    // Above the default 30s auto-resync threshold.
    probe.set_healthy("replica-1", reading(30.0, Some(45.0)));
    let admin = Arc::new(RecordingAdmin::new());

    let monitor = Arc::new(HealthMonitor::new(
        monitor_config(30_000),
        &cluster,
        Arc::new(probe),
        admin.clone(),
        Arc::new(AlertDispatcher::new(Vec::new())),
    ));
    monitor.start_monitoring();
    tokio::time::sleep(Duration::from_millis(300)).await;
    monitor.stop_monitoring();

    assert_eq!(admin.resyncs.lock().as_slice(), ["replica-1"]);
    assert!(admin.promotions.lock().is_empty());
}
