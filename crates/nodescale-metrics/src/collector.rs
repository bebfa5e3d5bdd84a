//! Lock-free counters and gauges updated by the fleet monitor.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::Serialize;

use nodescale_core::{ControlMode, FleetSnapshot};

#[derive(Debug)]
pub struct FleetMetrics {
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    probe_failures: AtomicU64,
    scale_ups: AtomicU64,
    scale_downs: AtomicU64,
    deploys: AtomicU64,
    nodes: AtomicU64,
    ready_nodes: AtomicU64,
    /// `f64` bits; NaN while no node has answered.
    average_cpu: AtomicU64,
    mode: AtomicU8,
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub probe_failures: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub deploys: u64,
    pub nodes: u64,
    pub ready_nodes: u64,
    pub average_cpu: Option<f64>,
    pub mode: ControlMode,
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            scale_ups: AtomicU64::new(0),
            scale_downs: AtomicU64::new(0),
            deploys: AtomicU64::new(0),
            nodes: AtomicU64::new(0),
            ready_nodes: AtomicU64::new(0),
            average_cpu: AtomicU64::new(f64::NAN.to_bits()),
            mode: AtomicU8::new(mode_index(ControlMode::Idle)),
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scale_up(&self) {
        self.scale_ups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scale_down(&self) {
        self.scale_downs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deploy(&self) {
        self.deploys.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_mode(&self, mode: ControlMode) {
        self.mode.store(mode_index(mode), Ordering::Relaxed);
    }

    /// Update fleet gauges and count failed probes from one round.
    pub fn observe_snapshot(&self, snapshot: &FleetSnapshot) {
        let failures = snapshot.samples.values().filter(|s| !s.ok).count() as u64;
        self.probe_failures.fetch_add(failures, Ordering::Relaxed);
        self.nodes.store(snapshot.node_count() as u64, Ordering::Relaxed);
        self.ready_nodes.store(snapshot.ready_count as u64, Ordering::Relaxed);
        let cpu = snapshot.average_cpu.unwrap_or(f64::NAN);
        self.average_cpu.store(cpu.to_bits(), Ordering::Relaxed);
    }

    pub fn report(&self) -> MetricsReport {
        let cpu = f64::from_bits(self.average_cpu.load(Ordering::Relaxed));
        MetricsReport {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            scale_ups: self.scale_ups.load(Ordering::Relaxed),
            scale_downs: self.scale_downs.load(Ordering::Relaxed),
            deploys: self.deploys.load(Ordering::Relaxed),
            nodes: self.nodes.load(Ordering::Relaxed),
            ready_nodes: self.ready_nodes.load(Ordering::Relaxed),
            average_cpu: (!cpu.is_nan()).then_some(cpu),
            mode: mode_from_index(self.mode.load(Ordering::Relaxed)),
        }
    }
}

fn mode_index(mode: ControlMode) -> u8 {
    match mode {
        ControlMode::Idle => 0,
        ControlMode::ScalingUp => 1,
        ControlMode::ScalingDown => 2,
        ControlMode::Deploying => 3,
    }
}

fn mode_from_index(index: u8) -> ControlMode {
    match index {
        1 => ControlMode::ScalingUp,
        2 => ControlMode::ScalingDown,
        3 => ControlMode::Deploying,
        _ => ControlMode::Idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use nodescale_core::{HealthSample, Node};

    #[test]
    fn fresh_metrics_have_unknown_cpu() {
        let report = FleetMetrics::new().report();
        assert_eq!(report.ticks, 0);
        assert_eq!(report.average_cpu, None);
        assert_eq!(report.mode, ControlMode::Idle);
    }

    #[test]
    fn snapshot_updates_gauges_and_failure_count() {
        let metrics = FleetMetrics::new();
        let nodes = vec![Node::in_service("a", "10.0.0.1"), Node::in_service("b", "10.0.0.2")];
        let mut samples = BTreeMap::new();
        samples.insert("a".to_string(), HealthSample::healthy("a", 64.0));
        samples.insert("b".to_string(), HealthSample::failed("b"));
        let snapshot = FleetSnapshot::build(nodes, samples);

        metrics.observe_snapshot(&snapshot);
        metrics.observe_snapshot(&snapshot);
        let report = metrics.report();
        assert_eq!(report.nodes, 2);
        assert_eq!(report.ready_nodes, 1);
        assert_eq!(report.average_cpu, Some(64.0));
        assert_eq!(report.probe_failures, 2);
    }

    #[test]
    fn counters_and_mode() {
        let metrics = FleetMetrics::new();
        metrics.record_tick();
        metrics.record_tick();
        metrics.record_skip();
        metrics.record_scale_up();
        metrics.record_deploy();
        metrics.set_mode(ControlMode::Deploying);

        let report = metrics.report();
        assert_eq!(report.ticks, 2);
        assert_eq!(report.skipped_ticks, 1);
        assert_eq!(report.scale_ups, 1);
        assert_eq!(report.scale_downs, 0);
        assert_eq!(report.deploys, 1);
        assert_eq!(report.mode, ControlMode::Deploying);
    }

    #[test]
    fn report_serializes() {
        let json = serde_json::to_value(FleetMetrics::new().report()).unwrap();
        assert_eq!(json["mode"], "idle");
        assert!(json["average_cpu"].is_null());
    }
}
