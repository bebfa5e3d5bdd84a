//! Domain types for the fleet: nodes, health samples, and snapshots.
//!
//! `Node` records are owned by the lifecycle controller's registry; every
//! other component works on clones. `HealthSample` and `FleetSnapshot` are
//! rebuilt every monitor tick and never persisted.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Provider-assigned identifier for a node.
pub type NodeId = String;

// ── Node ──────────────────────────────────────────────────────────

/// Where a node is in its create → serve → retire lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLifecycle {
    /// Created at the provider, no network address yet.
    Provisioning,
    /// Has an address, waiting for its first healthy sample.
    AwaitingReady,
    /// Passed readiness. May or may not be a balancer member yet.
    InService,
    /// Removed from the balancer, waiting out the grace delay.
    Draining,
    /// Destroy request in flight.
    Terminating,
}

impl NodeLifecycle {
    /// Whether the controller is still bringing this node up.
    pub fn is_pending(&self) -> bool {
        matches!(self, NodeLifecycle::Provisioning | NodeLifecycle::AwaitingReady)
    }

    /// Whether the controller is tearing this node down.
    pub fn is_retiring(&self) -> bool {
        matches!(self, NodeLifecycle::Draining | NodeLifecycle::Terminating)
    }
}

/// One compute instance in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Private address, once the provider has assigned one.
    pub ip_address: Option<String>,
    pub lifecycle: NodeLifecycle,
    /// Unix timestamp (seconds) when the controller first saw this node.
    pub created_at: u64,
}

impl Node {
    /// A freshly created node with no address yet.
    pub fn provisioning(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            ip_address: None,
            lifecycle: NodeLifecycle::Provisioning,
            created_at: epoch_secs(),
        }
    }

    /// A node discovered already running (startup adoption).
    pub fn in_service(id: impl Into<NodeId>, ip_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ip_address: Some(ip_address.into()),
            lifecycle: NodeLifecycle::InService,
            created_at: epoch_secs(),
        }
    }
}

// ── Health ────────────────────────────────────────────────────────

/// A point-in-time CPU reading from one node, or a failure marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSample {
    pub node_id: NodeId,
    /// CPU usage in percent. Meaningless when `ok` is false.
    pub cpu_percent: f64,
    /// Unix timestamp (milliseconds) when the probe completed.
    pub sampled_at: u64,
    pub ok: bool,
}

impl HealthSample {
    /// A successful reading.
    pub fn healthy(node_id: impl Into<NodeId>, cpu_percent: f64) -> Self {
        Self {
            node_id: node_id.into(),
            cpu_percent,
            sampled_at: epoch_millis(),
            ok: true,
        }
    }

    /// A probe that timed out, failed to connect, or returned no usage.
    pub fn failed(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            cpu_percent: 0.0,
            sampled_at: epoch_millis(),
            ok: false,
        }
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Aggregated fleet health for a single monitor tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetSnapshot {
    /// Every node the controller knows about, ordered by id.
    pub nodes: Vec<Node>,
    pub samples: BTreeMap<NodeId, HealthSample>,
    /// Mean CPU over successful samples. `None` when nothing answered.
    pub average_cpu: Option<f64>,
    /// Number of successful samples.
    pub ready_count: usize,
    /// Unix timestamp (milliseconds) when the snapshot was built.
    pub taken_at: u64,
}

impl FleetSnapshot {
    /// Build a snapshot from the node list and the round's samples.
    ///
    /// Samples for ids not in `nodes` are dropped. Nodes without a sample
    /// (no address yet) do not count towards the average.
    pub fn build(mut nodes: Vec<Node>, samples: BTreeMap<NodeId, HealthSample>) -> Self {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let samples: BTreeMap<NodeId, HealthSample> = samples
            .into_iter()
            .filter(|(id, _)| nodes.iter().any(|n| &n.id == id))
            .collect();

        let ok: Vec<f64> = samples
            .values()
            .filter(|s| s.ok)
            .map(|s| s.cpu_percent)
            .collect();
        let ready_count = ok.len();
        let average_cpu = if ready_count == 0 {
            None
        } else {
            Some(ok.iter().sum::<f64>() / ready_count as f64)
        };

        Self {
            nodes,
            samples,
            average_cpu,
            ready_count,
            taken_at: epoch_millis(),
        }
    }

    /// Total number of nodes, whatever their lifecycle state.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the given node answered its probe this tick.
    pub fn is_ready(&self, node_id: &str) -> bool {
        self.samples.get(node_id).is_some_and(|s| s.ok)
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
