//! In-memory fleet registry: node records, membership mirror, control state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use nodescale_cloud::CloudNode;
use nodescale_core::{ControlMode, ControlState, Node, NodeId, NodeLifecycle};

/// Registry shared by the controller, orchestrator, monitor and API.
/// Never hold the lock across a provider or probe call.
pub type SharedRegistry = Arc<Mutex<FleetRegistry>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetRegistry {
    nodes: BTreeMap<NodeId, Node>,
    /// Ids last sent to the balancer, in admission order.
    members: Vec<NodeId>,
    control: ControlState,
    /// Ids dropped from the registry. A listing taken before the drop may
    /// still carry them; they are never adopted again.
    #[serde(skip)]
    retired: BTreeSet<NodeId>,
}

/// What a reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub adopted: Vec<NodeId>,
    pub addressed: Vec<NodeId>,
    pub forgotten: Vec<NodeId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.adopted.is_empty() && self.addressed.is_empty() && self.forgotten.is_empty()
    }
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    // ── Read side ─────────────────────────────────────────────────

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Clones of every node, ordered by id.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }

    /// `(id, ip)` of every node with an address.
    pub fn addressed_nodes(&self) -> Vec<(NodeId, String)> {
        self.nodes
            .values()
            .filter_map(|n| n.ip_address.clone().map(|ip| (n.id.clone(), ip)))
            .collect()
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    /// Members currently `InService`, in admission order.
    pub fn in_service_members(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|id| self.lifecycle(id) == Some(NodeLifecycle::InService))
            .cloned()
            .collect()
    }

    /// The most recently admitted `InService` member.
    pub fn last_admitted(&self) -> Option<NodeId> {
        self.members
            .iter()
            .rev()
            .find(|id| self.lifecycle(id) == Some(NodeLifecycle::InService))
            .cloned()
    }

    pub fn lifecycle(&self, id: &str) -> Option<NodeLifecycle> {
        self.nodes.get(id).map(|n| n.lifecycle)
    }

    pub fn control(&self) -> &ControlState {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ControlState {
        &mut self.control
    }

    // ── Write side ────────────────────────────────────────────────

    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Returns false when the node is unknown.
    pub fn set_lifecycle(&mut self, id: &str, lifecycle: NodeLifecycle) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.lifecycle = lifecycle;
                true
            }
            None => false,
        }
    }

    pub fn set_address(&mut self, id: &str, ip: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.ip_address = Some(ip.to_string());
        }
    }

    /// Drop a node and its membership entry. The id can never be adopted
    /// again.
    pub fn forget(&mut self, id: &str) -> Option<Node> {
        self.members.retain(|m| m != id);
        self.retired.insert(id.to_string());
        self.nodes.remove(id)
    }

    pub fn is_retired(&self, id: &str) -> bool {
        self.retired.contains(id)
    }

    /// Record a membership update the balancer accepted.
    pub fn set_members(&mut self, ids: Vec<NodeId>) {
        self.members = ids;
    }

    /// End `mode`, logging instead of failing if it was not active.
    pub fn finish(&mut self, mode: ControlMode) {
        match self.control.finish(mode) {
            Ok(()) => info!(?mode, "operation finished"),
            Err(e) => warn!(error = %e, "finish on inactive operation"),
        }
    }

    /// Bring the registry in line with a provider listing.
    ///
    /// Records new addresses and forgets `InService` nodes that vanished.
    /// Unknown nodes with an address are adopted as balancer members, but
    /// only while idle: every create happens inside an operation, so an
    /// unknown node seen mid-operation may be one of ours in flight. Ids
    /// already forgotten are skipped, since the listing may predate their
    /// destruction. Pending and retiring nodes belong to the controller and
    /// are left alone.
    pub fn reconcile(&mut self, listing: &[CloudNode]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let idle = self.control.is_idle();

        for cloud in listing {
            match self.nodes.get_mut(&cloud.id) {
                Some(node) => {
                    if node.ip_address.is_none()
                        && let Some(ip) = &cloud.ip_address
                    {
                        node.ip_address = Some(ip.clone());
                        report.addressed.push(cloud.id.clone());
                    }
                }
                None if self.retired.contains(&cloud.id) => {}
                None => {
                    if idle && let Some(ip) = &cloud.ip_address {
                        self.nodes
                            .insert(cloud.id.clone(), Node::in_service(cloud.id.clone(), ip.clone()));
                        self.members.push(cloud.id.clone());
                        report.adopted.push(cloud.id.clone());
                    }
                }
            }
        }

        let vanished: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| !n.lifecycle.is_pending() && !n.lifecycle.is_retiring())
            .filter(|n| !listing.iter().any(|c| c.id == n.id))
            .map(|n| n.id.clone())
            .collect();
        for id in vanished {
            self.forget(&id);
            report.forgotten.push(id);
        }

        if !report.is_empty() {
            info!(
                adopted = ?report.adopted,
                addressed = ?report.addressed,
                forgotten = ?report.forgotten,
                "registry reconciled"
            );
        }
        report
    }
}
