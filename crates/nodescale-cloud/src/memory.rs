//! In-process provider with an operation log and failure injection.
//!
//! `MemoryCloud` behaves like a well-mannered provider: ids are assigned
//! sequentially, addresses appear after a configurable number of listings,
//! destroy is idempotent, and membership updates replace the whole set.
//! It also records whether a node was destroyed while still a balancer
//! member, which must never happen.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use nodescale_core::NodeId;
use nodescale_core::config::NodeSpec;

use crate::client::{CloudClient, CloudNode};
use crate::error::{CloudError, CloudResult};

/// One mutating call observed by the provider, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudOp {
    Create(NodeId),
    Destroy(NodeId),
    SetMembership(Vec<NodeId>),
}

#[derive(Debug)]
struct MemoryNode {
    ip_address: String,
    tags: Vec<String>,
    /// Listings left before the address becomes visible.
    hidden_for: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    nodes: BTreeMap<NodeId, MemoryNode>,
    membership: Vec<NodeId>,
    ops: Vec<CloudOp>,
    address_after_lists: u32,
    fail_lists: u32,
    fail_creates: u32,
    fail_membership: u32,
    destroyed_members: Vec<NodeId>,
}

impl MemoryState {
    fn allocate(&mut self) -> (NodeId, String) {
        let n = self.next_id;
        self.next_id += 1;
        let id = (1001 + n).to_string();
        let ip = format!("10.0.{}.{}", n / 250, n % 250 + 2);
        (id, ip)
    }
}

/// Deterministic in-memory [`CloudClient`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloud {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// New nodes only show an address after `lists` listings.
    pub fn with_address_delay(self, lists: u32) -> Self {
        self.lock().address_after_lists = lists;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pre-populate `count` running nodes tagged `tag` that are already
    /// balancer members. Not recorded in the operation log.
    pub fn seed_fleet(&self, count: usize, tag: &str) -> Vec<NodeId> {
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let (id, ip_address) = state.allocate();
            state.nodes.insert(
                id.clone(),
                MemoryNode {
                    ip_address,
                    tags: vec![tag.to_string()],
                    hidden_for: 0,
                },
            );
            ids.push(id);
        }
        state.membership.extend(ids.iter().cloned());
        ids
    }

    /// Make the next `n` listings fail with a transient error.
    pub fn fail_next_lists(&self, n: u32) {
        self.lock().fail_lists = n;
    }

    /// Make the next `n` creates fail with a provider rejection.
    pub fn fail_next_creates(&self, n: u32) {
        self.lock().fail_creates = n;
    }

    /// Make the next `n` membership updates fail with a provider rejection.
    pub fn fail_next_membership_updates(&self, n: u32) {
        self.lock().fail_membership = n;
    }

    /// Remove a node behind the controller's back, as if destroyed by hand.
    pub fn vanish(&self, id: &str) {
        let mut state = self.lock();
        state.nodes.remove(id);
        state.membership.retain(|m| m != id);
    }

    pub fn operations(&self) -> Vec<CloudOp> {
        self.lock().ops.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().ops.clear();
    }

    /// Ids of every node that currently exists, ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.lock().nodes.keys().cloned().collect()
    }

    /// Current balancer member set, in the order last written.
    pub fn membership(&self) -> Vec<NodeId> {
        self.lock().membership.clone()
    }

    pub fn ip_of(&self, id: &str) -> Option<String> {
        self.lock().nodes.get(id).map(|n| n.ip_address.clone())
    }

    /// Nodes destroyed while still in the balancer. Should stay empty.
    pub fn destroyed_while_member(&self) -> Vec<NodeId> {
        self.lock().destroyed_members.clone()
    }
}

#[async_trait]
impl CloudClient for MemoryCloud {
    async fn list_nodes(&self, tag: &str) -> CloudResult<Vec<CloudNode>> {
        let mut state = self.lock();
        if state.fail_lists > 0 {
            state.fail_lists -= 1;
            return Err(CloudError::Transient("service_unavailable".to_string()));
        }

        let nodes = state
            .nodes
            .iter_mut()
            .filter(|(_, n)| n.tags.iter().any(|t| t == tag))
            .map(|(id, n)| {
                let ip_address = if n.hidden_for == 0 {
                    Some(n.ip_address.clone())
                } else {
                    n.hidden_for -= 1;
                    None
                };
                CloudNode {
                    id: id.clone(),
                    ip_address,
                    tags: n.tags.clone(),
                }
            })
            .collect();
        Ok(nodes)
    }

    async fn create_node(&self, spec: &NodeSpec) -> CloudResult<NodeId> {
        let mut state = self.lock();
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(CloudError::Provider {
                status: 422,
                message: "droplet limit exceeded".to_string(),
            });
        }

        let (id, ip_address) = state.allocate();
        let hidden_for = state.address_after_lists;
        state.nodes.insert(
            id.clone(),
            MemoryNode {
                ip_address,
                tags: spec.tags.clone(),
                hidden_for,
            },
        );
        state.ops.push(CloudOp::Create(id.clone()));
        debug!(node_id = %id, "memory cloud: node created");
        Ok(id)
    }

    async fn destroy_node(&self, id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if state.membership.iter().any(|m| m == id) {
            state.destroyed_members.push(id.to_string());
        }
        state.nodes.remove(id);
        state.ops.push(CloudOp::Destroy(id.to_string()));
        debug!(node_id = %id, "memory cloud: node destroyed");
        Ok(())
    }

    async fn set_balancer_membership(&self, ids: &[NodeId]) -> CloudResult<()> {
        let mut state = self.lock();
        if state.fail_membership > 0 {
            state.fail_membership -= 1;
            return Err(CloudError::Provider {
                status: 422,
                message: "load balancer update rejected".to_string(),
            });
        }
        state.membership = ids.to_vec();
        state.ops.push(CloudOp::SetMembership(ids.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(tag: &str) -> NodeSpec {
        NodeSpec {
            tags: vec![tag.to_string()],
            ..NodeSpec::default()
        }
    }

    #[tokio::test]
    async fn seeded_fleet_is_listed_and_in_balancer() {
        let cloud = MemoryCloud::new();
        let ids = cloud.seed_fleet(2, "web");

        let listed = cloud.list_nodes("web").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|n| n.ip_address.is_some()));
        assert_eq!(cloud.membership(), ids);
        assert!(cloud.operations().is_empty());
        assert!(cloud.list_nodes("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn address_appears_after_delay() {
        let cloud = MemoryCloud::new().with_address_delay(2);
        let id = cloud.create_node(&spec("web")).await.unwrap();

        assert_eq!(cloud.list_nodes("web").await.unwrap()[0].ip_address, None);
        assert_eq!(cloud.list_nodes("web").await.unwrap()[0].ip_address, None);
        assert_eq!(
            cloud.list_nodes("web").await.unwrap()[0].ip_address,
            cloud.ip_of(&id)
        );
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_flags_members() {
        let cloud = MemoryCloud::new();
        let ids = cloud.seed_fleet(1, "web");

        cloud.destroy_node(&ids[0]).await.unwrap();
        cloud.destroy_node(&ids[0]).await.unwrap();
        assert!(cloud.node_ids().is_empty());
        assert_eq!(cloud.destroyed_while_member(), vec![ids[0].clone()]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let cloud = MemoryCloud::new();
        cloud.fail_next_lists(1);
        cloud.fail_next_creates(1);
        cloud.fail_next_membership_updates(1);

        assert!(cloud.list_nodes("web").await.unwrap_err().is_transient());
        assert!(cloud.list_nodes("web").await.is_ok());

        assert!(!cloud.create_node(&spec("web")).await.unwrap_err().is_transient());
        let id = cloud.create_node(&spec("web")).await.unwrap();

        assert!(cloud.set_balancer_membership(&[id.clone()]).await.is_err());
        cloud.set_balancer_membership(&[id.clone()]).await.unwrap();
        assert_eq!(cloud.membership(), vec![id.clone()]);
        assert_eq!(
            cloud.operations(),
            vec![CloudOp::Create(id.clone()), CloudOp::SetMembership(vec![id])]
        );
    }
}
