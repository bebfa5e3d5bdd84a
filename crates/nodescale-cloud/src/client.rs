//! The provider abstraction consumed by the control loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nodescale_core::NodeId;
use nodescale_core::config::NodeSpec;

use crate::error::CloudResult;

/// A node as reported by the provider listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudNode {
    pub id: NodeId,
    /// Absent until the provider has assigned an address.
    pub ip_address: Option<String>,
    pub tags: Vec<String>,
}

/// Node and load balancer operations of a cloud provider.
///
/// Implementations must make `destroy_node` idempotent (a missing node is
/// success) and `set_balancer_membership` a full atomic replacement of the
/// member set.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// All nodes carrying `tag`.
    async fn list_nodes(&self, tag: &str) -> CloudResult<Vec<CloudNode>>;

    /// Create one node from the template and return its id.
    async fn create_node(&self, spec: &NodeSpec) -> CloudResult<NodeId>;

    /// Destroy a node. Destroying an unknown id succeeds.
    async fn destroy_node(&self, id: &str) -> CloudResult<()>;

    /// Replace the balancer's member set with exactly `ids`.
    async fn set_balancer_membership(&self, ids: &[NodeId]) -> CloudResult<()>;
}
