//! Lifecycle controller: the create path, the retire path, and the
//! primitives the deployment orchestrator builds on.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use nodescale_cloud::{CloudClient, CloudNode, RetryPolicy, with_retry};
use nodescale_core::config::NodeSpec;
use nodescale_core::{ControlMode, Node, NodeId, NodeLifecycle, ScalerConfig};
use nodescale_health::HealthProbe;

use crate::error::{LifecycleError, LifecycleResult};
use crate::readiness::{ReadinessPurpose, watch_readiness};
use crate::registry::{ReconcileReport, SharedRegistry};

/// Everything the controller needs from the configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub tag: String,
    pub node_spec: NodeSpec,
    pub minimum_nodes: usize,
    pub readiness_poll_interval: Duration,
    pub readiness_timeout: Duration,
    pub grace_delay: Duration,
    pub retry: RetryPolicy,
}

impl LifecycleSettings {
    pub fn from_config(config: &ScalerConfig) -> Self {
        Self {
            tag: config.fleet.tag.clone(),
            node_spec: config.node_spec(),
            minimum_nodes: config.fleet.minimum_nodes,
            readiness_poll_interval: config.timing.readiness_poll_interval(),
            readiness_timeout: config.timing.readiness_timeout(),
            grace_delay: config.timing.grace_delay(),
            retry: RetryPolicy::from_config(&config.provider.retry),
        }
    }
}

/// Creates, admits, drains and destroys nodes. Cheap to clone; clones
/// share the registry and the task set.
#[derive(Clone)]
pub struct LifecycleController {
    pub(crate) cloud: Arc<dyn CloudClient>,
    pub(crate) prober: Arc<dyn HealthProbe>,
    pub(crate) settings: Arc<LifecycleSettings>,
    pub(crate) registry: SharedRegistry,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl LifecycleController {
    pub fn new(
        cloud: Arc<dyn CloudClient>,
        prober: Arc<dyn HealthProbe>,
        settings: LifecycleSettings,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            cloud,
            prober,
            settings: Arc::new(settings),
            registry,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn cloud(&self) -> Arc<dyn CloudClient> {
        self.cloud.clone()
    }

    // ── Create path ───────────────────────────────────────────────

    /// Start a scale-up: create one node and watch it until it can be
    /// admitted. Returns once the node exists at the provider.
    pub async fn scale_up(&self) -> LifecycleResult<NodeId> {
        self.registry.lock().await.control_mut().begin(ControlMode::ScalingUp)?;

        let id = match self.create_tracked().await {
            Ok(id) => id,
            Err(e) => {
                self.registry.lock().await.finish(ControlMode::ScalingUp);
                return Err(e);
            }
        };
        self.registry
            .lock()
            .await
            .control_mut()
            .set_pending(vec![id.clone()]);

        info!(node_id = %id, "scale up: node created, awaiting readiness");
        self.spawn_watcher(id.clone(), ReadinessPurpose::ScaleUp);
        Ok(id)
    }

    /// Create and watch a node without touching mode or membership. On
    /// readiness it becomes `InService` but is not admitted.
    pub async fn provision_replacement(&self) -> LifecycleResult<NodeId> {
        let id = self.create_tracked().await?;
        info!(node_id = %id, "replacement node created");
        self.spawn_watcher(id.clone(), ReadinessPurpose::Replacement);
        Ok(id)
    }

    async fn create_tracked(&self) -> LifecycleResult<NodeId> {
        let id = self
            .cloud
            .create_node(&self.settings.node_spec)
            .await
            .map_err(|e| {
                warn!(error = %e, "node creation failed");
                LifecycleError::Provider(e)
            })?;
        self.registry.lock().await.insert(Node::provisioning(id.clone()));
        Ok(id)
    }

    fn spawn_watcher(&self, id: NodeId, purpose: ReadinessPurpose) {
        let ctl = self.clone();
        self.spawn(async move { watch_readiness(ctl, id, purpose).await });
    }

    // ── Retire path ───────────────────────────────────────────────

    /// Start a scale-down: pull the most recently admitted member out of
    /// the balancer now, destroy it after the grace delay.
    pub async fn scale_down(&self) -> LifecycleResult<NodeId> {
        let (victim, remaining) = {
            let mut reg = self.registry.lock().await;
            reg.control_mut().begin(ControlMode::ScalingDown)?;

            if reg.node_count() <= self.settings.minimum_nodes {
                reg.finish(ControlMode::ScalingDown);
                return Err(LifecycleError::AtFloor {
                    minimum: self.settings.minimum_nodes,
                });
            }
            let Some(victim) = reg.last_admitted() else {
                reg.finish(ControlMode::ScalingDown);
                return Err(LifecycleError::NoCandidate);
            };

            let remaining: Vec<NodeId> = reg
                .members()
                .iter()
                .filter(|m| **m != victim)
                .cloned()
                .collect();
            reg.control_mut().set_pending(vec![victim.clone()]);
            (victim, remaining)
        };

        if let Err(e) = self.swap_membership(remaining).await {
            warn!(node_id = %victim, error = %e, "scale down aborted, node stays in service");
            self.registry.lock().await.finish(ControlMode::ScalingDown);
            return Err(e);
        }

        info!(node_id = %victim, grace = ?self.settings.grace_delay, "scale down: node removed from balancer");
        self.retire_after_grace(vec![victim.clone()], ControlMode::ScalingDown)
            .await;
        Ok(victim)
    }

    /// Replace the balancer's member set. The registry mirror only changes
    /// when the provider accepted the update.
    pub async fn swap_membership(&self, ids: Vec<NodeId>) -> LifecycleResult<()> {
        let cloud = self.cloud.clone();
        let members = ids.clone();
        with_retry(&self.settings.retry, "set_balancer_membership", || {
            let cloud = cloud.clone();
            let members = members.clone();
            async move { cloud.set_balancer_membership(&members).await }
        })
        .await
        .map_err(LifecycleError::MembershipUpdate)?;

        debug!(members = ?ids, "balancer membership updated");
        self.registry.lock().await.set_members(ids);
        Ok(())
    }

    /// Mark `ids` draining, then after the grace delay destroy them all and
    /// finish `mode`. Callers must have removed `ids` from the balancer.
    pub async fn retire_after_grace(&self, ids: Vec<NodeId>, mode: ControlMode) {
        {
            let mut reg = self.registry.lock().await;
            for id in &ids {
                reg.set_lifecycle(id, NodeLifecycle::Draining);
            }
            reg.control_mut().set_pending(ids.clone());
        }

        let ctl = self.clone();
        self.spawn(async move {
            tokio::time::sleep(ctl.settings.grace_delay).await;
            for id in &ids {
                ctl.terminate(id).await;
            }
            ctl.registry.lock().await.finish(mode);
        });
    }

    /// Destroy a node outside the balancer and forget it. A destroy that
    /// still fails after retries is logged; the node is forgotten anyway.
    pub(crate) async fn terminate(&self, id: &str) {
        {
            let mut reg = self.registry.lock().await;
            if reg.is_member(id) {
                error!(node_id = %id, "refusing to destroy a balancer member");
                reg.set_lifecycle(id, NodeLifecycle::InService);
                return;
            }
            reg.set_lifecycle(id, NodeLifecycle::Terminating);
        }

        let cloud = self.cloud.clone();
        let result = with_retry(&self.settings.retry, "destroy_node", || {
            let cloud = cloud.clone();
            let id = id.to_string();
            async move { cloud.destroy_node(&id).await }
        })
        .await;

        match result {
            Ok(()) => info!(node_id = %id, "node destroyed"),
            Err(e) => error!(node_id = %id, error = %e, "destroy failed, forgetting node"),
        }
        self.registry.lock().await.forget(id);
    }

    // ── Housekeeping ──────────────────────────────────────────────

    /// Apply a provider listing to the registry.
    pub async fn reconcile(&self, listing: &[CloudNode]) -> ReconcileReport {
        self.registry.lock().await.reconcile(listing)
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks();
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done
                && e.is_panic()
            {
                error!(error = %e, "lifecycle task panicked");
            }
        }
        tasks.spawn(fut);
    }

    /// Watchers and grace timers still running.
    pub fn outstanding_tasks(&self) -> usize {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Abort every watcher and grace timer.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks();
        let count = tasks.len();
        tasks.abort_all();
        info!(tasks = count, "lifecycle controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nodescale_cloud::{CloudOp, MemoryCloud};
    use nodescale_health::ScriptedProbe;

    use crate::registry::FleetRegistry;

    const TAG: &str = "web";

    fn settings(minimum_nodes: usize) -> LifecycleSettings {
        LifecycleSettings {
            tag: TAG.to_string(),
            node_spec: NodeSpec {
                tags: vec![TAG.to_string()],
                ..NodeSpec::default()
            },
            minimum_nodes,
            readiness_poll_interval: Duration::from_secs(5),
            readiness_timeout: Duration::from_secs(300),
            grace_delay: Duration::from_secs(60),
            retry: RetryPolicy::none(),
        }
    }

    /// Controller over a seeded memory cloud, registry already reconciled.
    async fn setup(seed: usize, minimum: usize) -> (LifecycleController, MemoryCloud, ScriptedProbe) {
        let cloud = MemoryCloud::new();
        cloud.seed_fleet(seed, TAG);
        let probe = ScriptedProbe::new(Some(50.0));
        let ctl = LifecycleController::new(
            Arc::new(cloud.clone()),
            Arc::new(probe.clone()),
            settings(minimum),
            FleetRegistry::shared(),
        );
        let listing = cloud.list_nodes(TAG).await.unwrap();
        ctl.reconcile(&listing).await;
        (ctl, cloud, probe)
    }

    async fn mode(ctl: &LifecycleController) -> ControlMode {
        ctl.registry.lock().await.control().mode
    }

    #[tokio::test(start_paused = true)]
    async fn scale_up_admits_ready_node() {
        let (ctl, cloud, _probe) = setup(1, 1).await;
        cloud.clear_operations();

        let id = ctl.scale_up().await.unwrap();
        assert_eq!(mode(&ctl).await, ControlMode::ScalingUp);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(mode(&ctl).await, ControlMode::Idle);
        let reg = ctl.registry.lock().await;
        assert_eq!(reg.lifecycle(&id), Some(NodeLifecycle::InService));
        assert_eq!(reg.members().last(), Some(&id));
        assert_eq!(cloud.membership().len(), 2);
        assert!(matches!(cloud.operations()[0], CloudOp::Create(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn scale_up_rejected_while_busy() {
        let (ctl, _cloud, _probe) = setup(1, 1).await;
        ctl.registry.lock().await.control_mut().begin(ControlMode::Deploying).unwrap();

        assert!(matches!(ctl.scale_up().await, Err(LifecycleError::Busy(_))));
        assert_eq!(mode(&ctl).await, ControlMode::Deploying);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_create_returns_to_idle() {
        let (ctl, cloud, _probe) = setup(1, 1).await;
        cloud.fail_next_creates(1);

        assert!(matches!(ctl.scale_up().await, Err(LifecycleError::Provider(_))));
        assert_eq!(mode(&ctl).await, ControlMode::Idle);
        assert_eq!(ctl.registry.lock().await.node_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_admission_destroys_new_node() {
        let (ctl, cloud, _probe) = setup(1, 1).await;
        let before = cloud.membership();
        cloud.fail_next_membership_updates(1);

        let id = ctl.scale_up().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(mode(&ctl).await, ControlMode::Idle);
        assert!(!ctl.registry.lock().await.contains(&id));
        assert!(!cloud.node_ids().contains(&id));
        assert_eq!(cloud.membership(), before);
        assert!(cloud.destroyed_while_member().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scale_down_drains_then_destroys_newest_member() {
        let (ctl, cloud, _probe) = setup(3, 1).await;
        let members = cloud.membership();
        let newest = members.last().unwrap().clone();
        cloud.clear_operations();

        let victim = ctl.scale_down().await.unwrap();
        assert_eq!(victim, newest);
        assert!(!cloud.membership().contains(&victim));
        assert_eq!(
            ctl.registry.lock().await.lifecycle(&victim),
            Some(NodeLifecycle::Draining)
        );

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(cloud.node_ids().contains(&victim));
        assert_eq!(mode(&ctl).await, ControlMode::ScalingDown);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!cloud.node_ids().contains(&victim));
        assert_eq!(mode(&ctl).await, ControlMode::Idle);
        assert!(cloud.destroyed_while_member().is_empty());

        let ops = cloud.operations();
        assert!(matches!(ops[0], CloudOp::SetMembership(_)));
        assert_eq!(ops[1], CloudOp::Destroy(victim));
    }

    #[tokio::test(start_paused = true)]
    async fn scale_down_refused_at_floor() {
        let (ctl, _cloud, _probe) = setup(2, 2).await;
        assert!(matches!(
            ctl.scale_down().await,
            Err(LifecycleError::AtFloor { minimum: 2 })
        ));
        assert_eq!(mode(&ctl).await, ControlMode::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_down_membership_failure_keeps_node() {
        let (ctl, cloud, _probe) = setup(3, 1).await;
        let members = cloud.membership();
        cloud.fail_next_membership_updates(1);

        assert!(matches!(
            ctl.scale_down().await,
            Err(LifecycleError::MembershipUpdate(_))
        ));
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(mode(&ctl).await, ControlMode::Idle);
        assert_eq!(cloud.membership(), members);
        assert_eq!(cloud.node_ids().len(), 3);
        let reg = ctl.registry.lock().await;
        assert!(members.iter().all(|m| reg.lifecycle(m) == Some(NodeLifecycle::InService)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_pending_timers() {
        let (ctl, cloud, _probe) = setup(3, 1).await;
        let victim = ctl.scale_down().await.unwrap();
        assert_eq!(ctl.outstanding_tasks(), 1);

        ctl.shutdown();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(cloud.node_ids().contains(&victim));
        assert_eq!(ctl.outstanding_tasks(), 0);
    }
}
