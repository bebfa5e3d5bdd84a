//! Deployment orchestrator: drives a rollout through its phases.
//!
//! `start` is called on the tick that accepts a deploy request, `advance`
//! on every following tick while the control mode is `Deploying`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use nodescale_core::{ControlMode, NodeId, NodeLifecycle};
use nodescale_lifecycle::LifecycleController;

use crate::error::{RolloutError, RolloutResult};

/// Current phase of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// Replacements are being created and watched; membership untouched.
    Provisioning,
    /// Balancer points at the new cohort; old cohort waits out the grace delay.
    Draining,
    Completed,
}

/// A deploy in progress.
#[derive(Debug, Clone, Serialize)]
pub struct Rollout {
    pub phase: RolloutPhase,
    /// Members being replaced. Its length is the cohort size.
    pub retiring: Vec<NodeId>,
    pub replacements: Vec<NodeId>,
    /// Replacements created after the initial batch.
    pub healed: u32,
    /// Unix timestamp (seconds).
    pub started_at: u64,
}

impl Rollout {
    fn new(retiring: Vec<NodeId>) -> Self {
        Self {
            phase: RolloutPhase::Provisioning,
            retiring,
            replacements: Vec::new(),
            healed: 0,
            started_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    fn unfilled(&self) -> usize {
        self.retiring.len().saturating_sub(self.replacements.len())
    }
}

/// Serializable view for the status API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStatus {
    pub phase: RolloutPhase,
    pub cohort_size: usize,
    pub replacements: usize,
    pub ready: usize,
    pub healed: u32,
    pub started_at: u64,
}

/// Lock order: `rollout` before the registry, everywhere.
pub struct DeployOrchestrator {
    lifecycle: LifecycleController,
    rollout: Mutex<Option<Rollout>>,
}

impl DeployOrchestrator {
    pub fn new(lifecycle: LifecycleController) -> Self {
        Self {
            lifecycle,
            rollout: Mutex::new(None),
        }
    }

    /// Begin a deploy: snapshot the serving members as the retiring cohort
    /// and create one replacement for each.
    pub async fn start(&self) -> RolloutResult<RolloutPhase> {
        let mut slot = self.rollout.lock().await;
        let registry = self.lifecycle.registry();
        let retiring = {
            let mut reg = registry.lock().await;
            reg.control_mut().begin(ControlMode::Deploying)?;
            let retiring = reg.in_service_members();
            if retiring.is_empty() {
                reg.finish(ControlMode::Deploying);
            } else {
                reg.control_mut().set_pending(retiring.clone());
            }
            retiring
        };

        if retiring.is_empty() {
            info!("deploy requested with no serving members, nothing to replace");
            let mut done = Rollout::new(Vec::new());
            done.phase = RolloutPhase::Completed;
            *slot = Some(done);
            return Ok(RolloutPhase::Completed);
        }

        let mut rollout = Rollout::new(retiring);
        rollout.replacements = self.create_replacements(rollout.retiring.len()).await;
        info!(
            cohort = rollout.retiring.len(),
            created = rollout.replacements.len(),
            "deploy started"
        );

        let phase = rollout.phase;
        *slot = Some(rollout);
        Ok(phase)
    }

    /// One deploy step: drop replacements that timed out, refill empty
    /// slots, and swap the balancer once the whole cohort is serving.
    pub async fn advance(&self) -> RolloutResult<RolloutPhase> {
        let mut guard = self.rollout.lock().await;
        let Some(rollout) = guard.as_mut() else {
            warn!("deploying without a rollout record, releasing control state");
            self.lifecycle
                .registry()
                .lock()
                .await
                .finish(ControlMode::Deploying);
            return Err(RolloutError::NotRunning);
        };
        if rollout.phase != RolloutPhase::Provisioning {
            return Ok(rollout.phase);
        }

        let registry = self.lifecycle.registry();
        let all_ready = {
            let reg = registry.lock().await;
            let before = rollout.replacements.len();
            rollout.replacements.retain(|id| reg.contains(id));
            let dropped = before - rollout.replacements.len();
            if dropped > 0 {
                warn!(dropped, "replacement nodes failed readiness");
            }
            rollout
                .replacements
                .iter()
                .all(|id| reg.lifecycle(id) == Some(NodeLifecycle::InService))
        };

        let missing = rollout.unfilled();
        if missing > 0 {
            let fresh = self.create_replacements(missing).await;
            rollout.healed += fresh.len() as u32;
            info!(missing, created = fresh.len(), "refilling deploy cohort");
            rollout.replacements.extend(fresh);
            return Ok(rollout.phase);
        }
        if !all_ready {
            debug!(cohort = rollout.retiring.len(), "waiting for replacements");
            return Ok(rollout.phase);
        }

        self.lifecycle
            .swap_membership(rollout.replacements.clone())
            .await?;
        info!(
            members = ?rollout.replacements,
            retiring = ?rollout.retiring,
            "balancer switched to new cohort"
        );
        self.lifecycle
            .retire_after_grace(rollout.retiring.clone(), ControlMode::Deploying)
            .await;
        rollout.phase = RolloutPhase::Draining;
        Ok(rollout.phase)
    }

    /// The current or most recent rollout, if any.
    pub async fn status(&self) -> Option<RolloutStatus> {
        let mut guard = self.rollout.lock().await;
        let rollout = guard.as_mut()?;

        let registry = self.lifecycle.registry();
        let reg = registry.lock().await;
        if rollout.phase == RolloutPhase::Draining && reg.control().mode != ControlMode::Deploying {
            rollout.phase = RolloutPhase::Completed;
        }
        let ready = rollout
            .replacements
            .iter()
            .filter(|id| reg.lifecycle(id) == Some(NodeLifecycle::InService))
            .count();

        Some(RolloutStatus {
            phase: rollout.phase,
            cohort_size: rollout.retiring.len(),
            replacements: rollout.replacements.len(),
            ready,
            healed: rollout.healed,
            started_at: rollout.started_at,
        })
    }

    /// Create `count` replacements concurrently. Failed creates leave
    /// their slot empty for the next step.
    async fn create_replacements(&self, count: usize) -> Vec<NodeId> {
        let mut set = JoinSet::new();
        for _ in 0..count {
            let lifecycle = self.lifecycle.clone();
            set.spawn(async move { lifecycle.provision_replacement().await });
        }

        let mut created = Vec::with_capacity(count);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(id)) => created.push(id),
                Ok(Err(e)) => warn!(error = %e, "replacement creation failed"),
                Err(e) => warn!(error = %e, "replacement task failed"),
            }
        }
        created.sort();
        created
    }
}
