//! Fleet monitor: periodic tick driving the whole control loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use nodescale_autoscale::{Decision, ScalingPolicy, decide};
use nodescale_cloud::with_retry;
use nodescale_core::{DeployTrigger, FleetSnapshot};
use nodescale_health::{HealthProbe, ProbeTarget, probe_round};
use nodescale_lifecycle::LifecycleController;
use nodescale_metrics::FleetMetrics;
use nodescale_rollout::DeployOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Provider listing failed after retries; nothing was touched.
    ListingFailed,
    /// A previous tick's probe round is still running.
    RoundInFlight,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Ran(Decision),
}

pub struct FleetMonitor {
    lifecycle: LifecycleController,
    orchestrator: Arc<DeployOrchestrator>,
    prober: Arc<dyn HealthProbe>,
    trigger: DeployTrigger,
    policy: ScalingPolicy,
    metrics: Arc<FleetMetrics>,
    snapshots: watch::Sender<Option<FleetSnapshot>>,
    /// Held for the whole probe-decide-apply part of a tick.
    round_gate: Mutex<()>,
}

impl FleetMonitor {
    pub fn new(
        lifecycle: LifecycleController,
        orchestrator: Arc<DeployOrchestrator>,
        prober: Arc<dyn HealthProbe>,
        trigger: DeployTrigger,
        policy: ScalingPolicy,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        let (snapshots, _) = watch::channel(None);
        Self {
            lifecycle,
            orchestrator,
            prober,
            trigger,
            policy,
            metrics,
            snapshots,
            round_gate: Mutex::new(()),
        }
    }

    /// Receiver for the snapshot published at the end of every full tick.
    pub fn subscribe(&self) -> watch::Receiver<Option<FleetSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Run one tick to completion.
    pub async fn tick(&self) -> TickOutcome {
        let settings = self.lifecycle.settings();
        let cloud = self.lifecycle.cloud();
        let tag = settings.tag.clone();
        let listing = with_retry(&settings.retry, "list_nodes", || {
            let cloud = cloud.clone();
            let tag = tag.clone();
            async move { cloud.list_nodes(&tag).await }
        })
        .await;

        let listing = match listing {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "node listing failed, skipping tick");
                self.metrics.record_skip();
                return TickOutcome::Skipped(SkipReason::ListingFailed);
            }
        };
        self.lifecycle.reconcile(&listing).await;

        let Ok(_round) = self.round_gate.try_lock() else {
            debug!("probe round still in flight, skipping tick");
            self.metrics.record_skip();
            return TickOutcome::Skipped(SkipReason::RoundInFlight);
        };

        let registry = self.lifecycle.registry();
        let targets: Vec<ProbeTarget> = registry
            .lock()
            .await
            .addressed_nodes()
            .into_iter()
            .map(|(node_id, ip)| ProbeTarget { node_id, ip })
            .collect();
        let samples = probe_round(self.prober.clone(), targets).await;

        let (nodes, control) = {
            let reg = registry.lock().await;
            (reg.nodes(), reg.control().clone())
        };
        let snapshot = FleetSnapshot::build(nodes, samples);
        self.metrics.record_tick();
        self.metrics.observe_snapshot(&snapshot);

        let decision = decide(&snapshot, &control, &self.policy, self.trigger.is_requested());
        debug!(
            nodes = snapshot.node_count(),
            ready = snapshot.ready_count,
            average_cpu = ?snapshot.average_cpu,
            mode = ?control.mode,
            ?decision,
            "tick evaluated"
        );
        self.apply(decision).await;

        self.metrics.set_mode(registry.lock().await.control().mode);
        self.snapshots.send_replace(Some(snapshot));
        TickOutcome::Ran(decision)
    }

    async fn apply(&self, decision: Decision) {
        match decision {
            Decision::None => {}
            Decision::ScaleUp => match self.lifecycle.scale_up().await {
                Ok(id) => {
                    self.metrics.record_scale_up();
                    info!(node_id = %id, "scaling up");
                }
                Err(e) => warn!(error = %e, "scale up failed"),
            },
            Decision::ScaleDown => match self.lifecycle.scale_down().await {
                Ok(id) => {
                    self.metrics.record_scale_down();
                    info!(node_id = %id, "scaling down");
                }
                Err(e) => warn!(error = %e, "scale down failed"),
            },
            Decision::DeployStart => {
                self.trigger.acknowledge();
                match self.orchestrator.start().await {
                    Ok(phase) => {
                        self.metrics.record_deploy();
                        info!(?phase, "deploy accepted");
                    }
                    Err(e) => warn!(error = %e, "deploy could not start"),
                }
            }
            Decision::DeployContinue => {
                if let Err(e) = self.orchestrator.advance().await {
                    warn!(error = %e, "deploy step failed, retrying next tick");
                }
            }
        }
    }

    /// Tick every `interval` until `shutdown` fires. Each tick runs as its
    /// own task so a slow round never delays the next deadline.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "fleet monitor started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while ticks.try_join_next().is_some() {}
                    let monitor = self.clone();
                    ticks.spawn(async move {
                        let outcome = monitor.tick().await;
                        debug!(?outcome, "tick finished");
                    });
                }
                _ = shutdown.changed() => {
                    info!("fleet monitor shutting down");
                    break;
                }
            }
        }

        ticks.abort_all();
        self.lifecycle.shutdown();
    }
}
