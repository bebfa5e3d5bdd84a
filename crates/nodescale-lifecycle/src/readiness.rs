//! Readiness watchers: one task per freshly created node.
//!
//! A watcher polls on its own timer until the node has an address and has
//! answered one health probe, or until the readiness deadline passes.

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use nodescale_core::{ControlMode, NodeId, NodeLifecycle};

use crate::controller::LifecycleController;

/// Why the node was created, which decides what readiness and timeout mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPurpose {
    /// Admit to the balancer on readiness, then finish the scale-up.
    ScaleUp,
    /// Deploy replacement: mark `InService` only; the orchestrator admits.
    Replacement,
}

enum Poll {
    Ready,
    Waiting,
    Gone,
}

pub(crate) async fn watch_readiness(ctl: LifecycleController, id: NodeId, purpose: ReadinessPurpose) {
    let window = ctl.settings.readiness_timeout;
    let mut deadline = Instant::now() + window;
    let mut ticker = tokio::time::interval(ctl.settings.readiness_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match poll_once(&ctl, &id).await {
            Poll::Ready => {
                on_ready(&ctl, &id, purpose).await;
                return;
            }
            Poll::Gone => {
                debug!(node_id = %id, "node left the registry, watcher done");
                return;
            }
            Poll::Waiting => {}
        }

        if Instant::now() >= deadline {
            if purpose == ReadinessPurpose::ScaleUp && at_or_below_floor(&ctl).await {
                warn!(node_id = %id, ?window, "readiness deadline passed at fleet floor, extending");
                deadline += window;
                continue;
            }
            warn!(node_id = %id, ?purpose, "readiness timeout, destroying node");
            ctl.terminate(&id).await;
            if purpose == ReadinessPurpose::ScaleUp {
                ctl.registry.lock().await.finish(ControlMode::ScalingUp);
            }
            return;
        }
    }
}

/// One readiness attempt: learn the address if needed, then probe.
async fn poll_once(ctl: &LifecycleController, id: &str) -> Poll {
    let known = {
        let reg = ctl.registry.lock().await;
        match reg.node(id) {
            Some(node) => node.ip_address.clone(),
            None => return Poll::Gone,
        }
    };

    let ip = match known {
        Some(ip) => ip,
        None => match ctl.cloud.list_nodes(&ctl.settings.tag).await {
            Ok(listing) => {
                let Some(ip) = listing
                    .into_iter()
                    .find(|n| n.id == id)
                    .and_then(|n| n.ip_address)
                else {
                    debug!(node_id = %id, "no address yet");
                    return Poll::Waiting;
                };
                ip
            }
            Err(e) => {
                debug!(node_id = %id, error = %e, "listing failed while awaiting address");
                return Poll::Waiting;
            }
        },
    };

    {
        let mut reg = ctl.registry.lock().await;
        if !reg.contains(id) {
            return Poll::Gone;
        }
        reg.set_address(id, &ip);
        if reg.lifecycle(id) == Some(NodeLifecycle::Provisioning) {
            reg.set_lifecycle(id, NodeLifecycle::AwaitingReady);
            debug!(node_id = %id, %ip, "node addressed, awaiting readiness");
        }
    }

    let sample = ctl.prober.probe(id, &ip).await;
    if sample.ok {
        Poll::Ready
    } else {
        Poll::Waiting
    }
}

async fn on_ready(ctl: &LifecycleController, id: &str, purpose: ReadinessPurpose) {
    let members = {
        let mut reg = ctl.registry.lock().await;
        reg.set_lifecycle(id, NodeLifecycle::InService);
        let mut members = reg.members().to_vec();
        members.push(id.to_string());
        members
    };

    match purpose {
        ReadinessPurpose::Replacement => {
            info!(node_id = %id, "replacement node ready");
        }
        ReadinessPurpose::ScaleUp => match ctl.swap_membership(members).await {
            Ok(()) => {
                info!(node_id = %id, "node admitted to balancer");
                ctl.registry.lock().await.finish(ControlMode::ScalingUp);
            }
            Err(e) => {
                warn!(node_id = %id, error = %e, "admission failed, discarding node");
                ctl.terminate(id).await;
                ctl.registry.lock().await.finish(ControlMode::ScalingUp);
            }
        },
    }
}

/// The pending node counts towards the fleet here.
async fn at_or_below_floor(ctl: &LifecycleController) -> bool {
    ctl.registry.lock().await.node_count() <= ctl.settings.minimum_nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use nodescale_cloud::{CloudClient, MemoryCloud, RetryPolicy};
    use nodescale_core::config::NodeSpec;
    use nodescale_health::ScriptedProbe;

    use crate::controller::LifecycleSettings;
    use crate::registry::FleetRegistry;

    const TAG: &str = "web";

    async fn controller(
        cloud: &MemoryCloud,
        probe: &ScriptedProbe,
        minimum: usize,
    ) -> LifecycleController {
        let settings = LifecycleSettings {
            tag: TAG.to_string(),
            node_spec: NodeSpec {
                tags: vec![TAG.to_string()],
                ..NodeSpec::default()
            },
            minimum_nodes: minimum,
            readiness_poll_interval: Duration::from_secs(5),
            readiness_timeout: Duration::from_secs(300),
            grace_delay: Duration::from_secs(60),
            retry: RetryPolicy::none(),
        };
        let ctl = LifecycleController::new(
            Arc::new(cloud.clone()),
            Arc::new(probe.clone()),
            settings,
            FleetRegistry::shared(),
        );
        let listing = cloud.list_nodes(TAG).await.unwrap();
        ctl.reconcile(&listing).await;
        ctl
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_address_before_probing() {
        let cloud = MemoryCloud::new().with_address_delay(3);
        cloud.seed_fleet(1, TAG);
        let probe = ScriptedProbe::new(Some(30.0));
        let ctl = controller(&cloud, &probe, 1).await;

        let id = ctl.scale_up().await.unwrap();
        let ip = cloud.ip_of(&id).unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(probe.calls(&ip), 0);
        assert_eq!(
            ctl.registry.lock().await.lifecycle(&id),
            Some(NodeLifecycle::Provisioning)
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(probe.calls(&ip), 1);
        assert!(ctl.registry.lock().await.is_member(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_above_floor_destroys_without_admitting() {
        let cloud = MemoryCloud::new();
        cloud.seed_fleet(1, TAG);
        let probe = ScriptedProbe::new(None);
        let ctl = controller(&cloud, &probe, 1).await;
        let members = cloud.membership();

        let id = ctl.scale_up().await.unwrap();
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(cloud.node_ids().contains(&id));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!cloud.node_ids().contains(&id));
        assert_eq!(cloud.membership(), members);
        let reg = ctl.registry.lock().await;
        assert!(!reg.contains(&id));
        assert!(reg.control().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_at_floor_keeps_watching() {
        let cloud = MemoryCloud::new();
        let probe = ScriptedProbe::new(None);
        let ctl = controller(&cloud, &probe, 1).await;

        let id = ctl.scale_up().await.unwrap();
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert!(cloud.node_ids().contains(&id));
        assert_eq!(ctl.registry.lock().await.control().mode, ControlMode::ScalingUp);

        let ip = cloud.ip_of(&id).unwrap();
        probe.set_cpu(&ip, 12.0);
        tokio::time::sleep(Duration::from_secs(6)).await;

        let reg = ctl.registry.lock().await;
        assert!(reg.is_member(&id));
        assert!(reg.control().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_timeout_is_unconditional() {
        let cloud = MemoryCloud::new();
        let probe = ScriptedProbe::new(None);
        let ctl = controller(&cloud, &probe, 5).await;

        let id = ctl.provision_replacement().await.unwrap();
        tokio::time::sleep(Duration::from_secs(310)).await;
        assert!(!cloud.node_ids().contains(&id));
        assert!(!ctl.registry.lock().await.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_replacement_is_not_admitted() {
        let cloud = MemoryCloud::new();
        cloud.seed_fleet(1, TAG);
        let probe = ScriptedProbe::new(Some(10.0));
        let ctl = controller(&cloud, &probe, 1).await;
        let members = cloud.membership();

        let id = ctl.provision_replacement().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let reg = ctl.registry.lock().await;
        assert_eq!(reg.lifecycle(&id), Some(NodeLifecycle::InService));
        assert!(!reg.is_member(&id));
        assert_eq!(cloud.membership(), members);
    }
}
