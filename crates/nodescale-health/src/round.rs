//! One concurrent probe round over the whole fleet.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::warn;

use nodescale_core::{HealthSample, NodeId};

use crate::prober::HealthProbe;

/// A node with an address, ready to be probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub node_id: NodeId,
    pub ip: String,
}

/// Probe every target in parallel and wait for all of them.
///
/// The result has exactly one sample per target. A probe task that panics
/// counts as a failed sample.
pub async fn probe_round(
    prober: Arc<dyn HealthProbe>,
    targets: Vec<ProbeTarget>,
) -> BTreeMap<NodeId, HealthSample> {
    let mut samples: BTreeMap<NodeId, HealthSample> = targets
        .iter()
        .map(|t| (t.node_id.clone(), HealthSample::failed(t.node_id.clone())))
        .collect();

    let mut set = JoinSet::new();
    for target in targets {
        let prober = prober.clone();
        set.spawn(async move { prober.probe(&target.node_id, &target.ip).await });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(sample) => {
                samples.insert(sample.node_id.clone(), sample);
            }
            Err(e) => warn!(error = %e, "probe task failed"),
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProbe;

    fn target(id: &str, ip: &str) -> ProbeTarget {
        ProbeTarget {
            node_id: id.to_string(),
            ip: ip.to_string(),
        }
    }

    #[tokio::test]
    async fn one_sample_per_target() {
        let probe = ScriptedProbe::new(Some(20.0));
        probe.set_failing("10.0.0.2");

        let samples = probe_round(
            Arc::new(probe),
            vec![target("a", "10.0.0.1"), target("b", "10.0.0.2")],
        )
        .await;

        assert_eq!(samples.len(), 2);
        assert!(samples["a"].ok);
        assert!(!samples["b"].ok);
    }

    #[tokio::test]
    async fn empty_round_is_empty() {
        let samples = probe_round(Arc::new(ScriptedProbe::new(None)), Vec::new()).await;
        assert!(samples.is_empty());
    }
}
