//! Scripted probe for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use nodescale_core::HealthSample;

use crate::prober::HealthProbe;

#[derive(Debug, Default)]
struct Script {
    /// `None` means the address fails its probes.
    by_ip: HashMap<String, Option<f64>>,
    default: Option<f64>,
    calls: HashMap<String, u32>,
}

/// Answers probes from a per-address table. Clones share the table, so a
/// test can change readings while the monitor is running.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProbe {
    /// Unlisted addresses answer with `default` (`None` = fail).
    pub fn new(default: Option<f64>) -> Self {
        let probe = Self::default();
        probe.lock().default = default;
        probe
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_default(&self, cpu: Option<f64>) {
        self.lock().default = cpu;
    }

    pub fn set_cpu(&self, ip: &str, cpu: f64) {
        self.lock().by_ip.insert(ip.to_string(), Some(cpu));
    }

    pub fn set_failing(&self, ip: &str) {
        self.lock().by_ip.insert(ip.to_string(), None);
    }

    /// How many times `ip` has been probed.
    pub fn calls(&self, ip: &str) -> u32 {
        self.lock().calls.get(ip).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, node_id: &str, ip: &str) -> HealthSample {
        let mut script = self.lock();
        *script.calls.entry(ip.to_string()).or_default() += 1;
        let reading = script.by_ip.get(ip).copied().unwrap_or(script.default);
        match reading {
            Some(cpu) => HealthSample::healthy(node_id, cpu),
            None => HealthSample::failed(node_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_address_overrides_default() {
        let probe = ScriptedProbe::new(Some(50.0));
        probe.set_cpu("10.0.0.2", 90.0);
        probe.set_failing("10.0.0.3");

        assert_eq!(probe.probe("a", "10.0.0.1").await.cpu_percent, 50.0);
        assert_eq!(probe.probe("b", "10.0.0.2").await.cpu_percent, 90.0);
        assert!(!probe.probe("c", "10.0.0.3").await.ok);
        assert_eq!(probe.calls("10.0.0.2"), 1);
    }
}
