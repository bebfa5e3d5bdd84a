//! Deploy request flag shared between the trigger endpoint and the monitor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Externally settable "please redeploy the fleet" flag.
///
/// The HTTP trigger calls [`DeployTrigger::request_deploy`]; the fleet
/// monitor reads it every tick and clears it once the decision engine has
/// accepted a deploy.
#[derive(Debug, Clone, Default)]
pub struct DeployTrigger {
    requested: Arc<AtomicBool>,
}

impl DeployTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a full-fleet redeploy. Idempotent until acknowledged.
    pub fn request_deploy(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("deploy requested");
        }
    }

    /// Whether a deploy is waiting to be accepted.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear the flag after the request was accepted.
    pub fn acknowledge(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_and_acknowledge() {
        let trigger = DeployTrigger::new();
        assert!(!trigger.is_requested());

        trigger.request_deploy();
        trigger.request_deploy();
        assert!(trigger.is_requested());

        trigger.acknowledge();
        assert!(!trigger.is_requested());
    }

    #[test]
    fn clones_share_the_flag() {
        let trigger = DeployTrigger::new();
        let api_side = trigger.clone();

        api_side.request_deploy();
        assert!(trigger.is_requested());
    }
}
