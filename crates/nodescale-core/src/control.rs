//! The single authoritative control state for the fleet.
//!
//! `ControlState.mode` gates every fleet-mutating operation. It behaves
//! like a mutex held across the whole logical duration of a scale or
//! deploy operation, which usually spans several monitor ticks.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ControlError;
use crate::types::{NodeId, epoch_millis};

/// Which fleet-mutating operation, if any, is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Idle,
    ScalingUp,
    ScalingDown,
    Deploying,
}

/// Process-wide control state. Lives inside the lifecycle controller's
/// registry and is only transitioned by the controller and orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlState {
    pub mode: ControlMode,
    /// Nodes the active operation is waiting on (created or retiring).
    pub pending_cohort: Vec<NodeId>,
    /// Unix timestamp (milliseconds) of the last mode change.
    pub last_transition_at: u64,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            mode: ControlMode::Idle,
            pending_cohort: Vec::new(),
            last_transition_at: epoch_millis(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.mode == ControlMode::Idle
    }

    /// Enter `mode`. Only allowed from `Idle`.
    pub fn begin(&mut self, mode: ControlMode) -> Result<(), ControlError> {
        if mode == ControlMode::Idle {
            return Err(ControlError::IdleTarget);
        }
        if self.mode != ControlMode::Idle {
            return Err(ControlError::Busy {
                active: self.mode,
                requested: mode,
            });
        }
        debug!(?mode, "control mode begin");
        self.mode = mode;
        self.pending_cohort.clear();
        self.last_transition_at = epoch_millis();
        Ok(())
    }

    /// Return to `Idle` from `mode`. Only the active mode can finish itself.
    pub fn finish(&mut self, mode: ControlMode) -> Result<(), ControlError> {
        if mode == ControlMode::Idle {
            return Err(ControlError::IdleTarget);
        }
        if self.mode != mode {
            return Err(ControlError::NotActive {
                active: self.mode,
                requested: mode,
            });
        }
        debug!(?mode, "control mode finish");
        self.mode = ControlMode::Idle;
        self.pending_cohort.clear();
        self.last_transition_at = epoch_millis();
        Ok(())
    }

    /// Replace the set of nodes the active operation is tracking.
    pub fn set_pending(&mut self, ids: Vec<NodeId>) {
        self.pending_cohort = ids;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let state = ControlState::new();
        assert!(state.is_idle());
        assert!(state.pending_cohort.is_empty());
    }

    #[test]
    fn begin_and_finish_round_trip() {
        let mut state = ControlState::new();
        state.begin(ControlMode::ScalingUp).unwrap();
        assert_eq!(state.mode, ControlMode::ScalingUp);

        state.set_pending(vec!["n1".to_string()]);
        state.finish(ControlMode::ScalingUp).unwrap();
        assert!(state.is_idle());
        assert!(state.pending_cohort.is_empty());
    }

    #[test]
    fn second_operation_is_rejected() {
        let mut state = ControlState::new();
        state.begin(ControlMode::Deploying).unwrap();

        let err = state.begin(ControlMode::ScalingDown).unwrap_err();
        assert_eq!(
            err,
            ControlError::Busy {
                active: ControlMode::Deploying,
                requested: ControlMode::ScalingDown,
            }
        );
        assert_eq!(state.mode, ControlMode::Deploying);
    }

    #[test]
    fn only_active_mode_can_finish() {
        let mut state = ControlState::new();
        state.begin(ControlMode::ScalingDown).unwrap();

        assert!(matches!(
            state.finish(ControlMode::ScalingUp),
            Err(ControlError::NotActive { .. })
        ));
        assert_eq!(state.mode, ControlMode::ScalingDown);

        // Finishing when already idle is also a violation.
        state.finish(ControlMode::ScalingDown).unwrap();
        assert!(state.finish(ControlMode::ScalingDown).is_err());
    }

    #[test]
    fn idle_is_not_an_operation() {
        let mut state = ControlState::new();
        assert_eq!(state.begin(ControlMode::Idle), Err(ControlError::IdleTarget));
        assert_eq!(state.finish(ControlMode::Idle), Err(ControlError::IdleTarget));
    }
}
