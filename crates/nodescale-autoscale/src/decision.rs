//! CPU-band scaling decisions.
//!
//! Two thresholds split the CPU range into three bands: above the upper
//! threshold the fleet grows by one node, below the lower threshold it
//! shrinks by one (never under the floor), and in between nothing happens.
//! Deploys take priority over scaling, and any in-flight operation blocks
//! new ones.

use serde::{Deserialize, Serialize};
use tracing::debug;

use nodescale_core::{ControlMode, ControlState, FleetSnapshot, ScalerConfig};

/// What the monitor should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    None,
    ScaleUp,
    ScaleDown,
    DeployStart,
    DeployContinue,
}

/// Fleet floor and CPU band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    pub minimum_nodes: usize,
    pub cpu_upper_threshold: f64,
    pub cpu_lower_threshold: f64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            minimum_nodes: 1,
            cpu_upper_threshold: 80.0,
            cpu_lower_threshold: 60.0,
        }
    }
}

impl ScalingPolicy {
    pub fn from_config(config: &ScalerConfig) -> Self {
        Self {
            minimum_nodes: config.fleet.minimum_nodes,
            cpu_upper_threshold: config.scaling.cpu_upper_threshold,
            cpu_lower_threshold: config.scaling.cpu_lower_threshold,
        }
    }
}

/// Decide the next action. Rules are checked in order; the first match wins.
pub fn decide(
    snapshot: &FleetSnapshot,
    control: &ControlState,
    policy: &ScalingPolicy,
    deploy_requested: bool,
) -> Decision {
    if control.mode == ControlMode::Deploying {
        return Decision::DeployContinue;
    }
    if deploy_requested && control.mode == ControlMode::Idle {
        return Decision::DeployStart;
    }
    if control.mode != ControlMode::Idle {
        return Decision::None;
    }

    let count = snapshot.node_count();
    let below_floor = count < policy.minimum_nodes;

    // No reading at all: only the floor can justify an action.
    let Some(average) = snapshot.average_cpu else {
        return if below_floor {
            debug!(count, minimum = policy.minimum_nodes, "fleet below floor");
            Decision::ScaleUp
        } else {
            Decision::None
        };
    };

    if average > policy.cpu_upper_threshold || below_floor {
        debug!(average, count, "scale up");
        return Decision::ScaleUp;
    }
    if average < policy.cpu_lower_threshold && count > policy.minimum_nodes {
        debug!(average, count, "scale down");
        return Decision::ScaleDown;
    }
    Decision::None
}
