//! nodescale-monitor: the control loop.
//!
//! Every interval the [`FleetMonitor`] lists the tagged nodes, reconciles
//! the registry, probes every addressed node, asks the decision engine what
//! to do and hands the answer to the lifecycle controller or the deployment
//! orchestrator. At most one probe round runs at a time; a tick that finds
//! one in flight is skipped.

pub mod monitor;

pub use monitor::{FleetMonitor, SkipReason, TickOutcome};
