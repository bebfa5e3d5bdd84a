//! nodescale-lifecycle: owns every node the scaler knows about.
//!
//! The [`FleetRegistry`] holds the node records, the balancer membership
//! mirror and the single [`ControlState`]. The [`LifecycleController`] is
//! the only writer: it creates nodes, watches them until they answer a
//! health probe, admits them to the balancer, and drains and destroys
//! them again.
//!
//! ```text
//!   create ──▶ Provisioning ──(address)──▶ AwaitingReady ──(ok probe)──▶ InService
//!                                                                          │
//!                          destroy ◀── Terminating ◀──(grace)── Draining ◀─┘
//! ```
//!
//! Readiness watchers and grace timers run as spawned tasks tracked in a
//! `JoinSet`; [`LifecycleController::shutdown`] aborts them.
//!
//! [`ControlState`]: nodescale_core::ControlState

pub mod controller;
pub mod error;
pub mod readiness;
pub mod registry;

pub use controller::{LifecycleController, LifecycleSettings};
pub use error::{LifecycleError, LifecycleResult};
pub use readiness::ReadinessPurpose;
pub use registry::{FleetRegistry, ReconcileReport, SharedRegistry};
