//! nodescale-core: shared model for the nodescale control loop.
//!
//! Holds the types every other crate speaks in: nodes and their lifecycle,
//! health samples, fleet snapshots, the single authoritative
//! [`ControlState`], the deploy trigger flag, and the TOML configuration.
//!
//! # Control modes
//!
//! ```text
//!          begin(ScalingUp)            finish(ScalingUp)
//!   Idle ───────────────────► ScalingUp ─────────────────► Idle
//!     │    begin(ScalingDown)          finish(ScalingDown)
//!     ├───────────────────► ScalingDown ───────────────────► Idle
//!     │    begin(Deploying)            finish(Deploying)
//!     └───────────────────► Deploying ─────────────────────► Idle
//! ```
//!
//! Any other transition is rejected with a [`ControlError`].

pub mod config;
pub mod control;
pub mod duration;
pub mod error;
pub mod trigger;
pub mod types;

pub use config::ScalerConfig;
pub use control::{ControlMode, ControlState};
pub use duration::parse_duration;
pub use error::{ConfigError, ControlError};
pub use trigger::DeployTrigger;
pub use types::*;
