//! nodescale-autoscale: the scaling decision engine.
//!
//! [`decide`] is a pure function of the tick's snapshot, the control state
//! and the deploy flag. It never touches the provider; the monitor applies
//! whatever it returns.

pub mod decision;

pub use decision::{Decision, ScalingPolicy, decide};
