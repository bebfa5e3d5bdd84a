//! nodescale-rollout: full-fleet redeploys without dropping traffic.
//!
//! A deploy creates one replacement per serving node, waits until every
//! replacement answers its health probe, swaps the balancer over to the new
//! cohort in one call, and retires the old cohort after the grace delay.
//! Replacements that time out are destroyed and recreated, so the cohort
//! size never changes. A deploy never rolls back.

pub mod error;
pub mod orchestrator;

pub use error::{RolloutError, RolloutResult};
pub use orchestrator::{DeployOrchestrator, Rollout, RolloutPhase, RolloutStatus};
