//! Lifecycle error types.

use thiserror::Error;

use nodescale_cloud::CloudError;
use nodescale_core::ControlError;

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another operation holds the control state.
    #[error(transparent)]
    Busy(#[from] ControlError),

    #[error("provider call failed: {0}")]
    Provider(#[source] CloudError),

    #[error("balancer membership update failed: {0}")]
    MembershipUpdate(#[source] CloudError),

    #[error("no in-service balancer member to retire")]
    NoCandidate,

    #[error("fleet is at its floor of {minimum} nodes")]
    AtFloor { minimum: usize },
}
