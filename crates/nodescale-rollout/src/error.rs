use thiserror::Error;

use nodescale_core::ControlError;
use nodescale_lifecycle::LifecycleError;

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error(transparent)]
    Busy(#[from] ControlError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("no rollout in progress")]
    NotRunning,
}
