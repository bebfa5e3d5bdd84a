//! Error types for configuration and control-state transitions.

use std::path::PathBuf;

use thiserror::Error;

use crate::control::ControlMode;

/// Errors raised while loading or validating a [`crate::ScalerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// A rejected [`crate::ControlState`] transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Another fleet-mutating operation is already active.
    #[error("cannot begin {requested:?}: {active:?} is already in progress")]
    Busy {
        active: ControlMode,
        requested: ControlMode,
    },

    /// The operation trying to finish is not the one that is active.
    #[error("cannot finish {requested:?}: active mode is {active:?}")]
    NotActive {
        active: ControlMode,
        requested: ControlMode,
    },

    /// `Idle` is not an operation and cannot be begun or finished.
    #[error("Idle is not an operation mode")]
    IdleTarget,
}
