//! Provider error taxonomy.

use thiserror::Error;

/// Result type alias for provider operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors returned by a [`crate::CloudClient`].
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// Network hiccup, rate limit, or provider-side outage. Worth retrying.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider rejected the request (quota, validation, auth).
    #[error("provider rejected request ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    /// The request could not be built from local input.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl CloudError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }
}
