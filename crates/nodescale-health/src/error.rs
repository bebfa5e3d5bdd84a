use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("failed to sign probe token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),

    #[error("service key is empty")]
    EmptyKey,
}
