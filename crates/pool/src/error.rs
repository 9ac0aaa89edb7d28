//! Error types for pool configuration

/// Errors from pool configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid cooldown policy: {0}")]
    InvalidPolicy(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
