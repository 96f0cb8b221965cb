//! Health engine error types.

use thiserror::Error;

/// Errors surfaced by checkers and health services.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthError {
    /// No provider configured, or no round has completed yet.
    #[error("not ready")]
    NotReady,

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("unknown proto: {0}")]
    UnknownProtocol(String),
}

pub type HealthResult<T> = Result<T, HealthError>;
