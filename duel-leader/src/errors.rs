//! Error types for leadership management operations.

use duel_core::DuelError;
use thiserror::Error;

/// Result type for leadership management operations
pub type LeaderResult<T> = Result<T, LeaderError>;

/// Errors raised by the leadership components themselves.
///
/// Failures of the protocol (directory outages, lost leases, dead leaders)
/// are never returned through this type; they drive state transitions and
/// surface to callers as [`DuelError`].
#[derive(Error, Debug)]
pub enum LeaderError {
    /// Configuration error
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    /// A background task panicked or was cancelled
    #[error("Background task failed: {reason}")]
    TaskFailed { reason: String },
}

impl LeaderError {
    pub fn config(reason: impl Into<String>) -> Self {
        LeaderError::ConfigError {
            reason: reason.into(),
        }
    }
}

impl From<tokio::task::JoinError> for LeaderError {
    fn from(err: tokio::task::JoinError) -> Self {
        LeaderError::TaskFailed {
            reason: err.to_string(),
        }
    }
}

impl From<LeaderError> for DuelError {
    fn from(err: LeaderError) -> Self {
        DuelError::internal(err.to_string())
    }
}
