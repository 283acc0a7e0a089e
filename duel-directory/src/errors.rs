//! Error types for directory operations.

use crate::DirectorySessionId;
use duel_core::DuelError;
use thiserror::Error;

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors that can occur during directory operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    /// The directory could not be reached
    #[error("Directory unreachable: {0}")]
    Unreachable(String),

    /// The session does not exist or has expired
    #[error("Invalid session {0}")]
    InvalidSession(DirectorySessionId),

    /// Invalid key provided
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Value is too large to store
    #[error("Value too large")]
    ValueTooLarge,

    /// Session TTL outside the accepted range
    #[error("Invalid session TTL: {0}")]
    InvalidTtl(String),
}

impl DirectoryError {
    /// True when the failure says nothing about the caller's request,
    /// only that the directory could not answer.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DirectoryError::Unreachable(_))
    }
}

impl From<DirectoryError> for DuelError {
    fn from(err: DirectoryError) -> Self {
        DuelError::coordination(err.to_string())
    }
}
