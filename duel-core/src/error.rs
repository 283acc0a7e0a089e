//! # Error Types
//!
//! Error taxonomy shared by every tier of the Duel service.

use crate::Role;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Named business-rule violations surfaced to callers.
///
/// The string form of each code is what presentation layers match on,
/// so the names are part of the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectCode {
    /// Join-only request against a room that does not exist
    RoomNotFound,
    /// Both participant slots are held by other identities
    RoomFull,
    /// The identity holds no slot in the session
    NotInRoom,
    /// The identity already committed a choice this round
    AlreadyChosen,
    /// The round is not accepting choices
    RoundClosed,
    /// The symbol is not rock, paper or scissors
    InvalidChoice,
    /// The referenced session does not exist
    SessionNotFound,
    /// A participant or room identifier failed validation
    InvalidId,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::RoomNotFound => "ROOM_NOT_FOUND",
            RejectCode::RoomFull => "ROOM_FULL",
            RejectCode::NotInRoom => "NOT_IN_ROOM",
            RejectCode::AlreadyChosen => "ALREADY_CHOSEN",
            RejectCode::RoundClosed => "ROUND_CLOSED",
            RejectCode::InvalidChoice => "INVALID_CHOICE",
            RejectCode::SessionNotFound => "SESSION_NOT_FOUND",
            RejectCode::InvalidId => "INVALID_ID",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types that can occur anywhere in the Duel service.
///
/// Errors are serializable so a leader can return them to a remote caller
/// unchanged; a caller sees the same variant whether the failure happened
/// locally or on the other side of the wire.
///
/// # Error Categories
///
/// - **Coordination**: the directory could not be reached
/// - **Leadership**: this replica lost (or never had) leadership, or no
///   leader is currently advertised for a role
/// - **Business rules**: invalid moves, full rooms, unknown rooms
/// - **Transport**: the call to the current leader failed
/// - **Storage**: the record store failed
///
/// # Examples
///
/// ```rust
/// use duel_core::DuelError;
///
/// let error = DuelError::transport("connection refused");
/// assert!(error.is_retryable());
/// assert!(error.is_stale_leader());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DuelError {
    /// The coordination directory is unreachable
    #[error("Coordination unavailable: {message}")]
    CoordinationUnavailable { message: String },

    /// Leadership for a role was lost mid-operation, or this replica is not the leader
    #[error("Leadership lost for role {role}")]
    LeadershipLost { role: Role },

    /// No leader is currently advertised for a role
    #[error("No leader available for role {role}")]
    NoLeaderAvailable { role: Role },

    /// A business rule rejected the operation
    #[error("Invalid operation: {code}")]
    InvalidOperation { code: RejectCode },

    /// The call to the current leader failed at the transport level
    #[error("Transport failure: {message}")]
    TransportFailure { message: String },

    /// The record store failed or returned corrupt data
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results in the Duel service.
pub type DuelResult<T> = std::result::Result<T, DuelError>;

impl DuelError {
    /// Creates a coordination error with the given message.
    pub fn coordination(message: impl Into<String>) -> Self {
        Self::CoordinationUnavailable {
            message: message.into(),
        }
    }

    /// Creates a transport error with the given message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use duel_core::DuelError;
    ///
    /// let error = DuelError::transport("call timed out");
    /// ```
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a business-rule rejection.
    pub fn rejected(code: RejectCode) -> Self {
        Self::InvalidOperation { code }
    }

    /// Returns the reject code for business-rule violations.
    pub fn reject_code(&self) -> Option<RejectCode> {
        match self {
            Self::InvalidOperation { code } => Some(*code),
            _ => None,
        }
    }

    /// Determines if the caller may retry the operation.
    ///
    /// Business-rule violations and storage corruption are never retried
    /// automatically; everything caused by coordination or leadership churn is.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use duel_core::{DuelError, RejectCode};
    ///
    /// assert!(DuelError::coordination("directory down").is_retryable());
    /// assert!(!DuelError::rejected(RejectCode::RoomFull).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CoordinationUnavailable { .. }
                | Self::LeadershipLost { .. }
                | Self::NoLeaderAvailable { .. }
                | Self::TransportFailure { .. }
        )
    }

    /// True when the error means the channel points at a dead or deposed leader.
    pub fn is_stale_leader(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. } | Self::LeadershipLost { .. }
        )
    }

    /// True when a presentation layer should render "service unavailable"
    /// instead of a protocol state such as "waiting for an opponent".
    pub fn is_service_unavailable(&self) -> bool {
        self.is_retryable()
    }

    /// Short message for end users.
    ///
    /// Business rejections render as their code; leadership churn renders as a
    /// waiting state so it is never confused with a protocol state.
    pub fn user_facing(&self) -> String {
        match self {
            Self::InvalidOperation { code } => code.as_str().to_string(),
            _ if self.is_service_unavailable() => "Waiting for service...".to_string(),
            _ => "Service error".to_string(),
        }
    }
}
