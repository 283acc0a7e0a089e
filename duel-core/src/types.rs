//! # Core Types
//!
//! Identifiers used throughout the Duel service.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named leadership slot, elected independently per service tier.
///
/// Each role owns exactly one pointer key in the coordination directory.
///
/// # Examples
///
/// ```rust
/// use duel_core::Role;
///
/// let role = Role::game();
/// assert_eq!(role.pointer_key(), "service/rps-game/leader");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Role(String);

impl Role {
    pub const GAME: &'static str = "rps-game";
    pub const PERSISTENCE: &'static str = "rps-orm";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Leadership of the stateless game-logic tier.
    pub fn game() -> Self {
        Self::new(Self::GAME)
    }

    /// Leadership of the stateful persistence tier.
    pub fn persistence() -> Self {
        Self::new(Self::PERSISTENCE)
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Directory key holding the current leader's reachable address.
    pub fn pointer_key(&self) -> String {
        format!("service/{}/leader", self.0)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reachable address a leader advertises in its pointer key.
///
/// Addresses are opaque to the election protocol; transports interpret them.
/// A leading `http://` is accepted and stripped by [`LeaderAddress::host_port`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaderAddress(String);

impl LeaderAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address without any URL scheme, suitable for a socket connect.
    pub fn host_port(&self) -> &str {
        self.0
            .strip_prefix("http://")
            .or_else(|| self.0.strip_prefix("tcp://"))
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for LeaderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<std::net::SocketAddr> for LeaderAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self(format!("tcp://{}", addr))
    }
}

impl From<&str> for LeaderAddress {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

/// Identity of a participant (the player's nickname).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a match session; the room code players share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
