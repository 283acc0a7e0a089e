//! # Directory Protocol
//!
//! The operations the election protocol consumes from a strongly consistent
//! coordination directory (Consul's session and KV API is the model).

use crate::notifications::Subscription;
use crate::DirectoryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of a directory session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectorySessionId(Uuid);

impl DirectorySessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DirectorySessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DirectorySessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happens to keys held by a session when the session dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionBehavior {
    /// Held keys are deleted
    Delete,
    /// Held keys are kept but unbound
    Release,
}

/// Parameters for a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub name: String,
    pub ttl: Duration,
    pub behavior: SessionBehavior,
}

impl SessionSpec {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            behavior: SessionBehavior::Delete,
        }
    }

    pub fn with_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

/// Outcome of a session renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    Expired,
}

/// A key as read from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: String,
    pub value: String,
    /// The session currently bound to the key, if any
    pub session: Option<DirectorySessionId>,
    /// Directory-wide index of the last modification
    pub modify_index: u64,
}

/// Coordination directory operations.
///
/// Implementations must serialize all operations: the conditional write in
/// [`Directory::acquire_key`] is the only source of mutual exclusion between
/// replicas.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Create a session that expires unless renewed within its TTL.
    async fn create_session(&self, spec: SessionSpec) -> DirectoryResult<DirectorySessionId>;

    /// Push a session's expiry out by its TTL.
    async fn renew_session(&self, session: DirectorySessionId) -> DirectoryResult<RenewOutcome>;

    /// Destroy a session, applying its behavior to held keys.
    async fn destroy_session(&self, session: DirectorySessionId) -> DirectoryResult<()>;

    /// Write `value` under `key` bound to `session`, only if the key is unbound
    /// or already bound to that same session.
    async fn acquire_key(
        &self,
        key: &str,
        value: &str,
        session: DirectorySessionId,
    ) -> DirectoryResult<bool>;

    async fn read_key(&self, key: &str) -> DirectoryResult<Option<KeyEntry>>;

    /// Push notifications for a key, when the directory supports them.
    fn subscribe_key(&self, _key: &str) -> Option<Subscription> {
        None
    }
}

#[async_trait]
impl<D: Directory + ?Sized> Directory for Arc<D> {
    async fn create_session(&self, spec: SessionSpec) -> DirectoryResult<DirectorySessionId> {
        (**self).create_session(spec).await
    }

    async fn renew_session(&self, session: DirectorySessionId) -> DirectoryResult<RenewOutcome> {
        (**self).renew_session(session).await
    }

    async fn destroy_session(&self, session: DirectorySessionId) -> DirectoryResult<()> {
        (**self).destroy_session(session).await
    }

    async fn acquire_key(
        &self,
        key: &str,
        value: &str,
        session: DirectorySessionId,
    ) -> DirectoryResult<bool> {
        (**self).acquire_key(key, value, session).await
    }

    async fn read_key(&self, key: &str) -> DirectoryResult<Option<KeyEntry>> {
        (**self).read_key(key).await
    }

    fn subscribe_key(&self, key: &str) -> Option<Subscription> {
        (**self).subscribe_key(key)
    }
}
