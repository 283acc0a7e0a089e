//! # In-Memory Directory
//!
//! A strongly consistent, single-process coordination directory with
//! Consul-like session semantics. Every operation runs under one lock, which
//! makes the conditional acquire linearizable.
//!
//! Session expiry is evaluated lazily: each operation first sweeps sessions
//! whose TTL has elapsed and applies their behavior to the keys they hold.
//! Expiry runs on the tokio clock, so tests can drive it with a paused runtime.

use crate::notifications::{ChangeNotification, ChangeType, NotificationBus, Subscription};
use crate::{
    Directory, DirectoryError, DirectoryResult, DirectorySessionId, KeyEntry, RenewOutcome,
    SessionBehavior, SessionSpec,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the in-memory directory
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Maximum value size in bytes
    pub max_value_size: usize,
    /// Maximum key length in bytes
    pub max_key_len: usize,
    /// Enable change notifications
    pub enable_notifications: bool,
    /// Shortest session TTL accepted
    pub min_ttl: Duration,
    /// Longest session TTL accepted
    pub max_ttl: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_value_size: 512 * 1024, // Consul's KV limit
            max_key_len: 256,
            enable_notifications: true,
            min_ttl: Duration::from_millis(10),
            max_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Directory statistics
#[derive(Debug, Clone, Default)]
pub struct DirectoryStats {
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub sessions_expired: u64,
    pub acquisitions: u64,
    pub rejected_acquisitions: u64,
}

#[derive(Debug)]
struct SessionEntry {
    spec: SessionSpec,
    expires_at: Instant,
}

#[derive(Debug)]
struct StoredKey {
    value: String,
    session: Option<DirectorySessionId>,
    modify_index: u64,
}

#[derive(Debug, Default)]
struct DirectoryState {
    sessions: HashMap<DirectorySessionId, SessionEntry>,
    keys: HashMap<String, StoredKey>,
    modify_index: u64,
}

impl DirectoryState {
    fn next_index(&mut self) -> u64 {
        self.modify_index += 1;
        self.modify_index
    }

    /// Drop every session whose TTL has elapsed. Returns how many expired.
    fn sweep_expired(&mut self, now: Instant, notes: &mut Vec<ChangeNotification>) -> u64 {
        let expired: Vec<DirectorySessionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(entry) = self.sessions.remove(id) {
                debug!("Session {} ({}) expired", id, entry.spec.name);
                self.invalidate(*id, entry.spec.behavior, notes);
            }
        }
        expired.len() as u64
    }

    /// Apply a dead session's behavior to the keys it holds.
    fn invalidate(
        &mut self,
        session: DirectorySessionId,
        behavior: SessionBehavior,
        notes: &mut Vec<ChangeNotification>,
    ) {
        let held: Vec<String> = self
            .keys
            .iter()
            .filter(|(_, stored)| stored.session == Some(session))
            .map(|(key, _)| key.clone())
            .collect();

        for key in held {
            let modify_index = self.next_index();
            match behavior {
                SessionBehavior::Delete => {
                    if let Some(stored) = self.keys.remove(&key) {
                        notes.push(ChangeNotification {
                            key,
                            change_type: ChangeType::Deleted,
                            old_value: Some(stored.value),
                            new_value: None,
                            session: None,
                            modify_index,
                        });
                    }
                }
                SessionBehavior::Release => {
                    if let Some(stored) = self.keys.get_mut(&key) {
                        stored.session = None;
                        stored.modify_index = modify_index;
                        notes.push(ChangeNotification {
                            key,
                            change_type: ChangeType::Released,
                            old_value: Some(stored.value.clone()),
                            new_value: Some(stored.value.clone()),
                            session: None,
                            modify_index,
                        });
                    }
                }
            }
        }
    }
}

/// In-memory coordination directory
pub struct InMemoryDirectory {
    config: DirectoryConfig,
    state: Mutex<DirectoryState>,
    stats: RwLock<DirectoryStats>,
    notification_bus: Arc<NotificationBus>,
}

impl InMemoryDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        info!("In-memory directory initialized with config: {:?}", config);
        Self {
            config,
            state: Mutex::new(DirectoryState::default()),
            stats: RwLock::new(DirectoryStats::default()),
            notification_bus: Arc::new(NotificationBus::new()),
        }
    }

    /// Run `op` against the state after sweeping expired sessions, then
    /// publish whatever changed once the lock is released.
    async fn with_state<T>(
        &self,
        op: impl FnOnce(&mut DirectoryState, &mut Vec<ChangeNotification>) -> T,
    ) -> T {
        let mut notes = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let expired = state.sweep_expired(Instant::now(), &mut notes);
            if expired > 0 {
                self.stats.write().sessions_expired += expired;
            }
            op(&mut state, &mut notes)
        };

        if self.config.enable_notifications {
            for note in notes {
                self.notification_bus.publish(note).await;
            }
        }
        result
    }

    fn validate_key(&self, key: &str) -> DirectoryResult<()> {
        if key.is_empty() || key.len() > self.config.max_key_len || key.starts_with('/') {
            return Err(DirectoryError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn validate_ttl(&self, ttl: Duration) -> DirectoryResult<()> {
        if ttl < self.config.min_ttl || ttl > self.config.max_ttl {
            return Err(DirectoryError::InvalidTtl(format!(
                "{:?} outside [{:?}, {:?}]",
                ttl, self.config.min_ttl, self.config.max_ttl
            )));
        }
        Ok(())
    }

    /// Number of live sessions, after expiry.
    pub async fn session_count(&self) -> usize {
        self.with_state(|state, _| state.sessions.len()).await
    }

    pub fn get_stats(&self) -> DirectoryStats {
        self.stats.read().clone()
    }

    pub fn notification_bus(&self) -> Arc<NotificationBus> {
        self.notification_bus.clone()
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new(DirectoryConfig::default())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn create_session(&self, spec: SessionSpec) -> DirectoryResult<DirectorySessionId> {
        self.validate_ttl(spec.ttl)?;

        let id = DirectorySessionId::new();
        let name = spec.name.clone();
        self.with_state(|state, _| {
            let expires_at = Instant::now() + spec.ttl;
            state.sessions.insert(id, SessionEntry { spec, expires_at });
        })
        .await;

        self.stats.write().sessions_created += 1;
        debug!("Created session {} ({})", id, name);
        Ok(id)
    }

    async fn renew_session(&self, session: DirectorySessionId) -> DirectoryResult<RenewOutcome> {
        let outcome = self
            .with_state(|state, _| match state.sessions.get_mut(&session) {
                Some(entry) => {
                    entry.expires_at = Instant::now() + entry.spec.ttl;
                    RenewOutcome::Renewed
                }
                None => RenewOutcome::Expired,
            })
            .await;

        debug!("Renewed session {}: {:?}", session, outcome);
        Ok(outcome)
    }

    async fn destroy_session(&self, session: DirectorySessionId) -> DirectoryResult<()> {
        let destroyed = self
            .with_state(|state, notes| match state.sessions.remove(&session) {
                Some(entry) => {
                    state.invalidate(session, entry.spec.behavior, notes);
                    true
                }
                None => false,
            })
            .await;

        if destroyed {
            self.stats.write().sessions_destroyed += 1;
            debug!("Destroyed session {}", session);
        }
        Ok(())
    }

    async fn acquire_key(
        &self,
        key: &str,
        value: &str,
        session: DirectorySessionId,
    ) -> DirectoryResult<bool> {
        self.validate_key(key)?;
        if value.len() > self.config.max_value_size {
            return Err(DirectoryError::ValueTooLarge);
        }

        let acquired = self
            .with_state(|state, notes| {
                if !state.sessions.contains_key(&session) {
                    return Err(DirectoryError::InvalidSession(session));
                }

                let holder = state.keys.get(key).and_then(|stored| stored.session);
                if holder.is_some_and(|holder| holder != session) {
                    return Ok(false);
                }

                let modify_index = state.next_index();
                let old = state.keys.insert(
                    key.to_string(),
                    StoredKey {
                        value: value.to_string(),
                        session: Some(session),
                        modify_index,
                    },
                );
                notes.push(ChangeNotification {
                    key: key.to_string(),
                    change_type: if old.is_some() {
                        ChangeType::Updated
                    } else {
                        ChangeType::Created
                    },
                    old_value: old.map(|stored| stored.value),
                    new_value: Some(value.to_string()),
                    session: Some(session),
                    modify_index,
                });
                Ok(true)
            })
            .await?;

        let mut stats = self.stats.write();
        if acquired {
            stats.acquisitions += 1;
        } else {
            stats.rejected_acquisitions += 1;
        }
        Ok(acquired)
    }

    async fn read_key(&self, key: &str) -> DirectoryResult<Option<KeyEntry>> {
        self.validate_key(key)?;
        Ok(self
            .with_state(|state, _| {
                state.keys.get(key).map(|stored| KeyEntry {
                    key: key.to_string(),
                    value: stored.value.clone(),
                    session: stored.session,
                    modify_index: stored.modify_index,
                })
            })
            .await)
    }

    fn subscribe_key(&self, key: &str) -> Option<Subscription> {
        self.config
            .enable_notifications
            .then(|| self.notification_bus.subscribe_key(key))
    }
}
