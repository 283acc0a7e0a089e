//! Lease-based leadership coordination for one role.
//!
//! A coordinator competes for a role by creating a directory session and
//! conditionally writing its address under the role's pointer key, bound to
//! that session. While it holds the key it renews the session and re-reads
//! the key on every tick; any failure drops it back to candidate with a fresh
//! session on the next attempt.
//!
//! The coordinator also keeps a local lease deadline: the instant the last
//! successful renewal was sent, plus the TTL. It steps down once that
//! deadline passes, even while a directory call is still outstanding, so it
//! never outlives the lease the directory sees.

use crate::config::jittered;
use crate::notifications::{LeadershipChange, LeadershipNotificationBus, NotificationFilter};
use crate::{CoordinatorConfig, LeaderResult};
use duel_core::{DuelError, DuelResult, LeaderAddress, Role};
use duel_directory::{Directory, DirectoryResult, DirectorySessionId, RenewOutcome, SessionSpec};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Election state of one coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipState {
    /// Competing for the pointer key
    Candidate,

    /// Holding the pointer key
    Leader {
        /// Number of times this coordinator has acquired leadership
        term: u64,
    },

    /// Holding the pointer key, renewal in flight
    Renewing { term: u64 },

    /// Shut down; never leaves this state
    Stopped,
}

impl LeadershipState {
    pub fn is_leader(&self) -> bool {
        matches!(
            self,
            LeadershipState::Leader { .. } | LeadershipState::Renewing { .. }
        )
    }
}

/// Statistics about leadership operations
#[derive(Debug, Default, Clone)]
pub struct CoordinatorStats {
    pub acquire_attempts: u64,
    pub acquisitions: u64,
    pub losses: u64,
    pub renewals: u64,
    pub releases: u64,
    /// Best-effort session destroys that failed
    pub cleanup_failures: u64,
}

/// Read-only view of a coordinator's state, for servers hosted on the replica.
#[derive(Debug, Clone)]
pub struct LeadershipView {
    role: Role,
    state_rx: watch::Receiver<LeadershipState>,
}

impl LeadershipView {
    /// A view pinned to one state, for hosting a server without an election.
    pub fn fixed(role: Role, state: LeadershipState) -> Self {
        let (_, state_rx) = watch::channel(state);
        Self { role, state_rx }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn state(&self) -> LeadershipState {
        self.state_rx.borrow().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.state_rx.borrow().is_leader()
    }

    /// Fails with `LeadershipLost` unless this replica currently leads.
    pub fn ensure_leader(&self) -> DuelResult<()> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(DuelError::LeadershipLost {
                role: self.role.clone(),
            })
        }
    }

    /// Wait until this replica leads. Returns false if the coordinator is gone.
    pub async fn wait_for_leadership(&mut self) -> bool {
        self.state_rx
            .wait_for(LeadershipState::is_leader)
            .await
            .is_ok()
    }
}

/// Competes for and holds leadership of one role.
pub struct LeadershipCoordinator {
    role: Role,
    address: LeaderAddress,
    directory: Arc<dyn Directory>,
    config: CoordinatorConfig,
    state_tx: watch::Sender<LeadershipState>,
    stats: Arc<RwLock<CoordinatorStats>>,
    notification_bus: Arc<LeadershipNotificationBus>,
    term: u64,
}

/// A held lease: the session bound to the pointer key and the local instant
/// after which it can no longer be trusted.
#[derive(Debug, Clone, Copy)]
struct Lease {
    session: DirectorySessionId,
    expires_at: Instant,
}

/// Why a held lease ended
enum HoldExit {
    Lost,
    Shutdown,
}

impl LeadershipCoordinator {
    pub fn new(
        role: Role,
        address: LeaderAddress,
        directory: Arc<dyn Directory>,
        config: CoordinatorConfig,
    ) -> LeaderResult<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(LeadershipState::Candidate);

        Ok(Self {
            role,
            address,
            directory,
            config,
            state_tx,
            stats: Arc::new(RwLock::new(CoordinatorStats::default())),
            notification_bus: Arc::new(LeadershipNotificationBus::new()),
            term: 0,
        })
    }

    /// Share a notification bus with other coordinators in the process.
    pub fn with_notification_bus(mut self, bus: Arc<LeadershipNotificationBus>) -> Self {
        self.notification_bus = bus;
        self
    }

    pub fn view(&self) -> LeadershipView {
        LeadershipView {
            role: self.role.clone(),
            state_rx: self.state_tx.subscribe(),
        }
    }

    /// Start the election loop. Dropping the handle stops it.
    pub fn spawn(self) -> CoordinatorHandle {
        let view = self.view();
        let stats = Arc::clone(&self.stats);
        let notification_bus = Arc::clone(&self.notification_bus);
        let role = self.role.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(self.run(shutdown_rx));

        CoordinatorHandle {
            role,
            view,
            stats,
            notification_bus,
            shutdown_tx,
            task,
        }
    }

    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            "Starting leadership coordinator for {} at {}",
            self.role, self.address
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.try_acquire().await {
                Ok(Some(lease)) => {
                    if let HoldExit::Shutdown = self.hold(lease, &mut shutdown_rx).await {
                        break;
                    }
                }
                Ok(None) => {
                    self.notification_bus
                        .notify_acquire_failed(&self.role, "pointer key held by another session")
                        .await;
                }
                Err(e) => {
                    warn!("Acquire attempt for {} failed: {}", self.role, e);
                    self.notification_bus
                        .notify_acquire_failed(&self.role, e.to_string())
                        .await;
                }
            }

            let backoff = jittered(self.config.retry_backoff, self.config.jitter_ratio);
            if !sleep_unless_shutdown(backoff, &mut shutdown_rx).await {
                break;
            }
        }

        self.state_tx.send_replace(LeadershipState::Stopped);
        info!("Leadership coordinator for {} stopped", self.role);
    }

    /// One acquire attempt. `Ok(None)` means another session holds the key.
    async fn try_acquire(&mut self) -> DuelResult<Option<Lease>> {
        self.stats.write().acquire_attempts += 1;
        let started = Instant::now();

        let spec = SessionSpec::new(
            format!("{}-{}", self.role, self.address),
            self.config.session_ttl,
        );
        let session = self
            .directory_call(self.directory.create_session(spec))
            .await?;

        let key = self.role.pointer_key();
        let acquired = self
            .directory_call(
                self.directory
                    .acquire_key(&key, self.address.as_str(), session),
            )
            .await;

        match acquired {
            Ok(true) => {
                self.term += 1;
                self.stats.write().acquisitions += 1;
                self.state_tx
                    .send_replace(LeadershipState::Leader { term: self.term });
                info!(
                    "Acquired leadership for {} (term {}), advertising {}",
                    self.role, self.term, self.address
                );
                self.notification_bus
                    .notify_acquired(&self.role, &self.address, self.term)
                    .await;
                Ok(Some(Lease {
                    session,
                    expires_at: started + self.config.session_ttl,
                }))
            }
            Ok(false) => {
                debug!("Pointer key {} is held by another session", key);
                self.release_session(session).await;
                Ok(None)
            }
            Err(e) => {
                self.release_session(session).await;
                Err(e)
            }
        }
    }

    /// Renew until the lease is lost or shutdown is requested.
    async fn hold(
        &mut self,
        mut lease: Lease,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> HoldExit {
        let term = self.term;
        let session = lease.session;
        loop {
            let interval = jittered(self.config.renew_interval, self.config.jitter_ratio);
            let wake_at = (Instant::now() + interval).min(lease.expires_at);
            let pause = wake_at.saturating_duration_since(Instant::now());
            if !sleep_unless_shutdown(pause, shutdown_rx).await {
                self.release_session(session).await;
                self.stats.write().releases += 1;
                info!("Released leadership for {} (term {})", self.role, term);
                self.notification_bus.notify_released(&self.role, term).await;
                return HoldExit::Shutdown;
            }

            self.state_tx.send_replace(LeadershipState::Renewing { term });
            match self.renew(&mut lease).await {
                Ok(()) => {
                    self.stats.write().renewals += 1;
                    self.state_tx.send_replace(LeadershipState::Leader { term });
                }
                Err(e) => {
                    self.state_tx.send_replace(LeadershipState::Candidate);
                    self.stats.write().losses += 1;
                    warn!("Lost leadership for {} (term {}): {}", self.role, term, e);
                    self.notification_bus
                        .notify_lost(&self.role, term, e.to_string())
                        .await;
                    self.release_session(session).await;
                    return HoldExit::Lost;
                }
            }
        }
    }

    /// Renew the session, then confirm the pointer key is still bound to it.
    /// Both calls are cut off at the lease deadline.
    async fn renew(&self, lease: &mut Lease) -> DuelResult<()> {
        let lost = || DuelError::LeadershipLost {
            role: self.role.clone(),
        };

        let sent_at = Instant::now();
        match self
            .lease_call(lease.expires_at, self.directory.renew_session(lease.session))
            .await?
        {
            RenewOutcome::Renewed => {}
            RenewOutcome::Expired => return Err(lost()),
        }
        lease.expires_at = sent_at + self.config.session_ttl;

        let entry = self
            .lease_call(
                lease.expires_at,
                self.directory.read_key(&self.role.pointer_key()),
            )
            .await?;
        match entry {
            Some(entry) if entry.session == Some(lease.session) => Ok(()),
            _ => Err(lost()),
        }
    }

    /// A directory call that must finish before `expires_at`.
    async fn lease_call<T>(
        &self,
        expires_at: Instant,
        call: impl Future<Output = DirectoryResult<T>>,
    ) -> DuelResult<T> {
        let answered = if Instant::now() < expires_at {
            tokio::time::timeout_at(expires_at, self.directory_call(call))
                .await
                .ok()
        } else {
            None
        };
        answered.unwrap_or_else(|| {
            warn!(
                "Lease for {} ran out before the directory answered",
                self.role
            );
            Err(DuelError::LeadershipLost {
                role: self.role.clone(),
            })
        })
    }

    /// Best-effort session destroy. A failure only lengthens failover.
    async fn release_session(&self, session: DirectorySessionId) {
        if let Err(e) = self
            .directory_call(self.directory.destroy_session(session))
            .await
        {
            self.stats.write().cleanup_failures += 1;
            warn!(
                "Failed to destroy session {} for {}; it will expire after its TTL: {}",
                session, self.role, e
            );
        }
    }

    async fn directory_call<T>(
        &self,
        call: impl Future<Output = DirectoryResult<T>>,
    ) -> DuelResult<T> {
        match tokio::time::timeout(self.config.directory_timeout, call).await {
            Ok(result) => result.map_err(DuelError::from),
            Err(_) => Err(DuelError::coordination("directory call timed out")),
        }
    }
}

/// Sleep for `duration`. Returns false if shutdown was requested meanwhile or
/// the handle holding the shutdown signal was dropped.
pub(crate) async fn sleep_unless_shutdown(
    duration: std::time::Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown_rx.wait_for(|stop| *stop) => return false,
    }
    !*shutdown_rx.borrow()
}

/// Handle to a running coordinator
pub struct CoordinatorHandle {
    role: Role,
    view: LeadershipView,
    stats: Arc<RwLock<CoordinatorStats>>,
    notification_bus: Arc<LeadershipNotificationBus>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn view(&self) -> LeadershipView {
        self.view.clone()
    }

    pub fn state(&self) -> LeadershipState {
        self.view.state()
    }

    pub fn is_leader(&self) -> bool {
        self.view.is_leader()
    }

    pub fn get_stats(&self) -> CoordinatorStats {
        self.stats.read().clone()
    }

    pub async fn subscribe(
        &self,
        filter: NotificationFilter,
    ) -> mpsc::UnboundedReceiver<LeadershipChange> {
        let (_, rx) = self.notification_bus.subscribe(filter).await;
        rx
    }

    /// Stop competing and release leadership if held.
    pub async fn shutdown(self) -> LeaderResult<()> {
        info!("Stopping leadership coordinator for {}", self.role);
        if self.shutdown_tx.send(true).is_err() {
            debug!("Coordinator for {} already exited", self.role);
        }
        self.task.await?;
        Ok(())
    }

    /// Kill the election loop without releasing anything, as a crash would.
    pub fn abort(self) {
        warn!("Aborting leadership coordinator for {}", self.role);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_directory::InMemoryDirectory;
    use std::time::Duration;

    fn coordinator(
        directory: &Arc<InMemoryDirectory>,
        address: &str,
        config: CoordinatorConfig,
    ) -> LeadershipCoordinator {
        let directory: Arc<dyn Directory> = directory.clone();
        LeadershipCoordinator::new(Role::game(), LeaderAddress::new(address), directory, config)
            .unwrap()
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig::default().with_jitter_ratio(0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_coordinator_acquires_and_advertises() {
        let directory = Arc::new(InMemoryDirectory::default());
        let handle = coordinator(&directory, "tcp://10.0.0.1:50051", config()).spawn();

        let mut view = handle.view();
        assert!(view.wait_for_leadership().await);
        assert_eq!(handle.state(), LeadershipState::Leader { term: 1 });

        let entry = directory
            .read_key(&Role::game().pointer_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.value, "tcp://10.0.0.1:50051");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handle.is_leader());
        assert!(handle.get_stats().renewals >= 4);

        handle.shutdown().await.unwrap();
        assert!(directory
            .read_key(&Role::game().pointer_key())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_coordinator_stays_candidate() {
        let directory = Arc::new(InMemoryDirectory::default());
        let first = coordinator(&directory, "tcp://10.0.0.1:50051", config()).spawn();
        let mut first_view = first.view();
        assert!(first_view.wait_for_leadership().await);

        let second = coordinator(&directory, "tcp://10.0.0.2:50051", config()).spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(second.state(), LeadershipState::Candidate);
        assert!(second.get_stats().acquire_attempts >= 2);
        // Losing attempts clean up their sessions.
        assert_eq!(directory.session_count().await, 1);

        // A graceful release hands over well before the TTL would expire.
        first.shutdown().await.unwrap();
        let mut second_view = second.view();
        tokio::time::timeout(Duration::from_secs(2), second_view.wait_for_leadership())
            .await
            .unwrap();
        assert!(second.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_pointer_returns_to_candidate() {
        let directory = Arc::new(InMemoryDirectory::default());
        let handle = coordinator(&directory, "tcp://10.0.0.1:50051", config()).spawn();
        let mut changes = handle.subscribe(NotificationFilter::Transitions).await;
        let mut view = handle.view();
        assert!(view.wait_for_leadership().await);

        // Another session takes over the key behind the coordinator's back.
        let entry = directory
            .read_key(&Role::game().pointer_key())
            .await
            .unwrap()
            .unwrap();
        directory
            .destroy_session(entry.session.unwrap())
            .await
            .unwrap();

        assert!(matches!(
            changes.recv().await,
            Some(LeadershipChange::Acquired { term: 1, .. })
        ));
        assert!(matches!(
            changes.recv().await,
            Some(LeadershipChange::Lost { term: 1, .. })
        ));
        assert!(matches!(
            changes.recv().await,
            Some(LeadershipChange::Acquired { term: 2, .. })
        ));
        assert_eq!(handle.get_stats().losses, 1);
    }

    #[tokio::test]
    async fn test_view_reports_leadership_lost() {
        let view = LeadershipView::fixed(Role::persistence(), LeadershipState::Candidate);
        assert_eq!(
            view.ensure_leader(),
            Err(DuelError::LeadershipLost {
                role: Role::persistence()
            })
        );

        let view = LeadershipView::fixed(Role::persistence(), LeadershipState::Renewing { term: 4 });
        assert!(view.ensure_leader().is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
        let result = LeadershipCoordinator::new(
            Role::game(),
            LeaderAddress::new("tcp://10.0.0.1:50051"),
            directory,
            CoordinatorConfig::default().with_renew_interval(Duration::from_secs(30)),
        );
        assert!(result.is_err());
    }
}
