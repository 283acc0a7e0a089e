use async_trait::async_trait;
use duel_core::Role;
use duel_directory::{
    Directory, DirectoryError, DirectoryResult, DirectorySessionId, KeyEntry, RenewOutcome,
    SessionSpec, Subscription,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Faults a [`DuelCluster`](crate::DuelCluster) can inject.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Kill the role's leader without releasing its lease
    CrashLeader(Role),
    /// Shut the role's leader down gracefully, releasing its lease
    ReleaseLeader(Role),
    /// Cut one replica off from its clients and from the directory
    PartitionReplica { role: Role, index: usize },
    /// Undo [`Fault::PartitionReplica`]
    HealReplica { role: Role, index: usize },
    /// Fail every directory operation
    DirectoryOutage,
    /// Undo [`Fault::DirectoryOutage`]
    DirectoryRecovered,
    /// Report every session renewal as expired
    FailRenewals(bool),
    /// Refuse to create or destroy sessions, so held leases can only expire
    FailSessionWrites(bool),
}

#[derive(Debug, Clone, Default)]
struct DirectoryFaults {
    unreachable: bool,
    fail_renewals: bool,
    fail_session_writes: bool,
    failure_rate: f64,
    latency: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct FaultStats {
    pub calls: u64,
    pub injected_failures: u64,
    pub expired_renewals: u64,
}

/// A [`Directory`] wrapper that fails on demand.
pub struct FlakyDirectory {
    inner: Arc<dyn Directory>,
    faults: RwLock<DirectoryFaults>,
    stats: Mutex<FaultStats>,
}

impl FlakyDirectory {
    pub fn new(inner: Arc<dyn Directory>) -> Self {
        Self {
            inner,
            faults: RwLock::new(DirectoryFaults::default()),
            stats: Mutex::new(FaultStats::default()),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        info!("Directory unreachable: {}", unreachable);
        self.faults.write().unreachable = unreachable;
    }

    pub fn set_fail_renewals(&self, fail: bool) {
        self.faults.write().fail_renewals = fail;
    }

    pub fn set_fail_session_writes(&self, fail: bool) {
        self.faults.write().fail_session_writes = fail;
    }

    /// Fail this fraction of operations at random.
    pub fn set_failure_rate(&self, rate: f64) {
        self.faults.write().failure_rate = rate.clamp(0.0, 1.0);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults.write().latency = latency;
    }

    /// Clear every injected fault.
    pub fn heal(&self) {
        *self.faults.write() = DirectoryFaults::default();
    }

    pub fn get_stats(&self) -> FaultStats {
        self.stats.lock().clone()
    }

    async fn gate(&self, operation: &str) -> DirectoryResult<()> {
        let faults = self.faults.read().clone();
        self.stats.lock().calls += 1;

        if !faults.latency.is_zero() {
            sleep(faults.latency).await;
        }

        let unlucky =
            faults.failure_rate > 0.0 && rand::thread_rng().gen_bool(faults.failure_rate);
        if faults.unreachable || unlucky {
            self.stats.lock().injected_failures += 1;
            debug!("Injected directory failure on {}", operation);
            return Err(DirectoryError::Unreachable(format!(
                "injected fault on {}",
                operation
            )));
        }
        Ok(())
    }

    fn gate_session_write(&self, operation: &str) -> DirectoryResult<()> {
        if !self.faults.read().fail_session_writes {
            return Ok(());
        }
        self.stats.lock().injected_failures += 1;
        debug!("Refused {}", operation);
        Err(DirectoryError::Unreachable(format!(
            "injected fault on {}",
            operation
        )))
    }
}

#[async_trait]
impl Directory for FlakyDirectory {
    async fn create_session(&self, spec: SessionSpec) -> DirectoryResult<DirectorySessionId> {
        self.gate("create_session").await?;
        self.gate_session_write("create_session")?;
        self.inner.create_session(spec).await
    }

    async fn renew_session(&self, session: DirectorySessionId) -> DirectoryResult<RenewOutcome> {
        self.gate("renew_session").await?;
        if self.faults.read().fail_renewals {
            self.stats.lock().expired_renewals += 1;
            return Ok(RenewOutcome::Expired);
        }
        self.inner.renew_session(session).await
    }

    async fn destroy_session(&self, session: DirectorySessionId) -> DirectoryResult<()> {
        self.gate("destroy_session").await?;
        self.gate_session_write("destroy_session")?;
        self.inner.destroy_session(session).await
    }

    async fn acquire_key(
        &self,
        key: &str,
        value: &str,
        session: DirectorySessionId,
    ) -> DirectoryResult<bool> {
        self.gate("acquire_key").await?;
        self.inner.acquire_key(key, value, session).await
    }

    async fn read_key(&self, key: &str) -> DirectoryResult<Option<KeyEntry>> {
        self.gate("read_key").await?;
        self.inner.read_key(key).await
    }

    fn subscribe_key(&self, key: &str) -> Option<Subscription> {
        self.inner.subscribe_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_directory::InMemoryDirectory;

    #[tokio::test]
    async fn test_outage_and_heal() {
        let directory = FlakyDirectory::new(Arc::new(InMemoryDirectory::default()));
        let session = directory
            .create_session(SessionSpec::new("test", Duration::from_secs(10)))
            .await
            .unwrap();

        directory.set_unreachable(true);
        let err = directory.read_key("service/rps-game/leader").await.unwrap_err();
        assert!(err.is_unreachable());

        directory.heal();
        directory.set_fail_renewals(true);
        assert_eq!(
            directory.renew_session(session).await.unwrap(),
            RenewOutcome::Expired
        );

        directory.heal();
        assert_eq!(
            directory.renew_session(session).await.unwrap(),
            RenewOutcome::Renewed
        );

        let stats = directory.get_stats();
        assert_eq!(stats.injected_failures, 1);
        assert_eq!(stats.expired_renewals, 1);
    }

    #[tokio::test]
    async fn test_refused_session_writes_leave_sessions_alive() {
        let directory = FlakyDirectory::new(Arc::new(InMemoryDirectory::default()));
        let session = directory
            .create_session(SessionSpec::new("test", Duration::from_secs(10)))
            .await
            .unwrap();

        directory.set_fail_session_writes(true);
        assert!(directory.destroy_session(session).await.is_err());
        assert!(directory
            .create_session(SessionSpec::new("test", Duration::from_secs(10)))
            .await
            .is_err());
        assert!(directory
            .acquire_key("service/rps-orm/leader", "local://persistence-0", session)
            .await
            .unwrap());
        assert_eq!(directory.get_stats().injected_failures, 2);
    }

    #[tokio::test]
    async fn test_certain_failure_rate() {
        let directory = FlakyDirectory::new(Arc::new(InMemoryDirectory::default()));
        directory.set_failure_rate(1.0);
        for _ in 0..5 {
            assert!(directory.read_key("k").await.is_err());
        }
    }
}
