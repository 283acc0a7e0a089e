//! Two-tier cluster harness.
//!
//! Spins up persistence and game replica sets in one process: a shared
//! directory, one coordinator per replica, each game replica reaching the
//! persistence leader through its own watcher and proxy, and clients
//! reaching the game leader the same way.
//!
//! Every replica talks to the directory through its own [`FlakyDirectory`]
//! layered over the shared one, so a partition can cut a single replica off
//! while the rest of the cluster keeps going.

use crate::fault_injection::{Fault, FlakyDirectory};
use crate::local_network::{LocalConnector, LocalNetwork};
use duel_arbiter::{ArbiterConfig, GameService};
use duel_core::{GameApi, LeaderAddress, PersistenceApi, Role};
use duel_directory::{Directory, InMemoryDirectory};
use duel_leader::{
    CoordinatorConfig, CoordinatorHandle, LeaderPointerWatcher, LeaderResult, LeadershipChange,
    LeadershipCoordinator, LeadershipNotificationBus, NotificationFilter, ProxyConfig,
    ReconnectingProxy, WatcherConfig, WatcherHandle,
};
use duel_persistence::{InMemoryRecordStore, PersistenceServer, RecordStore};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Client-side view of the game tier, following its leader.
pub type GameProxy = ReconnectingProxy<LocalConnector<dyn GameApi>>;

/// Game-tier view of the persistence tier, following its leader.
pub type PersistenceProxy = ReconnectingProxy<LocalConnector<dyn PersistenceApi>>;

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub persistence_replicas: usize,
    pub game_replicas: usize,
    pub coordinator: CoordinatorConfig,
    pub watcher: WatcherConfig,
    pub proxy: ProxyConfig,
    pub arbiter: ArbiterConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            persistence_replicas: 2,
            game_replicas: 2,
            coordinator: CoordinatorConfig::default(),
            watcher: WatcherConfig::default(),
            proxy: ProxyConfig::default(),
            arbiter: ArbiterConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// One-second leases and 100ms polling, for tests on a paused clock.
    pub fn fast() -> Self {
        Self {
            coordinator: CoordinatorConfig::default()
                .with_session_ttl(Duration::from_secs(1))
                .with_retry_backoff(Duration::from_millis(100))
                .with_directory_timeout(Duration::from_millis(500)),
            watcher: WatcherConfig::default().with_poll_interval(Duration::from_millis(100)),
            proxy: ProxyConfig::default()
                .with_reconnect_interval(Duration::from_millis(100))
                .with_call_timeout(Duration::from_secs(1))
                .with_wait(30, Duration::from_millis(100)),
            ..Self::default()
        }
    }

    pub fn with_replicas(mut self, persistence: usize, game: usize) -> Self {
        self.persistence_replicas = persistence;
        self.game_replicas = game;
        self
    }
}

struct Replica {
    address: LeaderAddress,
    /// This replica's link to the shared directory
    directory: Arc<FlakyDirectory>,
    coordinator: Option<CoordinatorHandle>,
    /// Game replicas follow the persistence leader with their own watcher
    persistence_watcher: Option<WatcherHandle>,
}

impl Replica {
    fn is_leader(&self) -> bool {
        self.coordinator
            .as_ref()
            .is_some_and(|coordinator| coordinator.is_leader())
    }
}

/// An in-process deployment of both tiers.
pub struct DuelCluster {
    config: ClusterConfig,
    directory: Arc<FlakyDirectory>,
    store: Arc<InMemoryRecordStore>,
    /// Shared by every coordinator in the cluster
    leadership_bus: Arc<LeadershipNotificationBus>,
    persistence_network: LocalNetwork<dyn PersistenceApi>,
    game_network: LocalNetwork<dyn GameApi>,
    persistence: Vec<Replica>,
    game: Vec<Replica>,
    client_watchers: Mutex<Vec<WatcherHandle>>,
}

impl DuelCluster {
    pub async fn start(config: ClusterConfig) -> LeaderResult<Self> {
        let directory = Arc::new(FlakyDirectory::new(Arc::new(InMemoryDirectory::default())));
        let mut cluster = Self {
            config,
            directory,
            store: Arc::new(InMemoryRecordStore::new()),
            leadership_bus: Arc::new(LeadershipNotificationBus::new()),
            persistence_network: LocalNetwork::new(),
            game_network: LocalNetwork::new(),
            persistence: Vec::new(),
            game: Vec::new(),
            client_watchers: Mutex::new(Vec::new()),
        };

        for index in 0..cluster.config.persistence_replicas {
            let replica = cluster.start_persistence_replica(index)?;
            cluster.persistence.push(replica);
        }
        for index in 0..cluster.config.game_replicas {
            let replica = cluster.start_game_replica(index)?;
            cluster.game.push(replica);
        }

        info!(
            "Cluster started with {} persistence and {} game replicas",
            cluster.persistence.len(),
            cluster.game.len()
        );
        Ok(cluster)
    }

    fn directory_handle(&self) -> Arc<dyn Directory> {
        self.directory.clone()
    }

    fn replica_link(&self) -> Arc<FlakyDirectory> {
        Arc::new(FlakyDirectory::new(self.directory_handle()))
    }

    fn start_persistence_replica(&self, index: usize) -> LeaderResult<Replica> {
        let address = LeaderAddress::new(format!("local://persistence-{}", index));
        let directory = self.replica_link();
        let coordinator = LeadershipCoordinator::new(
            Role::persistence(),
            address.clone(),
            directory.clone(),
            self.config.coordinator.clone(),
        )?
        .with_notification_bus(Arc::clone(&self.leadership_bus));

        let store: Arc<dyn RecordStore> = self.store.clone();
        let server = Arc::new(PersistenceServer::new(store, coordinator.view()));
        self.persistence_network.register(address.clone(), server);

        Ok(Replica {
            address,
            directory,
            coordinator: Some(coordinator.spawn()),
            persistence_watcher: None,
        })
    }

    fn start_game_replica(&self, index: usize) -> LeaderResult<Replica> {
        let address = LeaderAddress::new(format!("local://game-{}", index));
        let directory = self.replica_link();
        let coordinator = LeadershipCoordinator::new(
            Role::game(),
            address.clone(),
            directory.clone(),
            self.config.coordinator.clone(),
        )?
        .with_notification_bus(Arc::clone(&self.leadership_bus));

        let watcher = LeaderPointerWatcher::new(
            Role::persistence(),
            directory.clone(),
            self.config.watcher.clone(),
        )?
        .spawn();
        let persistence: PersistenceProxy = ReconnectingProxy::spawn(
            Role::persistence(),
            self.persistence_network.connector(),
            watcher.subscribe(),
            self.config.proxy.clone(),
        )?;

        let service = Arc::new(GameService::new(
            Arc::new(persistence),
            coordinator.view(),
            self.config.arbiter.clone(),
        ));
        self.game_network.register(address.clone(), service);

        Ok(Replica {
            address,
            directory,
            coordinator: Some(coordinator.spawn()),
            persistence_watcher: Some(watcher),
        })
    }

    /// A client following the game tier's leader.
    pub fn game_client(&self) -> LeaderResult<GameProxy> {
        let watcher = LeaderPointerWatcher::new(
            Role::game(),
            self.directory_handle(),
            self.config.watcher.clone(),
        )?
        .spawn();
        let proxy = ReconnectingProxy::spawn(
            Role::game(),
            self.game_network.connector(),
            watcher.subscribe(),
            self.config.proxy.clone(),
        )?;
        self.client_watchers.lock().push(watcher);
        Ok(proxy)
    }

    /// A watcher on `role`'s leader pointer, owned by the caller.
    pub fn watch(&self, role: Role) -> LeaderResult<WatcherHandle> {
        Ok(
            LeaderPointerWatcher::new(role, self.directory_handle(), self.config.watcher.clone())?
                .spawn(),
        )
    }

    /// Leadership changes reported by any coordinator in the cluster.
    pub async fn leadership_changes(
        &self,
        filter: NotificationFilter,
    ) -> mpsc::UnboundedReceiver<LeadershipChange> {
        let (_, changes) = self.leadership_bus.subscribe(filter).await;
        changes
    }

    pub fn directory(&self) -> &Arc<FlakyDirectory> {
        &self.directory
    }

    pub fn store(&self) -> &Arc<InMemoryRecordStore> {
        &self.store
    }

    pub fn persistence_network(&self) -> &LocalNetwork<dyn PersistenceApi> {
        &self.persistence_network
    }

    pub fn game_network(&self) -> &LocalNetwork<dyn GameApi> {
        &self.game_network
    }

    fn replicas(&self, role: &Role) -> &[Replica] {
        if *role == Role::persistence() {
            &self.persistence
        } else {
            &self.game
        }
    }

    fn replicas_mut(&mut self, role: &Role) -> &mut Vec<Replica> {
        if *role == Role::persistence() {
            &mut self.persistence
        } else {
            &mut self.game
        }
    }

    pub fn address_of(&self, role: &Role, index: usize) -> Option<LeaderAddress> {
        self.replicas(role)
            .get(index)
            .map(|replica| replica.address.clone())
    }

    /// Index of the replica currently holding `role`'s lease.
    pub fn leader_index(&self, role: &Role) -> Option<usize> {
        self.replicas(role).iter().position(Replica::is_leader)
    }

    /// Number of replicas that believe they lead `role`.
    pub fn leader_count(&self, role: &Role) -> usize {
        self.replicas(role)
            .iter()
            .filter(|replica| replica.is_leader())
            .count()
    }

    /// Poll until some replica leads `role`, or give up after `timeout`.
    pub async fn wait_for_leader(&self, role: &Role, timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(index) = self.leader_index(role) {
                return Some(index);
            }
            if Instant::now() >= deadline {
                warn!("No leader for {} within {:?}", role, timeout);
                return None;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Kill a replica: its lease is left to expire and its address refuses calls.
    pub fn crash(&mut self, role: &Role, index: usize) {
        let Some(replica) = self.replicas_mut(role).get_mut(index) else {
            return;
        };
        info!("Crashing {} replica {} at {}", role, index, replica.address);
        if let Some(coordinator) = replica.coordinator.take() {
            coordinator.abort();
        }
        replica.persistence_watcher.take();
        let address = replica.address.clone();
        if *role == Role::persistence() {
            self.persistence_network.unregister(&address);
        } else {
            self.game_network.unregister(&address);
        }
    }

    /// Stop a replica gracefully, releasing its lease first.
    pub async fn release(&mut self, role: &Role, index: usize) {
        let Some(replica) = self.replicas_mut(role).get_mut(index) else {
            return;
        };
        info!("Releasing {} replica {} at {}", role, index, replica.address);
        let coordinator = replica.coordinator.take();
        let watcher = replica.persistence_watcher.take();
        let address = replica.address.clone();

        if let Some(coordinator) = coordinator {
            if let Err(e) = coordinator.shutdown().await {
                warn!("Coordinator shutdown failed: {}", e);
            }
        }
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.shutdown().await {
                warn!("Watcher shutdown failed: {}", e);
            }
        }
        if *role == Role::persistence() {
            self.persistence_network.unregister(&address);
        } else {
            self.game_network.unregister(&address);
        }
    }

    /// Start a fresh replica at `index`, as a process restarted after a crash.
    pub fn restart(&mut self, role: &Role, index: usize) -> LeaderResult<()> {
        info!("Restarting {} replica {}", role, index);
        let replica = if *role == Role::persistence() {
            self.start_persistence_replica(index)?
        } else {
            self.start_game_replica(index)?
        };
        let replicas = self.replicas_mut(role);
        if index < replicas.len() {
            replicas[index] = replica;
        } else {
            replicas.push(replica);
        }
        Ok(())
    }

    pub async fn inject(&mut self, fault: Fault) {
        info!("Injecting fault: {:?}", fault);
        match fault {
            Fault::CrashLeader(role) => {
                if let Some(index) = self.leader_index(&role) {
                    self.crash(&role, index);
                }
            }
            Fault::ReleaseLeader(role) => {
                if let Some(index) = self.leader_index(&role) {
                    self.release(&role, index).await;
                }
            }
            Fault::PartitionReplica { role, index } => {
                self.set_reachable(&role, index, false);
            }
            Fault::HealReplica { role, index } => {
                self.set_reachable(&role, index, true);
            }
            Fault::DirectoryOutage => self.directory.set_unreachable(true),
            Fault::DirectoryRecovered => self.directory.set_unreachable(false),
            Fault::FailRenewals(fail) => self.directory.set_fail_renewals(fail),
            Fault::FailSessionWrites(fail) => self.directory.set_fail_session_writes(fail),
        }
    }

    fn set_reachable(&self, role: &Role, index: usize, reachable: bool) {
        let Some(replica) = self.replicas(role).get(index) else {
            return;
        };
        replica.directory.set_unreachable(!reachable);
        if *role == Role::persistence() {
            self.persistence_network
                .set_reachable(&replica.address, reachable);
        } else {
            self.game_network.set_reachable(&replica.address, reachable);
        }
    }

    /// Stop every coordinator and watcher, releasing held leases.
    pub async fn shutdown(mut self) {
        let replicas = self.persistence.drain(..).chain(self.game.drain(..));
        let mut coordinators = Vec::new();
        let mut watchers = self.client_watchers.lock().drain(..).collect::<Vec<_>>();
        for mut replica in replicas {
            coordinators.extend(replica.coordinator.take());
            watchers.extend(replica.persistence_watcher.take());
        }

        let stopped = join_all(coordinators.into_iter().map(|c| c.shutdown())).await;
        for result in stopped {
            if let Err(e) = result {
                warn!("Coordinator shutdown failed: {}", e);
            }
        }
        join_all(watchers.into_iter().map(|w| w.shutdown())).await;
        info!("Cluster stopped");
    }
}
