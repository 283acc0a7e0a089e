//! In-process transport for cluster tests.
//!
//! Services register under a [`LeaderAddress`]; channels built by a
//! [`LocalConnector`] route each call to whatever is registered there at
//! call time. Removing a registration behaves like a crashed process
//! (connection refused); marking it unreachable behaves like a partition
//! (the call hangs until the caller's timeout).

use async_trait::async_trait;
use duel_core::{
    Connector, DuelError, DuelResult, GameApi, LeaderAddress, ParticipantId, PersistenceApi,
    Projection, SessionId, SessionRecord,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NetworkConditions {
    pub latency_min: Duration,
    pub latency_max: Duration,
    /// Fraction of calls failed with a transport error
    pub failure_rate: f64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            latency_min: Duration::ZERO,
            latency_max: Duration::ZERO,
            failure_rate: 0.0,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct NetworkStats {
    pub calls: u64,
    pub delivered: u64,
    pub refused: u64,
    pub dropped: u64,
}

struct Endpoint<S: ?Sized> {
    service: Arc<S>,
    reachable: bool,
}

/// Registry of in-process services of one kind.
pub struct LocalNetwork<S: ?Sized> {
    endpoints: Arc<RwLock<HashMap<LeaderAddress, Endpoint<S>>>>,
    conditions: Arc<RwLock<NetworkConditions>>,
    stats: Arc<Mutex<NetworkStats>>,
}

impl<S: ?Sized> Clone for LocalNetwork<S> {
    fn clone(&self) -> Self {
        Self {
            endpoints: Arc::clone(&self.endpoints),
            conditions: Arc::clone(&self.conditions),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S: ?Sized> Default for LocalNetwork<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> LocalNetwork<S> {
    pub fn new() -> Self {
        Self {
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            conditions: Arc::new(RwLock::new(NetworkConditions::default())),
            stats: Arc::new(Mutex::new(NetworkStats::default())),
        }
    }

    pub fn register(&self, address: LeaderAddress, service: Arc<S>) {
        debug!("Registered {}", address);
        self.endpoints.write().insert(
            address,
            Endpoint {
                service,
                reachable: true,
            },
        );
    }

    /// Remove the service at `address`. Returns false if nothing was there.
    pub fn unregister(&self, address: &LeaderAddress) -> bool {
        debug!("Unregistered {}", address);
        self.endpoints.write().remove(address).is_some()
    }

    pub fn set_reachable(&self, address: &LeaderAddress, reachable: bool) {
        if let Some(endpoint) = self.endpoints.write().get_mut(address) {
            endpoint.reachable = reachable;
        }
    }

    pub fn set_conditions(&self, conditions: NetworkConditions) {
        *self.conditions.write() = conditions;
    }

    pub fn get_stats(&self) -> NetworkStats {
        self.stats.lock().clone()
    }

    pub fn connector(&self) -> LocalConnector<S> {
        LocalConnector {
            network: self.clone(),
        }
    }

    async fn route(&self, address: &LeaderAddress) -> DuelResult<Arc<S>> {
        self.stats.lock().calls += 1;

        let (delay, dropped) = {
            let conditions = self.conditions.read();
            let mut rng = rand::thread_rng();
            let delay = if conditions.latency_max > conditions.latency_min {
                rng.gen_range(conditions.latency_min..=conditions.latency_max)
            } else {
                conditions.latency_min
            };
            let dropped =
                conditions.failure_rate > 0.0 && rng.gen_bool(conditions.failure_rate.min(1.0));
            (delay, dropped)
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if dropped {
            self.stats.lock().dropped += 1;
            return Err(DuelError::transport(format!("call to {} dropped", address)));
        }

        let endpoint = self
            .endpoints
            .read()
            .get(address)
            .map(|endpoint| (Arc::clone(&endpoint.service), endpoint.reachable));
        match endpoint {
            Some((service, true)) => {
                self.stats.lock().delivered += 1;
                Ok(service)
            }
            Some((_, false)) => std::future::pending().await,
            None => {
                self.stats.lock().refused += 1;
                Err(DuelError::transport(format!(
                    "connection to {} refused",
                    address
                )))
            }
        }
    }
}

/// Builds [`LocalChannel`]s; construction never touches the network.
pub struct LocalConnector<S: ?Sized> {
    network: LocalNetwork<S>,
}

/// A channel to one address on a [`LocalNetwork`].
pub struct LocalChannel<S: ?Sized> {
    network: LocalNetwork<S>,
    address: LeaderAddress,
}

impl<S: ?Sized> Clone for LocalChannel<S> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            address: self.address.clone(),
        }
    }
}

impl<S: ?Sized> LocalChannel<S> {
    pub fn address(&self) -> &LeaderAddress {
        &self.address
    }
}

impl Connector for LocalConnector<dyn PersistenceApi> {
    type Channel = LocalChannel<dyn PersistenceApi>;

    fn connect(&self, address: &LeaderAddress) -> DuelResult<Self::Channel> {
        Ok(LocalChannel {
            network: self.network.clone(),
            address: address.clone(),
        })
    }
}

impl Connector for LocalConnector<dyn GameApi> {
    type Channel = LocalChannel<dyn GameApi>;

    fn connect(&self, address: &LeaderAddress) -> DuelResult<Self::Channel> {
        Ok(LocalChannel {
            network: self.network.clone(),
            address: address.clone(),
        })
    }
}

#[async_trait]
impl PersistenceApi for LocalChannel<dyn PersistenceApi> {
    async fn load(&self, session_id: &SessionId) -> DuelResult<Option<SessionRecord>> {
        self.network.route(&self.address).await?.load(session_id).await
    }

    async fn save(&self, record: &SessionRecord) -> DuelResult<()> {
        self.network.route(&self.address).await?.save(record).await
    }

    async fn check_existing_session(
        &self,
        participant: &ParticipantId,
    ) -> DuelResult<Option<SessionId>> {
        self.network
            .route(&self.address)
            .await?
            .check_existing_session(participant)
            .await
    }

    async fn remove_participant(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> DuelResult<()> {
        self.network
            .route(&self.address)
            .await?
            .remove_participant(session_id, participant)
            .await
    }

    async fn ping(&self) -> DuelResult<()> {
        self.network.route(&self.address).await?.ping().await
    }
}

#[async_trait]
impl GameApi for LocalChannel<dyn GameApi> {
    async fn check_session(&self, participant: &ParticipantId) -> DuelResult<Option<SessionId>> {
        self.network
            .route(&self.address)
            .await?
            .check_session(participant)
            .await
    }

    async fn create_or_join(
        &self,
        participant: &ParticipantId,
        room: &SessionId,
        join_only: bool,
    ) -> DuelResult<Projection> {
        self.network
            .route(&self.address)
            .await?
            .create_or_join(participant, room, join_only)
            .await
    }

    async fn commit(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        symbol: &str,
    ) -> DuelResult<Projection> {
        self.network
            .route(&self.address)
            .await?
            .commit(session_id, participant, symbol)
            .await
    }

    async fn get_state(
        &self,
        session_id: &SessionId,
        viewer: &ParticipantId,
    ) -> DuelResult<Projection> {
        self.network
            .route(&self.address)
            .await?
            .get_state(session_id, viewer)
            .await
    }

    async fn reset(&self, session_id: &SessionId, viewer: &ParticipantId) -> DuelResult<Projection> {
        self.network
            .route(&self.address)
            .await?
            .reset(session_id, viewer)
            .await
    }

    async fn leave(&self, session_id: &SessionId, participant: &ParticipantId) -> DuelResult<()> {
        self.network
            .route(&self.address)
            .await?
            .leave(session_id, participant)
            .await
    }

    async fn ping(&self) -> DuelResult<()> {
        self.network.route(&self.address).await?.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_core::Role;
    use duel_leader::{LeadershipState, LeadershipView};
    use duel_persistence::{InMemoryRecordStore, PersistenceServer};

    fn server() -> Arc<dyn PersistenceApi> {
        Arc::new(PersistenceServer::new(
            Arc::new(InMemoryRecordStore::new()),
            LeadershipView::fixed(Role::persistence(), LeadershipState::Leader { term: 1 }),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_routing_and_kill_switches() {
        let network: LocalNetwork<dyn PersistenceApi> = LocalNetwork::new();
        let address = LeaderAddress::new("local://persistence-0");
        let channel = network.connector().connect(&address).unwrap();

        // Nothing registered yet
        assert!(channel.ping().await.unwrap_err().is_stale_leader());

        network.register(address.clone(), server());
        channel.ping().await.unwrap();

        network.set_reachable(&address, false);
        let hung = tokio::time::timeout(Duration::from_secs(5), channel.ping()).await;
        assert!(hung.is_err());

        network.set_reachable(&address, true);
        channel.ping().await.unwrap();

        assert!(network.unregister(&address));
        assert!(channel.ping().await.is_err());

        let stats = network.get_stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.refused, 2);
    }
}
