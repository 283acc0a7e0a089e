//! Reconnecting client proxy toward a role's current leader.
//!
//! The proxy owns at most one channel, kept in a single slot behind a lock.
//! Pointer events from a watcher replace the slot's contents; calls check a
//! channel out of the slot and give it back implicitly. A transport failure or
//! a `LeadershipLost` answer empties the slot, but only if the slot still holds
//! the channel the failed call used, so a late failure on an old channel never
//! tears down a newer one.

use crate::config::jittered;
use crate::coordinator::sleep_unless_shutdown;
use crate::watcher::PointerEvent;
use crate::{LeaderResult, ProxyConfig};
use async_trait::async_trait;
use duel_core::{
    Connector, DuelError, DuelResult, GameApi, LeaderAddress, ParticipantId, PersistenceApi,
    Projection, Role, SessionId, SessionRecord,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Connectivity of a proxy, as shown to presentation layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No leader is advertised
    NoLeader,
    /// A channel to the advertised leader is live
    Connected,
    /// Connected, but the directory could not confirm the leader recently
    Degraded,
    /// A leader address is known but its channel was dropped after a failure
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

/// Statistics about proxied calls
#[derive(Debug, Default, Clone)]
pub struct ProxyStats {
    pub calls: u64,
    pub failed_calls: u64,
    pub rejected_without_leader: u64,
    pub channels_built: u64,
    pub channels_dropped: u64,
    pub connect_failures: u64,
}

struct Slot<Ch> {
    address: Option<LeaderAddress>,
    channel: Option<Ch>,
    /// Bumped on every change of `channel`
    generation: u64,
    degraded: bool,
    stats: ProxyStats,
}

impl<Ch> Slot<Ch> {
    fn connection_state(&self) -> ConnectionState {
        match (&self.channel, &self.address) {
            (Some(_), _) if self.degraded => ConnectionState::Degraded,
            (Some(_), _) => ConnectionState::Connected,
            (None, Some(_)) => ConnectionState::Reconnecting,
            (None, None) => ConnectionState::NoLeader,
        }
    }
}

struct ProxyShared<C: Connector> {
    role: Role,
    connector: C,
    slot: Mutex<Slot<C::Channel>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<C: Connector> ProxyShared<C> {
    fn apply(&self, event: PointerEvent) {
        let mut slot = self.slot.lock();
        match event {
            PointerEvent::Changed(address) => {
                slot.degraded = false;
                let same_leader = slot.address.as_ref() == Some(&address);
                if !(same_leader && slot.channel.is_some()) {
                    slot.address = Some(address);
                    self.rebuild(&mut slot);
                }
            }
            PointerEvent::Vacant => {
                if slot.channel.is_some() {
                    slot.stats.channels_dropped += 1;
                }
                info!("No leader advertised for {}; dropping channel", self.role);
                slot.address = None;
                slot.channel = None;
                slot.generation += 1;
                slot.degraded = false;
            }
            PointerEvent::DirectoryUnreachable => {
                debug!("Directory unreachable; keeping channel to {} leader", self.role);
                slot.degraded = true;
            }
        }
        self.publish_state(&slot);
    }

    /// Build a fresh channel toward the slot's address, replacing any old one.
    fn rebuild(&self, slot: &mut Slot<C::Channel>) {
        if slot.channel.take().is_some() {
            slot.stats.channels_dropped += 1;
        }
        slot.generation += 1;

        let Some(address) = slot.address.clone() else {
            return;
        };
        match self.connector.connect(&address) {
            Ok(channel) => {
                slot.channel = Some(channel);
                slot.stats.channels_built += 1;
                info!("Connected to {} leader at {}", self.role, address);
            }
            Err(e) => {
                slot.stats.connect_failures += 1;
                warn!("Failed to build channel to {} leader at {}: {}", self.role, address, e);
            }
        }
    }

    /// Retry toward the last known address after a failure emptied the slot.
    fn reconnect(&self) {
        let mut slot = self.slot.lock();
        if slot.channel.is_none() && slot.address.is_some() {
            debug!("Reconnecting to {} leader", self.role);
            self.rebuild(&mut slot);
            self.publish_state(&slot);
        }
    }

    fn checkout(&self) -> DuelResult<(C::Channel, u64)> {
        let mut slot = self.slot.lock();
        slot.stats.calls += 1;
        match &slot.channel {
            Some(channel) => Ok((channel.clone(), slot.generation)),
            None => {
                slot.stats.rejected_without_leader += 1;
                Err(DuelError::NoLeaderAvailable {
                    role: self.role.clone(),
                })
            }
        }
    }

    /// Record a failed call; drop the channel it used if it is still current.
    fn report_failure(&self, generation: u64, error: &DuelError) {
        let mut slot = self.slot.lock();
        slot.stats.failed_calls += 1;
        if !error.is_stale_leader() {
            return;
        }
        if slot.generation != generation || slot.channel.is_none() {
            debug!("Ignoring failure on superseded {} channel: {}", self.role, error);
            return;
        }

        warn!("Dropping channel to {} leader: {}", self.role, error);
        slot.channel = None;
        slot.generation += 1;
        slot.stats.channels_dropped += 1;
        self.publish_state(&slot);
    }

    fn publish_state(&self, slot: &Slot<C::Channel>) {
        let state = slot.connection_state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// Client-side handle to whichever replica currently leads a role.
pub struct ReconnectingProxy<C: Connector> {
    shared: Arc<ProxyShared<C>>,
    config: ProxyConfig,
    _shutdown_tx: watch::Sender<bool>,
}

impl<C: Connector> ReconnectingProxy<C> {
    /// Start following `events`, usually from
    /// [`WatcherHandle::subscribe`](crate::WatcherHandle::subscribe).
    ///
    /// The proxy's background task stops when the proxy is dropped.
    pub fn spawn(
        role: Role,
        connector: C,
        events: mpsc::UnboundedReceiver<PointerEvent>,
        config: ProxyConfig,
    ) -> LeaderResult<Self> {
        config.validate()?;

        let (state_tx, _) = watch::channel(ConnectionState::NoLeader);
        let shared = Arc::new(ProxyShared {
            role,
            connector,
            slot: Mutex::new(Slot {
                address: None,
                channel: None,
                generation: 0,
                degraded: false,
                stats: ProxyStats::default(),
            }),
            state_tx,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(Self::run(
            Arc::clone(&shared),
            events,
            config.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            shared,
            config,
            _shutdown_tx: shutdown_tx,
        })
    }

    async fn run(
        shared: Arc<ProxyShared<C>>,
        events: mpsc::UnboundedReceiver<PointerEvent>,
        config: ProxyConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        enum Wake {
            Event(Option<PointerEvent>),
            Tick,
            Shutdown,
        }

        let mut events = Some(events);
        loop {
            let interval = jittered(config.reconnect_interval, config.jitter_ratio);
            let wake = tokio::select! {
                event = next_event(&mut events) => Wake::Event(event),
                proceed = sleep_unless_shutdown(interval, &mut shutdown_rx) => {
                    if proceed { Wake::Tick } else { Wake::Shutdown }
                }
            };

            match wake {
                Wake::Event(Some(event)) => shared.apply(event),
                Wake::Event(None) => {
                    debug!("Pointer events for {} ended", shared.role);
                    events = None;
                }
                Wake::Tick => shared.reconnect(),
                Wake::Shutdown => break,
            }
        }
    }

    pub fn role(&self) -> &Role {
        &self.shared.role
    }

    /// Run `op` against the current leader's channel, bounded by the call
    /// timeout. Fails fast with `NoLeaderAvailable` when no channel is live.
    pub async fn call<T, F, Fut>(&self, op: F) -> DuelResult<T>
    where
        F: FnOnce(C::Channel) -> Fut + Send,
        Fut: Future<Output = DuelResult<T>> + Send,
        T: Send,
    {
        let (channel, generation) = self.shared.checkout()?;

        let result = match tokio::time::timeout(self.config.call_timeout, op(channel)).await {
            Ok(result) => result,
            Err(_) => Err(DuelError::transport(format!(
                "call to {} leader timed out after {:?}",
                self.shared.role, self.config.call_timeout
            ))),
        };

        if let Err(e) = &result {
            self.shared.report_failure(generation, e);
        }
        result
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// The address the proxy currently follows.
    pub fn current_address(&self) -> Option<LeaderAddress> {
        self.shared.slot.lock().address.clone()
    }

    /// Poll for a live channel up to `attempts` times, `delay` apart.
    pub async fn wait_for_connection(&self, attempts: u32, delay: Duration) -> bool {
        for attempt in 0..attempts {
            if self.is_connected() {
                return true;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        self.is_connected()
    }

    /// [`wait_for_connection`](Self::wait_for_connection) with the configured defaults.
    pub async fn ready(&self) -> bool {
        self.wait_for_connection(self.config.wait_attempts, self.config.wait_delay)
            .await
    }

    pub fn get_stats(&self) -> ProxyStats {
        self.shared.slot.lock().stats.clone()
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<PointerEvent>>,
) -> Option<PointerEvent> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl<C> PersistenceApi for ReconnectingProxy<C>
where
    C: Connector,
    C::Channel: PersistenceApi,
{
    async fn load(&self, session_id: &SessionId) -> DuelResult<Option<SessionRecord>> {
        self.call(|channel| async move { channel.load(session_id).await })
            .await
    }

    async fn save(&self, record: &SessionRecord) -> DuelResult<()> {
        self.call(|channel| async move { channel.save(record).await })
            .await
    }

    async fn check_existing_session(
        &self,
        participant: &ParticipantId,
    ) -> DuelResult<Option<SessionId>> {
        self.call(|channel| async move { channel.check_existing_session(participant).await })
            .await
    }

    async fn remove_participant(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> DuelResult<()> {
        self.call(
            |channel| async move { channel.remove_participant(session_id, participant).await },
        )
        .await
    }

    async fn ping(&self) -> DuelResult<()> {
        self.call(|channel| async move { channel.ping().await }).await
    }
}

#[async_trait]
impl<C> GameApi for ReconnectingProxy<C>
where
    C: Connector,
    C::Channel: GameApi,
{
    async fn check_session(&self, participant: &ParticipantId) -> DuelResult<Option<SessionId>> {
        self.call(|channel| async move { channel.check_session(participant).await })
            .await
    }

    async fn create_or_join(
        &self,
        participant: &ParticipantId,
        room: &SessionId,
        join_only: bool,
    ) -> DuelResult<Projection> {
        self.call(|channel| async move {
            channel
                .create_or_join(participant, room, join_only)
                .await
        })
        .await
    }

    async fn commit(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        symbol: &str,
    ) -> DuelResult<Projection> {
        self.call(|channel| async move { channel.commit(session_id, participant, symbol).await })
            .await
    }

    async fn get_state(
        &self,
        session_id: &SessionId,
        viewer: &ParticipantId,
    ) -> DuelResult<Projection> {
        self.call(|channel| async move { channel.get_state(session_id, viewer).await })
            .await
    }

    async fn reset(&self, session_id: &SessionId, viewer: &ParticipantId) -> DuelResult<Projection> {
        self.call(|channel| async move { channel.reset(session_id, viewer).await })
            .await
    }

    async fn leave(&self, session_id: &SessionId, participant: &ParticipantId) -> DuelResult<()> {
        self.call(|channel| async move { channel.leave(session_id, participant).await })
            .await
    }

    async fn ping(&self) -> DuelResult<()> {
        self.call(|channel| async move { channel.ping().await }).await
    }
}
