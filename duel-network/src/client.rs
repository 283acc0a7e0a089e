//! Typed clients for the two service surfaces, and the connectors that
//! build them for a reconnecting proxy.

use crate::channel::TcpChannel;
use crate::config::TcpRpcConfig;
use crate::protocol::{GameRequest, GameResponse, PersistenceRequest, PersistenceResponse};
use async_trait::async_trait;
use duel_core::{
    Connector, DuelError, DuelResult, GameApi, LeaderAddress, ParticipantId, PersistenceApi,
    Projection, SessionId, SessionRecord,
};

fn unexpected<T: std::fmt::Debug>(response: T) -> DuelError {
    DuelError::transport(format!("unexpected response: {:?}", response))
}

/// [`PersistenceApi`] over TCP.
#[derive(Debug, Clone)]
pub struct PersistenceClient {
    channel: TcpChannel,
}

impl PersistenceClient {
    pub fn new(channel: TcpChannel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &TcpChannel {
        &self.channel
    }

    async fn send(&self, request: PersistenceRequest) -> DuelResult<PersistenceResponse> {
        self.channel.call(&request).await
    }
}

#[async_trait]
impl PersistenceApi for PersistenceClient {
    async fn load(&self, session_id: &SessionId) -> DuelResult<Option<SessionRecord>> {
        let request = PersistenceRequest::Load {
            session_id: session_id.clone(),
        };
        match self.send(request).await? {
            PersistenceResponse::Record(record) => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    async fn save(&self, record: &SessionRecord) -> DuelResult<()> {
        let request = PersistenceRequest::Save {
            record: record.clone(),
        };
        match self.send(request).await? {
            PersistenceResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn check_existing_session(
        &self,
        participant: &ParticipantId,
    ) -> DuelResult<Option<SessionId>> {
        let request = PersistenceRequest::CheckExistingSession {
            participant: participant.clone(),
        };
        match self.send(request).await? {
            PersistenceResponse::Session(session) => Ok(session),
            other => Err(unexpected(other)),
        }
    }

    async fn remove_participant(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> DuelResult<()> {
        let request = PersistenceRequest::RemoveParticipant {
            session_id: session_id.clone(),
            participant: participant.clone(),
        };
        match self.send(request).await? {
            PersistenceResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn ping(&self) -> DuelResult<()> {
        match self.send(PersistenceRequest::Ping).await? {
            PersistenceResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

/// [`GameApi`] over TCP.
#[derive(Debug, Clone)]
pub struct GameClient {
    channel: TcpChannel,
}

impl GameClient {
    pub fn new(channel: TcpChannel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &TcpChannel {
        &self.channel
    }

    async fn send(&self, request: GameRequest) -> DuelResult<GameResponse> {
        self.channel.call(&request).await
    }

    async fn projection(&self, request: GameRequest) -> DuelResult<Projection> {
        match self.send(request).await? {
            GameResponse::Projection(projection) => Ok(projection),
            other => Err(unexpected(other)),
        }
    }

    async fn done(&self, request: GameRequest) -> DuelResult<()> {
        match self.send(request).await? {
            GameResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl GameApi for GameClient {
    async fn check_session(&self, participant: &ParticipantId) -> DuelResult<Option<SessionId>> {
        let request = GameRequest::CheckSession {
            participant: participant.clone(),
        };
        match self.send(request).await? {
            GameResponse::Session(session) => Ok(session),
            other => Err(unexpected(other)),
        }
    }

    async fn create_or_join(
        &self,
        participant: &ParticipantId,
        room: &SessionId,
        join_only: bool,
    ) -> DuelResult<Projection> {
        self.projection(GameRequest::CreateOrJoin {
            participant: participant.clone(),
            room: room.clone(),
            join_only,
        })
        .await
    }

    async fn commit(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        symbol: &str,
    ) -> DuelResult<Projection> {
        self.projection(GameRequest::Commit {
            session_id: session_id.clone(),
            participant: participant.clone(),
            symbol: symbol.to_string(),
        })
        .await
    }

    async fn get_state(
        &self,
        session_id: &SessionId,
        viewer: &ParticipantId,
    ) -> DuelResult<Projection> {
        self.projection(GameRequest::GetState {
            session_id: session_id.clone(),
            viewer: viewer.clone(),
        })
        .await
    }

    async fn reset(&self, session_id: &SessionId, viewer: &ParticipantId) -> DuelResult<Projection> {
        self.projection(GameRequest::Reset {
            session_id: session_id.clone(),
            viewer: viewer.clone(),
        })
        .await
    }

    async fn leave(&self, session_id: &SessionId, participant: &ParticipantId) -> DuelResult<()> {
        self.done(GameRequest::Leave {
            session_id: session_id.clone(),
            participant: participant.clone(),
        })
        .await
    }

    async fn ping(&self) -> DuelResult<()> {
        self.done(GameRequest::Ping).await
    }
}

/// Builds [`PersistenceClient`]s for a proxy.
#[derive(Debug, Clone, Default)]
pub struct PersistenceConnector {
    config: TcpRpcConfig,
}

impl PersistenceConnector {
    pub fn new(config: TcpRpcConfig) -> Self {
        Self { config }
    }
}

impl Connector for PersistenceConnector {
    type Channel = PersistenceClient;

    fn connect(&self, address: &LeaderAddress) -> DuelResult<PersistenceClient> {
        Ok(PersistenceClient::new(TcpChannel::new(
            address.clone(),
            self.config.clone(),
        )))
    }
}

/// Builds [`GameClient`]s for a proxy.
#[derive(Debug, Clone, Default)]
pub struct GameConnector {
    config: TcpRpcConfig,
}

impl GameConnector {
    pub fn new(config: TcpRpcConfig) -> Self {
        Self { config }
    }
}

impl Connector for GameConnector {
    type Channel = GameClient;

    fn connect(&self, address: &LeaderAddress) -> DuelResult<GameClient> {
        Ok(GameClient::new(TcpChannel::new(
            address.clone(),
            self.config.clone(),
        )))
    }
}
