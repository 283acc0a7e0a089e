//! Request and response messages for the two service surfaces, and the
//! adapters that dispatch them onto a local service implementation.

use async_trait::async_trait;
use duel_core::{
    DuelResult, GameApi, ParticipantId, PersistenceApi, Projection, SessionId, SessionRecord,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersistenceRequest {
    Load {
        session_id: SessionId,
    },
    Save {
        record: SessionRecord,
    },
    CheckExistingSession {
        participant: ParticipantId,
    },
    RemoveParticipant {
        session_id: SessionId,
        participant: ParticipantId,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersistenceResponse {
    Record(Option<SessionRecord>),
    Session(Option<SessionId>),
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameRequest {
    CheckSession {
        participant: ParticipantId,
    },
    CreateOrJoin {
        participant: ParticipantId,
        room: SessionId,
        join_only: bool,
    },
    Commit {
        session_id: SessionId,
        participant: ParticipantId,
        symbol: String,
    },
    GetState {
        session_id: SessionId,
        viewer: ParticipantId,
    },
    Reset {
        session_id: SessionId,
        viewer: ParticipantId,
    },
    Leave {
        session_id: SessionId,
        participant: ParticipantId,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameResponse {
    Session(Option<SessionId>),
    Projection(Projection),
    Done,
}

/// A request/response surface the RPC server can expose.
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn handle(&self, request: Self::Request) -> DuelResult<Self::Response>;
}

/// Serves a [`PersistenceApi`] implementation.
pub struct PersistenceHandler {
    inner: Arc<dyn PersistenceApi>,
}

impl PersistenceHandler {
    pub fn new(inner: Arc<dyn PersistenceApi>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RpcService for PersistenceHandler {
    type Request = PersistenceRequest;
    type Response = PersistenceResponse;

    async fn handle(&self, request: PersistenceRequest) -> DuelResult<PersistenceResponse> {
        match request {
            PersistenceRequest::Load { session_id } => self
                .inner
                .load(&session_id)
                .await
                .map(PersistenceResponse::Record),
            PersistenceRequest::Save { record } => {
                self.inner.save(&record).await?;
                Ok(PersistenceResponse::Done)
            }
            PersistenceRequest::CheckExistingSession { participant } => self
                .inner
                .check_existing_session(&participant)
                .await
                .map(PersistenceResponse::Session),
            PersistenceRequest::RemoveParticipant {
                session_id,
                participant,
            } => {
                self.inner
                    .remove_participant(&session_id, &participant)
                    .await?;
                Ok(PersistenceResponse::Done)
            }
            PersistenceRequest::Ping => {
                self.inner.ping().await?;
                Ok(PersistenceResponse::Done)
            }
        }
    }
}

/// Serves a [`GameApi`] implementation.
pub struct GameHandler {
    inner: Arc<dyn GameApi>,
}

impl GameHandler {
    pub fn new(inner: Arc<dyn GameApi>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RpcService for GameHandler {
    type Request = GameRequest;
    type Response = GameResponse;

    async fn handle(&self, request: GameRequest) -> DuelResult<GameResponse> {
        match request {
            GameRequest::CheckSession { participant } => self
                .inner
                .check_session(&participant)
                .await
                .map(GameResponse::Session),
            GameRequest::CreateOrJoin {
                participant,
                room,
                join_only,
            } => self
                .inner
                .create_or_join(&participant, &room, join_only)
                .await
                .map(GameResponse::Projection),
            GameRequest::Commit {
                session_id,
                participant,
                symbol,
            } => self
                .inner
                .commit(&session_id, &participant, &symbol)
                .await
                .map(GameResponse::Projection),
            GameRequest::GetState { session_id, viewer } => self
                .inner
                .get_state(&session_id, &viewer)
                .await
                .map(GameResponse::Projection),
            GameRequest::Reset { session_id, viewer } => self
                .inner
                .reset(&session_id, &viewer)
                .await
                .map(GameResponse::Projection),
            GameRequest::Leave {
                session_id,
                participant,
            } => {
                self.inner.leave(&session_id, &participant).await?;
                Ok(GameResponse::Done)
            }
            GameRequest::Ping => {
                self.inner.ping().await?;
                Ok(GameResponse::Done)
            }
        }
    }
}
