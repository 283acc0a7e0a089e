//! # Service Surfaces
//!
//! The two request/response surfaces the tiers expose. Leaders implement them
//! directly; transports and proxies implement them by forwarding.

use crate::{DuelResult, ParticipantId, Projection, SessionId, SessionRecord};
use async_trait::async_trait;

/// Persistence-tier surface, consumed by the game-logic tier.
#[async_trait]
pub trait PersistenceApi: Send + Sync {
    /// Load a session record, `None` when it does not exist.
    async fn load(&self, session_id: &SessionId) -> DuelResult<Option<SessionRecord>>;

    /// Insert or replace a session record.
    async fn save(&self, record: &SessionRecord) -> DuelResult<()>;

    /// Find the session a participant currently belongs to.
    async fn check_existing_session(
        &self,
        participant: &ParticipantId,
    ) -> DuelResult<Option<SessionId>>;

    /// Remove a participant; the record is destroyed once both slots are empty.
    async fn remove_participant(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> DuelResult<()>;

    /// Liveness probe for failure detectors.
    async fn ping(&self) -> DuelResult<()>;
}

/// Game-tier surface, consumed by the presentation layer.
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Find the session a participant currently belongs to.
    async fn check_session(&self, participant: &ParticipantId) -> DuelResult<Option<SessionId>>;

    /// Create the room or join it. With `join_only` a missing room is
    /// `ROOM_NOT_FOUND` instead of being created.
    async fn create_or_join(
        &self,
        participant: &ParticipantId,
        room: &SessionId,
        join_only: bool,
    ) -> DuelResult<Projection>;

    /// Commit a symbol for the current round.
    async fn commit(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        symbol: &str,
    ) -> DuelResult<Projection>;

    async fn get_state(
        &self,
        session_id: &SessionId,
        viewer: &ParticipantId,
    ) -> DuelResult<Projection>;

    /// Start the next round, keeping scores.
    async fn reset(&self, session_id: &SessionId, viewer: &ParticipantId)
        -> DuelResult<Projection>;

    async fn leave(&self, session_id: &SessionId, participant: &ParticipantId) -> DuelResult<()>;

    /// Liveness probe for failure detectors.
    async fn ping(&self) -> DuelResult<()>;
}
