use async_trait::async_trait;
use duel_core::{DuelResult, ParticipantId, SessionId, SessionRecord};

/// Durable home of session records.
///
/// Implementations only store and retrieve; turn rules and leadership are
/// enforced by the caller.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, session_id: &SessionId) -> DuelResult<Option<SessionRecord>>;

    /// Insert or replace the record under its session id.
    async fn put(&self, record: &SessionRecord) -> DuelResult<()>;

    /// Remove a record. Returns false when there was nothing to remove.
    async fn delete(&self, session_id: &SessionId) -> DuelResult<bool>;

    /// The session holding `participant` in either slot.
    async fn find_by_participant(
        &self,
        participant: &ParticipantId,
    ) -> DuelResult<Option<SessionId>>;

    async fn count(&self) -> DuelResult<usize>;
}
