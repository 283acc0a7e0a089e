use crate::store::RecordStore;
use async_trait::async_trait;
use duel_core::{DuelResult, ParticipantId, SessionId, SessionRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Record store kept in memory.
///
/// Suitable for tests and for deployments where sessions need not survive a
/// restart of the persistence leader. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, session_id: &SessionId) -> DuelResult<Option<SessionRecord>> {
        Ok(self.records.read().get(session_id).cloned())
    }

    async fn put(&self, record: &SessionRecord) -> DuelResult<()> {
        self.records
            .write()
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> DuelResult<bool> {
        Ok(self.records.write().remove(session_id).is_some())
    }

    async fn find_by_participant(
        &self,
        participant: &ParticipantId,
    ) -> DuelResult<Option<SessionId>> {
        let records = self.records.read();
        Ok(records
            .values()
            .filter(|record| record.has_participant(participant))
            .map(|record| record.session_id.clone())
            .min())
    }

    async fn count(&self) -> DuelResult<usize> {
        Ok(self.records.read().len())
    }
}
