//! # Persistence Server
//!
//! The persistence tier's request surface, served only by its elected
//! leader. Mutations of one record are serialised so each record has a
//! single writer at a time.

use crate::store::RecordStore;
use async_trait::async_trait;
use dashmap::DashMap;
use duel_core::{
    DuelResult, ParticipantId, PersistenceApi, SessionId, SessionRecord, ValidationConfig,
};
use duel_leader::LeadershipView;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct PersistenceStats {
    pub loads: u64,
    pub saves: u64,
    pub records_destroyed: u64,
    pub participants_removed: u64,
}

pub struct PersistenceServer {
    store: Arc<dyn RecordStore>,
    leadership: LeadershipView,
    validation: ValidationConfig,
    record_locks: DashMap<SessionId, Arc<Mutex<()>>>,
    stats: RwLock<PersistenceStats>,
}

impl PersistenceServer {
    pub fn new(store: Arc<dyn RecordStore>, leadership: LeadershipView) -> Self {
        Self {
            store,
            leadership,
            validation: ValidationConfig::default(),
            record_locks: DashMap::new(),
            stats: RwLock::new(PersistenceStats::default()),
        }
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn get_stats(&self) -> PersistenceStats {
        self.stats.read().clone()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    async fn lock_record(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = self
            .record_locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    fn release_lock(&self, session_id: &SessionId) {
        self.record_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Store `record`, or destroy it once both slots are empty.
    async fn write(&self, record: &SessionRecord) -> DuelResult<()> {
        if record.is_vacant() {
            if self.store.delete(&record.session_id).await? {
                self.stats.write().records_destroyed += 1;
                info!("Destroyed vacant session {}", record.session_id);
            }
            return Ok(());
        }
        self.store.put(record).await?;
        self.stats.write().saves += 1;
        Ok(())
    }
}

#[async_trait]
impl PersistenceApi for PersistenceServer {
    async fn load(&self, session_id: &SessionId) -> DuelResult<Option<SessionRecord>> {
        self.validation.check_session(session_id)?;
        self.leadership.ensure_leader()?;
        let record = self.store.get(session_id).await?;
        self.stats.write().loads += 1;
        Ok(record)
    }

    async fn save(&self, record: &SessionRecord) -> DuelResult<()> {
        self.validation.check_session(&record.session_id)?;
        for participant in [&record.first, &record.second]
            .into_iter()
            .filter_map(|slot| slot.participant.as_ref())
        {
            self.validation.check_participant(participant)?;
        }
        self.leadership.ensure_leader()?;

        let guard = self.lock_record(&record.session_id).await;
        let result = self.write(record).await;
        drop(guard);
        self.release_lock(&record.session_id);

        debug!("Saved session {}", record.session_id);
        result
    }

    async fn check_existing_session(
        &self,
        participant: &ParticipantId,
    ) -> DuelResult<Option<SessionId>> {
        self.validation.check_participant(participant)?;
        self.leadership.ensure_leader()?;
        self.store.find_by_participant(participant).await
    }

    async fn remove_participant(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> DuelResult<()> {
        self.validation.check_session(session_id)?;
        self.validation.check_participant(participant)?;
        self.leadership.ensure_leader()?;

        let guard = self.lock_record(session_id).await;
        let result = async {
            let Some(mut record) = self.store.get(session_id).await? else {
                return Ok(());
            };
            if !record.vacate(participant) {
                return Ok(());
            }
            self.write(&record).await?;
            self.stats.write().participants_removed += 1;
            debug!("Removed {} from session {}", participant, session_id);
            Ok(())
        }
        .await;
        drop(guard);
        self.release_lock(session_id);
        result
    }

    async fn ping(&self) -> DuelResult<()> {
        Ok(())
    }
}
