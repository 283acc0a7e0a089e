//! # Game Service
//!
//! The game tier's request surface. A leader-only [`GameApi`] implementation
//! that re-reads the session record from the persistence tier on every
//! call, applies the [`SessionArbiter`] rules and writes the result back.

use crate::arbiter::{JoinOutcome, SessionArbiter};
use crate::config::ArbiterConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use duel_core::{
    DuelError, DuelResult, GameApi, ParticipantId, PersistenceApi, Projection, RejectCode, Role,
    SessionId, SessionRecord,
};
use duel_leader::LeadershipView;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct GameStats {
    pub sessions_created: u64,
    pub joins: u64,
    pub commits: u64,
    pub rounds_resolved: u64,
    pub resets: u64,
    pub leaves: u64,
    pub rejections: u64,
}

/// Game-tier leader surface.
///
/// Read-modify-write cycles are serialised per session id, so two commits
/// racing on one session never overwrite each other's choice.
pub struct GameService {
    persistence: Arc<dyn PersistenceApi>,
    leadership: LeadershipView,
    arbiter: SessionArbiter,
    config: ArbiterConfig,
    session_locks: DashMap<SessionId, Arc<Mutex<()>>>,
    stats: RwLock<GameStats>,
}

impl GameService {
    pub fn new(
        persistence: Arc<dyn PersistenceApi>,
        leadership: LeadershipView,
        config: ArbiterConfig,
    ) -> Self {
        Self {
            persistence,
            leadership,
            arbiter: SessionArbiter::new(),
            config,
            session_locks: DashMap::new(),
            stats: RwLock::new(GameStats::default()),
        }
    }

    pub fn get_stats(&self) -> GameStats {
        self.stats.read().clone()
    }

    async fn lock_session(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = self
            .session_locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    fn prune_locks(&self) {
        if self.session_locks.len() > self.config.idle_lock_limit {
            self.session_locks
                .retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }

    async fn load_existing(&self, session_id: &SessionId) -> DuelResult<SessionRecord> {
        self.persistence
            .load(session_id)
            .await?
            .ok_or(DuelError::rejected(RejectCode::SessionNotFound))
    }

    async fn save(&self, record: &SessionRecord) -> DuelResult<()> {
        // Leadership may have moved while the record was loaded.
        self.leadership.ensure_leader()?;
        self.persistence.save(record).await
    }

    fn track<T>(&self, result: DuelResult<T>) -> DuelResult<T> {
        result.map_err(|err| {
            if err.reject_code().is_some() {
                self.stats.write().rejections += 1;
                return err;
            }
            warn!("Game operation failed: {}", err);
            self.downstream_failure(err)
        })
    }

    /// Failures of the persistence leader surface as that tier having no
    /// leader, so callers keep their channel to this replica.
    fn downstream_failure(&self, err: DuelError) -> DuelError {
        match err {
            DuelError::TransportFailure { .. } => DuelError::NoLeaderAvailable {
                role: Role::persistence(),
            },
            DuelError::LeadershipLost { role } if role != *self.leadership.role() => {
                DuelError::NoLeaderAvailable { role }
            }
            other => other,
        }
    }

    async fn join_inner(
        &self,
        participant: &ParticipantId,
        room: &SessionId,
        join_only: bool,
    ) -> DuelResult<Projection> {
        let _guard = self.lock_session(room).await;

        let (mut record, created) = match self.persistence.load(room).await? {
            Some(record) => (record, false),
            None if join_only => return Err(DuelError::rejected(RejectCode::RoomNotFound)),
            None => (SessionRecord::new(room.clone()), true),
        };

        let outcome = self.arbiter.join(&mut record, participant)?;
        if created || outcome.changed() {
            self.save(&record).await?;
        }

        let mut stats = self.stats.write();
        if created {
            stats.sessions_created += 1;
            info!("Created session {} for {}", room, participant);
        }
        if let JoinOutcome::Joined(index) = outcome {
            stats.joins += 1;
            debug!("{} joined {} as {:?}", participant, room, index);
        }
        drop(stats);

        Ok(self.arbiter.projection(&record, participant))
    }

    async fn commit_inner(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        symbol: &str,
    ) -> DuelResult<Projection> {
        let _guard = self.lock_session(session_id).await;

        let mut record = self.load_existing(session_id).await?;
        let outcome = self.arbiter.commit_choice(&mut record, participant, symbol)?;
        self.save(&record).await?;

        let mut stats = self.stats.write();
        stats.commits += 1;
        if outcome.is_some() {
            stats.rounds_resolved += 1;
        }
        drop(stats);

        Ok(self.arbiter.projection(&record, participant))
    }

    async fn reset_inner(
        &self,
        session_id: &SessionId,
        viewer: &ParticipantId,
    ) -> DuelResult<Projection> {
        let _guard = self.lock_session(session_id).await;

        let mut record = self.load_existing(session_id).await?;
        if !record.has_participant(viewer) {
            return Err(DuelError::rejected(RejectCode::NotInRoom));
        }
        if self.arbiter.reset(&mut record) {
            self.save(&record).await?;
            self.stats.write().resets += 1;
            debug!("Session {} reset by {}", session_id, viewer);
        }

        Ok(self.arbiter.projection(&record, viewer))
    }

    async fn leave_inner(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> DuelResult<()> {
        let _guard = self.lock_session(session_id).await;

        let Some(record) = self.persistence.load(session_id).await? else {
            return Ok(());
        };
        if !record.has_participant(participant) {
            return Ok(());
        }

        self.leadership.ensure_leader()?;
        self.persistence
            .remove_participant(session_id, participant)
            .await?;
        self.stats.write().leaves += 1;
        info!("{} left session {}", participant, session_id);
        Ok(())
    }

    fn check_ids(&self, session_id: &SessionId, participant: &ParticipantId) -> DuelResult<()> {
        self.config.validation.check_session(session_id)?;
        self.config.validation.check_participant(participant)
    }
}

#[async_trait]
impl GameApi for GameService {
    async fn check_session(&self, participant: &ParticipantId) -> DuelResult<Option<SessionId>> {
        self.config.validation.check_participant(participant)?;
        self.leadership.ensure_leader()?;
        self.track(self.persistence.check_existing_session(participant).await)
    }

    async fn create_or_join(
        &self,
        participant: &ParticipantId,
        room: &SessionId,
        join_only: bool,
    ) -> DuelResult<Projection> {
        self.check_ids(room, participant)?;
        self.leadership.ensure_leader()?;
        let result = self.join_inner(participant, room, join_only).await;
        self.prune_locks();
        self.track(result)
    }

    async fn commit(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        symbol: &str,
    ) -> DuelResult<Projection> {
        self.check_ids(session_id, participant)?;
        self.leadership.ensure_leader()?;
        let result = self.commit_inner(session_id, participant, symbol).await;
        self.prune_locks();
        self.track(result)
    }

    async fn get_state(
        &self,
        session_id: &SessionId,
        viewer: &ParticipantId,
    ) -> DuelResult<Projection> {
        self.check_ids(session_id, viewer)?;
        self.leadership.ensure_leader()?;
        let record = self.track(self.load_existing(session_id).await)?;
        Ok(self.arbiter.projection(&record, viewer))
    }

    async fn reset(&self, session_id: &SessionId, viewer: &ParticipantId) -> DuelResult<Projection> {
        self.check_ids(session_id, viewer)?;
        self.leadership.ensure_leader()?;
        let result = self.reset_inner(session_id, viewer).await;
        self.prune_locks();
        self.track(result)
    }

    async fn leave(&self, session_id: &SessionId, participant: &ParticipantId) -> DuelResult<()> {
        self.check_ids(session_id, participant)?;
        self.leadership.ensure_leader()?;
        let result = self.leave_inner(session_id, participant).await;
        self.prune_locks();
        self.track(result)
    }

    async fn ping(&self) -> DuelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_core::{ChoiceView, Perspective, SessionStatus, Symbol};
    use duel_leader::LeadershipState;
    use duel_persistence::{InMemoryRecordStore, PersistenceServer};

    fn leader_view(role: Role) -> LeadershipView {
        LeadershipView::fixed(role, LeadershipState::Leader { term: 1 })
    }

    fn service() -> (GameService, Arc<PersistenceServer>) {
        let persistence = Arc::new(PersistenceServer::new(
            Arc::new(InMemoryRecordStore::new()),
            leader_view(Role::persistence()),
        ));
        let game = GameService::new(
            persistence.clone(),
            leader_view(Role::game()),
            ArbiterConfig::default(),
        );
        (game, persistence)
    }

    fn ids() -> (SessionId, ParticipantId, ParticipantId) {
        (
            SessionId::new("1234"),
            ParticipantId::new("alice"),
            ParticipantId::new("bob"),
        )
    }

    #[tokio::test]
    async fn test_alice_and_bob_play_a_round() {
        let (game, _) = service();
        let (room, alice, bob) = ids();

        let view = game.create_or_join(&alice, &room, false).await.unwrap();
        assert_eq!(view.status, SessionStatus::AwaitingSecond);
        assert_eq!(view.perspective, Perspective::YourMove);

        let view = game.create_or_join(&bob, &room, true).await.unwrap();
        assert_eq!(view.status, SessionStatus::ArmedForRound);

        game.commit(&room, &alice, "rock").await.unwrap();
        let view = game.get_state(&room, &bob).await.unwrap();
        assert_eq!(view.first.choice, ChoiceView::Committed);

        let view = game.commit(&room, &bob, "scissors").await.unwrap();
        assert!(matches!(view.status, SessionStatus::RoundComplete(_)));
        assert_eq!(view.first.score, 1);
        assert_eq!(view.headline, "alice wins! rock beats scissors");

        let view = game.reset(&room, &alice).await.unwrap();
        assert_eq!(view.status, SessionStatus::ArmedForRound);
        assert_eq!(view.first.score, 1);
        assert_eq!(view.second.score, 0);
        assert!(view.visible_symbols().is_empty());

        let stats = game.get_stats();
        assert_eq!(stats.sessions_created, 1);
        assert_eq!(stats.rounds_resolved, 1);
    }

    #[tokio::test]
    async fn test_join_only_never_creates() {
        let (game, persistence) = service();
        let room = SessionId::new("9999");
        let carol = ParticipantId::new("carol");

        let err = game.create_or_join(&carol, &room, true).await.unwrap_err();
        assert_eq!(err.reject_code(), Some(RejectCode::RoomNotFound));
        assert!(persistence.load(&room).await.unwrap().is_none());
        assert_eq!(game.check_session(&carol).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_commit_leaves_state_unchanged() {
        let (game, persistence) = service();
        let (room, alice, bob) = ids();
        game.create_or_join(&alice, &room, false).await.unwrap();
        game.create_or_join(&bob, &room, false).await.unwrap();
        game.commit(&room, &alice, "paper").await.unwrap();
        let before = persistence.load(&room).await.unwrap();

        let err = game.commit(&room, &alice, "rock").await.unwrap_err();
        assert_eq!(err.reject_code(), Some(RejectCode::AlreadyChosen));
        assert_eq!(persistence.load(&room).await.unwrap(), before);
        assert_eq!(game.get_stats().rejections, 1);
    }

    #[tokio::test]
    async fn test_third_participant_is_rejected() {
        let (game, _) = service();
        let (room, alice, bob) = ids();
        game.create_or_join(&alice, &room, false).await.unwrap();
        game.create_or_join(&bob, &room, false).await.unwrap();

        let err = game
            .create_or_join(&ParticipantId::new("carol"), &room, false)
            .await
            .unwrap_err();
        assert_eq!(err.reject_code(), Some(RejectCode::RoomFull));
    }

    #[tokio::test]
    async fn test_leave_destroys_vacant_session() {
        let (game, persistence) = service();
        let (room, alice, bob) = ids();
        game.create_or_join(&alice, &room, false).await.unwrap();
        game.create_or_join(&bob, &room, false).await.unwrap();

        game.leave(&room, &alice).await.unwrap();
        game.leave(&room, &alice).await.unwrap();
        assert_eq!(game.check_session(&alice).await.unwrap(), None);
        assert_eq!(game.check_session(&bob).await.unwrap(), Some(room.clone()));

        game.leave(&room, &bob).await.unwrap();
        assert!(persistence.load(&room).await.unwrap().is_none());
        let err = game.get_state(&room, &bob).await.unwrap_err();
        assert_eq!(err.reject_code(), Some(RejectCode::SessionNotFound));
    }

    #[tokio::test]
    async fn test_reset_requires_membership() {
        let (game, _) = service();
        let (room, alice, _) = ids();
        game.create_or_join(&alice, &room, false).await.unwrap();

        let err = game
            .reset(&room, &ParticipantId::new("mallory"))
            .await
            .unwrap_err();
        assert_eq!(err.reject_code(), Some(RejectCode::NotInRoom));
    }

    #[tokio::test]
    async fn test_follower_refuses_requests() {
        let persistence = Arc::new(PersistenceServer::new(
            Arc::new(InMemoryRecordStore::new()),
            leader_view(Role::persistence()),
        ));
        let game = GameService::new(
            persistence,
            LeadershipView::fixed(Role::game(), LeadershipState::Candidate),
            ArbiterConfig::default(),
        );
        let (room, alice, _) = ids();

        let err = game.create_or_join(&alice, &room, false).await.unwrap_err();
        assert!(matches!(err, DuelError::LeadershipLost { .. }));
        assert!(err.is_stale_leader());
    }

    #[tokio::test]
    async fn test_deposed_persistence_leader_is_not_stale_game_leader() {
        let persistence = Arc::new(PersistenceServer::new(
            Arc::new(InMemoryRecordStore::new()),
            LeadershipView::fixed(Role::persistence(), LeadershipState::Candidate),
        ));
        let game = GameService::new(
            persistence,
            leader_view(Role::game()),
            ArbiterConfig::default(),
        );
        let (room, alice, _) = ids();

        let err = game.create_or_join(&alice, &room, false).await.unwrap_err();
        assert_eq!(
            err,
            DuelError::NoLeaderAvailable {
                role: Role::persistence()
            }
        );
        assert!(err.is_retryable());
        assert!(!err.is_stale_leader());

        let err = game.check_session(&alice).await.unwrap_err();
        assert!(matches!(err, DuelError::NoLeaderAvailable { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_commits_both_land() {
        let (game, _) = service();
        let game = Arc::new(game);
        let (room, alice, bob) = ids();
        game.create_or_join(&alice, &room, false).await.unwrap();
        game.create_or_join(&bob, &room, false).await.unwrap();

        let first = {
            let (game, room, alice) = (game.clone(), room.clone(), alice.clone());
            tokio::spawn(async move { game.commit(&room, &alice, "rock").await })
        };
        let second = {
            let (game, room, bob) = (game.clone(), room.clone(), bob.clone());
            tokio::spawn(async move { game.commit(&room, &bob, "rock").await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let view = game.get_state(&room, &alice).await.unwrap();
        assert_eq!(view.visible_symbols(), vec![Symbol::Rock, Symbol::Rock]);
        assert_eq!(view.headline, "Draw! Both chose rock");
    }

    #[tokio::test]
    async fn test_invalid_identifiers_rejected() {
        let (game, _) = service();
        let err = game
            .create_or_join(&ParticipantId::new("a|b"), &SessionId::new("1"), false)
            .await
            .unwrap_err();
        assert_eq!(err.reject_code(), Some(RejectCode::InvalidId));
    }
}
