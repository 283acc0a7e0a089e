#[cfg(test)]
mod unit_tests {
    use crate::{FileSystemRecordStore, InMemoryRecordStore, PersistenceServer, RecordStore};
    use duel_core::{
        DuelError, ParticipantId, PersistenceApi, Role, SessionId, SessionRecord, Symbol,
    };
    use duel_leader::{LeadershipState, LeadershipView};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(id: &str, first: &str, second: Option<&str>) -> SessionRecord {
        let mut record = SessionRecord::new(SessionId::new(id));
        record.first.participant = Some(ParticipantId::new(first));
        record.second.participant = second.map(ParticipantId::new);
        record
    }

    fn leader() -> LeadershipView {
        LeadershipView::fixed(Role::persistence(), LeadershipState::Leader { term: 1 })
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryRecordStore::new();
        let id = SessionId::new("1234");

        // Initially should return None
        assert!(store.get(&id).await.unwrap().is_none());

        let mut saved = record("1234", "alice", Some("bob"));
        store.put(&saved).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(saved.clone()));

        // Overwrite
        saved.first.choice = Some(Symbol::Rock);
        store.put(&saved).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(saved));
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_system_store_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemRecordStore::new(temp_dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        let mut saved = record("1234", "alice", Some("bob"));
        saved.first.score = 3;
        store.put(&saved).await.unwrap();
        store.put(&record("5678", "carol", None)).await.unwrap();

        // Reopen the same directory
        let reopened = FileSystemRecordStore::new(temp_dir.path()).await.unwrap();
        assert_eq!(
            reopened.get(&SessionId::new("1234")).await.unwrap(),
            Some(saved)
        );
        assert_eq!(
            reopened
                .find_by_participant(&ParticipantId::new("carol"))
                .await
                .unwrap(),
            Some(SessionId::new("5678"))
        );

        reopened.delete(&SessionId::new("5678")).await.unwrap();
        let again = FileSystemRecordStore::new(temp_dir.path()).await.unwrap();
        assert_eq!(again.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_system_store_detects_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemRecordStore::new(temp_dir.path()).await.unwrap();
        store.put(&record("1234", "alice", None)).await.unwrap();

        // Tamper with a record without fixing the checksum
        let contents = std::fs::read_to_string(store.path()).unwrap();
        std::fs::write(store.path(), contents.replace("alice", "mallory")).unwrap();

        let err = FileSystemRecordStore::new(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, DuelError::Storage { .. }));

        std::fs::write(store.path(), b"not json").unwrap();
        let err = FileSystemRecordStore::new(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, DuelError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_remove_participant_destroys_vacant_record() {
        let server = PersistenceServer::new(Arc::new(InMemoryRecordStore::new()), leader());
        let id = SessionId::new("1234");
        let (alice, bob) = (ParticipantId::new("alice"), ParticipantId::new("bob"));

        let mut saved = record("1234", "alice", Some("bob"));
        saved.first.choice = Some(Symbol::Paper);
        saved.second.score = 2;
        server.save(&saved).await.unwrap();
        assert_eq!(server.check_existing_session(&bob).await.unwrap(), Some(id.clone()));

        server.remove_participant(&id, &bob).await.unwrap();
        let remaining = server.load(&id).await.unwrap().unwrap();
        assert!(remaining.second.participant.is_none());
        assert_eq!(remaining.second.score, 0);
        assert_eq!(remaining.first.choice, None);

        // Removing again is a no-op
        server.remove_participant(&id, &bob).await.unwrap();

        server.remove_participant(&id, &alice).await.unwrap();
        assert!(server.load(&id).await.unwrap().is_none());
        assert_eq!(server.get_stats().records_destroyed, 1);
        assert_eq!(server.get_stats().participants_removed, 2);

        // Unknown sessions are ignored
        server
            .remove_participant(&SessionId::new("0000"), &alice)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_saving_vacant_record_destroys_it() {
        let server = PersistenceServer::new(Arc::new(InMemoryRecordStore::new()), leader());
        let id = SessionId::new("1234");
        server.save(&record("1234", "alice", None)).await.unwrap();

        server.save(&SessionRecord::new(id.clone())).await.unwrap();
        assert!(server.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_follower_refuses_requests() {
        let server = PersistenceServer::new(
            Arc::new(InMemoryRecordStore::new()),
            LeadershipView::fixed(Role::persistence(), LeadershipState::Candidate),
        );

        let err = server.load(&SessionId::new("1234")).await.unwrap_err();
        assert_eq!(
            err,
            DuelError::LeadershipLost {
                role: Role::persistence()
            }
        );
        assert!(server
            .save(&record("1234", "alice", None))
            .await
            .unwrap_err()
            .is_stale_leader());
    }

    #[tokio::test]
    async fn test_invalid_record_rejected() {
        let server = PersistenceServer::new(Arc::new(InMemoryRecordStore::new()), leader());
        let err = server
            .save(&record("1234", "alice|bob", None))
            .await
            .unwrap_err();
        assert!(err.reject_code().is_some());
    }
}
