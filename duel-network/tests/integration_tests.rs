//! Integration tests for the TCP transport with real connections.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};
use tracing::info;
use tracing_subscriber::fmt::try_init;

use duel_arbiter::{ArbiterConfig, GameService};
use duel_core::{
    DuelError, GameApi, LeaderAddress, ParticipantId, PersistenceApi, RejectCode, Role,
    SessionId, SessionStatus,
};
use duel_directory::{Directory, InMemoryDirectory};
use duel_leader::{
    CoordinatorConfig, CoordinatorHandle, LeaderPointerWatcher, LeadershipCoordinator,
    LeadershipState, LeadershipView, ProxyConfig, ReconnectingProxy, WatcherConfig,
};
use duel_network::{
    GameClient, GameHandler, PersistenceClient, PersistenceConnector, PersistenceHandler,
    RpcServer, RpcServerHandle, TcpChannel, TcpRpcConfig,
};
use duel_persistence::{InMemoryRecordStore, PersistenceServer, RecordStore};

fn rpc_config() -> TcpRpcConfig {
    TcpRpcConfig::default()
        .with_call_timeout(Duration::from_secs(2))
        .with_connect_timeout(Duration::from_millis(500))
}

fn fixed_leader(role: Role) -> LeadershipView {
    LeadershipView::fixed(role, LeadershipState::Leader { term: 1 })
}

async fn persistence_server(store: Arc<dyn RecordStore>) -> RpcServerHandle {
    let server = Arc::new(PersistenceServer::new(
        store,
        fixed_leader(Role::persistence()),
    ));
    RpcServer::bind(rpc_config(), Arc::new(PersistenceHandler::new(server)))
        .await
        .unwrap()
}

/// Game and persistence tiers talking over TCP, no failover.
#[tokio::test]
async fn test_game_round_trip_over_tcp() {
    let _ = try_init();

    let persistence = persistence_server(Arc::new(InMemoryRecordStore::new())).await;
    let persistence_client =
        PersistenceClient::new(TcpChannel::new(persistence.address(), rpc_config()));
    persistence_client.ping().await.unwrap();

    let game = Arc::new(GameService::new(
        Arc::new(persistence_client),
        fixed_leader(Role::game()),
        ArbiterConfig::default(),
    ));
    let game_server = RpcServer::bind(rpc_config(), Arc::new(GameHandler::new(game)))
        .await
        .unwrap();
    let client = GameClient::new(TcpChannel::new(game_server.address(), rpc_config()));
    client.ping().await.unwrap();

    let room = SessionId::new("1234");
    let (alice, bob) = (ParticipantId::new("alice"), ParticipantId::new("bob"));

    client.create_or_join(&alice, &room, false).await.unwrap();
    client.create_or_join(&bob, &room, true).await.unwrap();
    assert_eq!(client.check_session(&bob).await.unwrap(), Some(room.clone()));

    client.commit(&room, &alice, "paper").await.unwrap();
    let view = client.commit(&room, &bob, "rock").await.unwrap();
    assert!(matches!(view.status, SessionStatus::RoundComplete(_)));
    assert_eq!(view.headline, "alice wins! paper beats rock");

    let view = client.reset(&room, &bob).await.unwrap();
    assert_eq!(view.status, SessionStatus::ArmedForRound);
    assert_eq!(view.first.score, 1);

    client.leave(&room, &alice).await.unwrap();
    client.leave(&room, &bob).await.unwrap();
    assert_eq!(client.check_session(&bob).await.unwrap(), None);

    game_server.shutdown().await;
    persistence.shutdown().await;
}

/// Business rejections cross the wire as the same error variant.
#[tokio::test]
async fn test_rejections_cross_the_wire() {
    let _ = try_init();

    let persistence = persistence_server(Arc::new(InMemoryRecordStore::new())).await;
    let game = Arc::new(GameService::new(
        Arc::new(PersistenceClient::new(TcpChannel::new(
            persistence.address(),
            rpc_config(),
        ))),
        fixed_leader(Role::game()),
        ArbiterConfig::default(),
    ));
    let game_server = RpcServer::bind(rpc_config(), Arc::new(GameHandler::new(game)))
        .await
        .unwrap();
    let client = GameClient::new(TcpChannel::new(game_server.address(), rpc_config()));

    let err = client
        .create_or_join(&ParticipantId::new("carol"), &SessionId::new("9999"), true)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DuelError::InvalidOperation {
            code: RejectCode::RoomNotFound
        }
    );

    // A rejection leaves the connection usable
    assert!(client.channel().is_open().await);
    client.ping().await.unwrap();

    game_server.shutdown().await;
    persistence.shutdown().await;
}

/// A dead server surfaces as a transport failure and the connection is dropped.
#[tokio::test]
async fn test_channel_drops_connection_on_failure() {
    let _ = try_init();

    let server = persistence_server(Arc::new(InMemoryRecordStore::new())).await;
    let client = PersistenceClient::new(TcpChannel::new(server.address(), rpc_config()));
    client.ping().await.unwrap();
    assert!(client.channel().is_open().await);

    server.shutdown().await;
    // Let the connection task observe the shutdown and close its socket
    sleep(Duration::from_millis(50)).await;

    let err = client.ping().await.unwrap_err();
    assert!(err.is_stale_leader(), "unexpected error: {err:?}");
    assert!(!client.channel().is_open().await);

    // Nothing listens there any more; redialing fails the same way
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, DuelError::TransportFailure { .. }));
}

/// A channel is built without I/O; the first call dials.
#[tokio::test]
async fn test_channel_dials_lazily() {
    let _ = try_init();

    let channel = TcpChannel::new(LeaderAddress::new("tcp://127.0.0.1:1"), rpc_config());
    assert!(!channel.is_open().await);

    let err = PersistenceClient::new(channel).ping().await.unwrap_err();
    assert!(matches!(err, DuelError::TransportFailure { .. }));
}

struct PersistenceReplica {
    coordinator: CoordinatorHandle,
    server: RpcServerHandle,
}

async fn persistence_replica(
    directory: Arc<dyn Directory>,
    store: Arc<dyn RecordStore>,
    config: CoordinatorConfig,
) -> PersistenceReplica {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = LeaderAddress::from(listener.local_addr().unwrap());

    let coordinator =
        LeadershipCoordinator::new(Role::persistence(), address, directory, config).unwrap();
    let server = Arc::new(PersistenceServer::new(store, coordinator.view()));
    let server = RpcServer::serve(
        listener,
        rpc_config(),
        Arc::new(PersistenceHandler::new(server)),
    )
    .unwrap();

    PersistenceReplica {
        coordinator: coordinator.spawn(),
        server,
    }
}

/// A full game played through the game tier while the persistence leader
/// crashes mid-round and a standby takes over.
#[tokio::test]
async fn test_game_survives_persistence_failover() {
    let _ = try_init();

    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    // Replicas share the record store, as they would share a database.
    let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
    let coordinator_config = CoordinatorConfig::default()
        .with_session_ttl(Duration::from_millis(600))
        .with_retry_backoff(Duration::from_millis(50))
        .with_directory_timeout(Duration::from_millis(300));

    let first = persistence_replica(
        directory.clone(),
        store.clone(),
        coordinator_config.clone(),
    )
    .await;
    let mut first_view = first.coordinator.view();
    assert!(first_view.wait_for_leadership().await);

    let second = persistence_replica(directory.clone(), store.clone(), coordinator_config).await;

    let watcher = LeaderPointerWatcher::new(
        Role::persistence(),
        directory.clone(),
        WatcherConfig::default().with_poll_interval(Duration::from_millis(50)),
    )
    .unwrap()
    .spawn();
    let proxy = ReconnectingProxy::spawn(
        Role::persistence(),
        PersistenceConnector::new(rpc_config()),
        watcher.subscribe(),
        ProxyConfig::default()
            .with_reconnect_interval(Duration::from_millis(50))
            .with_wait(20, Duration::from_millis(50)),
    )
    .unwrap();
    assert!(proxy.ready().await);
    assert_eq!(proxy.current_address(), Some(first.server.address()));

    let game = GameService::new(
        Arc::new(proxy),
        fixed_leader(Role::game()),
        ArbiterConfig::default(),
    );

    let room = SessionId::new("1234");
    let (alice, bob) = (ParticipantId::new("alice"), ParticipantId::new("bob"));
    game.create_or_join(&alice, &room, false).await.unwrap();
    game.create_or_join(&bob, &room, false).await.unwrap();
    game.commit(&room, &alice, "rock").await.unwrap();

    info!("Crashing persistence leader");
    first.coordinator.abort();
    first.server.shutdown().await;

    // Until the standby acquires, calls fail with a retryable error.
    let deadline = Instant::now() + Duration::from_secs(10);
    let view = loop {
        match game.commit(&room, &bob, "scissors").await {
            Ok(view) => break view,
            Err(e) => {
                assert!(e.is_retryable(), "unexpected error: {e:?}");
                assert!(Instant::now() < deadline, "no failover within deadline");
                sleep(Duration::from_millis(50)).await;
            }
        }
    };

    assert!(second.coordinator.is_leader());
    assert!(matches!(view.status, SessionStatus::RoundComplete(_)));
    assert_eq!(view.headline, "alice wins! rock beats scissors");
    assert_eq!(view.first.score, 1);

    second.coordinator.shutdown().await.unwrap();
    second.server.shutdown().await;
    watcher.shutdown().await.unwrap();
}
