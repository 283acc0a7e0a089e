//! Both tiers over real TCP sockets on localhost.
//!
//! Two persistence replicas share one file-backed record store, two game
//! replicas follow the persistence leader, and a client follows the game
//! leader. Midway the persistence leader is killed and the game continues.

use anyhow::{bail, ensure, Result};
use duel_arbiter::{ArbiterConfig, GameService};
use duel_core::{GameApi, LeaderAddress, ParticipantId, Role, SessionId};
use duel_directory::{Directory, InMemoryDirectory};
use duel_leader::{
    CoordinatorConfig, CoordinatorHandle, LeaderPointerWatcher, LeadershipChange,
    LeadershipCoordinator, NotificationFilter, ProxyConfig, ReconnectingProxy, WatcherConfig,
    WatcherHandle,
};
use duel_network::{
    GameConnector, GameHandler, PersistenceConnector, PersistenceHandler, RpcServer,
    RpcServerHandle, TcpRpcConfig,
};
use duel_persistence::{FileSystemRecordStore, PersistenceServer, RecordStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Replica {
    coordinator: CoordinatorHandle,
    server: RpcServerHandle,
    /// Game replicas keep their persistence watcher alive here
    watcher: Option<WatcherHandle>,
}

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_session_ttl(Duration::from_secs(2))
        .with_retry_backoff(Duration::from_millis(200))
        .with_directory_timeout(Duration::from_secs(1))
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().with_poll_interval(Duration::from_millis(200))
}

fn proxy_config() -> ProxyConfig {
    ProxyConfig::default().with_reconnect_interval(Duration::from_millis(200))
}

async fn persistence_replica(
    directory: Arc<dyn Directory>,
    store: Arc<dyn RecordStore>,
) -> Result<Replica> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = LeaderAddress::from(listener.local_addr()?);
    let coordinator = LeadershipCoordinator::new(
        Role::persistence(),
        address,
        directory,
        coordinator_config(),
    )?;
    let service = Arc::new(PersistenceServer::new(store, coordinator.view()));
    let server = RpcServer::serve(
        listener,
        TcpRpcConfig::default(),
        Arc::new(PersistenceHandler::new(service)),
    )?;
    Ok(Replica {
        coordinator: coordinator.spawn(),
        server,
        watcher: None,
    })
}

async fn game_replica(directory: Arc<dyn Directory>) -> Result<Replica> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = LeaderAddress::from(listener.local_addr()?);
    let coordinator =
        LeadershipCoordinator::new(Role::game(), address, directory.clone(), coordinator_config())?;

    let watcher =
        LeaderPointerWatcher::new(Role::persistence(), directory, watcher_config())?.spawn();
    let persistence = ReconnectingProxy::spawn(
        Role::persistence(),
        PersistenceConnector::new(TcpRpcConfig::default()),
        watcher.subscribe(),
        proxy_config(),
    )?;
    let service = Arc::new(GameService::new(
        Arc::new(persistence),
        coordinator.view(),
        ArbiterConfig::default(),
    ));
    let server = RpcServer::serve(
        listener,
        TcpRpcConfig::default(),
        Arc::new(GameHandler::new(service)),
    )?;
    Ok(Replica {
        coordinator: coordinator.spawn(),
        server,
        watcher: Some(watcher),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    let data_dir = std::env::temp_dir().join(format!("duel-demo-{}", std::process::id()));
    let store: Arc<dyn RecordStore> = Arc::new(FileSystemRecordStore::new(&data_dir).await?);
    info!("Records stored under {}", data_dir.display());

    let first = persistence_replica(directory.clone(), store.clone()).await?;
    let mut changes = first
        .coordinator
        .subscribe(NotificationFilter::Transitions)
        .await;
    let mut persistence = vec![first, persistence_replica(directory.clone(), store).await?];
    let mut game = Vec::new();
    for _ in 0..2 {
        game.push(game_replica(directory.clone()).await?);
    }

    let watcher = LeaderPointerWatcher::new(Role::game(), directory, watcher_config())?.spawn();
    let client = ReconnectingProxy::spawn(
        Role::game(),
        GameConnector::new(TcpRpcConfig::default()),
        watcher.subscribe(),
        proxy_config(),
    )?;
    if !client.ready().await {
        bail!("no game leader became reachable");
    }
    info!("Client following game leader at {:?}", client.current_address());

    let room = SessionId::new("2024");
    let (alice, bob) = (ParticipantId::new("alice"), ParticipantId::new("bob"));
    client.create_or_join(&alice, &room, false).await?;
    client.create_or_join(&bob, &room, true).await?;
    client.commit(&room, &alice, "paper").await?;

    let Some(leader) = persistence.iter().position(|r| r.coordinator.is_leader()) else {
        bail!("no persistence leader");
    };
    info!("Killing persistence replica {}", leader);
    let crashed = persistence.remove(leader);
    crashed.coordinator.abort();
    crashed.server.shutdown().await;

    let view = loop {
        match client.commit(&room, &bob, "rock").await {
            Ok(view) => break view,
            Err(e) if e.is_retryable() => {
                info!("{}", e.user_facing());
                sleep(Duration::from_millis(250)).await;
            }
            Err(e) => return Err(e.into()),
        }
    };
    info!("{}", view.headline);
    ensure!(view.first.score == 1, "alice's win was not recorded");

    while let Ok(change) = changes.try_recv() {
        if let LeadershipChange::Acquired { address, term, .. } = change {
            info!("First persistence replica led at {} (term {})", address, term);
        }
    }

    client.leave(&room, &alice).await?;
    client.leave(&room, &bob).await?;
    watcher.shutdown().await?;
    for replica in game.into_iter().chain(persistence) {
        replica.coordinator.shutdown().await?;
        replica.server.shutdown().await;
        if let Some(watcher) = replica.watcher {
            watcher.shutdown().await?;
        }
    }
    Ok(())
}
