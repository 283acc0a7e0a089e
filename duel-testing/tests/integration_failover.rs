//! Failover of each tier as seen by dependents and clients.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use duel_core::{DuelError, DuelResult, GameApi, ParticipantId, Role, SessionId, SessionStatus};
use duel_leader::{ConnectionState, LeadershipChange, NotificationFilter, PointerEvent};
use duel_testing::{init_test_logging, ClusterConfig, DuelCluster, Fault, NetworkConditions};

/// Granularity of the polling loops below
const SAMPLE: Duration = Duration::from_millis(10);

/// Retry `op` while it fails with a retryable error, for at most `within`.
async fn retry_within<T, F, Fut>(within: Duration, op: F) -> T
where
    F: Fn() -> Fut,
    Fut: Future<Output = DuelResult<T>>,
{
    let started = Instant::now();
    loop {
        match op().await {
            Ok(value) => return value,
            Err(e) => {
                assert!(e.is_retryable(), "unexpected error: {e:?}");
                assert!(started.elapsed() <= within, "still failing after {within:?}: {e:?}");
                sleep(SAMPLE).await;
            }
        }
    }
}

/// A crashed persistence leader with no standby: dependents see the role
/// vacant within one TTL plus one poll, and resume once a replacement leads.
#[tokio::test(start_paused = true)]
async fn test_dependents_observe_crash_and_resume() {
    init_test_logging();

    let config = ClusterConfig::fast().with_replicas(1, 1);
    let ttl = config.coordinator.session_ttl;
    let poll = config
        .watcher
        .poll_interval
        .mul_f64(1.0 + config.watcher.jitter_ratio);
    let mut cluster = DuelCluster::start(config).await.unwrap();
    let persistence = Role::persistence();
    cluster
        .wait_for_leader(&persistence, Duration::from_secs(5))
        .await
        .expect("no persistence leader");
    cluster
        .wait_for_leader(&Role::game(), Duration::from_secs(5))
        .await
        .expect("no game leader");

    let watcher = cluster.watch(persistence.clone()).unwrap();
    let client = cluster.game_client().unwrap();
    assert!(client.ready().await);

    let (room, alice) = (SessionId::new("4242"), ParticipantId::new("alice"));
    client.create_or_join(&alice, &room, false).await.unwrap();

    let crashed_at = Instant::now();
    cluster.crash(&persistence, 0);

    let bound = ttl + poll + SAMPLE;
    while watcher.last_event() != Some(PointerEvent::Vacant) {
        assert!(crashed_at.elapsed() <= bound, "vacancy not observed in time");
        sleep(SAMPLE).await;
    }
    assert_eq!(watcher.current_address(), None);

    let err = client.check_session(&alice).await.unwrap_err();
    assert_eq!(
        err,
        DuelError::NoLeaderAvailable {
            role: persistence.clone()
        }
    );
    assert_eq!(err.user_facing(), "Waiting for service...");
    // The game leader itself is healthy; the client keeps its channel
    assert!(client.is_connected());

    cluster.restart(&persistence, 0).unwrap();
    let found = retry_within(poll + SAMPLE, || client.check_session(&alice)).await;
    assert_eq!(found, Some(room));

    watcher.shutdown().await.unwrap();
    cluster.shutdown().await;
}

/// A game leader crash mid-round: the standby takes over and the round
/// completes from the persisted record.
#[tokio::test(start_paused = true)]
async fn test_game_leader_crash_fails_over_to_standby() {
    init_test_logging();

    let mut cluster = DuelCluster::start(ClusterConfig::fast()).await.unwrap();
    let game = Role::game();
    let first = cluster
        .wait_for_leader(&game, Duration::from_secs(5))
        .await
        .expect("no game leader");

    let client = cluster.game_client().unwrap();
    assert!(client.ready().await);

    let room = SessionId::new("1234");
    let (alice, bob) = (ParticipantId::new("alice"), ParticipantId::new("bob"));
    client.create_or_join(&alice, &room, false).await.unwrap();
    client.create_or_join(&bob, &room, true).await.unwrap();
    client.commit(&room, &alice, "scissors").await.unwrap();

    let mut changes = cluster
        .leadership_changes(NotificationFilter::Role(game.clone()))
        .await;
    cluster.inject(Fault::CrashLeader(game.clone())).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    let view = loop {
        match client.commit(&room, &bob, "paper").await {
            Ok(view) => break view,
            Err(e) => {
                assert!(e.is_retryable(), "unexpected error: {e:?}");
                assert!(Instant::now() < deadline, "no failover within deadline");
                sleep(Duration::from_millis(50)).await;
            }
        }
    };

    let second = cluster.leader_index(&game).expect("standby did not lead");
    assert_ne!(first, second);
    assert!(matches!(view.status, SessionStatus::RoundComplete(_)));
    assert_eq!(view.headline, "alice wins! scissors beats paper");
    assert_eq!(
        client.current_address(),
        cluster.address_of(&game, second)
    );

    let mut takeover = None;
    while let Ok(change) = changes.try_recv() {
        assert_eq!(change.role(), &game);
        if let LeadershipChange::Acquired { address, .. } = change {
            takeover = Some(address);
        }
    }
    assert_eq!(takeover, cluster.address_of(&game, second));

    cluster.shutdown().await;
}

/// While the directory is down leaders step down, clients keep the last
/// known address, and service resumes with state intact once it recovers.
#[tokio::test(start_paused = true)]
async fn test_directory_outage_and_recovery() {
    init_test_logging();

    let mut cluster = DuelCluster::start(ClusterConfig::fast()).await.unwrap();
    cluster
        .wait_for_leader(&Role::game(), Duration::from_secs(5))
        .await
        .expect("no game leader");
    let client = cluster.game_client().unwrap();
    assert!(client.ready().await);

    let (room, alice) = (SessionId::new("7777"), ParticipantId::new("alice"));
    client.create_or_join(&alice, &room, false).await.unwrap();

    cluster.inject(Fault::DirectoryOutage).await;
    sleep(Duration::from_millis(500)).await;

    assert_eq!(cluster.leader_count(&Role::game()), 0);
    assert!(client.current_address().is_some());
    assert_ne!(client.connection_state(), ConnectionState::NoLeader);
    let err = client.get_state(&room, &alice).await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err:?}");

    cluster.inject(Fault::DirectoryRecovered).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    let view = loop {
        match client.get_state(&room, &alice).await {
            Ok(view) => break view,
            Err(e) => {
                assert!(e.is_retryable(), "unexpected error: {e:?}");
                assert!(Instant::now() < deadline, "no recovery within deadline");
                sleep(Duration::from_millis(50)).await;
            }
        }
    };
    assert_eq!(view.session_id, room);
    assert_eq!(view.status, SessionStatus::AwaitingSecond);

    cluster.shutdown().await;
}

/// A partition around the game leader: calls to it hang until the client's
/// timeout, the client drops that channel, and it resumes on the standby once
/// the partitioned leader's lease has run out.
#[tokio::test(start_paused = true)]
async fn test_partitioned_game_leader_is_abandoned_for_standby() {
    init_test_logging();

    let config = ClusterConfig::fast();
    let ttl = config.coordinator.session_ttl;
    let call_timeout = config.proxy.call_timeout;
    let poll = config
        .watcher
        .poll_interval
        .mul_f64(1.0 + config.watcher.jitter_ratio);
    let mut cluster = DuelCluster::start(config).await.unwrap();
    let game = Role::game();
    let first = cluster
        .wait_for_leader(&game, Duration::from_secs(5))
        .await
        .expect("no game leader");
    let partitioned = cluster.address_of(&game, first);

    let client = cluster.game_client().unwrap();
    assert!(client.ready().await);
    let (room, alice) = (SessionId::new("3141"), ParticipantId::new("alice"));
    client.create_or_join(&alice, &room, false).await.unwrap();

    cluster
        .inject(Fault::PartitionReplica {
            role: game.clone(),
            index: first,
        })
        .await;
    let partitioned_at = Instant::now();

    let err = client.get_state(&room, &alice).await.unwrap_err();
    assert!(err.is_stale_leader(), "unexpected error: {err:?}");
    assert!(partitioned_at.elapsed() >= call_timeout);
    assert!(
        !(client.is_connected() && client.current_address() == partitioned),
        "client kept its channel to the partitioned leader"
    );
    assert!(client.get_stats().channels_dropped >= 1);

    // The lease runs out, a standby leads, and a retry that raced the
    // handover may hang for one more call timeout.
    let view = retry_within(ttl + call_timeout + poll * 2, || {
        client.get_state(&room, &alice)
    })
    .await;
    assert_eq!(view.status, SessionStatus::AwaitingSecond);

    let second = cluster.leader_index(&game).expect("standby did not lead");
    assert_ne!(first, second);
    assert_eq!(client.current_address(), cluster.address_of(&game, second));

    // Once healed the old leader rejoins as a standby
    cluster
        .inject(Fault::HealReplica {
            role: game.clone(),
            index: first,
        })
        .await;
    sleep(ttl * 2).await;
    assert_eq!(cluster.leader_count(&game), 1);
    assert_eq!(cluster.leader_index(&game), Some(second));

    cluster.shutdown().await;
}

/// Latency and dropped calls between client and game leader only cost
/// retries; each choice is recorded exactly once.
#[tokio::test(start_paused = true)]
async fn test_round_completes_over_lossy_network() {
    init_test_logging();

    let cluster = DuelCluster::start(ClusterConfig::fast()).await.unwrap();
    for role in [Role::persistence(), Role::game()] {
        cluster
            .wait_for_leader(&role, Duration::from_secs(5))
            .await
            .expect("no leader elected");
    }
    let client = cluster.game_client().unwrap();
    assert!(client.ready().await);

    cluster.game_network().set_conditions(NetworkConditions {
        latency_min: Duration::from_millis(5),
        latency_max: Duration::from_millis(50),
        failure_rate: 0.5,
    });

    let within = Duration::from_secs(10);
    let room = SessionId::new("2718");
    let (alice, bob) = (ParticipantId::new("alice"), ParticipantId::new("bob"));
    retry_within(within, || client.create_or_join(&alice, &room, false)).await;
    retry_within(within, || client.create_or_join(&bob, &room, true)).await;
    retry_within(within, || client.commit(&room, &alice, "rock")).await;
    for _ in 0..20 {
        let view = retry_within(within, || client.get_state(&room, &bob)).await;
        assert_eq!(view.status, SessionStatus::ArmedForRound);
    }
    let view = retry_within(within, || client.commit(&room, &bob, "paper")).await;

    assert_eq!(view.headline, "bob wins! paper beats rock");
    assert_eq!((view.first.score, view.second.score), (0, 1));
    let stats = cluster.game_network().get_stats();
    assert!(stats.dropped > 0);
    assert!(stats.delivered > 0);

    cluster.shutdown().await;
}
