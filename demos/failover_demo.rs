//! Walkthrough of both tiers failing over while a game is in progress.
//!
//! Runs an in-process cluster (two persistence replicas, two game replicas)
//! and crashes each tier's leader in turn. Set `RUST_LOG=debug` to watch the
//! coordinators, watchers and proxies at work.

use anyhow::{bail, Context, Result};
use duel_core::{DuelResult, GameApi, ParticipantId, Projection, Role, SessionId};
use duel_testing::{ClusterConfig, DuelCluster, Fault, GameProxy};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cluster = DuelCluster::start(ClusterConfig::fast()).await?;
    for role in [Role::persistence(), Role::game()] {
        let Some(index) = cluster.wait_for_leader(&role, Duration::from_secs(5)).await else {
            bail!("no leader elected for {}", role);
        };
        info!("{} leader is replica {}", role, index);
    }

    let client = cluster.game_client()?;
    if !client.ready().await {
        bail!("client never connected to the game leader");
    }

    let room = SessionId::new("1234");
    let (alice, bob) = (ParticipantId::new("alice"), ParticipantId::new("bob"));

    client.create_or_join(&alice, &room, false).await?;
    client.create_or_join(&bob, &room, true).await?;
    client.commit(&room, &alice, "rock").await?;
    info!("alice committed; crashing the persistence leader");
    cluster.inject(Fault::CrashLeader(Role::persistence())).await;

    let view = with_retries(&client, || client.commit(&room, &bob, "scissors")).await?;
    info!("Round finished after persistence failover: {}", view.headline);

    let view = client.reset(&room, &bob).await?;
    info!(
        "Scores carried into the next round: alice {} / bob {}",
        view.first.score, view.second.score
    );

    info!("Crashing the game leader");
    cluster.inject(Fault::CrashLeader(Role::game())).await;
    let view = with_retries(&client, || client.get_state(&room, &alice)).await?;
    info!("Game tier failed over; alice sees: {}", view.headline);

    client.leave(&room, &alice).await?;
    client.leave(&room, &bob).await?;
    cluster.shutdown().await;
    Ok(())
}

/// Retry `op` while the failure is leadership churn, as a UI would while
/// showing "waiting for service".
async fn with_retries<F, Fut>(client: &GameProxy, op: F) -> Result<Projection>
where
    F: Fn() -> Fut,
    Fut: Future<Output = DuelResult<Projection>>,
{
    let started = Instant::now();
    loop {
        match op().await {
            Ok(view) => {
                info!("Recovered after {:?}", started.elapsed());
                return Ok(view);
            }
            Err(e) if e.is_retryable() && started.elapsed() < Duration::from_secs(10) => {
                warn!(
                    "{} (proxy state: {:?})",
                    e.user_facing(),
                    client.connection_state()
                );
                sleep(Duration::from_millis(200)).await;
            }
            Err(e) => return Err(e).context("operation failed during failover"),
        }
    }
}
