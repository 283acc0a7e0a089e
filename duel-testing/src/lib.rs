//! # Duel Testing
//!
//! Tooling for exercising Duel failover in one process:
//!
//! - [`FlakyDirectory`]: a directory wrapper that fails on demand
//! - [`LocalNetwork`]: an in-process transport with crash and partition switches
//! - [`DuelCluster`]: both service tiers, their elections and their proxies
//!
//! ```rust,no_run
//! use duel_core::{GameApi, ParticipantId, Role, SessionId};
//! use duel_testing::{ClusterConfig, DuelCluster, Fault};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cluster = DuelCluster::start(ClusterConfig::fast()).await?;
//! cluster.wait_for_leader(&Role::game(), Duration::from_secs(5)).await;
//!
//! let client = cluster.game_client()?;
//! client.ready().await;
//! client
//!     .create_or_join(&ParticipantId::new("alice"), &SessionId::new("1234"), false)
//!     .await?;
//!
//! cluster.inject(Fault::CrashLeader(Role::persistence())).await;
//! cluster.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod fault_injection;
pub mod local_network;

pub use cluster::{ClusterConfig, DuelCluster, GameProxy, PersistenceProxy};
pub use fault_injection::{Fault, FaultStats, FlakyDirectory};
pub use local_network::{
    LocalChannel, LocalConnector, LocalNetwork, NetworkConditions, NetworkStats,
};

/// Install a compact subscriber at `WARN`, or at whatever `RUST_LOG` asks for.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
