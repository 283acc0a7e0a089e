//! # Duel Leader
//!
//! Leadership and failover discovery for the Duel service tiers.
//!
//! This crate provides functionality for:
//! - Lease-based leader election per role ([`LeadershipCoordinator`])
//! - Observing a role's leader pointer ([`LeaderPointerWatcher`])
//! - Following leadership changes from the client side ([`ReconnectingProxy`])
//! - Leadership change notifications
//!
//! A replica runs one coordinator per role it serves. Dependents run one
//! watcher per role they call, and one proxy per watcher.
//!
//! ```rust,no_run
//! use duel_core::{LeaderAddress, Role};
//! use duel_directory::{Directory, InMemoryDirectory};
//! use duel_leader::{CoordinatorConfig, LeadershipCoordinator};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
//! let handle = LeadershipCoordinator::new(
//!     Role::game(),
//!     LeaderAddress::new("tcp://10.0.0.1:50051"),
//!     directory,
//!     CoordinatorConfig::default(),
//! )?
//! .spawn();
//!
//! let mut view = handle.view();
//! view.wait_for_leadership().await;
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod notifications;
pub mod proxy;
pub mod watcher;

pub use config::{CoordinatorConfig, ProxyConfig, WatcherConfig};
pub use coordinator::{
    CoordinatorHandle, CoordinatorStats, LeadershipCoordinator, LeadershipState, LeadershipView,
};
pub use errors::{LeaderError, LeaderResult};
pub use notifications::{
    LeadershipChange, LeadershipNotificationBus, NotificationFilter, SubscriptionId,
};
pub use proxy::{ConnectionState, ProxyStats, ReconnectingProxy};
pub use watcher::{LeaderPointerWatcher, PointerEvent, WatcherHandle, WatcherStats};
