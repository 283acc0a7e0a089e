//! # Duel Directory
//!
//! The coordination directory the election protocol runs against: sessions
//! with a TTL, compare-and-acquire writes bound to a session, and key reads.
//!
//! ## Features
//!
//! - **Directory trait**: the protocol surface leadership coordinators consume
//! - **In-memory directory**: linearizable, Consul-like semantics for tests and demos
//! - **Change notifications**: optional push hints for key watchers

pub mod directory;
pub mod errors;
pub mod memory;
pub mod notifications;

pub use directory::{
    Directory, DirectorySessionId, KeyEntry, RenewOutcome, SessionBehavior, SessionSpec,
};
pub use errors::{DirectoryError, DirectoryResult};
pub use memory::{DirectoryConfig, DirectoryStats, InMemoryDirectory};
pub use notifications::{
    ChangeNotification, ChangeType, NotificationBus, NotificationFilter, Subscription,
    SubscriptionId,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_acquire_elects_exactly_one() {
        let directory = Arc::new(InMemoryDirectory::default());
        let key = "service/rps-orm/leader";

        let mut handles = Vec::new();
        for replica in 0..8 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move {
                let session = directory
                    .create_session(SessionSpec::new(
                        format!("replica-{replica}"),
                        Duration::from_secs(10),
                    ))
                    .await
                    .unwrap();
                directory
                    .acquire_key(key, &format!("tcp://10.0.0.{replica}:7000"), session)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
