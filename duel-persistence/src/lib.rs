//! # Duel Persistence
//!
//! Durable storage of session records and the persistence-tier service.
//!
//! ## Implementations
//!
//! - [`InMemoryRecordStore`] - Records held in memory (testing/non-persistent)
//! - [`FileSystemRecordStore`] - Records in a checksummed state file (survives restarts)
//! - [`PersistenceServer`] - Leader-only [`PersistenceApi`](duel_core::PersistenceApi)
//!   over any [`RecordStore`]
//!
//! ## Example
//!
//! ```rust
//! use duel_core::{ParticipantId, SessionId, SessionRecord};
//! use duel_persistence::{InMemoryRecordStore, RecordStore};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryRecordStore::new();
//! let mut record = SessionRecord::new(SessionId::new("1234"));
//! record.first.participant = Some(ParticipantId::new("alice"));
//! store.put(&record).await.unwrap();
//!
//! let found = store.find_by_participant(&ParticipantId::new("alice")).await.unwrap();
//! assert_eq!(found, Some(SessionId::new("1234")));
//! # });
//! ```

pub mod file_system;
pub mod in_memory;
pub mod server;
pub mod store;
mod tests;

pub use file_system::FileSystemRecordStore;
pub use in_memory::InMemoryRecordStore;
pub use server::{PersistenceServer, PersistenceStats};
pub use store::RecordStore;
