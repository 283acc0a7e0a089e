//! # Duel Core
//!
//! Shared building blocks for the Duel replicated match service.
//!
//! Two service tiers run as replica sets, each with exactly one elected
//! leader: a stateless game-logic tier and a stateful persistence tier. This
//! crate holds what both tiers and their dependents agree on:
//!
//! - **Types**: roles, leader addresses, participant and session identifiers
//! - **Session Record**: the per-match state and its derived status
//! - **Projection**: the concealed, viewer-relative view of a record
//! - **Service traits**: [`PersistenceApi`] and [`GameApi`]
//! - **Connector**: the seam transports implement to build leader channels
//! - **Errors**: the [`DuelError`] taxonomy shared across the wire
//!
//! ```rust
//! use duel_core::{ParticipantId, SessionId, SessionRecord, SessionStatus};
//!
//! let mut record = SessionRecord::new(SessionId::new("1234"));
//! record.first.participant = Some(ParticipantId::new("alice"));
//! assert_eq!(record.status(), SessionStatus::AwaitingSecond);
//! ```

pub mod api;
pub mod error;
pub mod network;
pub mod record;
pub mod types;
pub mod validation;
pub mod view;

pub use api::{GameApi, PersistenceApi};
pub use error::*;
pub use network::Connector;
pub use record::*;
pub use types::*;
pub use validation::{ValidationConfig, Validator};
pub use view::*;
