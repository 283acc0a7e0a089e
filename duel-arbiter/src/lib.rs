//! # Duel Arbiter
//!
//! Turn rules for a two-participant rock-paper-scissors match and the
//! game-tier service that applies them.
//!
//! The [`SessionArbiter`] is pure: it validates and applies a request to a
//! [`SessionRecord`](duel_core::SessionRecord) and renders the viewer's
//! [`Projection`](duel_core::Projection). The [`GameService`] wraps it with
//! leadership gating, per-session serialisation and the persistence round
//! trip.
//!
//! ```rust
//! use duel_arbiter::SessionArbiter;
//! use duel_core::{ChoiceView, ParticipantId, SessionId, SessionRecord};
//!
//! let arbiter = SessionArbiter::new();
//! let (alice, bob) = (ParticipantId::new("alice"), ParticipantId::new("bob"));
//! let mut record = SessionRecord::new(SessionId::new("1234"));
//! arbiter.join(&mut record, &alice).unwrap();
//! arbiter.join(&mut record, &bob).unwrap();
//! arbiter.commit_choice(&mut record, &alice, "rock").unwrap();
//!
//! let view = arbiter.projection(&record, &bob);
//! assert_eq!(view.first.choice, ChoiceView::Committed);
//! ```

pub mod arbiter;
pub mod config;
pub mod service;

pub use arbiter::{JoinOutcome, LeaveOutcome, SessionArbiter};
pub use config::ArbiterConfig;
pub use service::{GameService, GameStats};
