//! # Session Arbiter
//!
//! The turn rules of a match, applied to a freshly loaded [`SessionRecord`].
//!
//! The arbiter holds no session state of its own. Every operation takes the
//! record, validates the request against it, mutates it in place and reports
//! what changed; the caller decides whether the record needs saving. Status
//! and round outcome are always derived from the record, so resolving a round
//! happens inside the commit that supplies the second choice.

use duel_core::{
    ChoiceView, DuelError, DuelResult, ParticipantId, Perspective, Projection, RejectCode,
    RoundOutcome, SessionRecord, SessionStatus, Slot, SlotIndex, SlotView, Symbol,
};
use std::str::FromStr;
use tracing::debug;

/// Result of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The participant already held this slot; nothing changed
    AlreadyPresent(SlotIndex),
    /// The participant took this slot
    Joined(SlotIndex),
}

impl JoinOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, JoinOutcome::Joined(_))
    }
}

/// Result of a leave request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The participant held no slot; nothing changed
    NotPresent,
    /// The participant's slot was cleared
    Left {
        /// Both slots are now empty and the record may be destroyed
        vacant: bool,
    },
}

/// Applies turn rules to session records.
#[derive(Debug, Clone, Default)]
pub struct SessionArbiter;

impl SessionArbiter {
    pub fn new() -> Self {
        Self
    }

    /// Seat `participant` in the first empty slot.
    ///
    /// Joining a session one already belongs to is a no-op success; a third
    /// distinct identity is rejected with `ROOM_FULL`.
    pub fn join(
        &self,
        record: &mut SessionRecord,
        participant: &ParticipantId,
    ) -> DuelResult<JoinOutcome> {
        if let Some(index) = record.slot_of(participant) {
            return Ok(JoinOutcome::AlreadyPresent(index));
        }

        let index = [SlotIndex::First, SlotIndex::Second]
            .into_iter()
            .find(|index| !record.slot(*index).is_occupied())
            .ok_or(DuelError::rejected(RejectCode::RoomFull))?;

        record.slot_mut(index).participant = Some(participant.clone());
        debug!(
            "{} joined session {} in slot {:?}",
            participant, record.session_id, index
        );
        Ok(JoinOutcome::Joined(index))
    }

    /// Commit `symbol` for `participant` in the current round.
    ///
    /// When this supplies the second choice the round resolves immediately:
    /// the winner's score is incremented and the outcome is returned.
    pub fn commit_choice(
        &self,
        record: &mut SessionRecord,
        participant: &ParticipantId,
        symbol: &str,
    ) -> DuelResult<Option<RoundOutcome>> {
        let index = record
            .slot_of(participant)
            .ok_or(DuelError::rejected(RejectCode::NotInRoom))?;
        if record.slot(index).choice.is_some() {
            return Err(DuelError::rejected(RejectCode::AlreadyChosen));
        }
        if !record.status().accepts_choices() {
            return Err(DuelError::rejected(RejectCode::RoundClosed));
        }
        let symbol = Symbol::from_str(symbol)?;

        record.slot_mut(index).choice = Some(symbol);

        let outcome = record.outcome();
        if let Some(winner) = outcome.and_then(|outcome| outcome.winner()) {
            record.slot_mut(winner).score += 1;
        }
        if let Some(outcome) = outcome {
            debug!("Session {} resolved: {:?}", record.session_id, outcome);
        }
        Ok(outcome)
    }

    /// Start the next round, keeping scores.
    ///
    /// Only a completed round is cleared. From any other state this is a
    /// no-op, so a late "next round" request never wipes a fresh choice.
    /// Returns whether the record changed.
    pub fn reset(&self, record: &mut SessionRecord) -> bool {
        if !matches!(record.status(), SessionStatus::RoundComplete(_)) {
            return false;
        }
        record.first.choice = None;
        record.second.choice = None;
        true
    }

    /// Clear `participant`'s slot and abandon the round in progress.
    pub fn leave(&self, record: &mut SessionRecord, participant: &ParticipantId) -> LeaveOutcome {
        if record.vacate(participant) {
            LeaveOutcome::Left {
                vacant: record.is_vacant(),
            }
        } else {
            LeaveOutcome::NotPresent
        }
    }

    /// The record as `viewer` may see it.
    ///
    /// Until the round resolves, a committed choice is shown to its owner
    /// and concealed from everyone else. Once both are committed, both are
    /// revealed to everyone.
    pub fn projection(&self, record: &SessionRecord, viewer: &ParticipantId) -> Projection {
        let status = record.status();
        let revealed = matches!(status, SessionStatus::RoundComplete(_));
        let slot_view = |slot: &Slot| SlotView {
            participant: slot.participant.clone(),
            choice: match slot.choice {
                None => ChoiceView::NotCommitted,
                Some(symbol) if revealed || slot.is_held_by(viewer) => ChoiceView::Revealed(symbol),
                Some(_) => ChoiceView::Committed,
            },
            score: slot.score,
        };

        Projection {
            session_id: record.session_id.clone(),
            status,
            first: slot_view(&record.first),
            second: slot_view(&record.second),
            perspective: self.perspective(record, viewer),
            headline: self.headline(record),
        }
    }

    fn perspective(&self, record: &SessionRecord, viewer: &ParticipantId) -> Perspective {
        let Some(index) = record.slot_of(viewer) else {
            return Perspective::Spectating;
        };
        match record.status() {
            SessionStatus::RoundComplete(_) => Perspective::RoundComplete,
            _ if record.slot(index).choice.is_none() => Perspective::YourMove,
            _ => Perspective::AwaitingOpponent,
        }
    }

    /// Human-readable summary of the round.
    pub fn headline(&self, record: &SessionRecord) -> String {
        let name = |slot: &Slot| {
            slot.participant
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_default()
        };

        match (record.status(), record.first.choice, record.second.choice) {
            (SessionStatus::RoundComplete(RoundOutcome::Draw), Some(symbol), _) => {
                format!("Draw! Both chose {}", symbol)
            }
            (SessionStatus::RoundComplete(RoundOutcome::FirstWins), Some(a), Some(b)) => {
                format!("{} wins! {} beats {}", name(&record.first), a, b)
            }
            (SessionStatus::RoundComplete(RoundOutcome::SecondWins), Some(a), Some(b)) => {
                format!("{} wins! {} beats {}", name(&record.second), b, a)
            }
            (SessionStatus::ArmedForRound, _, _) => "Make your choice!".to_string(),
            _ => "Waiting for opponent...".to_string(),
        }
    }
}
