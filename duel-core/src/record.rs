//! # Session Record
//!
//! The authoritative per-match state arbitrated by the game leader and stored
//! by the persistence leader.
//!
//! Only facts are stored: who occupies each slot, their committed choice and
//! their cumulative score. The session status and round outcome are derived
//! from those facts on every read, so a stored outcome can never disagree with
//! the pair of choices that produced it.

use crate::{DuelError, ParticipantId, RejectCode, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three symbols a participant may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    Rock,
    Paper,
    Scissors,
}

impl Symbol {
    pub const ALL: [Symbol; 3] = [Symbol::Rock, Symbol::Paper, Symbol::Scissors];

    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::Rock => "rock",
            Symbol::Paper => "paper",
            Symbol::Scissors => "scissors",
        }
    }

    /// Fixed cyclic dominance: rock beats scissors, scissors beats paper,
    /// paper beats rock.
    pub fn beats(self, other: Symbol) -> bool {
        matches!(
            (self, other),
            (Symbol::Rock, Symbol::Scissors)
                | (Symbol::Scissors, Symbol::Paper)
                | (Symbol::Paper, Symbol::Rock)
        )
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Symbol {
    type Err = DuelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rock" => Ok(Symbol::Rock),
            "paper" => Ok(Symbol::Paper),
            "scissors" => Ok(Symbol::Scissors),
            _ => Err(DuelError::rejected(RejectCode::InvalidChoice)),
        }
    }
}

/// Which of the two participant slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotIndex {
    First,
    Second,
}

impl SlotIndex {
    pub fn other(self) -> SlotIndex {
        match self {
            SlotIndex::First => SlotIndex::Second,
            SlotIndex::Second => SlotIndex::First,
        }
    }
}

/// Result of a resolved round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundOutcome {
    Draw,
    FirstWins,
    SecondWins,
}

impl RoundOutcome {
    /// Pure evaluation of a round from the two committed symbols.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use duel_core::{RoundOutcome, Symbol};
    ///
    /// assert_eq!(RoundOutcome::evaluate(Symbol::Rock, Symbol::Scissors), RoundOutcome::FirstWins);
    /// assert_eq!(RoundOutcome::evaluate(Symbol::Rock, Symbol::Paper), RoundOutcome::SecondWins);
    /// assert_eq!(RoundOutcome::evaluate(Symbol::Paper, Symbol::Paper), RoundOutcome::Draw);
    /// ```
    pub fn evaluate(first: Symbol, second: Symbol) -> Self {
        if first == second {
            RoundOutcome::Draw
        } else if first.beats(second) {
            RoundOutcome::FirstWins
        } else {
            RoundOutcome::SecondWins
        }
    }

    pub fn winner(&self) -> Option<SlotIndex> {
        match self {
            RoundOutcome::Draw => None,
            RoundOutcome::FirstWins => Some(SlotIndex::First),
            RoundOutcome::SecondWins => Some(SlotIndex::Second),
        }
    }
}

/// Lifecycle state of a session, derived from the stored slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// No participant holds a slot
    Empty,
    /// Exactly one participant holds a slot
    AwaitingSecond,
    /// Both slots are held and the round is open
    ArmedForRound,
    /// Both choices are committed and the round is resolved
    RoundComplete(RoundOutcome),
}

impl SessionStatus {
    /// True while the round accepts choices.
    pub fn accepts_choices(&self) -> bool {
        matches!(self, SessionStatus::AwaitingSecond | SessionStatus::ArmedForRound)
    }
}

/// A participant slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub participant: Option<ParticipantId>,
    pub choice: Option<Symbol>,
    pub score: u32,
}

impl Slot {
    pub fn is_occupied(&self) -> bool {
        self.participant.is_some()
    }

    pub fn is_held_by(&self, participant: &ParticipantId) -> bool {
        self.participant.as_ref() == Some(participant)
    }
}

/// The authoritative record of one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub first: Slot,
    pub second: Slot,
}

impl SessionRecord {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            first: Slot::default(),
            second: Slot::default(),
        }
    }

    pub fn slot(&self, index: SlotIndex) -> &Slot {
        match index {
            SlotIndex::First => &self.first,
            SlotIndex::Second => &self.second,
        }
    }

    pub fn slot_mut(&mut self, index: SlotIndex) -> &mut Slot {
        match index {
            SlotIndex::First => &mut self.first,
            SlotIndex::Second => &mut self.second,
        }
    }

    /// The slot held by `participant`, if any.
    pub fn slot_of(&self, participant: &ParticipantId) -> Option<SlotIndex> {
        if self.first.is_held_by(participant) {
            Some(SlotIndex::First)
        } else if self.second.is_held_by(participant) {
            Some(SlotIndex::Second)
        } else {
            None
        }
    }

    pub fn has_participant(&self, participant: &ParticipantId) -> bool {
        self.slot_of(participant).is_some()
    }

    pub fn occupant_count(&self) -> usize {
        usize::from(self.first.is_occupied()) + usize::from(self.second.is_occupied())
    }

    /// True once both slots are empty; the record is then eligible for destruction.
    pub fn is_vacant(&self) -> bool {
        self.occupant_count() == 0
    }

    /// The resolved outcome, if both choices are committed.
    pub fn outcome(&self) -> Option<RoundOutcome> {
        match (self.first.choice, self.second.choice) {
            (Some(first), Some(second)) => Some(RoundOutcome::evaluate(first, second)),
            _ => None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        if let Some(outcome) = self.outcome() {
            return SessionStatus::RoundComplete(outcome);
        }
        match self.occupant_count() {
            0 => SessionStatus::Empty,
            1 => SessionStatus::AwaitingSecond,
            _ => SessionStatus::ArmedForRound,
        }
    }

    /// Removes `participant` from its slot.
    ///
    /// The vacated slot loses its score, and any choice left by the remaining
    /// participant is cleared: a round cannot survive a change of opponent.
    /// Returns false when the participant held no slot.
    pub fn vacate(&mut self, participant: &ParticipantId) -> bool {
        let Some(index) = self.slot_of(participant) else {
            return false;
        };
        *self.slot_mut(index) = Slot::default();
        self.slot_mut(index.other()).choice = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(first: &str, second: Option<&str>) -> SessionRecord {
        let mut record = SessionRecord::new(SessionId::new("1234"));
        record.first.participant = Some(ParticipantId::new(first));
        record.second.participant = second.map(ParticipantId::new);
        record
    }

    #[test]
    fn test_symbol_parsing() {
        assert_eq!("rock".parse::<Symbol>().unwrap(), Symbol::Rock);
        assert_eq!(" Scissors ".parse::<Symbol>().unwrap(), Symbol::Scissors);

        let err = "lizard".parse::<Symbol>().unwrap_err();
        assert_eq!(err.reject_code(), Some(RejectCode::InvalidChoice));
    }

    #[test]
    fn test_status_is_derived_from_slots() {
        let mut record = SessionRecord::new(SessionId::new("1234"));
        assert_eq!(record.status(), SessionStatus::Empty);

        record.first.participant = Some(ParticipantId::new("alice"));
        assert_eq!(record.status(), SessionStatus::AwaitingSecond);

        record.second.participant = Some(ParticipantId::new("bob"));
        assert_eq!(record.status(), SessionStatus::ArmedForRound);

        record.first.choice = Some(Symbol::Paper);
        assert_eq!(record.status(), SessionStatus::ArmedForRound);

        record.second.choice = Some(Symbol::Rock);
        assert_eq!(
            record.status(),
            SessionStatus::RoundComplete(RoundOutcome::FirstWins)
        );
    }

    #[test]
    fn test_vacate_clears_slot_and_abandons_round() {
        let mut record = record_with("alice", Some("bob"));
        record.first.score = 3;
        record.second.score = 2;
        record.second.choice = Some(Symbol::Rock);

        assert!(record.vacate(&ParticipantId::new("alice")));
        assert_eq!(record.first, Slot::default());
        assert_eq!(record.second.choice, None);
        assert_eq!(record.second.score, 2);
        assert_eq!(record.status(), SessionStatus::AwaitingSecond);

        assert!(!record.vacate(&ParticipantId::new("carol")));
        assert!(record.vacate(&ParticipantId::new("bob")));
        assert!(record.is_vacant());
    }
}
