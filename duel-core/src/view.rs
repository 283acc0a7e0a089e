//! Viewer-facing projection of a [`SessionRecord`](crate::SessionRecord).

use crate::{ParticipantId, SessionId, SessionStatus, SlotIndex, Symbol};
use serde::{Deserialize, Serialize};

/// What a viewer may learn about one slot's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChoiceView {
    /// No choice committed this round
    NotCommitted,
    /// A choice is committed but concealed from this viewer
    Committed,
    /// The symbol itself
    Revealed(Symbol),
}

impl ChoiceView {
    pub fn symbol(&self) -> Option<Symbol> {
        match self {
            ChoiceView::Revealed(symbol) => Some(*symbol),
            _ => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        !matches!(self, ChoiceView::NotCommitted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub participant: Option<ParticipantId>,
    pub choice: ChoiceView,
    pub score: u32,
}

/// The round as seen from the viewer's seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Perspective {
    /// The viewer holds no slot
    Spectating,
    /// Waiting for an opponent to join or to commit
    AwaitingOpponent,
    /// The viewer has not committed yet
    YourMove,
    /// Both choices are revealed
    RoundComplete,
}

/// A session as one viewer is allowed to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub first: SlotView,
    pub second: SlotView,
    pub perspective: Perspective,
    /// Human-readable round summary, e.g. "alice wins! rock beats scissors"
    pub headline: String,
}

impl Projection {
    pub fn slot(&self, index: SlotIndex) -> &SlotView {
        match index {
            SlotIndex::First => &self.first,
            SlotIndex::Second => &self.second,
        }
    }

    /// The slot view belonging to `participant`, if they hold one.
    pub fn slot_of(&self, participant: &ParticipantId) -> Option<&SlotView> {
        [&self.first, &self.second]
            .into_iter()
            .find(|slot| slot.participant.as_ref() == Some(participant))
    }

    /// Every symbol visible in this projection.
    pub fn visible_symbols(&self) -> Vec<Symbol> {
        [self.first.choice, self.second.choice]
            .iter()
            .filter_map(ChoiceView::symbol)
            .collect()
    }
}
