use crate::{DuelError, DuelResult, ParticipantId, RejectCode, SessionId};
use serde::{Deserialize, Serialize};

pub trait Validator {
    fn validate(&self) -> DuelResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub max_participant_len: usize,
    pub max_session_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            // Column widths of the games table
            max_participant_len: 100,
            max_session_len: 50,
        }
    }
}

impl ValidationConfig {
    pub fn check_participant(&self, participant: &ParticipantId) -> DuelResult<()> {
        validate_identifier(participant.as_str(), self.max_participant_len)
    }

    pub fn check_session(&self, session_id: &SessionId) -> DuelResult<()> {
        validate_identifier(session_id.as_str(), self.max_session_len)
    }
}

impl Validator for ParticipantId {
    fn validate(&self) -> DuelResult<()> {
        ValidationConfig::default().check_participant(self)
    }
}

impl Validator for SessionId {
    fn validate(&self) -> DuelResult<()> {
        ValidationConfig::default().check_session(self)
    }
}

fn validate_identifier(value: &str, max_len: usize) -> DuelResult<()> {
    if value.trim().is_empty() || value.len() > max_len {
        return Err(DuelError::rejected(RejectCode::InvalidId));
    }
    // '|' separates nickname and room in presentation-layer session strings
    if value.contains('|') || value.chars().any(char::is_control) {
        return Err(DuelError::rejected(RejectCode::InvalidId));
    }
    Ok(())
}
