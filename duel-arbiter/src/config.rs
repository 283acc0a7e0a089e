use duel_core::{DuelError, DuelResult, ValidationConfig};
use serde::{Deserialize, Serialize};

/// Configuration for the game-tier service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    pub validation: ValidationConfig,
    /// Size of the per-session lock table above which idle entries are dropped
    pub idle_lock_limit: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            idle_lock_limit: 1024,
        }
    }
}

impl ArbiterConfig {
    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_idle_lock_limit(mut self, limit: usize) -> Self {
        self.idle_lock_limit = limit;
        self
    }

    pub fn validate(&self) -> DuelResult<()> {
        if self.validation.max_participant_len == 0 || self.validation.max_session_len == 0 {
            return Err(DuelError::internal("identifier length limits must be non-zero"));
        }
        Ok(())
    }
}
