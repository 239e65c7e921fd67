//! Combat engine errors

use thiserror::Error;

use super::dice::DiceError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("combat not found")]
    CombatNotFound,

    #[error("combatant not found: {0}")]
    CombatantNotFound(String),

    #[error("not this combatant's turn")]
    NotYourTurn { actor_id: String, current_id: String },

    #[error("combatant {0} is down")]
    CombatantDown(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Dice(#[from] DiceError),
}

impl CombatError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CombatError::Invalid(msg.into())
    }
}
