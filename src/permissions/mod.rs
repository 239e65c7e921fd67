//! Combat authorization
//!
//! Decides whether a verified caller may drive a combat. There is no global
//! bypass: a platform admin is treated like anyone else.
//!
//! Check order (first match wins):
//! 1. Session lookup: unknown session → NotFound
//! 2. Facilitator: `session.dm_id == caller.user_id` → Allowed
//! 3. Lifecycle actions (start, advance turn, end) → Denied
//! 4. Character owner: the combatant's linked character belongs to the
//!    caller → Allowed (unknown character → NotFound)
//! 5. Default: Denied

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::combat::Combatant;
use crate::directory::{CharacterDirectory, DirectoryError, Identity, SessionDirectory};

/// Operations the gate decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombatAction {
    /// Begin a combat in a session
    Start,
    /// Move to the next turn
    AdvanceTurn,
    /// End the combat
    End,
    /// Take a combat action as a combatant
    Act,
    SavingThrow,
    Damage,
    Heal,
}

impl CombatAction {
    /// Lifecycle actions only the facilitator may take
    pub fn facilitator_only(&self) -> bool {
        matches!(
            self,
            CombatAction::Start | CombatAction::AdvanceTurn | CombatAction::End
        )
    }
}

/// Result of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionResult {
    Allowed,
    /// Denied with reason
    Denied(String),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Capability checks backed by the session and character directories
#[derive(Clone)]
pub struct CombatGate {
    sessions: Arc<dyn SessionDirectory>,
    characters: Arc<dyn CharacterDirectory>,
}

impl CombatGate {
    pub fn new(sessions: Arc<dyn SessionDirectory>, characters: Arc<dyn CharacterDirectory>) -> Self {
        Self { sessions, characters }
    }

    /// Check `action` for `caller` in `session_id`.
    ///
    /// `combatant` is the acting or addressed combatant for combatant
    /// actions; lifecycle actions ignore it.
    pub async fn check(
        &self,
        caller: &Identity,
        session_id: &str,
        action: CombatAction,
        combatant: Option<&Combatant>,
    ) -> Result<PermissionResult, GateError> {
        let session = self
            .sessions
            .find_session(session_id)
            .await?
            .ok_or_else(|| GateError::NotFound("session not found".to_string()))?;

        if session.is_facilitator(&caller.user_id) {
            return Ok(PermissionResult::Allowed);
        }

        if action.facilitator_only() {
            return Ok(PermissionResult::Denied(
                "only the session's DM can do that".to_string(),
            ));
        }

        let Some(character_id) = combatant.and_then(|c| c.character_id.as_deref()) else {
            return Ok(PermissionResult::Denied(
                "you do not control this combatant".to_string(),
            ));
        };

        let character = self
            .characters
            .find_character(character_id)
            .await?
            .ok_or_else(|| GateError::NotFound("character not found".to_string()))?;

        if character.owner_id == caller.user_id {
            Ok(PermissionResult::Allowed)
        } else {
            Ok(PermissionResult::Denied(
                "you do not control this combatant".to_string(),
            ))
        }
    }

    /// Like [`check`](Self::check), turning a denial into `GateError::Forbidden`
    pub async fn require(
        &self,
        caller: &Identity,
        session_id: &str,
        action: CombatAction,
        combatant: Option<&Combatant>,
    ) -> Result<(), GateError> {
        match self.check(caller, session_id, action, combatant).await? {
            PermissionResult::Allowed => Ok(()),
            PermissionResult::Denied(reason) => {
                debug!(user_id = %caller.user_id, session_id, ?action, %reason, "Combat action denied");
                Err(GateError::Forbidden(reason))
            }
        }
    }
}
