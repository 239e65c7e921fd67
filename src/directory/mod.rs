//! Collaborator directories
//!
//! Combat coordination does not own identities, game sessions or characters.
//! It reaches them through these traits:
//! - [`IdentityVerifier`]: token → verified caller
//! - [`SessionDirectory`]: session → facilitator and participants
//! - [`CharacterDirectory`]: character → owner and stat block
//!
//! [`SqliteDirectory`] backs sessions and characters with the daemon's
//! database; identities come from [`crate::auth::accounts::AccountService`].

mod sqlite;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteDirectory;

/// Global role carried by an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Player,
    Dm,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Player => "player",
            Role::Dm => "dm",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "player" => Ok(Role::Player),
            "dm" | "gm" => Ok(Role::Dm),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

/// A game session as seen by combat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub id: String,
    pub name: String,
    /// The session's facilitator
    pub dm_id: String,
    pub participants: Vec<String>,
}

impl GameSession {
    pub fn is_facilitator(&self, user_id: &str) -> bool {
        self.dm_id == user_id
    }
}

/// Combat-relevant numbers from a character sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatBlock {
    pub max_hp: i32,
    pub current_hp: i32,
    pub armor_class: i32,
    pub attack_bonus: i32,
    pub initiative_bonus: i32,
}

impl Default for StatBlock {
    fn default() -> Self {
        Self {
            max_hp: 10,
            current_hp: 10,
            armor_class: 10,
            attack_bonus: 0,
            initiative_bonus: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub stats: StatBlock,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve a bearer token, `None` when it is unknown or revoked
    async fn verify(&self, token: &str) -> Result<Option<Identity>, DirectoryError>;
}

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn find_session(&self, session_id: &str) -> Result<Option<GameSession>, DirectoryError>;
}

#[async_trait]
pub trait CharacterDirectory: Send + Sync {
    async fn find_character(
        &self,
        character_id: &str,
    ) -> Result<Option<CharacterRecord>, DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("DM".parse::<Role>(), Ok(Role::Dm));
        assert_eq!("gm".parse::<Role>(), Ok(Role::Dm));
        assert_eq!("player".parse::<Role>(), Ok(Role::Player));
        assert!("wizard".parse::<Role>().is_err());
        assert_eq!(serde_json::to_value(Role::Dm).unwrap(), "dm");
    }

    #[test]
    fn test_facilitator() {
        let session = GameSession {
            id: "s".into(),
            name: "Tomb".into(),
            dm_id: "dm-1".into(),
            participants: vec!["p-1".into()],
        };
        assert!(session.is_facilitator("dm-1"));
        assert!(!session.is_facilitator("p-1"));
    }
}
