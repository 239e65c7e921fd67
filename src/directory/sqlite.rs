//! SQLite-backed session and character directory

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{
    CharacterDirectory, CharacterRecord, DirectoryError, GameSession, SessionDirectory, StatBlock,
};

#[derive(sqlx::FromRow)]
struct CharacterRow {
    id: String,
    owner_id: String,
    name: String,
    max_hp: i64,
    current_hp: i64,
    armor_class: i64,
    attack_bonus: i64,
    initiative_bonus: i64,
}

impl CharacterRow {
    fn into_record(self) -> CharacterRecord {
        CharacterRecord {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            stats: StatBlock {
                max_hp: self.max_hp as i32,
                current_hp: self.current_hp as i32,
                armor_class: self.armor_class as i32,
                attack_bonus: self.attack_bonus as i32,
                initiative_bonus: self.initiative_bonus as i32,
            },
        }
    }
}

#[derive(Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a session facilitated by `dm_id`
    pub async fn create_session(&self, name: &str, dm_id: &str) -> Result<GameSession, DirectoryError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO game_sessions (id, name, dm_id) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(dm_id)
            .execute(&self.pool)
            .await?;

        debug!(session_id = %id, dm_id, "Game session created");
        Ok(GameSession {
            id,
            name: name.to_string(),
            dm_id: dm_id.to_string(),
            participants: Vec::new(),
        })
    }

    pub async fn add_participant(&self, session_id: &str, account_id: &str) -> Result<(), DirectoryError> {
        sqlx::query(
            "INSERT OR IGNORE INTO session_participants (session_id, account_id) VALUES (?, ?)",
        )
        .bind(session_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_character(
        &self,
        owner_id: &str,
        name: &str,
        stats: StatBlock,
    ) -> Result<CharacterRecord, DirectoryError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO characters
                (id, owner_id, name, max_hp, current_hp, armor_class, attack_bonus, initiative_bonus)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(name)
        .bind(stats.max_hp)
        .bind(stats.current_hp)
        .bind(stats.armor_class)
        .bind(stats.attack_bonus)
        .bind(stats.initiative_bonus)
        .execute(&self.pool)
        .await?;

        Ok(CharacterRecord {
            id,
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            stats,
        })
    }
}

#[async_trait]
impl SessionDirectory for SqliteDirectory {
    async fn find_session(&self, session_id: &str) -> Result<Option<GameSession>, DirectoryError> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, name, dm_id FROM game_sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((id, name, dm_id)) = row else {
            return Ok(None);
        };

        let participants: Vec<(String,)> = sqlx::query_as(
            "SELECT account_id FROM session_participants WHERE session_id = ? ORDER BY joined_at",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(GameSession {
            id,
            name,
            dm_id,
            participants: participants.into_iter().map(|(p,)| p).collect(),
        }))
    }
}

#[async_trait]
impl CharacterDirectory for SqliteDirectory {
    async fn find_character(
        &self,
        character_id: &str,
    ) -> Result<Option<CharacterRecord>, DirectoryError> {
        let row: Option<CharacterRow> = sqlx::query_as(
            "SELECT id, owner_id, name, max_hp, current_hp, armor_class, attack_bonus, initiative_bonus
             FROM characters WHERE id = ?",
        )
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CharacterRow::into_record))
    }
}
