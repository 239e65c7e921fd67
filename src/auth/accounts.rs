//! Account management service
//!
//! Handles account creation, login, logout and token verification. This is
//! the identity collaborator the combat gate and the realtime handshake
//! trust.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;
use tracing::info;

use super::{generate_token, PasswordHash};
use crate::directory::{DirectoryError, Identity, IdentityVerifier, Role};

/// Account data
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub role: Role,
}

impl From<Account> for Identity {
    fn from(account: Account) -> Self {
        Identity {
            user_id: account.id,
            username: account.username,
            role: account.role,
        }
    }
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username already exists")]
    UsernameExists,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn parse_role(raw: &str) -> Role {
    raw.parse().unwrap_or_default()
}

/// Account service for authentication operations
#[derive(Clone)]
pub struct AccountService {
    pool: SqlitePool,
}

impl AccountService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new account and return it with a fresh token
    pub async fn create_account(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<(Account, String), AuthError> {
        let username = username.trim();
        if username.is_empty() || username.len() > 32 {
            return Err(AuthError::InvalidInput(
                "username must be 1-32 characters".to_string(),
            ));
        }
        if password.len() < 6 {
            return Err(AuthError::InvalidInput(
                "password must be at least 6 characters".to_string(),
            ));
        }
        if role == Role::Admin {
            return Err(AuthError::InvalidInput(
                "admin accounts cannot be self-registered".to_string(),
            ));
        }

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM accounts WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(AuthError::UsernameExists);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let stored = PasswordHash::create(password);
        let token = generate_token();

        sqlx::query(
            "INSERT INTO accounts (id, username, password_hash, salt, token, role)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(username)
        .bind(&stored.hash)
        .bind(&stored.salt)
        .bind(&token)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;

        info!(account_id = %id, username, %role, "Account created");
        let account = Account {
            id,
            username: username.to_string(),
            role,
        };
        Ok((account, token))
    }

    /// Login with username and password, rotating the token
    pub async fn login(&self, username: &str, password: &str) -> Result<(Account, String), AuthError> {
        let row: Option<(String, Option<String>, Option<String>, String)> = sqlx::query_as(
            "SELECT id, password_hash, salt, role FROM accounts WHERE username = ?",
        )
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;

        let (id, hash, salt, role) = row.ok_or(AuthError::InvalidCredentials)?;
        let (Some(hash), Some(salt)) = (hash, salt) else {
            return Err(AuthError::InvalidCredentials);
        };
        if !(PasswordHash { salt, hash }).verify(password) {
            return Err(AuthError::InvalidCredentials);
        }

        let token = generate_token();
        sqlx::query("UPDATE accounts SET token = ? WHERE id = ?")
            .bind(&token)
            .bind(&id)
            .execute(&self.pool)
            .await?;

        let account = Account {
            id,
            username: username.trim().to_string(),
            role: parse_role(&role),
        };
        Ok((account, token))
    }

    /// Validate a token and return the associated account
    pub async fn validate_token(&self, token: &str) -> Result<Option<Account>, AuthError> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, username, role FROM accounts WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, username, role)| Account {
            id,
            username,
            role: parse_role(&role),
        }))
    }

    /// Logout by clearing the token
    pub async fn logout(&self, token: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("UPDATE accounts SET token = NULL WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl IdentityVerifier for AccountService {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, DirectoryError> {
        if token.is_empty() {
            return Ok(None);
        }
        match self.validate_token(token).await {
            Ok(account) => Ok(account.map(Identity::from)),
            Err(AuthError::Database(e)) => Err(DirectoryError::Database(e)),
            Err(_) => Ok(None),
        }
    }
}
