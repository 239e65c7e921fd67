//! Shared test utilities for database operations

use sqlx::SqlitePool;

use super::Database;

/// In-memory pool with the full schema applied
pub async fn test_pool() -> SqlitePool {
    let db = Database::new(None)
        .await
        .expect("Failed to create test database");
    db.pool().clone()
}

/// Insert a bare account (no password) and return its id
pub async fn insert_account(pool: &SqlitePool, username: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO accounts (id, username) VALUES (?, ?)")
        .bind(&id)
        .bind(username)
        .execute(pool)
        .await
        .expect("Failed to insert account");
    id
}
