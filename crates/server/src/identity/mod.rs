//! Identity collaborators
//!
//! Credentials are issued elsewhere. The relay only consumes two read-only
//! views: resolving a subject to a display name, and checking a bearer
//! credential to obtain the trusted subject of a new connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("credential rejected")]
    Unauthorized,
    #[error("credential expired")]
    Expired,
    #[error("identity backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        IdentityError::Backend(err.to_string())
    }
}

/// Resolves a subject id to its username.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_user_by_sub(&self, sub: &str) -> Result<String, IdentityError>;
}

/// Validates a bearer credential and yields the subject it was issued to.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn authorize(&self, credential: &str) -> Result<String, IdentityError>;
}

/// Read-only view over the `users` and `sessions` tables maintained by the
/// account service.
pub struct SqliteIdentity {
    pool: SqlitePool,
}

impl SqliteIdentity {
    pub async fn new(pool: SqlitePool) -> Result<Self, IdentityError> {
        let identity = Self { pool };
        identity.ensure_schema().await?;
        info!("[Identity] SQLite identity directory ready");
        Ok(identity)
    }

    /// Make sure the tables exist so lookups on a fresh database return
    /// "not found" rather than a backend error.
    async fn ensure_schema(&self) -> Result<(), IdentityError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                username TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_login TEXT,
                is_active INTEGER DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl IdentityDirectory for SqliteIdentity {
    async fn find_user_by_sub(&self, sub: &str) -> Result<String, IdentityError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT username FROM users WHERE id = ? AND is_active = 1")
                .bind(sub)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(username,)| username)
            .ok_or_else(|| IdentityError::NotFound(sub.to_string()))
    }
}

#[async_trait]
impl AuthorizationGate for SqliteIdentity {
    async fn authorize(&self, credential: &str) -> Result<String, IdentityError> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT s.user_id, s.expires_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = ? AND u.is_active = 1
            "#,
        )
        .bind(credential)
        .fetch_optional(&self.pool)
        .await?;

        let (user_id, expires_at) = row.ok_or(IdentityError::Unauthorized)?;
        let expires: DateTime<Utc> = expires_at
            .parse()
            .map_err(|_| IdentityError::Backend(format!("invalid session expiry: {}", expires_at)))?;

        if expires <= Utc::now() {
            warn!("[Identity] Expired credential for {}", user_id);
            return Err(IdentityError::Expired);
        }

        debug!("[Identity] Authorized {}", user_id);
        Ok(user_id)
    }
}

/// Fixed identity tables, for tests and memory-backed deployments.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentity {
    /// sub -> username
    users: HashMap<String, String>,
    /// credential -> sub
    credentials: HashMap<String, String>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, sub: &str, username: &str) -> Self {
        self.users.insert(sub.to_string(), username.to_string());
        self
    }

    pub fn with_credential(mut self, credential: &str, sub: &str) -> Self {
        self.credentials.insert(credential.to_string(), sub.to_string());
        self
    }
}

#[async_trait]
impl IdentityDirectory for StaticIdentity {
    async fn find_user_by_sub(&self, sub: &str) -> Result<String, IdentityError> {
        self.users
            .get(sub)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(sub.to_string()))
    }
}

#[async_trait]
impl AuthorizationGate for StaticIdentity {
    async fn authorize(&self, credential: &str) -> Result<String, IdentityError> {
        self.credentials
            .get(credential)
            .cloned()
            .ok_or(IdentityError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::tempdir;

    async fn pool_in(dir: &std::path::Path) -> SqlitePool {
        let url = format!("sqlite:{}?mode=rwc", dir.join("identity.sqlite").display());
        SqlitePoolOptions::new().connect(&url).await.unwrap()
    }

    async fn insert_user(pool: &SqlitePool, id: &str, username: &str) {
        sqlx::query(
            "INSERT INTO users (id, email, username, password_hash, created_at) VALUES (?, ?, ?, 'x', ?)",
        )
        .bind(id)
        .bind(format!("{}@example.com", username))
        .bind(username)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_session(pool: &SqlitePool, token: &str, user_id: &str, expires_at: DateTime<Utc>) {
        sqlx::query("INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(Utc::now().to_rfc3339())
            .bind(expires_at.to_rfc3339())
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_identity_lookups() {
        let dir = tempdir().unwrap();
        let pool = pool_in(dir.path()).await;
        let identity = SqliteIdentity::new(pool.clone()).await.unwrap();

        insert_user(&pool, "sub-bob", "bob").await;
        insert_session(&pool, "live", "sub-bob", Utc::now() + Duration::days(1)).await;
        insert_session(&pool, "stale", "sub-bob", Utc::now() - Duration::days(1)).await;

        assert_eq!(identity.find_user_by_sub("sub-bob").await.unwrap(), "bob");
        assert!(matches!(
            identity.find_user_by_sub("sub-nobody").await,
            Err(IdentityError::NotFound(_))
        ));

        assert_eq!(identity.authorize("live").await.unwrap(), "sub-bob");
        assert!(matches!(identity.authorize("stale").await, Err(IdentityError::Expired)));
        assert!(matches!(identity.authorize("forged").await, Err(IdentityError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_static_identity() {
        let identity = StaticIdentity::new()
            .with_user("sub-alice", "alice")
            .with_credential("token-a", "sub-alice");

        assert_eq!(identity.find_user_by_sub("sub-alice").await.unwrap(), "alice");
        assert_eq!(identity.authorize("token-a").await.unwrap(), "sub-alice");
        assert!(identity.authorize("token-b").await.is_err());
    }
}
