//! SQLite-backed connection directory and message log
//!
//! Tables live in the shared `pairwire.sqlite` database next to the
//! externally-managed identity tables.

use super::{new_message_id, ConnectionDirectory, MessageLog, StoreResult};
use crate::models::{ConnectionRecord, MessageRecord};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

type ConnectionRow = (String, String, String, String);
type MessageRow = (i64, String, String, String, String, i64);

const CONNECTION_COLUMNS: &str = "connection_id, subscription_type, owner_sub, partner_sub";
const MESSAGE_COLUMNS: &str = "rowid, message_id, message, from_sub, to_sub, timestamp";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self::from_pool(pool).await?;
        info!("[Store] SQLite store opened at {:?}", db_path);
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.init_db().await?;
        Ok(store)
    }

    async fn init_db(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                connection_id TEXT PRIMARY KEY,
                subscription_type TEXT NOT NULL,
                owner_sub TEXT NOT NULL,
                partner_sub TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_connections_type ON connections(subscription_type)",
            "CREATE INDEX IF NOT EXISTS idx_connections_owner ON connections(owner_sub)",
            "CREATE INDEX IF NOT EXISTS idx_connections_partner ON connections(partner_sub)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                message TEXT NOT NULL,
                from_sub TEXT NOT NULL,
                to_sub TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_messages_to_time ON messages(to_sub, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_messages_from ON messages(from_sub)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn find_connections(&self, column: &str, value: &str) -> StoreResult<Vec<ConnectionRecord>> {
        let sql = format!(
            "SELECT {} FROM connections WHERE {} = ? ORDER BY rowid",
            CONNECTION_COLUMNS, column
        );
        let rows: Vec<ConnectionRow> = sqlx::query_as(&sql).bind(value).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(connection_id, subscription_type, owner, partner)| {
                ConnectionRecord::new(connection_id, subscription_type, owner, partner)
            })
            .collect())
    }
}

#[async_trait]
impl ConnectionDirectory for SqliteStore {
    async fn register(&self, record: ConnectionRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO connections (connection_id, subscription_type, owner_sub, partner_sub)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(connection_id) DO UPDATE SET
                subscription_type = excluded.subscription_type,
                owner_sub = excluded.owner_sub,
                partner_sub = excluded.partner_sub
            "#,
        )
        .bind(&record.connection_id)
        .bind(&record.subscription_type)
        .bind(&record.owner_identity)
        .bind(&record.partner_identity)
        .execute(&self.pool)
        .await?;

        debug!("[Store] Registered connection {}", record.connection_id);
        Ok(())
    }

    async fn remove(&self, connection_id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM connections WHERE connection_id = ?")
            .bind(connection_id)
            .execute(&self.pool)
            .await?;

        debug!(
            "[Store] Removed connection {} ({} rows)",
            connection_id,
            result.rows_affected()
        );
        Ok(())
    }

    async fn find_by_connection_id(&self, connection_id: &str) -> StoreResult<Vec<ConnectionRecord>> {
        self.find_connections("connection_id", connection_id).await
    }

    async fn find_by_subscription_type(&self, subscription_type: &str) -> StoreResult<Vec<ConnectionRecord>> {
        self.find_connections("subscription_type", subscription_type).await
    }

    async fn find_by_owner_identity(&self, owner_identity: &str) -> StoreResult<Vec<ConnectionRecord>> {
        self.find_connections("owner_sub", owner_identity).await
    }

    async fn find_by_partner_identity(&self, partner_identity: &str) -> StoreResult<Vec<ConnectionRecord>> {
        self.find_connections("partner_sub", partner_identity).await
    }
}

#[async_trait]
impl MessageLog for SqliteStore {
    async fn append(
        &self,
        content: &str,
        from_identity: &str,
        to_identity: &str,
        timestamp: i64,
    ) -> StoreResult<MessageRecord> {
        let message_id = new_message_id();

        let result = sqlx::query(
            "INSERT INTO messages (message_id, message, from_sub, to_sub, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message_id)
        .bind(content)
        .bind(from_identity)
        .bind(to_identity)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        Ok(MessageRecord {
            message_id,
            content: content.to_string(),
            from_identity: from_identity.to_string(),
            to_identity: to_identity.to_string(),
            timestamp,
            sequence: result.last_insert_rowid(),
        })
    }

    async fn find_exchange(&self, from_identity: &str, to_identity: &str) -> StoreResult<Vec<MessageRecord>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE to_sub = ? AND from_sub = ? ORDER BY timestamp, rowid",
            MESSAGE_COLUMNS
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(to_identity)
            .bind(from_identity)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(sequence, message_id, content, from, to, timestamp)| MessageRecord {
                message_id,
                content,
                from_identity: from,
                to_identity: to,
                timestamp,
                sequence,
            })
            .collect())
    }
}
