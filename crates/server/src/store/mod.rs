//! Connection directory and message log storage
//!
//! Both seams are async traits so components can be handed either the
//! SQLite-backed store or the in-memory one.

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

use crate::models::{ConnectionRecord, MessageRecord};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Keyed storage of live connection records.
///
/// Lookups return unordered sets; callers must not rely on ordering.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Upsert a record. Last write wins.
    async fn register(&self, record: ConnectionRecord) -> StoreResult<()>;

    /// Delete a record if present. Removing an absent id is not an error.
    async fn remove(&self, connection_id: &str) -> StoreResult<()>;

    async fn find_by_connection_id(&self, connection_id: &str) -> StoreResult<Vec<ConnectionRecord>>;

    async fn find_by_subscription_type(&self, subscription_type: &str) -> StoreResult<Vec<ConnectionRecord>>;

    async fn find_by_owner_identity(&self, owner_identity: &str) -> StoreResult<Vec<ConnectionRecord>>;

    async fn find_by_partner_identity(&self, partner_identity: &str) -> StoreResult<Vec<ConnectionRecord>>;
}

/// Append-only message storage.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Persist a new message under a freshly generated id.
    async fn append(
        &self,
        content: &str,
        from_identity: &str,
        to_identity: &str,
        timestamp: i64,
    ) -> StoreResult<MessageRecord>;

    /// All messages sent from `from_identity` to `to_identity`.
    async fn find_exchange(&self, from_identity: &str, to_identity: &str) -> StoreResult<Vec<MessageRecord>>;
}

pub(crate) fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
