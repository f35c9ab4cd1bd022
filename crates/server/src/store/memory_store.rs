//! In-memory connection directory and message log
//!
//! Used for tests and single-process deployments (`PAIRWIRE_STORE=memory`).

use super::{new_message_id, ConnectionDirectory, MessageLog, StoreError, StoreResult};
use crate::models::{ConnectionRecord, MessageRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    /// connection_id -> (insertion seq, record)
    connections: RwLock<HashMap<String, (u64, ConnectionRecord)>>,
    next_seq: RwLock<u64>,
    messages: RwLock<Vec<MessageRecord>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    async fn find_where<F>(&self, predicate: F) -> StoreResult<Vec<ConnectionRecord>>
    where
        F: Fn(&ConnectionRecord) -> bool,
    {
        self.check()?;
        let connections = self.connections.read().await;
        let mut matches: Vec<&(u64, ConnectionRecord)> =
            connections.values().filter(|(_, r)| predicate(r)).collect();
        matches.sort_by_key(|(seq, _)| *seq);
        Ok(matches.into_iter().map(|(_, r)| r.clone()).collect())
    }
}

#[async_trait]
impl ConnectionDirectory for MemoryStore {
    async fn register(&self, record: ConnectionRecord) -> StoreResult<()> {
        self.check()?;
        let mut connections = self.connections.write().await;
        let seq = match connections.get(&record.connection_id) {
            Some((seq, _)) => *seq,
            None => {
                let mut next = self.next_seq.write().await;
                *next += 1;
                *next
            }
        };
        connections.insert(record.connection_id.clone(), (seq, record));
        Ok(())
    }

    async fn remove(&self, connection_id: &str) -> StoreResult<()> {
        self.check()?;
        self.connections.write().await.remove(connection_id);
        Ok(())
    }

    async fn find_by_connection_id(&self, connection_id: &str) -> StoreResult<Vec<ConnectionRecord>> {
        self.find_where(|r| r.connection_id == connection_id).await
    }

    async fn find_by_subscription_type(&self, subscription_type: &str) -> StoreResult<Vec<ConnectionRecord>> {
        self.find_where(|r| r.subscription_type == subscription_type).await
    }

    async fn find_by_owner_identity(&self, owner_identity: &str) -> StoreResult<Vec<ConnectionRecord>> {
        self.find_where(|r| r.owner_identity == owner_identity).await
    }

    async fn find_by_partner_identity(&self, partner_identity: &str) -> StoreResult<Vec<ConnectionRecord>> {
        self.find_where(|r| r.partner_identity == partner_identity).await
    }
}

#[async_trait]
impl MessageLog for MemoryStore {
    async fn append(
        &self,
        content: &str,
        from_identity: &str,
        to_identity: &str,
        timestamp: i64,
    ) -> StoreResult<MessageRecord> {
        self.check()?;
        let mut messages = self.messages.write().await;
        let record = MessageRecord {
            message_id: new_message_id(),
            content: content.to_string(),
            from_identity: from_identity.to_string(),
            to_identity: to_identity.to_string(),
            timestamp,
            sequence: messages.len() as i64 + 1,
        };
        messages.push(record.clone());
        Ok(record)
    }

    async fn find_exchange(&self, from_identity: &str, to_identity: &str) -> StoreResult<Vec<MessageRecord>> {
        self.check()?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.from_identity == from_identity && m.to_identity == to_identity)
            .cloned()
            .collect())
    }
}
