//! Direct messaging: persist first, then forward.

use crate::error::Result;
use crate::gateway::PushGateway;
use crate::models::{MessageRecord, PushOutcome};
use crate::protocol::Outbound;
use crate::store::{ConnectionDirectory, MessageLog};
use std::sync::Arc;
use tracing::{debug, info};

/// What happened to a sent message after it was stored.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub record: MessageRecord,
    /// Connection the message was forwarded to, if the recipient was online
    pub forwarded_to: Option<String>,
    pub outcome: PushOutcome,
}

#[derive(Clone)]
pub struct MessageRouter {
    directory: Arc<dyn ConnectionDirectory>,
    log: Arc<dyn MessageLog>,
    gateway: PushGateway,
}

impl MessageRouter {
    pub fn new(directory: Arc<dyn ConnectionDirectory>, log: Arc<dyn MessageLog>, gateway: PushGateway) -> Self {
        Self {
            directory,
            log,
            gateway,
        }
    }

    /// Store the message, then forward it to the recipient if online.
    ///
    /// Only the first of the recipient's connections gets the message; other
    /// devices pick it up through history. Delivery failure does not fail
    /// the call once the message is stored.
    pub async fn send_message(&self, content: &str, from: &str, to: &str, timestamp: i64) -> Result<SendReceipt> {
        let record = self.log.append(content, from, to, timestamp).await?;
        debug!("[Messages] Stored {} ({} -> {})", record.message_id, from, to);

        let recipients = self.directory.find_by_owner_identity(to).await?;
        let Some(target) = recipients.into_iter().next() else {
            info!("[Messages] {} offline, {} kept for history", to, record.message_id);
            return Ok(SendReceipt {
                record,
                forwarded_to: None,
                outcome: PushOutcome::dropped(),
            });
        };

        let message = Outbound::Message {
            message: record.content.clone(),
            from_sub: record.from_identity.clone(),
            to_sub: record.to_identity.clone(),
            timestamp: record.timestamp,
        };
        let outcome = self.gateway.send(&target.connection_id, &message).await;

        Ok(SendReceipt {
            record,
            forwarded_to: Some(target.connection_id),
            outcome,
        })
    }

    /// Both directions of the conversation between `a` and `b`, oldest first.
    /// Equal timestamps keep insertion order.
    pub async fn history(&self, a: &str, b: &str) -> Result<Vec<MessageRecord>> {
        let mut messages = self.log.find_exchange(a, b).await?;
        if a != b {
            messages.extend(self.log.find_exchange(b, a).await?);
        }
        messages.sort_by_key(|m| (m.timestamp, m.sequence));
        Ok(messages)
    }

    /// Push the whole conversation to the requesting connection as one batch.
    /// Nothing is pushed when the conversation is empty.
    pub async fn fetch_history(&self, requester_connection_id: &str, a: &str, b: &str) -> Result<Vec<MessageRecord>> {
        let messages = self.history(a, b).await?;
        if messages.is_empty() {
            debug!("[Messages] No history between {} and {}", a, b);
            return Ok(messages);
        }

        let batch = Outbound::History {
            messages: messages.clone(),
        };
        self.gateway.send(requester_connection_id, &batch).await;
        info!(
            "[Messages] Delivered {} messages to {}",
            messages.len(),
            requester_connection_id
        );
        Ok(messages)
    }
}
