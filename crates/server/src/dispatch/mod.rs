//! Control message dispatch
//!
//! Routes each inbound control message to the component that owns it. Every
//! invocation is independent; all shared state lives in the directory.

use crate::broadcast::BroadcastRouter;
use crate::error::{Error, Result};
use crate::gateway::PushGateway;
use crate::messaging::MessageRouter;
use crate::models::{ConnectionRecord, CHAT_SUBSCRIPTION};
use crate::presence::PresenceCoordinator;
use crate::protocol::{ConnectParams, ControlMessage, GetMessagesFields, Outbound, SendMessageFields};
use axum::http::StatusCode;
use tracing::{debug, error, warn};

/// Request-level result of handling one control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub status: StatusCode,
    pub body: &'static str,
}

impl DispatchOutcome {
    fn ok(body: &'static str) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    presence: PresenceCoordinator,
    messages: MessageRouter,
    broadcast: BroadcastRouter,
    gateway: PushGateway,
}

impl Dispatcher {
    pub fn new(
        presence: PresenceCoordinator,
        messages: MessageRouter,
        broadcast: BroadcastRouter,
        gateway: PushGateway,
    ) -> Self {
        Self {
            presence,
            messages,
            broadcast,
            gateway,
        }
    }

    /// CONNECT: register the channel under the authorized owner.
    pub async fn connect(&self, connection_id: &str, params: &ConnectParams, owner: &str) -> Result<()> {
        params.validate()?;
        let record = ConnectionRecord::new(connection_id, &params.connection_type, owner, &params.sub);
        self.presence.connect(record).await?;
        Ok(())
    }

    /// DISCONNECT: derived from the channel closing.
    pub async fn disconnect(&self, connection_id: &str) -> DispatchOutcome {
        match self.presence.disconnect(connection_id).await {
            Ok(_) => DispatchOutcome::ok("Socket successfully terminated."),
            Err(e) => {
                error!("[Dispatch] Unable to terminate socket connection {}: {}", connection_id, e);
                DispatchOutcome {
                    status: e.status(),
                    body: "Unable to terminate socket.",
                }
            }
        }
    }

    /// Handle one text frame received on `connection_id`.
    pub async fn dispatch(&self, connection_id: &str, text: &str) -> DispatchOutcome {
        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("[Dispatch] Rejected frame from {}: {}", connection_id, e);
                let err = Error::from(e);
                self.reply_error(connection_id, &err).await;
                return DispatchOutcome {
                    status: err.status(),
                    body: "Invalid request",
                };
            }
        };

        let action = message.action();
        debug!("[Dispatch] {} from {}", action, connection_id);

        let (result, success_body, failure_body) = match message {
            ControlMessage::Ping => (
                self.ping(connection_id).await,
                "Default socket response",
                "Default socket response error.",
            ),
            ControlMessage::SendMessage(fields) => (
                self.send_message(connection_id, &fields).await,
                "Message delivered",
                "Failed to store message and send message to partner user",
            ),
            ControlMessage::GetMessages(fields) => (
                self.fetch_history(connection_id, &fields).await,
                "Logs delivered",
                "Failed to deliver logs",
            ),
            ControlMessage::Greeting(fields) => (
                self.broadcast
                    .broadcast(CHAT_SUBSCRIPTION, &Outbound::greeting(fields.message), Some(connection_id))
                    .await
                    .map(|_| ()),
                "Greeting delivered",
                "Unable to generate greeting.",
            ),
            ControlMessage::Status(fields) => (
                self.presence
                    .status(connection_id, &fields.partner_sub)
                    .await
                    .map(|_| ()),
                "Status delivered",
                "Unable to send user status.",
            ),
        };

        match result {
            Ok(()) => DispatchOutcome::ok(success_body),
            Err(e) => {
                error!("[Dispatch] {} from {} failed: {}", action, connection_id, e);
                self.reply_error(connection_id, &e).await;
                DispatchOutcome {
                    status: e.status(),
                    body: failure_body,
                }
            }
        }
    }

    async fn send_message(&self, connection_id: &str, fields: &SendMessageFields) -> Result<()> {
        self.require_party(connection_id, &[fields.from_sub.as_str()]).await?;
        self.messages
            .send_message(&fields.message, &fields.from_sub, &fields.to_sub, fields.timestamp)
            .await?;
        Ok(())
    }

    async fn fetch_history(&self, connection_id: &str, fields: &GetMessagesFields) -> Result<()> {
        self.require_party(connection_id, &[fields.from_sub.as_str(), fields.to_sub.as_str()])
            .await?;
        self.messages
            .fetch_history(connection_id, &fields.from_sub, &fields.to_sub)
            .await?;
        Ok(())
    }

    /// The connection's owner must be one of `parties`.
    async fn require_party(&self, connection_id: &str, parties: &[&str]) -> Result<()> {
        match self.presence.owner_of(connection_id).await? {
            Some(owner) if parties.contains(&owner.as_str()) => Ok(()),
            owner => {
                let claimed = parties.join(",");
                warn!(
                    "[Dispatch] {} (owner {:?}) claimed {}",
                    connection_id, owner, claimed
                );
                Err(Error::AuthFailSubjectMismatch { claimed })
            }
        }
    }

    async fn ping(&self, connection_id: &str) -> Result<()> {
        self.gateway.send(connection_id, &Outbound::pong()).await;
        Ok(())
    }

    async fn reply_error(&self, connection_id: &str, err: &Error) {
        self.gateway
            .send(connection_id, &Outbound::error(err.client_message()))
            .await;
    }
}
