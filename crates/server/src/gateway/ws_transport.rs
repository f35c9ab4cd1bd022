//! WebSocket transport
//!
//! Maps connection ids to the outbound queue of the socket task that owns
//! the channel. An id with no queue, or whose queue has been closed by its
//! socket task, is reported as gone.

use super::{Transport, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-socket buffered payloads before a push starts waiting
pub const OUTBOUND_QUEUE: usize = 64;

#[derive(Default)]
pub struct WsTransport {
    sockets: RwLock<HashMap<String, mpsc::Sender<String>>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an outbound queue for a socket. The socket task drains the
    /// returned receiver into the WebSocket.
    pub fn attach(&self, connection_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        self.sockets.write().insert(connection_id.to_string(), tx);
        debug!("[WsTransport] Attached {}", connection_id);
        rx
    }

    pub fn detach(&self, connection_id: &str) {
        if self.sockets.write().remove(connection_id).is_some() {
            debug!("[WsTransport] Detached {}", connection_id);
        }
    }

    pub fn is_attached(&self, connection_id: &str) -> bool {
        self.sockets.read().contains_key(connection_id)
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.read().is_empty()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn post_to_connection(&self, connection_id: &str, payload: &str) -> Result<(), TransportError> {
        let sender = self.sockets.read().get(connection_id).cloned();
        let Some(sender) = sender else {
            return Err(TransportError::Gone);
        };

        sender
            .send(payload.to_string())
            .await
            .map_err(|_| TransportError::Gone)
    }
}
