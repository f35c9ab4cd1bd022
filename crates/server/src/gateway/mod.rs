//! Push gateway
//!
//! Every outbound payload goes through [`PushGateway`]. It is the only place
//! that deletes a connection record as a side effect of delivery: when the
//! transport reports the destination gone, the record is removed from the
//! directory. Delivery is at-most-once and never retried.

pub mod ws_transport;

pub use ws_transport::WsTransport;

use crate::models::{ConnectionRecord, FanoutReport, PushOutcome};
use crate::protocol::Outbound;
use crate::store::ConnectionDirectory;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel no longer exists and never will again
    #[error("connection gone")]
    Gone,
    #[error("push timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Failed(String),
}

/// Channel layer able to deliver a payload to a connection id.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_to_connection(&self, connection_id: &str, payload: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub push_timeout: Duration,
    pub fanout_concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            push_timeout: Duration::from_secs(5),
            fanout_concurrency: 16,
        }
    }
}

#[derive(Clone)]
pub struct PushGateway {
    directory: Arc<dyn ConnectionDirectory>,
    transport: Arc<dyn Transport>,
    config: GatewayConfig,
}

impl PushGateway {
    pub fn new(
        directory: Arc<dyn ConnectionDirectory>,
        transport: Arc<dyn Transport>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            directory,
            transport,
            config,
        }
    }

    /// Deliver a raw payload to one connection.
    pub async fn push(&self, connection_id: &str, payload: &str) -> PushOutcome {
        let attempt = tokio::time::timeout(
            self.config.push_timeout,
            self.transport.post_to_connection(connection_id, payload),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(self.config.push_timeout)));

        match attempt {
            Ok(()) => {
                debug!("[Gateway] Delivered to {}", connection_id);
                PushOutcome::delivered()
            }
            Err(TransportError::Gone) => {
                info!("[Gateway] Removing stale connection {}", connection_id);
                match self.directory.remove(connection_id).await {
                    Ok(()) => PushOutcome::gone(),
                    Err(e) => {
                        error!("[Gateway] Failed to remove stale connection {}: {}", connection_id, e);
                        PushOutcome::dropped()
                    }
                }
            }
            Err(e) => {
                warn!("[Gateway] Unable to deliver to {}: {}", connection_id, e);
                PushOutcome::dropped()
            }
        }
    }

    /// Serialize and deliver a protocol payload to one connection.
    pub async fn send(&self, connection_id: &str, message: &Outbound) -> PushOutcome {
        match message.to_payload() {
            Ok(payload) => self.push(connection_id, &payload).await,
            Err(e) => {
                error!("[Gateway] Failed to encode payload for {}: {}", connection_id, e);
                PushOutcome::dropped()
            }
        }
    }

    /// Deliver the same payload to every target. Each push is independent:
    /// a failure on one target does not affect the others.
    pub async fn fan_out(&self, targets: &[ConnectionRecord], message: &Outbound) -> FanoutReport {
        let mut report = FanoutReport::default();
        if targets.is_empty() {
            return report;
        }

        let payload = match message.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("[Gateway] Failed to encode fanout payload: {}", e);
                return report;
            }
        };

        // Each future owns its id so the fanout stays Send
        let ids: Vec<String> = targets.iter().map(|t| t.connection_id.clone()).collect();
        let payload = &payload;
        let outcomes: Vec<PushOutcome> = stream::iter(ids)
            .map(|id| async move { self.push(&id, payload).await })
            .buffer_unordered(self.config.fanout_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }

        debug!(
            "[Gateway] Fanout: {}/{} delivered, {} removed",
            report.delivered, report.attempted, report.removed
        );
        report
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Failure, RecordingTransport};
    use super::*;
    use crate::store::MemoryStore;

    async fn setup(ids: &[&str]) -> (Arc<MemoryStore>, Arc<RecordingTransport>, PushGateway) {
        let store = Arc::new(MemoryStore::new());
        for id in ids {
            store
                .register(ConnectionRecord::new(*id, "chat", format!("owner-{}", id), ""))
                .await
                .unwrap();
        }
        let transport = RecordingTransport::new();
        let gateway = PushGateway::new(
            store.clone(),
            transport.clone(),
            GatewayConfig {
                push_timeout: Duration::from_millis(50),
                fanout_concurrency: 4,
            },
        );
        (store, transport, gateway)
    }

    #[tokio::test]
    async fn test_successful_push() {
        let (_, transport, gateway) = setup(&["c1"]).await;

        let outcome = gateway.send("c1", &Outbound::pong()).await;
        assert_eq!(outcome, PushOutcome::delivered());
        assert_eq!(transport.payloads_for("c1")[0]["action"], "PONG");
    }

    #[tokio::test]
    async fn test_gone_connection_is_removed() {
        let (store, transport, gateway) = setup(&["c1"]).await;
        transport.fail("c1", Failure::Gone);

        let outcome = gateway.push("c1", "{}").await;
        assert_eq!(outcome, PushOutcome::gone());
        assert!(store.find_by_connection_id("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_record() {
        let (store, transport, gateway) = setup(&["c1"]).await;
        transport.fail("c1", Failure::Failed);

        let outcome = gateway.push("c1", "{}").await;
        assert_eq!(outcome, PushOutcome::dropped());
        assert_eq!(store.find_by_connection_id("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_push_times_out_without_removal() {
        let (store, transport, gateway) = setup(&["c1"]).await;
        transport.fail("c1", Failure::Hang);

        let outcome = gateway.push("c1", "{}").await;
        assert!(!outcome.delivered);
        assert!(!outcome.removed);
        assert_eq!(store.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_reports_not_removed() {
        let (store, transport, gateway) = setup(&["c1"]).await;
        transport.fail("c1", Failure::Gone);
        store.set_unavailable(true);

        let outcome = gateway.push("c1", "{}").await;
        assert_eq!(outcome, PushOutcome::dropped());
    }

    #[tokio::test]
    async fn test_fanout_isolates_failures() {
        let (store, transport, gateway) = setup(&["c1", "c2", "c3", "c4"]).await;
        transport.fail("c2", Failure::Gone);
        transport.fail("c4", Failure::Hang);

        let targets = store.find_by_subscription_type("chat").await.unwrap();
        let report = gateway.fan_out(&targets, &Outbound::greeting("hello")).await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(transport.payloads_for("c1").len(), 1);
        assert_eq!(transport.payloads_for("c3").len(), 1);
        assert!(store.find_by_connection_id("c2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fanout_runs_inside_spawned_task() {
        let (store, transport, gateway) = setup(&["c1", "c2"]).await;

        let report = tokio::spawn(async move {
            let targets = store.find_by_subscription_type("chat").await.unwrap();
            gateway.fan_out(&targets, &Outbound::presence(true)).await
        })
        .await
        .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(transport.payloads_for("c2")[0]["value"], "1");
    }
}
