//! Group fanout to every subscriber of a subscription type.

use crate::error::Result;
use crate::gateway::PushGateway;
use crate::models::FanoutReport;
use crate::protocol::Outbound;
use crate::store::ConnectionDirectory;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct BroadcastRouter {
    directory: Arc<dyn ConnectionDirectory>,
    gateway: PushGateway,
}

impl BroadcastRouter {
    pub fn new(directory: Arc<dyn ConnectionDirectory>, gateway: PushGateway) -> Self {
        Self { directory, gateway }
    }

    /// Push `message` to every subscriber of `subscription_type` except
    /// `exclude_connection_id`. Recipients fail independently.
    pub async fn broadcast(
        &self,
        subscription_type: &str,
        message: &Outbound,
        exclude_connection_id: Option<&str>,
    ) -> Result<FanoutReport> {
        let subscribers: Vec<_> = self
            .directory
            .find_by_subscription_type(subscription_type)
            .await?
            .into_iter()
            .filter(|record| Some(record.connection_id.as_str()) != exclude_connection_id)
            .collect();

        if subscribers.is_empty() {
            info!("[Broadcast] No subscribers to {:?}", subscription_type);
            return Ok(FanoutReport::default());
        }

        let report = self.gateway.fan_out(&subscribers, message).await;
        info!(
            "[Broadcast] {:?}: {}/{} delivered, {} stale removed",
            subscription_type, report.delivered, report.attempted, report.removed
        );
        Ok(report)
    }
}
