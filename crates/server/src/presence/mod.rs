//! Presence coordination
//!
//! Connection lifecycle (connect/disconnect) with online/offline fanout to
//! every connection that declared the affected identity as its partner, and
//! the on-demand status query.
//!
//! Presence for an identity is the OR over all of its live connections.
//! Directory mutation and notification are not atomic.

use crate::error::Result;
use crate::gateway::PushGateway;
use crate::identity::IdentityDirectory;
use crate::models::{ConnectionRecord, FanoutReport};
use crate::protocol::Outbound;
use crate::store::ConnectionDirectory;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct PresenceCoordinator {
    directory: Arc<dyn ConnectionDirectory>,
    identities: Arc<dyn IdentityDirectory>,
    gateway: PushGateway,
    /// Push ISONLINE "0" on status queries for offline identities
    explicit_offline: bool,
}

impl PresenceCoordinator {
    pub fn new(
        directory: Arc<dyn ConnectionDirectory>,
        identities: Arc<dyn IdentityDirectory>,
        gateway: PushGateway,
        explicit_offline: bool,
    ) -> Self {
        Self {
            directory,
            identities,
            gateway,
            explicit_offline,
        }
    }

    /// Register a connection and tell every peer expecting its owner that
    /// the owner is online.
    pub async fn connect(&self, record: ConnectionRecord) -> Result<FanoutReport> {
        let owner = record.owner_identity.clone();
        let connection_id = record.connection_id.clone();

        self.directory.register(record).await?;
        info!("[Presence] {} connected as {}", connection_id, owner);

        let watchers = self.directory.find_by_partner_identity(&owner).await?;
        let report = self.gateway.fan_out(&watchers, &Outbound::presence(true)).await;

        info!(
            "[Presence] Online notice for {} reached {}/{} peers",
            owner, report.delivered, report.attempted
        );
        Ok(report)
    }

    /// Remove a connection and, if its owner has no other live connection,
    /// tell every peer expecting the owner that it went offline.
    pub async fn disconnect(&self, connection_id: &str) -> Result<FanoutReport> {
        let existing = self.directory.find_by_connection_id(connection_id).await?;
        self.directory.remove(connection_id).await?;

        let Some(record) = existing.into_iter().next() else {
            info!("[Presence] {} disconnected (no record)", connection_id);
            return Ok(FanoutReport::default());
        };
        let owner = record.owner_identity;
        info!("[Presence] {} disconnected ({})", connection_id, owner);

        if !self.directory.find_by_owner_identity(&owner).await?.is_empty() {
            info!("[Presence] {} still online on another connection", owner);
            return Ok(FanoutReport::default());
        }

        let watchers = self.directory.find_by_partner_identity(&owner).await?;
        let report = self.gateway.fan_out(&watchers, &Outbound::presence(false)).await;

        info!(
            "[Presence] Offline notice for {} reached {}/{} peers",
            owner, report.delivered, report.attempted
        );
        Ok(report)
    }

    /// Owner registered for a live connection.
    pub async fn owner_of(&self, connection_id: &str) -> Result<Option<String>> {
        let found = self.directory.find_by_connection_id(connection_id).await?;
        Ok(found.into_iter().next().map(|record| record.owner_identity))
    }

    /// Whether `identity` has at least one live connection.
    pub async fn is_online(&self, identity: &str) -> Result<bool> {
        Ok(!self.directory.find_by_owner_identity(identity).await?.is_empty())
    }

    /// Push the target's username, then its presence, to the requester.
    ///
    /// Without `explicit_offline` an offline target produces no presence push.
    pub async fn status(&self, requester_connection_id: &str, target: &str) -> Result<bool> {
        let username = self.identities.find_user_by_sub(target).await.map_err(|e| {
            warn!("[Presence] Failed to find user by sub {}: {}", target, e);
            e
        })?;
        self.gateway
            .send(requester_connection_id, &Outbound::partner_info(username))
            .await;

        let online = self.is_online(target).await?;
        if online || self.explicit_offline {
            self.gateway
                .send(requester_connection_id, &Outbound::presence(online))
                .await;
        }
        Ok(online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{Failure, RecordingTransport};
    use crate::gateway::GatewayConfig;
    use crate::identity::StaticIdentity;
    use crate::store::MemoryStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
        presence: PresenceCoordinator,
    }

    fn fixture(explicit_offline: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::new();
        let gateway = PushGateway::new(store.clone(), transport.clone(), GatewayConfig::default());
        let identities = Arc::new(StaticIdentity::new().with_user("bob", "Bob"));
        let presence = PresenceCoordinator::new(store.clone(), identities, gateway, explicit_offline);
        Fixture {
            store,
            transport,
            presence,
        }
    }

    #[tokio::test]
    async fn test_connect_notifies_expecting_partner_once() {
        let f = fixture(false);
        f.presence
            .connect(ConnectionRecord::new("bob-1", "chat", "bob", "alice"))
            .await
            .unwrap();

        let report = f
            .presence
            .connect(ConnectionRecord::new("alice-1", "chat", "alice", "bob"))
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(
            f.transport.payloads_for("bob-1"),
            vec![json!({"action": "ISONLINE", "value": "1"})]
        );
        assert!(f.transport.payloads_for("alice-1").is_empty());
    }

    #[tokio::test]
    async fn test_partner_declaration_is_one_sided() {
        let f = fixture(false);
        // carol expects alice, but alice does not expect carol
        f.presence
            .connect(ConnectionRecord::new("carol-1", "chat", "carol", "alice"))
            .await
            .unwrap();
        f.presence
            .connect(ConnectionRecord::new("alice-1", "chat", "alice", "bob"))
            .await
            .unwrap();

        assert_eq!(f.transport.payloads_for("carol-1").len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_offline() {
        let f = fixture(false);
        f.store
            .register(ConnectionRecord::new("bob-1", "chat", "bob", "alice"))
            .await
            .unwrap();
        f.store
            .register(ConnectionRecord::new("alice-1", "chat", "alice", "bob"))
            .await
            .unwrap();

        let report = f.presence.disconnect("alice-1").await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(
            f.transport.payloads_for("bob-1"),
            vec![json!({"action": "ISONLINE", "value": "0"})]
        );
        assert!(f.store.find_by_connection_id("alice-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_connection_is_quiet() {
        let f = fixture(false);
        let report = f.presence.disconnect("ghost").await.unwrap();
        assert_eq!(report, FanoutReport::default());
        assert!(f.transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_with_other_device_keeps_presence() {
        let f = fixture(false);
        for record in [
            ConnectionRecord::new("bob-1", "chat", "bob", "alice"),
            ConnectionRecord::new("alice-phone", "chat", "alice", "bob"),
            ConnectionRecord::new("alice-laptop", "chat", "alice", "bob"),
        ] {
            f.store.register(record).await.unwrap();
        }

        f.presence.disconnect("alice-phone").await.unwrap();
        assert!(f.transport.payloads_for("bob-1").is_empty());
        assert!(f.presence.is_online("alice").await.unwrap());

        f.presence.disconnect("alice-laptop").await.unwrap();
        assert_eq!(f.transport.payloads_for("bob-1").len(), 1);
        assert!(!f.presence.is_online("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_watcher_is_cleaned_during_fanout() {
        let f = fixture(false);
        f.store
            .register(ConnectionRecord::new("bob-1", "chat", "bob", "alice"))
            .await
            .unwrap();
        f.transport.fail("bob-1", Failure::Gone);

        let report = f
            .presence
            .connect(ConnectionRecord::new("alice-1", "chat", "alice", "bob"))
            .await
            .unwrap();

        assert_eq!(report.removed, 1);
        assert!(f.store.find_by_connection_id("bob-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_online_pushes_two_payloads() {
        let f = fixture(false);
        f.store
            .register(ConnectionRecord::new("bob-1", "chat", "bob", "alice"))
            .await
            .unwrap();

        assert!(f.presence.status("alice-1", "bob").await.unwrap());
        assert_eq!(
            f.transport.payloads_for("alice-1"),
            vec![
                json!({"action": "PARTNERINFO", "value": "Bob"}),
                json!({"action": "ISONLINE", "value": "1"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_status_offline_is_silent_by_default() {
        let f = fixture(false);
        assert!(!f.presence.status("alice-1", "bob").await.unwrap());
        assert_eq!(
            f.transport.payloads_for("alice-1"),
            vec![json!({"action": "PARTNERINFO", "value": "Bob"})]
        );
    }

    #[tokio::test]
    async fn test_status_offline_explicit() {
        let f = fixture(true);
        f.presence.status("alice-1", "bob").await.unwrap();
        assert_eq!(
            f.transport.payloads_for("alice-1")[1],
            json!({"action": "ISONLINE", "value": "0"})
        );
    }

    #[tokio::test]
    async fn test_status_unknown_user_fails_without_push() {
        let f = fixture(false);
        assert!(f.presence.status("alice-1", "mallory").await.is_err());
        assert!(f.transport.delivered().is_empty());
    }
}
