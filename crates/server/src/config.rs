//! Relay server configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::broadcast::BroadcastRouter;
use crate::dispatch::Dispatcher;
use crate::gateway::{GatewayConfig, PushGateway, WsTransport};
use crate::identity::{AuthorizationGate, IdentityDirectory, SqliteIdentity};
use crate::messaging::MessageRouter;
use crate::presence::PresenceCoordinator;
use crate::store::{ConnectionDirectory, MemoryStore, MessageLog, SqliteStore};

/// Where connection and message records live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Configuration for the relay server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// SQLite database (connections, messages, identities)
    pub db_path: PathBuf,
    /// Backend for connections and messages
    pub store_backend: StoreBackend,
    /// Upper bound for a single push
    pub push_timeout: Duration,
    /// Pushes in flight per fanout
    pub fanout_concurrency: usize,
    /// Answer status queries for offline identities with ISONLINE "0"
    pub explicit_offline_status: bool,
    /// Allowed CORS origin; permissive when unset
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            db_path: pairwire_common::db_path(),
            store_backend: StoreBackend::Sqlite,
            push_timeout: Duration::from_secs(5),
            fanout_concurrency: 16,
            explicit_offline_status: false,
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PAIRWIRE_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unparseable values keep the default.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = lookup("PAIRWIRE_PORT").and_then(|s| s.parse().ok()) {
            self.port = port;
        }
        if let Some(path) = lookup("PAIRWIRE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        match lookup("PAIRWIRE_STORE").as_deref() {
            Some("memory") => self.store_backend = StoreBackend::Memory,
            Some("sqlite") => self.store_backend = StoreBackend::Sqlite,
            _ => {}
        }
        if let Some(ms) = lookup("PAIRWIRE_PUSH_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            self.push_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = lookup("PAIRWIRE_FANOUT_CONCURRENCY").and_then(|s| s.parse::<usize>().ok()) {
            self.fanout_concurrency = n.max(1);
        }
        if let Some(flag) = lookup("PAIRWIRE_EXPLICIT_OFFLINE") {
            self.explicit_offline_status = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(origin) = lookup("CORS_ORIGIN").filter(|s| !s.is_empty()) {
            self.cors_origin = Some(origin);
        }
        self
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            push_timeout: self.push_timeout,
            fanout_concurrency: self.fanout_concurrency,
        }
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub dispatcher: Dispatcher,
    pub transport: Arc<WsTransport>,
    pub gate: Arc<dyn AuthorizationGate>,
}

impl AppState {
    /// Wire components from explicitly constructed handles.
    pub fn from_parts(
        config: ServerConfig,
        directory: Arc<dyn ConnectionDirectory>,
        log: Arc<dyn MessageLog>,
        identities: Arc<dyn IdentityDirectory>,
        gate: Arc<dyn AuthorizationGate>,
    ) -> Self {
        let transport = Arc::new(WsTransport::new());
        let gateway = PushGateway::new(directory.clone(), transport.clone(), config.gateway_config());

        let dispatcher = Dispatcher::new(
            PresenceCoordinator::new(
                directory.clone(),
                identities,
                gateway.clone(),
                config.explicit_offline_status,
            ),
            MessageRouter::new(directory.clone(), log, gateway.clone()),
            BroadcastRouter::new(directory, gateway.clone()),
            gateway,
        );

        Self {
            config,
            dispatcher,
            transport,
            gate,
        }
    }

    /// Open the configured stores and wire everything together.
    pub async fn build(config: ServerConfig) -> anyhow::Result<Self> {
        pairwire_common::ensure_parent(&config.db_path)?;

        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {:?}", config.db_path))?;

        let identity = Arc::new(SqliteIdentity::new(pool.clone()).await?);

        let (directory, log): (Arc<dyn ConnectionDirectory>, Arc<dyn MessageLog>) = match config.store_backend {
            StoreBackend::Sqlite => {
                let store = Arc::new(SqliteStore::from_pool(pool).await?);
                (store.clone() as Arc<dyn ConnectionDirectory>, store as Arc<dyn MessageLog>)
            }
            StoreBackend::Memory => {
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn ConnectionDirectory>, store as Arc<dyn MessageLog>)
            }
        };
        info!("[Config] Store backend: {:?}", config.store_backend);

        Ok(Self::from_parts(config, directory, log, identity.clone(), identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PAIRWIRE_PORT", "4000"),
            ("PAIRWIRE_STORE", "memory"),
            ("PAIRWIRE_PUSH_TIMEOUT_MS", "250"),
            ("PAIRWIRE_FANOUT_CONCURRENCY", "0"),
            ("PAIRWIRE_EXPLICIT_OFFLINE", "true"),
            ("CORS_ORIGIN", "https://app.example.com"),
        ]);
        let config = ServerConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.port, 4000);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.push_timeout, Duration::from_millis(250));
        assert_eq!(config.fanout_concurrency, 1);
        assert!(config.explicit_offline_status);
        assert_eq!(config.cors_origin.as_deref(), Some("https://app.example.com"));
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = ServerConfig::default().with_overrides(|k| match k {
            "PAIRWIRE_PORT" => Some("not-a-port".to_string()),
            "PAIRWIRE_STORE" => Some("redis".to_string()),
            _ => None,
        });

        assert_eq!(config.port, 3001);
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
    }
}
