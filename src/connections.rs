//! Process-wide resources shared by every scenario.
//!
//! Channels and pools are created lazily so a suite whose features never
//! touch a service does not need it to be up.

use crate::bus::{EventBus, MemoryBus, NatsBus};
use crate::config::{ConfigError, SuiteConfig};
use anyhow::{Context as _, Result};
use indexmap::IndexMap;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// RPC channels, database pools and the event bus.
#[derive(Clone)]
pub struct Connections {
    channels: IndexMap<String, Channel>,
    databases: IndexMap<String, PgPool>,
    bus: Arc<dyn EventBus>,
    nats: Option<NatsBus>,
}

impl std::fmt::Debug for Connections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connections")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("databases", &self.databases.keys().collect::<Vec<_>>())
            .field("nats", &self.nats.is_some())
            .finish()
    }
}

impl Connections {
    /// Build every configured resource.
    ///
    /// The event bus is connected eagerly when a NATS URL is configured;
    /// otherwise an in-process bus stands in.
    ///
    /// # Errors
    ///
    /// Fails when an address or URL is malformed or the broker is unreachable.
    pub async fn connect(config: &SuiteConfig) -> Result<Self> {
        let mut channels = IndexMap::with_capacity(config.services.len());
        for (name, addr) in &config.services {
            let endpoint = Endpoint::from_shared(format!("http://{addr}"))
                .with_context(|| format!("invalid address for service {name}: {addr}"))?
                .connect_timeout(CONNECT_TIMEOUT);
            channels.insert(name.clone(), endpoint.connect_lazy());
        }
        let mut databases = IndexMap::with_capacity(config.databases.len());
        for (name, db) in &config.databases {
            let pool = PgPoolOptions::new()
                .max_connections(db.max_connections)
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect_lazy(&db.url)
                .with_context(|| format!("invalid URL for database {name}"))?;
            databases.insert(name.clone(), pool);
        }
        let (bus, nats): (Arc<dyn EventBus>, Option<NatsBus>) = if config.nats.url.is_empty() {
            tracing::warn!("no event bus configured; using an in-process bus");
            (Arc::new(MemoryBus::new()), None)
        } else {
            let client = NatsBus::connect(&config.nats).await?;
            (Arc::new(client.clone()), Some(client))
        };
        tracing::info!(
            services = channels.len(),
            databases = databases.len(),
            "connections ready"
        );
        Ok(Self {
            channels,
            databases,
            bus,
            nats,
        })
    }

    /// Resources for runs that never leave the process.
    #[must_use]
    pub fn offline() -> Self {
        Self::with_bus(Arc::new(MemoryBus::new()))
    }

    /// Resources with no channels or pools and the given bus.
    #[must_use]
    pub fn with_bus(bus: Arc<dyn EventBus>) -> Self {
        Self {
            channels: IndexMap::new(),
            databases: IndexMap::new(),
            bus,
            nats: None,
        }
    }

    /// Channel to `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when the service is not configured.
    pub fn channel(&self, service: &str) -> Result<Channel, ConfigError> {
        self.channels
            .get(service)
            .cloned()
            .ok_or_else(|| ConfigError::Missing {
                kind: "service",
                name: service.to_owned(),
            })
    }

    /// Pool for the logical database `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when the database is not configured.
    pub fn database(&self, name: &str) -> Result<&PgPool, ConfigError> {
        self.databases.get(name).ok_or_else(|| ConfigError::Missing {
            kind: "database",
            name: name.to_owned(),
        })
    }

    /// Shared event bus.
    #[must_use]
    pub fn bus(&self) -> &dyn EventBus {
        self.bus.as_ref()
    }

    /// Close pools and flush the bus.
    pub async fn close(&self) {
        for (name, pool) in &self.databases {
            pool.close().await;
            tracing::debug!(database = %name, "pool closed");
        }
        if let Some(nats) = &self.nats {
            nats.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_resources_report_missing_entries() {
        let connections = Connections::offline();
        let err = connections.channel("bob").expect_err("no channels");
        assert_eq!(err.to_string(), "no service named 'bob' is configured");
        assert!(connections.database("bob").is_err());
    }

    #[tokio::test]
    async fn lazy_resources_are_built_without_servers() {
        let config = SuiteConfig::from_yaml(
            "services:\n  bob: 127.0.0.1:1\ndatabases:\n  bob:\n    url: postgres://u:p@127.0.0.1:1/bob\n",
        )
        .expect("config");
        let connections = Connections::connect(&config).await.expect("lazy connect");
        assert!(connections.channel("bob").is_ok());
        assert!(connections.database("bob").is_ok());
        connections.close().await;
    }

    #[tokio::test]
    async fn malformed_address_is_rejected() {
        let config = SuiteConfig::from_yaml("services:\n  bob: \"bad host:x:y\"\n").expect("config");
        let err = Connections::connect(&config).await.expect_err("bad address");
        assert!(format!("{err:#}").contains("service bob"), "{err:#}");
    }
}
