//! Platform → connector lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::StoreId;
use domain::Store;
use tokio::sync::RwLock;

use super::StoreConnector;
use crate::error::{ConnectorError, Result, SyncError};

/// Builds a connector for a configured store.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connect(&self, store: &Store) -> std::result::Result<Arc<dyn StoreConnector>, ConnectorError>;
}

/// Maps platform identifiers to factories and caches one connector per store.
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, Arc<dyn ConnectorFactory>>,
    cache: RwLock<HashMap<StoreId, Arc<dyn StoreConnector>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `platform` (case-insensitive).
    pub fn register(mut self, platform: &str, factory: impl ConnectorFactory + 'static) -> Self {
        self.factories
            .insert(platform.to_lowercase(), Arc::new(factory));
        self
    }

    pub fn supports(&self, platform: &str) -> bool {
        self.factories.contains_key(&platform.to_lowercase())
    }

    /// Returns the connector for `store`, building it on first use.
    pub async fn connector_for(&self, store: &Store) -> Result<Arc<dyn StoreConnector>> {
        if let Some(connector) = self.cache.read().await.get(&store.id) {
            return Ok(Arc::clone(connector));
        }

        let factory = self
            .factories
            .get(&store.platform.to_lowercase())
            .ok_or_else(|| SyncError::UnknownPlatform {
                store_id: store.id,
                platform: store.platform.clone(),
            })?;

        let connector = factory
            .connect(store)
            .await
            .map_err(|source| SyncError::Connector {
                store_id: store.id,
                source,
            })?;

        let mut cache = self.cache.write().await;
        let connector = cache.entry(store.id).or_insert(connector);
        Ok(Arc::clone(connector))
    }

    /// Drops cached connectors so credentials are re-read on next use.
    pub async fn invalidate(&self, store_id: StoreId) {
        self.cache.write().await.remove(&store_id);
    }
}
