//! Persistence layer for the price and inventory caches.
//!
//! Each cache owns one `CacheBackend`. Backends are keyed maps from a
//! string key to a timestamped entry:
//! - `JsonFileStore`: one human-readable JSON document per cache,
//!   rewritten wholesale on every update.
//! - `SqliteStore`: a namespaced key/value table.
//! - `MemoryStore`: process-local map, for tests.
//!
//! Writes are serialised inside one process. Two processes pointing at
//! the same JSON file can still lose each other's updates.

pub mod json;
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::types::{InventoryCacheEntry, PriceCacheEntry, StorageError};

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;

/// Keyed storage for one cache.
#[async_trait]
pub trait CacheBackend<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Fetch one entry. Missing keys are `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<T>, StorageError>;

    /// Insert or overwrite one entry.
    async fn put(&self, key: &str, value: T) -> Result<(), StorageError>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory backend. Entries are held as JSON values so the same entry
/// types work here as in the persistent stores.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<T> CacheBackend<T> for MemoryStore
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<T>, StorageError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The two persisted caches.
pub struct CacheStores {
    pub prices: Arc<dyn CacheBackend<PriceCacheEntry>>,
    pub inventory: Arc<dyn CacheBackend<InventoryCacheEntry>>,
}

/// Open both caches on the configured backend. SQLite puts them in one
/// database under separate namespaces.
pub async fn open_caches(cfg: &CacheConfig) -> Result<CacheStores> {
    match cfg.backend {
        CacheBackendKind::Json => {
            info!(prices = %cfg.price_path, inventory = %cfg.inventory_path, "Using JSON cache files");
            Ok(CacheStores {
                prices: Arc::new(JsonFileStore::new(&cfg.price_path)),
                inventory: Arc::new(JsonFileStore::new(&cfg.inventory_path)),
            })
        }
        CacheBackendKind::Sqlite => {
            let prices = SqliteStore::connect(&cfg.sqlite_url, "prices")
                .await
                .with_context(|| format!("Failed to open SQLite cache: {}", cfg.sqlite_url))?;
            let inventory = SqliteStore::with_pool(prices.pool().clone(), "inventory")
                .await
                .context("Failed to prepare SQLite inventory cache")?;
            Ok(CacheStores {
                prices: Arc::new(prices),
                inventory: Arc::new(inventory),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceCacheEntry;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let entry = PriceCacheEntry { price: "$1.00".into(), last_updated: 42 };
        store.put("Sticker | Crown (Foil)", entry.clone()).await.unwrap();

        let loaded: Option<PriceCacheEntry> = store.get("Sticker | Crown (Foil)").await.unwrap();
        assert_eq!(loaded, Some(entry));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_store_missing_key() {
        let store = MemoryStore::new();
        let loaded: Option<PriceCacheEntry> = store.get("nope").await.unwrap();
        assert!(loaded.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_keys_are_exact() {
        let store = MemoryStore::new();
        let entry = PriceCacheEntry { price: "$1.00".into(), last_updated: 1 };
        CacheBackend::<PriceCacheEntry>::put(&store, "AK-47 | Redline", entry.clone()).await.unwrap();
        CacheBackend::<PriceCacheEntry>::put(&store, "ak-47 | redline", entry).await.unwrap();
        let keys = CacheBackend::<PriceCacheEntry>::keys(&store).await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_open_sqlite_caches_share_database() {
        let cfg = CacheConfig {
            backend: CacheBackendKind::Sqlite,
            sqlite_url: "sqlite::memory:".to_string(),
            ..CacheConfig::default()
        };
        let stores = open_caches(&cfg).await.unwrap();
        let price = PriceCacheEntry { price: "$3.00".into(), last_updated: 7 };
        stores.prices.put("76561197960287930", price.clone()).await.unwrap();

        // Same key, different namespace.
        assert!(stores.inventory.get("76561197960287930").await.unwrap().is_none());
        assert_eq!(stores.prices.get("76561197960287930").await.unwrap(), Some(price));
    }

    #[tokio::test]
    async fn test_open_json_caches() {
        let dir = std::env::temp_dir();
        let cfg = CacheConfig {
            price_path: dir.join(format!("prices-{}.json", uuid::Uuid::new_v4())).display().to_string(),
            inventory_path: dir.join(format!("inv-{}.json", uuid::Uuid::new_v4())).display().to_string(),
            ..CacheConfig::default()
        };
        let stores = open_caches(&cfg).await.unwrap();
        let entry = InventoryCacheEntry { inventory: "No items found".into(), last_updated: 1 };
        stores.inventory.put("1", entry.clone()).await.unwrap();
        assert_eq!(stores.inventory.get("1").await.unwrap(), Some(entry));
        assert!(std::path::Path::new(&cfg.inventory_path).exists());
        assert!(!std::path::Path::new(&cfg.price_path).exists());
        let _ = std::fs::remove_file(&cfg.inventory_path);
    }
}
