//! SQLite key/value backend.
//!
//! Both caches can share one database; each store works inside its own
//! namespace of the `cache_entries` table. Entries are stored as JSON
//! text so the on-disk shape matches the JSON document backend.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::CacheBackend;
use crate::types::StorageError;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    key       TEXT NOT NULL,
    payload   TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
)";

pub struct SqliteStore {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteStore {
    /// Connect to `url` and make sure the table exists.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        info!(url, namespace, "SQLite cache store connected");
        Self::with_pool(pool, namespace).await
    }

    /// Reuse an existing pool (two namespaces over one database).
    pub async fn with_pool(pool: SqlitePool, namespace: &str) -> Result<Self, StorageError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self {
            pool,
            namespace: namespace.to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl<T> CacheBackend<T> for SqliteStore
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<T>, StorageError> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM cache_entries WHERE namespace = ?1 AND key = ?2",
        )
        .bind(self.namespace.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: T) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&value)?;
        sqlx::query(
            "INSERT INTO cache_entries (namespace, key, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET payload = excluded.payload",
        )
        .bind(self.namespace.as_str())
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        debug!(namespace = %self.namespace, key, "Cache entry upserted");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM cache_entries WHERE namespace = ?1 ORDER BY key",
        )
        .bind(self.namespace.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InventoryCacheEntry, PriceCacheEntry};

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = SqliteStore::with_pool(memory_pool().await, "prices").await.unwrap();
        let first = PriceCacheEntry { price: "Not Listed".into(), last_updated: 1 };
        let second = PriceCacheEntry { price: "$2.10".into(), last_updated: 2 };

        store.put("Glove Case", first).await.unwrap();
        store.put("Glove Case", second.clone()).await.unwrap();

        let loaded: Option<PriceCacheEntry> = store.get("Glove Case").await.unwrap();
        assert_eq!(loaded, Some(second));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let pool = memory_pool().await;
        let prices = SqliteStore::with_pool(pool.clone(), "prices").await.unwrap();
        let inventories = SqliteStore::with_pool(pool, "inventories").await.unwrap();

        let inv = InventoryCacheEntry { inventory: "Items:\n".into(), last_updated: 9 };
        inventories.put("76561197960287930", inv).await.unwrap();

        let missing: Option<PriceCacheEntry> = prices.get("76561197960287930").await.unwrap();
        assert!(missing.is_none());
        let keys = CacheBackend::<PriceCacheEntry>::keys(&prices).await.unwrap();
        assert!(keys.is_empty());
        let keys = CacheBackend::<InventoryCacheEntry>::keys(&inventories).await.unwrap();
        assert_eq!(keys, vec!["76561197960287930"]);
    }
}
