//! JSON document backend.
//!
//! The whole cache lives in one pretty-printed JSON object on disk:
//!
//! ```json
//! { "AWP | Asiimov (Field-Tested)": { "price": "$45.50", "last_updated": 1718000000 } }
//! ```
//!
//! Every `put` reads the document, replaces one key, and rewrites the
//! file. A missing or corrupt file reads as an empty document.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::CacheBackend;
use crate::types::StorageError;

type Document = serde_json::Map<String, serde_json::Value>;

/// File-backed cache store. Owns its path exclusively within the process.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_document(&self) -> Document {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Cache file not found, starting empty");
                return Document::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read cache file, treating as empty");
                return Document::new();
            }
        };

        match serde_json::from_str::<Document>(&contents) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache file is not a JSON object, treating as empty");
                Document::new()
            }
        }
    }

    async fn write_document(&self, doc: &Document) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(doc)?;
        // One temp file per write; concurrent writers never share one.
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|source| StorageError::Io {
                location: tmp.display().to_string(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StorageError::Io {
                location: self.path.display().to_string(),
                source,
            })?;

        debug!(path = %self.path.display(), entries = doc.len(), "Cache file written");
        Ok(())
    }
}

#[async_trait]
impl<T> CacheBackend<T> for JsonFileStore
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<T>, StorageError> {
        let doc = self.read_document().await;
        let Some(value) = doc.get(key) else {
            return Ok(None);
        };
        match serde_json::from_value::<T>(value.clone()) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // A malformed entry behaves like a missing one and gets
                // overwritten on the next put.
                warn!(path = %self.path.display(), key, error = %e, "Malformed cache entry ignored");
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: T) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await;
        doc.insert(key.to_string(), serde_json::to_value(value)?);
        self.write_document(&doc).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.read_document().await.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InventoryCacheEntry, PriceCacheEntry};

    fn temp_path() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("banwatch_test_cache_{}.json", uuid::Uuid::new_v4()));
        p
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let path = temp_path();
        let store = JsonFileStore::new(&path);
        let entry = PriceCacheEntry { price: "$45.50".into(), last_updated: 1_700_000_000 };

        store.put("AWP | Asiimov (Field-Tested)", entry.clone()).await.unwrap();
        let loaded: Option<PriceCacheEntry> =
            store.get("AWP | Asiimov (Field-Tested)").await.unwrap();
        assert_eq!(loaded, Some(entry));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_file_format_is_human_readable() {
        let path = temp_path();
        let store = JsonFileStore::new(&path);
        let entry = InventoryCacheEntry { inventory: "No items found".into(), last_updated: 5 };
        store.put("76561197960287930", entry).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["76561197960287930"]["inventory"], "No items found");
        assert_eq!(doc["76561197960287930"]["last_updated"], 5);
        assert!(raw.contains('\n'), "document should be pretty-printed");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let store = JsonFileStore::new(temp_path());
        let loaded: Option<PriceCacheEntry> = store.get("anything").await.unwrap();
        assert!(loaded.is_none());
        let keys = CacheBackend::<PriceCacheEntry>::keys(&store).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_empty_and_is_replaced() {
        let path = temp_path();
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(&path);

        let loaded: Option<PriceCacheEntry> = store.get("x").await.unwrap();
        assert!(loaded.is_none());

        let entry = PriceCacheEntry { price: "$0.03".into(), last_updated: 1 };
        store.put("x", entry.clone()).await.unwrap();
        let loaded: Option<PriceCacheEntry> = store.get("x").await.unwrap();
        assert_eq!(loaded, Some(entry));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_put_preserves_other_entries() {
        let path = temp_path();
        let store = JsonFileStore::new(&path);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let entry = PriceCacheEntry { price: format!("${i}.00"), last_updated: i as i64 };
            store.put(name, entry).await.unwrap();
        }
        let mut keys = CacheBackend::<PriceCacheEntry>::keys(&store).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_a_miss() {
        let path = temp_path();
        std::fs::write(&path, r#"{"x": {"price": 12}}"#).unwrap();
        let store = JsonFileStore::new(&path);
        let loaded: Option<PriceCacheEntry> = store.get("x").await.unwrap();
        assert!(loaded.is_none());

        let _ = std::fs::remove_file(&path);
    }
}
