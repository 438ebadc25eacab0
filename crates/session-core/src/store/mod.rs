//! Durable credential storage and the local pairing cache.

mod cache;
mod file;
mod memory;

pub use cache::LocalCache;
pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::types::SessionRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Durable get/put/delete of credential records keyed by normalized number.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the record for a number.
    async fn load(&self, number: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Create or replace the record for `record.number`.
    ///
    /// Returns `false` without writing when a newer revision is already stored.
    async fn upsert(&self, record: &SessionRecord) -> Result<bool, StoreError>;

    /// Delete the record for a number. Returns whether one existed.
    async fn delete(&self, number: &str) -> Result<bool, StoreError>;

    /// Add a number to the known-numbers index.
    async fn add_known_number(&self, number: &str) -> Result<(), StoreError>;

    /// List the known-numbers index.
    async fn known_numbers(&self) -> Result<Vec<String>, StoreError>;

    /// Check if the store is usable.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Where credential records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// In-process only (no persistence)
    Memory,
    /// One JSON file per number below this directory
    File(PathBuf),
}

impl StoreLocation {
    /// Parse a store connection string (`memory://` or `file:///path`).
    pub fn parse(url: &str) -> Result<Self, StoreError> {
        if url == "memory" || url.starts_with("memory://") {
            return Ok(StoreLocation::Memory);
        }

        if let Some(path) = url.strip_prefix("file://") {
            if path.is_empty() {
                return Err(StoreError::Config("file store URL has no path".into()));
            }
            return Ok(StoreLocation::File(PathBuf::from(path)));
        }

        Err(StoreError::Config(format!(
            "unsupported store URL '{}' (expected memory:// or file://)",
            url
        )))
    }
}

/// Open the credential store described by a connection string.
///
/// A missing connection string degrades to in-memory storage: pairing keeps
/// working but nothing survives a restart.
pub async fn open_store(
    url: Option<&str>,
    database: &str,
    encryption_secret: Option<&str>,
) -> Result<Arc<dyn CredentialStore>, StoreError> {
    let Some(url) = url else {
        warn!("No store URL configured, using in-memory storage (data will be lost on restart)");
        return Ok(Arc::new(MemoryStore::new()));
    };

    match StoreLocation::parse(url)? {
        StoreLocation::Memory => {
            info!("Persistence disabled, using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreLocation::File(root) => {
            let store = FileStore::open(root.join(database), encryption_secret).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_location_parse() {
        assert_eq!(StoreLocation::parse("memory://").unwrap(), StoreLocation::Memory);
        assert_eq!(
            StoreLocation::parse("file:///data/sessions").unwrap(),
            StoreLocation::File(PathBuf::from("/data/sessions"))
        );
        assert!(StoreLocation::parse("file://").is_err());
        assert!(StoreLocation::parse("mongodb+srv://cluster0.example.net").is_err());
    }

    #[tokio::test]
    async fn test_open_store_without_url_is_memory() {
        let store = open_store(None, "pairing", None).await.unwrap();
        assert!(store.health_check().await);
        assert!(store.load("15550100").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_store_file_uses_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());

        let store = open_store(Some(&url), "tenant_a", None).await.unwrap();
        store.add_known_number("15550100").await.unwrap();

        assert!(dir.path().join("tenant_a").join("numbers.json").exists());
    }
}
