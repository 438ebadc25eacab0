//! In-memory credential store.

use super::CredentialStore;
use crate::error::StoreError;
use crate::types::SessionRecord;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// Credential store kept in process memory (for tests or when no store is configured).
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, SessionRecord>>,
    known: RwLock<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self, number: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.records.read().await.get(number).cloned())
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;

        if let Some(existing) = records.get(&record.number) {
            if existing.revision > record.revision {
                debug!(
                    number = %record.number,
                    stored = existing.revision,
                    incoming = record.revision,
                    "Ignoring stale credential write"
                );
                return Ok(false);
            }
        }

        records.insert(record.number.clone(), record.clone());
        Ok(true)
    }

    async fn delete(&self, number: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(number).is_some())
    }

    async fn add_known_number(&self, number: &str) -> Result<(), StoreError> {
        self.known.write().await.insert(number.to_string());
        Ok(())
    }

    async fn known_numbers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.known.read().await.iter().cloned().collect())
    }
}
