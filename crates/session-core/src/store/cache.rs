//! Ephemeral local credential cache used while a session is live.

use crate::error::StoreError;
use crate::types::Credentials;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const CREDS_FILE: &str = "creds.json";
const KEYS_FILE: &str = "keys.json";

/// Per-number credential directories below a cache root.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache directory for a number.
    pub fn session_dir(&self, number: &str) -> PathBuf {
        self.root.join(format!("session_{}", number))
    }

    /// Write the credential state for a number, replacing any previous state.
    pub async fn write(&self, number: &str, credentials: &Credentials) -> Result<(), StoreError> {
        let dir = self.session_dir(number);
        fs::create_dir_all(&dir).await?;

        write_json(&dir.join(CREDS_FILE), &credentials.credentials).await?;
        match &credentials.keys {
            Some(keys) => write_json(&dir.join(KEYS_FILE), keys).await?,
            None => remove_if_exists(&dir.join(KEYS_FILE)).await?,
        }

        debug!(number = %number, "Cached credentials locally");
        Ok(())
    }

    /// Read the cached credential state, if any.
    pub async fn read(&self, number: &str) -> Result<Option<Credentials>, StoreError> {
        let dir = self.session_dir(number);

        let Some(credentials) = read_json(&dir.join(CREDS_FILE)).await? else {
            return Ok(None);
        };
        let keys = read_json(&dir.join(KEYS_FILE)).await?;

        Ok(Some(Credentials { credentials, keys }))
    }

    /// Remove everything cached for a number. Missing state is not an error.
    pub async fn purge(&self, number: &str) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.session_dir(number)).await {
            Ok(()) => {
                debug!(number = %number, "Purged local credential cache");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_json(path: &Path, value: &Value) -> Result<(), StoreError> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, serde_json::to_vec_pretty(value)?).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

async fn read_json(path: &Path) -> Result<Option<Value>, StoreError> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
