//! File-backed credential store with optional encryption at rest.
//!
//! Layout below the store root:
//!
//! ```text
//! sessions/<number>.json   one record per number
//! numbers.json             known-numbers index
//! ```
//!
//! With an encryption secret every file is `[12 bytes nonce][ciphertext with auth tag]`.

use super::CredentialStore;
use crate::error::StoreError;
use crate::types::SessionRecord;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Key derivation path mixed into the encryption key.
const KEY_DERIVATION_PATH: &str = "pairing-proxy/credential-store";

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

const SESSIONS_DIR: &str = "sessions";
const KNOWN_NUMBERS_FILE: &str = "numbers.json";

/// Credential store writing one file per number.
pub struct FileStore {
    root: PathBuf,
    cipher: Option<Aes256Gcm>,
    /// Serializes read-compare-write cycles
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: PathBuf, encryption_secret: Option<&str>) -> Result<Self, StoreError> {
        fs::create_dir_all(root.join(SESSIONS_DIR)).await?;

        let cipher = encryption_secret.map(|secret| {
            let key = derive_key(secret);
            Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
        });

        info!(
            root = %root.display(),
            encrypted = cipher.is_some(),
            "Opened file credential store"
        );

        Ok(Self {
            root,
            cipher,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, number: &str) -> Result<PathBuf, StoreError> {
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(StoreError::InvalidKey(number.to_string()));
        }
        Ok(self
            .root
            .join(SESSIONS_DIR)
            .join(format!("{}.json", number)))
    }

    fn seal(&self, plaintext: Vec<u8>) -> Result<Vec<u8>, StoreError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext);
        };

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext.as_ref())?;

        let mut data = nonce_bytes.to_vec();
        data.extend(ciphertext);
        Ok(data)
    }

    fn unseal(&self, data: Vec<u8>) -> Result<Vec<u8>, StoreError> {
        let Some(cipher) = &self.cipher else {
            return Ok(data);
        };

        if data.len() < NONCE_SIZE {
            return Err(StoreError::Encryption("Stored file too short".into()));
        }

        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        cipher.decrypt(nonce, &data[NONCE_SIZE..]).map_err(|_| {
            StoreError::Encryption(
                "Failed to decrypt stored credentials. The encryption secret may have changed."
                    .to_string(),
            )
        })
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(self.unseal(data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write atomically using temp file + rename.
    async fn write_file(&self, path: &Path, plaintext: Vec<u8>) -> Result<(), StoreError> {
        let data = self.seal(plaintext)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, path).await?;
        debug!("Wrote {} bytes to {:?}", data.len(), path);
        Ok(())
    }

    async fn read_known(&self) -> Result<BTreeSet<String>, StoreError> {
        let path = self.root.join(KNOWN_NUMBERS_FILE);
        match self.read_file(&path).await? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(BTreeSet::new()),
        }
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load(&self, number: &str) -> Result<Option<SessionRecord>, StoreError> {
        let path = self.record_path(number)?;
        match self.read_file(&path).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<bool, StoreError> {
        let path = self.record_path(&record.number)?;
        let _guard = self.write_lock.lock().await;

        let existing = match self.load(&record.number).await {
            Ok(existing) => existing,
            Err(e @ (StoreError::Encryption(_) | StoreError::Json(_))) => {
                warn!(number = %record.number, error = %e, "Replacing unreadable stored record");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(existing) = existing {
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

        self.write_file(&path, serde_json::to_vec_pretty(record)?)
            .await?;
        Ok(true)
    }

    async fn delete(&self, number: &str) -> Result<bool, StoreError> {
        let path = self.record_path(number)?;
        let _guard = self.write_lock.lock().await;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_known_number(&self, number: &str) -> Result<(), StoreError> {
        self.record_path(number)?;
        let _guard = self.write_lock.lock().await;

        let mut known = self.read_known().await?;
        if known.insert(number.to_string()) {
            let path = self.root.join(KNOWN_NUMBERS_FILE);
            self.write_file(&path, serde_json::to_vec(&known)?).await?;
        }
        Ok(())
    }

    async fn known_numbers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_known().await?.into_iter().collect())
    }

    async fn health_check(&self) -> bool {
        fs::metadata(self.root.join(SESSIONS_DIR)).await.is_ok()
    }
}

/// Derive a 32-byte key: SHA256(secret || key_derivation_path).
fn derive_key(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(KEY_DERIVATION_PATH.as_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Credentials;
    use serde_json::json;

    fn record(revision: u64) -> SessionRecord {
        SessionRecord::new(
            "15550100",
            Credentials::new(
                json!({"registered": true, "me": "15550100"}),
                Some(json!({"pre-key": [1, 2, 3]})),
            ),
            revision,
        )
    }

    #[tokio::test]
    async fn test_plain_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), None).await.unwrap();

        assert!(store.upsert(&record(1)).await.unwrap());

        let loaded = store.load("15550100").await.unwrap().unwrap();
        let expected = record(1);
        assert_eq!(loaded.number, expected.number);
        assert_eq!(loaded.credentials, expected.credentials);
        assert_eq!(loaded.keys, expected.keys);
        assert_eq!(loaded.revision, 1);
        assert!(dir.path().join("sessions/15550100.json").exists());
    }

    #[tokio::test]
    async fn test_load_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), None).await.unwrap();

        assert!(store.load("15550100").await.unwrap().is_none());
        assert!(!store.delete("15550100").await.unwrap());
    }

    #[tokio::test]
    async fn test_encrypted_file_hides_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), Some("s3cret"))
            .await
            .unwrap();
        store.upsert(&record(1)).await.unwrap();

        let raw = std::fs::read(dir.path().join("sessions/15550100.json")).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("registered"));

        let loaded = store.load("15550100").await.unwrap().unwrap();
        assert_eq!(loaded.credentials["registered"], true);
    }

    #[tokio::test]
    async fn test_wrong_secret_cannot_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), Some("s3cret"))
            .await
            .unwrap();
        store.upsert(&record(1)).await.unwrap();

        let other = FileStore::open(dir.path().to_path_buf(), Some("different"))
            .await
            .unwrap();
        let result = other.load("15550100").await;
        assert!(matches!(result, Err(StoreError::Encryption(_))));
    }

    #[tokio::test]
    async fn test_upsert_replaces_unreadable_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), Some("s3cret"))
            .await
            .unwrap();
        store.upsert(&record(9)).await.unwrap();

        let rotated = FileStore::open(dir.path().to_path_buf(), Some("rotated"))
            .await
            .unwrap();
        assert!(rotated.upsert(&record(1)).await.unwrap());

        let loaded = rotated.load("15550100").await.unwrap().unwrap();
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.credentials["registered"], true);
    }

    #[tokio::test]
    async fn test_upsert_replaces_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), None).await.unwrap();
        std::fs::write(dir.path().join("sessions/15550100.json"), b"{not json").unwrap();

        assert!(store.upsert(&record(2)).await.unwrap());
        assert_eq!(store.load("15550100").await.unwrap().unwrap().revision, 2);
    }

    #[tokio::test]
    async fn test_stale_revision_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), None).await.unwrap();

        store.upsert(&record(3)).await.unwrap();
        assert!(!store.upsert(&record(2)).await.unwrap());
        assert!(store.upsert(&record(3)).await.unwrap());

        assert_eq!(store.load("15550100").await.unwrap().unwrap().revision, 3);
    }

    #[tokio::test]
    async fn test_delete_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), None).await.unwrap();
        store.upsert(&record(1)).await.unwrap();

        assert!(store.delete("15550100").await.unwrap());
        assert!(store.load("15550100").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_numeric_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), None).await.unwrap();

        let result = store.load("../etc/passwd").await;
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_known_numbers_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path().to_path_buf(), Some("s3cret"))
                .await
                .unwrap();
            store.add_known_number("15550100").await.unwrap();
            store.add_known_number("15550100").await.unwrap();
        }

        let store = FileStore::open(dir.path().to_path_buf(), Some("s3cret"))
            .await
            .unwrap();
        assert_eq!(store.known_numbers().await.unwrap(), vec!["15550100".to_string()]);
        assert!(store.health_check().await);
    }
}
