//! Persistent mirrors for the credential pair.
//!
//! Every store holds a single entry, keyed `authTokens`, containing the
//! JSON-serialized [`CredentialPair`]. A missing entry means logged out.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;

use super::CredentialPair;

/// Key under which the credential pair is persisted
pub const STORAGE_KEY: &str = "authTokens";

/// Keychain service name
const SERVICE_NAME: &str = "studytrack";

/// Durable key-value mirror of the session's credential pair.
///
/// Implementations must be synchronous: the session manager rewrites the
/// mirror before returning control to its caller.
pub trait CredentialStore: Send + Sync {
    /// Read the persisted pair, if any
    fn load(&self) -> Result<Option<CredentialPair>>;

    /// Replace the persisted pair
    fn save(&self, pair: &CredentialPair) -> Result<()>;

    /// Remove the persisted pair. Removing a missing entry is not an error.
    fn clear(&self) -> Result<()>;
}

fn encode(pair: &CredentialPair) -> Result<String> {
    serde_json::to_string(pair).context("Failed to serialize credentials")
}

fn decode(contents: &str) -> Result<CredentialPair> {
    serde_json::from_str(contents).context("Failed to parse stored credentials")
}

// ============================================================================
// File store
// ============================================================================

/// Stores the pair as `authTokens.json` inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", STORAGE_KEY))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Result<Option<CredentialPair>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read credentials file")?;
        decode(&contents).map(Some)
    }

    fn save(&self, pair: &CredentialPair) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .context("Failed to create credentials directory")?;
        std::fs::write(self.path(), encode(pair)?)
            .context("Failed to write credentials file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to delete credentials file")?;
        }
        Ok(())
    }
}

// ============================================================================
// Keyring store
// ============================================================================

/// Stores the pair in the OS keychain under the `studytrack` service.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, STORAGE_KEY).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self) -> Result<Option<CredentialPair>> {
        match self.entry()?.get_password() {
            Ok(contents) => decode(&contents).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credentials from keychain"),
        }
    }

    fn save(&self, pair: &CredentialPair) -> Result<()> {
        self.entry()?
            .set_password(&encode(pair)?)
            .context("Failed to store credentials in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credentials from keychain"),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store. Keeps the serialized form so the JSON layout is the
/// same as the durable stores.
#[derive(Default)]
pub struct MemoryStore {
    entry: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw persisted JSON, if any
    pub fn raw(&self) -> Option<String> {
        self.entry.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<CredentialPair>> {
        self.raw().as_deref().map(decode).transpose()
    }

    fn save(&self, pair: &CredentialPair) -> Result<()> {
        let contents = encode(pair)?;
        *self.entry.lock().unwrap_or_else(|e| e.into_inner()) = Some(contents);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.entry.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserSummary;

    fn sample_pair() -> CredentialPair {
        CredentialPair {
            access: "access-1".to_string(),
            refresh: "refresh-1".to_string(),
            user: UserSummary {
                id: 1,
                username: "ada".to_string(),
                email: "ada@example.com".to_string(),
                is_superuser: true,
            },
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.load().expect("load"), None);

        let pair = sample_pair();
        store.save(&pair).expect("save");
        assert_eq!(store.load().expect("load"), Some(pair));
        assert!(store.path().ends_with("authTokens.json"));
    }

    #[test]
    fn test_file_store_layout() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::new(dir.path());
        store.save(&sample_pair()).expect("save");

        let raw = std::fs::read_to_string(store.path()).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["access"], "access-1");
        assert_eq!(value["refresh"], "refresh-1");
        assert_eq!(value["user"]["username"], "ada");
    }

    #[test]
    fn test_file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::new(dir.path());
        store.save(&sample_pair()).expect("save");

        store.clear().expect("clear");
        assert!(!store.path().exists());
        store.clear().expect("second clear");
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn test_file_store_rejects_corrupt_entry() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::new(dir.path());
        std::fs::write(store.path(), r#"{"access": "a"}"#).expect("write");
        assert!(store.load().is_err());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.load().expect("load"), None);

        let pair = sample_pair();
        store.save(&pair).expect("save");
        assert_eq!(store.load().expect("load"), Some(pair));

        store.clear().expect("clear");
        assert!(store.raw().is_none());
    }
}
