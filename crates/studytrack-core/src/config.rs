//! Application configuration management.
//!
//! Configuration is stored at `~/.config/studytrack/config.json`. The base
//! URL can be overridden with the `STUDYTRACK_BASE_URL` environment variable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStore, FileStore, KeyringStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "studytrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the configured base URL
pub const BASE_URL_ENV: &str = "STUDYTRACK_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the credential pair is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub credential_store: CredentialBackend,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credential_store: CredentialBackend::default(),
            last_username: None,
        }
    }
}

impl Config {
    /// Load the config file (defaults if missing), then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            if !base_url.trim().is_empty() {
                config.base_url = base_url;
            }
        }
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the configured credential store
    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.credential_store {
            CredentialBackend::File => Arc::new(FileStore::new(self.cache_dir()?)),
            CredentialBackend::Keyring => Arc::new(KeyringStore::new()),
        };
        Ok(store)
    }
}
