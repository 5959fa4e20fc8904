//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the DoWhile backend URL, the GitHub OAuth app settings and the storage
//! backend used for the session token.
//!
//! Configuration is stored at `~/.config/dowhile/config.json`. Environment
//! variables `DOWHILE_API_URL` and `DOWHILE_GITHUB_CLIENT_ID` override it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::{CredentialStorage, FileStorage, KeyringStorage, MemoryStorage};

/// Application name used for config/data directory paths
const APP_NAME: &str = "dowhile";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// GitHub OAuth authorize endpoint
pub const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";

const DEFAULT_API_BASE_URL: &str = "http://localhost:4000";
const DEFAULT_GITHUB_CLIENT_ID: &str = "829cdcef07de3011f9fc";
const DEFAULT_OAUTH_SCOPE: &str = "user";

const ENV_API_URL: &str = "DOWHILE_API_URL";
const ENV_GITHUB_CLIENT_ID: &str = "DOWHILE_GITHUB_CLIENT_ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub github_client_id: String,
    pub oauth_scope: String,
    pub storage: StorageBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            github_client_id: DEFAULT_GITHUB_CLIENT_ID.to_string(),
            oauth_scope: DEFAULT_OAUTH_SCOPE.to_string(),
            storage: StorageBackend::default(),
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(id) = lookup(ENV_GITHUB_CLIENT_ID).filter(|v| !v.is_empty()) {
            self.github_client_id = id;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the file-backed credential storage
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// GitHub authorize URL the user follows to sign in
    pub fn sign_in_url(&self) -> std::result::Result<String, url::ParseError> {
        let url = Url::parse_with_params(
            GITHUB_AUTHORIZE_URL,
            &[
                ("scope", self.oauth_scope.as_str()),
                ("client_id", self.github_client_id.as_str()),
            ],
        )?;
        Ok(url.into())
    }

    /// Build the configured credential storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn CredentialStorage>> {
        let storage: Arc<dyn CredentialStorage> = match self.storage {
            StorageBackend::File => Arc::new(FileStorage::new(self.data_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::default()),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        Ok(storage)
    }
}
