//! Application configuration management.
//!
//! This module handles loading and saving the session-layer configuration:
//! backend base URL, HTTP and refresh timeouts, and the keychain service name.
//!
//! Configuration is stored at `~/.config/assura/config.json`. Environment
//! variables (optionally from a `.env` file) override the file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "assura";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "https://api.assura.app";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on a single token refresh.
/// Queued requests wait on the refresh, so it must not hang for the full
/// request timeout.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

const DEFAULT_KEYRING_SERVICE: &str = "assura-session";

const DEFAULT_BIOMETRIC_PROMPT: &str = "Authenticate to sign in";

pub const ENV_API_URL: &str = "ASSURA_API_URL";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "ASSURA_REQUEST_TIMEOUT_SECS";
pub const ENV_REFRESH_TIMEOUT_SECS: &str = "ASSURA_REFRESH_TIMEOUT_SECS";
pub const ENV_KEYRING_SERVICE: &str = "ASSURA_KEYRING_SERVICE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub keyring_service: String,
    pub biometric_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            biometric_prompt: DEFAULT_BIOMETRIC_PROMPT.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_json(&contents)
        } else {
            Ok(Self::default())
        }
    }

    fn from_json(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every request or refresh fail.
    fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1 second");
        }
        if self.refresh_timeout_secs == 0 {
            anyhow::bail!("refresh_timeout_secs must be at least 1 second");
        }
        Ok(())
    }

    /// Load the config file, then apply environment overrides.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = Self::load()?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_API_URL) {
            debug!(url = %url, "API base URL overridden from environment");
            self.api_base_url = url;
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = parse_timeout(ENV_REQUEST_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = lookup(ENV_REFRESH_TIMEOUT_SECS) {
            self.refresh_timeout_secs = parse_timeout(ENV_REFRESH_TIMEOUT_SECS, &secs)?;
        }
        if let Some(service) = lookup(ENV_KEYRING_SERVICE) {
            self.keyring_service = service;
        }
        Ok(())
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

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session file
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

fn parse_timeout(name: &str, value: &str) -> Result<u64> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a number of seconds", name))?;
    if secs == 0 {
        anyhow::bail!("{} must be at least 1 second", name);
    }
    Ok(secs)
}
