//! Configuration loading for the sync engine
//!
//! Engine settings come from `engine.json` in the Tally config directory and
//! fall back to defaults when the file is absent.
//!
//! The YouTube Data API key is loaded from (in order of priority):
//! 1. Compile-time embedded key (for production builds)
//! 2. JSON file (`youtube-credentials.json`)
//! 3. Runtime environment variable

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::modes::ProviderMode;
use crate::providers::{CacheConfig, RateLimitConfig};
use crate::sync::RetryPolicy;

/// Engine settings filename in the Tally config directory
const ENGINE_FILE: &str = "engine.json";

/// Credentials filename in the Tally config directory
const CREDENTIALS_FILE: &str = "youtube-credentials.json";

/// Environment variable holding the API key (compile time or runtime)
const API_KEY_ENV: &str = "YOUTUBE_API_KEY";

const DEFAULT_DATABASE_FILE: &str = "warehouse.sqlite";
const DEFAULT_RECORDING_FILE: &str = "recording.json";

/// Tunables for the engine and its provider chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// SQLite warehouse location; the data directory when unset
    pub database_path: Option<PathBuf>,
    /// Fixture served in fake mode; the built-in demo channel when unset
    pub fixture_path: Option<PathBuf>,
    /// Where record mode writes its fixture
    pub recording_path: Option<PathBuf>,
    pub default_mode: ProviderMode,
    pub default_recent_limit: usize,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            fixture_path: None,
            recording_path: None,
            default_mode: ProviderMode::Fake,
            default_recent_limit: 10,
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load `engine.json` from the config directory, or defaults
    pub fn load() -> Result<Self> {
        config::load_json_or_default(ENGINE_FILE)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse engine config JSON")
    }

    /// `engine.json` in the Tally config directory
    pub fn default_path() -> Option<PathBuf> {
        config::config_path(ENGINE_FILE)
    }

    /// Make `mode` the default in the engine file at `path`
    ///
    /// Other settings in the file are kept; a missing file is created with
    /// defaults.
    pub fn persist_default_mode(path: &Path, mode: ProviderMode) -> Result<()> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.default_mode = mode;
        config::save_json_file(path, &config)
            .with_context(|| format!("Failed to save default mode to {}", path.display()))
    }

    /// Resolved warehouse path
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::data_path(DEFAULT_DATABASE_FILE)
                .context("Could not determine data directory for the warehouse"),
        }
    }

    /// Resolved recording path
    pub fn recording_path(&self) -> Result<PathBuf> {
        match &self.recording_path {
            Some(path) => Ok(path.clone()),
            None => config::data_path(DEFAULT_RECORDING_FILE)
                .context("Could not determine data directory for recordings"),
        }
    }
}

/// API key for the YouTube Data API
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialFile {
    api_key: String,
}

impl ApiCredentials {
    /// Load the key using the following priority:
    /// 1. Compile-time embedded key
    /// 2. JSON file (~/.config/tally/youtube-credentials.json)
    /// 3. Runtime environment variable
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let file: CredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_key(file.api_key);
        }

        Self::from_env()
    }

    /// Key embedded at build time.
    /// Build with: YOUTUBE_API_KEY=xxx cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let api_key = option_env!("YOUTUBE_API_KEY")?;
        if api_key.is_empty() {
            return None;
        }
        Some(Self {
            api_key: api_key.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file: CredentialFile = config::load_json_file(path)?;
        Self::from_key(file.api_key)
    }

    /// Parse `{"apiKey": "..."}`
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_key(file.api_key)
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .with_context(|| format!("{API_KEY_ENV} environment variable not set"))?;
        Self::from_key(api_key)
    }

    fn from_key(api_key: String) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        anyhow::ensure!(!api_key.is_empty(), "API key is empty");
        Ok(Self { api_key })
    }

    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }

    /// Check if a key is available (compile-time, file, or env var)
    pub fn is_available() -> bool {
        if Self::from_compile_time().is_some() {
            return true;
        }
        if config::config_exists(CREDENTIALS_FILE) {
            return true;
        }
        std::env::var(API_KEY_ENV).is_ok_and(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_mode, ProviderMode::Fake);
        assert_eq!(config.default_recent_limit, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.rate_limit.capacity, 20);
    }

    #[test]
    fn test_partial_engine_file_keeps_defaults() {
        let json = r#"{
            "databasePath": "/tmp/tally.sqlite",
            "defaultMode": "record",
            "retry": { "maxAttempts": 5 },
            "cache": { "channelStatsTtlMs": 0 }
        }"#;

        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/tally.sqlite")
        );
        assert_eq!(config.default_mode, ProviderMode::Record);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.cache.channel_stats_ttl_ms, 0);
        assert_eq!(config.cache.item_stats_ttl_ms, 10_000);
        assert_eq!(config.default_recent_limit, 10);
    }

    #[test]
    fn test_engine_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "defaultRecentLimit": 25 }"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.default_recent_limit, 25);
    }

    #[test]
    fn test_persisted_mode_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "defaultRecentLimit": 25 }"#).unwrap();

        EngineConfig::persist_default_mode(&path, ProviderMode::Real).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.default_mode, ProviderMode::Real);
        assert_eq!(config.default_recent_limit, 25);
    }

    #[test]
    fn test_persisted_mode_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/engine.json");

        EngineConfig::persist_default_mode(&path, ProviderMode::Record).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.default_mode, ProviderMode::Record);
        assert_eq!(config.default_recent_limit, 10);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(EngineConfig::from_json(r#"{ "defaultMode": "live" }"#).is_err());
    }

    #[test]
    fn test_parse_credentials() {
        let creds = ApiCredentials::from_json(r#"{ "apiKey": " AIza-test " }"#).unwrap();
        assert_eq!(creds.api_key, "AIza-test");
    }

    #[test]
    fn test_invalid_credentials() {
        assert!(ApiCredentials::from_json(r#"{ "other": "x" }"#).is_err());
        assert!(ApiCredentials::from_json(r#"{ "apiKey": "  " }"#).is_err());
    }
}
