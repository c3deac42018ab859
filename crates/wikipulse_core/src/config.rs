use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_URL: &str =
    "https://en.wikipedia.org/w/index.php?title={title}&action=history";
pub const DEFAULT_USER_AGENT: &str = "wikipulse/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_WINDOW_DAYS: u32 = 30;
/// Upper bound accepted for the edit-count window (about a century).
pub const MAX_WINDOW_DAYS: u32 = 36_500;
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://s3.eu-central-1.amazonaws.com";
pub const DEFAULT_BUCKET: &str = "parsed-wiki";
pub const DEFAULT_FILENAME: &str = "parsed_wiki.json";
pub const DEFAULT_CONFIG_PATH: &str = ".wikipulse/config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PulseConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub history_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub window_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StorageSection {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub default_filename: Option<String>,
    pub require_persist: Option<bool>,
}

impl PulseConfig {
    /// History page URL template with a `{title}` placeholder:
    /// env WIKIPULSE_HISTORY_URL > config > DEFAULT_HISTORY_URL.
    pub fn history_url(&self) -> String {
        env_override("WIKIPULSE_HISTORY_URL")
            .or_else(|| self.source.history_url.clone())
            .unwrap_or_else(|| DEFAULT_HISTORY_URL.to_string())
    }

    /// Resolve user agent: env WIKIPULSE_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKIPULSE_USER_AGENT")
            .or_else(|| self.source.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Request timeout shared by the history source and the remote store.
    pub fn timeout_ms(&self) -> u64 {
        env_override("WIKIPULSE_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .or(self.source.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    /// Length of the trailing edit-count window. Values above
    /// MAX_WINDOW_DAYS are ignored with a warning.
    pub fn window_days(&self) -> u32 {
        env_override("WIKIPULSE_WINDOW_DAYS")
            .and_then(|value| value.parse::<u32>().ok())
            .and_then(|days| bounded_window(days, "WIKIPULSE_WINDOW_DAYS"))
            .or_else(|| {
                self.source
                    .window_days
                    .and_then(|days| bounded_window(days, "source.window_days"))
            })
            .unwrap_or(DEFAULT_WINDOW_DAYS)
    }

    pub fn storage_endpoint(&self) -> String {
        env_override("WIKIPULSE_STORAGE_ENDPOINT")
            .or_else(|| self.storage.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.to_string())
    }

    pub fn bucket(&self) -> String {
        env_override("WIKIPULSE_BUCKET")
            .or_else(|| self.storage.bucket.clone())
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string())
    }

    /// Directory local stats files are resolved against. Defaults to the cwd.
    pub fn data_dir(&self) -> PathBuf {
        env_override("WIKIPULSE_DATA_DIR")
            .map(PathBuf::from)
            .or_else(|| self.storage.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn default_filename(&self) -> &str {
        self.storage
            .default_filename
            .as_deref()
            .unwrap_or(DEFAULT_FILENAME)
    }

    pub fn require_persist(&self) -> bool {
        self.storage.require_persist.unwrap_or(false)
    }
}

/// Load and parse a PulseConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<PulseConfig> {
    if !config_path.exists() {
        return Ok(PulseConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: PulseConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn bounded_window(days: u32, origin: &str) -> Option<u32> {
    if days > MAX_WINDOW_DAYS {
        log::warn!("{origin} = {days} exceeds {MAX_WINDOW_DAYS} days, ignoring it");
        return None;
    }
    Some(days)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
