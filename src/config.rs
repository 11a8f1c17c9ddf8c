// Client configuration.
// Layered: built-in defaults, then config.json in the user's config directory,
// then CHATWIRE_* environment variables. The binary applies CLI flags last.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::{self, StoreSettings};
use crate::transport::{self, ReconnectPolicy, TransportConfig};

pub const ENV_API_URL: &str = "CHATWIRE_API_URL";
pub const ENV_WS_URL: &str = "CHATWIRE_WS_URL";
pub const ENV_TOKEN: &str = "CHATWIRE_TOKEN";

static CONFIG_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Point every config and credentials file at `dir` for the rest of the process.
pub fn set_config_dir_override(dir: PathBuf) -> Result<()> {
    CONFIG_DIR_OVERRIDE
        .set(dir)
        .map_err(|dir| anyhow!("Config directory already set; ignoring {}", dir.display()))
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = match CONFIG_DIR_OVERRIDE.get() {
        Some(dir) => dir.clone(),
        None => dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("chatwire"),
    };
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// REST base, e.g. `http://localhost:8000/api`.
    pub api_url: String,
    /// Socket base, e.g. `ws://localhost:8000`.
    pub ws_url: String,
    pub http_timeout_secs: u64,
    pub reconnect_interval_secs: u64,
    pub max_reconnect_attempts: u32,
    pub typing_timeout_secs: u64,
    pub error_display_secs: u64,
    pub max_upload_bytes: u64,
    pub log_file: Option<String>,
    /// Never written to disk; comes from the environment, the CLI or saved credentials.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_url: "http://localhost:8000/api".to_string(),
            ws_url: "ws://localhost:8000".to_string(),
            http_timeout_secs: 30,
            reconnect_interval_secs: transport::DEFAULT_RECONNECT_INTERVAL.as_secs(),
            max_reconnect_attempts: transport::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            typing_timeout_secs: store::DEFAULT_TYPING_TIMEOUT.as_secs(),
            error_display_secs: store::DEFAULT_ERROR_DISPLAY.as_secs(),
            max_upload_bytes: store::DEFAULT_MAX_UPLOAD_BYTES,
            log_file: None,
            token: None,
        }
    }
}

impl ClientConfig {
    /// Defaults, overlaid with `config.json` from the config directory and the environment.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join("config.json");
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ClientConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(url) = non_empty(ENV_WS_URL) {
            self.ws_url = url;
        }
        if let Some(token) = non_empty(ENV_TOKEN) {
            self.token = Some(token);
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            ws_base_url: self.ws_url.clone(),
            reconnect: ReconnectPolicy {
                max_attempts: self.max_reconnect_attempts,
                interval: Duration::from_secs(self.reconnect_interval_secs),
            },
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            typing_timeout: Duration::from_secs(self.typing_timeout_secs),
            error_display: Duration::from_secs(self.error_display_secs),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}
