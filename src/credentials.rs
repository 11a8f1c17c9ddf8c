use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chatwire::config;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

// Saved session token, kept next to config.json.

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Credentials {
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(api_url: &str, token: &str) -> Self {
        Credentials {
            api_url: api_url.to_string(),
            token: Some(BASE64.encode(token)),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        self.token.as_ref().and_then(|encoded| {
            let decoded = BASE64.decode(encoded).ok()?;
            String::from_utf8(decoded).ok()
        })
    }
}

fn credentials_path() -> Result<PathBuf> {
    Ok(config::config_dir()?.join("credentials.json"))
}

pub fn save_credentials(credentials: &Credentials) -> Result<()> {
    save_credentials_to(&credentials_path()?, credentials)
}

pub fn load_credentials() -> Result<Option<Credentials>> {
    load_credentials_from(&credentials_path()?)
}

fn save_credentials_to(path: &Path, credentials: &Credentials) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, credentials)?;
    info!("Credentials saved for {}", credentials.api_url);
    Ok(())
}

fn load_credentials_from(path: &Path) -> Result<Option<Credentials>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    let credentials: Credentials = serde_json::from_str(&contents)?;
    info!(
        "Loaded credentials for {} from {}",
        credentials.api_url,
        path.display()
    );
    Ok(Some(credentials))
}
