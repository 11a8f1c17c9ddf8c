// Configuration layering tests.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use chatwire::config::{ClientConfig, ENV_API_URL, ENV_TOKEN, ENV_WS_URL};
use chatwire::store::StoreSettings;
use chatwire::transport::TransportConfig;
use tempfile::tempdir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempdir().expect("temp dir");
    let config = ClientConfig::load_from(&dir.path().join("config.json")).expect("load");

    assert_eq!(config, ClientConfig::default());
    assert_eq!(config.transport_config(), TransportConfig::default());
    assert_eq!(config.store_settings(), StoreSettings::default());
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{"ws_url": "wss://chat.example", "max_reconnect_attempts": 2, "reconnect_interval_secs": 1}"#,
    )
    .expect("write config");

    let config = ClientConfig::load_from(&path).expect("load");

    assert_eq!(config.ws_url, "wss://chat.example");
    assert_eq!(config.api_url, ClientConfig::default().api_url);
    let transport = config.transport_config();
    assert_eq!(transport.ws_base_url, "wss://chat.example");
    assert_eq!(transport.reconnect.max_attempts, 2);
    assert_eq!(transport.reconnect.interval, Duration::from_secs(1));
}

#[test]
fn test_invalid_file_is_an_error() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").expect("write config");

    let err = ClientConfig::load_from(&path).expect_err("invalid config");
    assert!(err.to_string().contains("Invalid config file"));
}

#[test]
fn test_environment_overrides_file() {
    let env: HashMap<&str, &str> = [
        (ENV_API_URL, "https://chat.example/api"),
        (ENV_WS_URL, "  "),
        (ENV_TOKEN, "abc123"),
    ]
    .into_iter()
    .collect();
    let mut config = ClientConfig::default();

    config.apply_env(|key| env.get(key).map(|value| value.to_string()));

    assert_eq!(config.api_url, "https://chat.example/api");
    // Blank values are ignored
    assert_eq!(config.ws_url, ClientConfig::default().ws_url);
    assert_eq!(config.token.as_deref(), Some("abc123"));
}

#[test]
fn test_token_is_never_saved() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("config.json");
    let mut config = ClientConfig {
        typing_timeout_secs: 7,
        max_upload_bytes: 1024,
        ..ClientConfig::default()
    };
    config.token = Some("secret".to_string());

    config.save_to(&path).expect("save");
    let raw = fs::read_to_string(&path).expect("read back");
    assert!(!raw.contains("secret"));

    let loaded = ClientConfig::load_from(&path).expect("load");
    assert_eq!(loaded.token, None);
    let settings = loaded.store_settings();
    assert_eq!(settings.typing_timeout, Duration::from_secs(7));
    assert_eq!(settings.max_upload_bytes, 1024);
}
