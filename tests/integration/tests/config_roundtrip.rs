//! Config save/load roundtrip integration tests.
//!
//! These tests verify that configuration can be serialized, written to disk,
//! and loaded back with identical field values.

use pixelbridge_core::config::{BindMode, Config, LogFormat};
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pixelbridge.json5");

    let config = Config::default();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.gateway.url, config.gateway.url);
    assert_eq!(loaded.observer.port, config.observer.port);
    assert_eq!(loaded.observer.bind, config.observer.bind);
    assert_eq!(loaded.gateway.reconnect.max_ms, config.gateway.reconnect.max_ms);
}

#[test]
fn test_config_modify_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pixelbridge.json5");

    let mut config = Config::default();
    config.observer.port = 9090;
    config.observer.bind = BindMode::Lan;
    config.gateway.token = Some("gw-token".into());
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.observer.port, 9090);
    assert_eq!(loaded.observer.bind, BindMode::Lan);
    assert_eq!(loaded.gateway.token.unwrap().expose_secret(), "gw-token");
}

#[test]
fn test_hand_written_json5() {
    let config = Config::parse(
        r#"{
            // upstream
            gateway: { url: 'wss://gw.example.com', token: 'abc' },
            observer: { port: 4000, allowed_origins: ['https://office.example.com'] },
            logging: { format: 'json' },
        }"#,
    )
    .unwrap();

    assert_eq!(config.gateway.url, "wss://gw.example.com");
    assert_eq!(config.observer.port, 4000);
    assert_eq!(config.observer.allowed_origins.len(), 1);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_load_nonexistent() {
    let result = Config::load(Path::new("/nonexistent/pixelbridge.json5"));
    assert!(result.is_err());
}

#[test]
fn test_config_parse_invalid() {
    let result = Config::parse("not valid json");
    assert!(result.is_err());
}
