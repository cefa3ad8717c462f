#![allow(clippy::unwrap_used)]
// Config discovery, legacy migration, and environment overrides.

use std::fs;
use std::time::Duration;

use figment::Jail;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;
use tempfile::TempDir;

use smartbox_config::{ConfigError, discover, load_file};

const SAMPLE: &str = r#"{
  "smartbox": {
    "username": "user@example.com",
    "password": "hunter2",
    "apiName": "api-hjm",
    "pollingInterval": 30000
  },
  "mqtt": {
    "host": "broker.local",
    "port": 1884,
    "username": "bridge",
    "password": "secret",
    "baseTopic": "home/heater",
    "clientId": "smartbox-test"
  }
}"#;

// ── Discovery ───────────────────────────────────────────────────────

#[test]
fn test_canonical_file_is_preferred() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("xdg/smartbox2mqtt/config.json");
    let legacy = dir.path().join(".smartbox2mqtt-config.json");
    fs::create_dir_all(canonical.parent().unwrap()).unwrap();
    fs::write(&canonical, SAMPLE).unwrap();
    fs::write(&legacy, "{}").unwrap();

    let found = discover(None, &canonical, &legacy).unwrap();
    assert_eq!(found.path, canonical);
    assert_eq!(found.migrated_from, None);
}

#[test]
fn test_legacy_file_is_copied_into_place() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("xdg/smartbox2mqtt/config.json");
    let legacy = dir.path().join(".smartbox2mqtt-config.json");
    fs::write(&legacy, SAMPLE).unwrap();

    let found = discover(None, &canonical, &legacy).unwrap();

    assert_eq!(found.path, canonical);
    assert_eq!(found.migrated_from.as_deref(), Some(legacy.as_path()));
    assert_eq!(fs::read_to_string(&canonical).unwrap(), SAMPLE);
    assert!(legacy.exists(), "legacy file must be left in place");

    // Second run finds the canonical copy without migrating again.
    let again = discover(None, &canonical, &legacy).unwrap();
    assert_eq!(again.migrated_from, None);
}

#[test]
fn test_missing_config_names_canonical_path() {
    let dir = TempDir::new().unwrap();
    let canonical = dir.path().join("config.json");
    let legacy = dir.path().join("legacy.json");

    let err = discover(None, &canonical, &legacy).unwrap_err();
    match err {
        ConfigError::NotFound { path } => assert_eq!(path, canonical),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn test_explicit_path_bypasses_discovery() {
    let dir = TempDir::new().unwrap();
    let explicit = dir.path().join("custom.json");
    let canonical = dir.path().join("config.json");
    fs::write(&explicit, SAMPLE).unwrap();
    fs::write(&canonical, "{}").unwrap();

    let found = discover(Some(&explicit), &canonical, &canonical).unwrap();
    assert_eq!(found.path, explicit);

    let missing = dir.path().join("nope.json");
    assert!(matches!(
        discover(Some(&missing), &canonical, &canonical),
        Err(ConfigError::NotFound { .. })
    ));
}

// ── Loading ─────────────────────────────────────────────────────────

#[test]
fn test_load_sample_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, SAMPLE).unwrap();

    let config = load_file(&path).unwrap().into_bridge_config().unwrap();

    assert_eq!(config.smartbox.username, "user@example.com");
    assert_eq!(config.smartbox.password.expose_secret(), "hunter2");
    assert_eq!(config.smartbox.reseller.api_name(), "api-hjm");
    assert_eq!(config.smartbox.polling_interval, Duration::from_secs(30));
    assert_eq!(config.mqtt.port, 1884);
    assert_eq!(config.mqtt.base_topic, "home/heater");
    assert_eq!(config.mqtt.client_id, "smartbox-test");
    assert_eq!(
        config.mqtt.password.as_ref().map(|p| p.expose_secret().to_owned()),
        Some("secret".to_owned())
    );
}

#[test]
fn test_malformed_json_is_a_load_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").unwrap();

    assert!(matches!(load_file(&path), Err(ConfigError::Figment(_))));
}

#[test]
fn test_environment_overrides_file_values() {
    Jail::expect_with(|jail| {
        jail.create_file("config.json", SAMPLE)?;
        jail.set_env("SMARTBOX2MQTT_MQTT__HOST", "override.local");
        jail.set_env("SMARTBOX2MQTT_MQTT__BASETOPIC", "heating");
        jail.set_env("SMARTBOX2MQTT_SMARTBOX__POLLINGINTERVAL", "5000");
        jail.set_env("SMARTBOX2MQTT_SMARTBOX__REALTIME", "false");

        let path = jail.directory().join("config.json");
        let config = load_file(&path).unwrap().into_bridge_config().unwrap();

        assert_eq!(config.mqtt.host, "override.local");
        assert_eq!(config.mqtt.base_topic, "heating");
        assert_eq!(config.smartbox.polling_interval, Duration::from_secs(5));
        assert!(!config.smartbox.realtime);
        assert_eq!(config.smartbox.username, "user@example.com");
        Ok(())
    });
}
