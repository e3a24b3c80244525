use std::time::Duration;

use assert_matches::assert_matches;

use spt_item_scanner::config::{Config, ConfigLoader, DEFAULT_API_BASE_URL};
use spt_item_scanner::error::ScanError;

#[test]
fn defaults_match_the_public_item_database() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_eq!(resolved.api_base_url, DEFAULT_API_BASE_URL);
    assert_eq!(resolved.locale, "en");
    assert_eq!(resolved.max_attempts, 10);
    assert_eq!(resolved.retry_delay, Duration::from_secs(3));
    assert_eq!(resolved.request_timeout, Duration::from_secs(10));
    assert_eq!(
        resolved.delay_range,
        (Duration::from_millis(300), Duration::from_millis(800))
    );
    assert_eq!(resolved.freshness, chrono::Duration::hours(24));
    assert!(resolved.cache_file().ends_with("cache/items_cache.json"));
    assert!(
        resolved
            .catalog_file()
            .ends_with("database/templates/items.json")
    );
}

#[test]
fn cache_dir_follows_server_path() {
    let config: Config = serde_json::from_str(r#"{"server_path": "/srv/spt"}"#).unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.cache_dir.as_str(), "/srv/spt/cache");
    assert_eq!(
        resolved.recipes_file().as_str(),
        "/srv/spt/database/hideout/production.json"
    );
}

#[test]
fn inverted_delay_range_is_rejected() {
    let config: Config =
        serde_json::from_str(r#"{"delay_min_ms": 900, "delay_max_ms": 100}"#).unwrap();
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, ScanError::InvalidConfig(_));
}

#[test]
fn explicit_missing_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, ScanError::ConfigRead(_));
}

#[test]
fn zero_request_timeout_is_rejected() {
    let config = Config {
        request_timeout_secs: Some(0),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, ScanError::InvalidConfig(_));
}
