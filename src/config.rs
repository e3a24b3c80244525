use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

pub const DEFAULT_CONFIG_FILE: &str = "spt-scan.json";
pub const DEFAULT_API_BASE_URL: &str = "https://db.sp-tarkov.com/api/item";
pub const DEFAULT_LOCALE: &str = "en";
pub const CACHE_FILE_NAME: &str = "items_cache.json";
pub const READABLE_FILE_NAME: &str = "items_readable.json";
pub const LOG_FILE_NAME: &str = "scan_db.log";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server_path: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub delay_min_ms: Option<u64>,
    #[serde(default)]
    pub delay_max_ms: Option<u64>,
    #[serde(default)]
    pub freshness_hours: Option<u64>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub export_readable: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub server_path: Utf8PathBuf,
    pub api_base_url: String,
    pub locale: String,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub delay_range: (Duration, Duration),
    pub freshness: chrono::Duration,
    pub cache_dir: Utf8PathBuf,
    pub export_readable: bool,
}

impl ResolvedConfig {
    pub fn cache_file(&self) -> Utf8PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    pub fn readable_file(&self) -> Utf8PathBuf {
        self.cache_dir.join(READABLE_FILE_NAME)
    }

    pub fn log_file(&self) -> Utf8PathBuf {
        self.cache_dir.join(LOG_FILE_NAME)
    }

    pub fn catalog_file(&self) -> Utf8PathBuf {
        self.server_path
            .join("database")
            .join("templates")
            .join("items.json")
    }

    pub fn recipes_file(&self) -> Utf8PathBuf {
        self.server_path
            .join("database")
            .join("hideout")
            .join("production.json")
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; the default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ScanError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ScanError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ScanError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ScanError> {
        let server_path = Utf8PathBuf::from(config.server_path.unwrap_or_else(|| ".".to_string()));
        let cache_dir = config
            .cache_dir
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| server_path.join("cache"));

        let max_attempts = config.max_attempts.unwrap_or(10);
        if max_attempts == 0 {
            return Err(ScanError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let request_timeout_secs = config.request_timeout_secs.unwrap_or(10);
        if request_timeout_secs == 0 {
            return Err(ScanError::InvalidConfig(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }

        let delay_min = config.delay_min_ms.unwrap_or(300);
        let delay_max = config.delay_max_ms.unwrap_or(800);
        if delay_min > delay_max {
            return Err(ScanError::InvalidConfig(format!(
                "delay_min_ms ({delay_min}) exceeds delay_max_ms ({delay_max})"
            )));
        }

        let freshness_hours = config.freshness_hours.unwrap_or(24);
        let freshness = i64::try_from(freshness_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| {
                ScanError::InvalidConfig(format!("freshness_hours out of range: {freshness_hours}"))
            })?;

        let api_base_url = config
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        if api_base_url.trim().is_empty() {
            return Err(ScanError::InvalidConfig("api_base_url is empty".to_string()));
        }

        Ok(ResolvedConfig {
            server_path,
            api_base_url,
            locale: config.locale.unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms.unwrap_or(3000)),
            delay_range: (
                Duration::from_millis(delay_min),
                Duration::from_millis(delay_max),
            ),
            freshness,
            cache_dir,
            export_readable: config.export_readable.unwrap_or(true),
        })
    }
}
