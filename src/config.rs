use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::MAX_WINDOW_DAYS;
use crate::provider::{agro, sentinel, ProviderKind};
use crate::scheduler::{ScheduleTiming, MIN_FIELD_DELAY};
use crate::selector::{SelectionPolicy, DEFAULT_CLOUD_CEILING};
use crate::sync::{SyncSettings, DEFAULT_WINDOW_DAYS};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

/// Satellite provider selection and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// "agro" or "sentinel"
    pub kind: ProviderKind,
    pub agro_base_url: String,
    pub sentinel_base_url: String,
    pub sentinel_token_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Agro,
            agro_base_url: agro::DEFAULT_BASE_URL.to_string(),
            sentinel_base_url: sentinel::DEFAULT_BASE_URL.to_string(),
            sentinel_token_url: sentinel::DEFAULT_TOKEN_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Background sync schedule and image selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay before the first run after startup
    pub initial_delay_secs: u64,
    pub interval_hours: u64,
    /// Pause between fields; never below 1100
    pub field_delay_ms: u64,
    /// Trailing search window in days
    pub window_days: i64,
    /// Passes must be strictly below this cloud percentage to be preferred
    pub cloud_ceiling: f64,
    /// Use the least cloudy pass when none is under the ceiling
    pub allow_cloudy_fallback: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 300,
            interval_hours: 6,
            field_delay_ms: MIN_FIELD_DELAY.as_millis() as u64,
            window_days: DEFAULT_WINDOW_DAYS,
            cloud_ceiling: DEFAULT_CLOUD_CEILING,
            allow_cloudy_fallback: true,
        }
    }
}

impl SyncConfig {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            window_days: self.window_days.clamp(1, MAX_WINDOW_DAYS),
            policy: SelectionPolicy {
                cloud_ceiling: self.cloud_ceiling,
                allow_fallback: self.allow_cloudy_fallback,
            },
        }
    }

    pub fn timing(&self) -> ScheduleTiming {
        ScheduleTiming::new(
            Duration::from_secs(self.initial_delay_secs),
            Duration::from_secs(self.interval_hours.max(1) * 60 * 60),
            Duration::from_millis(self.field_delay_ms),
        )
    }
}

/// Tile proxy and operator HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Palette id appended as `paletteid=` to proxied asset URLs
    pub palette: Option<String>,
    /// `Cache-Control: public, max-age=` for proxied assets
    pub cache_max_age_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            palette: None,
            cache_max_age_secs: 3600,
        }
    }
}

/// Field store location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb file (empty = <data_dir>/fieldsat/fields.redb)
    pub db_path: Option<PathBuf>,
}

impl Config {
    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("fieldsat");
        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `path` (or the default path). A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Provider secrets. Read from the environment only, never from the file.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub agro_api_key: Option<String>,
    pub sentinel_client_id: Option<String>,
    pub sentinel_client_secret: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            agro_api_key: get("AGRO_API_KEY"),
            sentinel_client_id: get("SENTINEL_CLIENT_ID"),
            sentinel_client_secret: get("SENTINEL_CLIENT_SECRET"),
        }
    }

    /// Both halves of the Sentinel client credentials, or nothing.
    pub fn sentinel_client(&self) -> Option<(&str, &str)> {
        match (&self.sentinel_client_id, &self.sentinel_client_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.provider.kind, ProviderKind::Agro);
        assert_eq!(config.provider.request_timeout_secs, 30);
        assert_eq!(config.sync.initial_delay_secs, 300);
        assert_eq!(config.sync.interval_hours, 6);
        assert_eq!(config.sync.field_delay_ms, 1100);
        assert_eq!(config.sync.window_days, 60);
        assert_eq!(config.sync.cloud_ceiling, 50.0);
        assert!(config.sync.allow_cloudy_fallback);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.server.cache_max_age_secs, 3600);
        assert!(config.server.palette.is_none());
        assert!(config.storage.db_path.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[provider]
kind = "sentinel"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        assert_eq!(config.provider.kind, ProviderKind::Sentinel);
        assert_eq!(config.provider.sentinel_base_url, sentinel::DEFAULT_BASE_URL);
        assert_eq!(config.sync.window_days, 60);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[provider]
kind = "agro"
agro_base_url = "http://localhost:9000/agro/1.0"
request_timeout_secs = 5

[sync]
initial_delay_secs = 10
interval_hours = 12
field_delay_ms = 2000
window_days = 30
cloud_ceiling = 35.5
allow_cloudy_fallback = false

[server]
bind = "127.0.0.1:3000"
palette = "3"
cache_max_age_secs = 600

[storage]
db_path = "/var/lib/fieldsat/fields.redb"
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.provider.agro_base_url, "http://localhost:9000/agro/1.0");
        assert_eq!(config.provider.request_timeout_secs, 5);
        assert_eq!(config.sync.interval_hours, 12);
        assert_eq!(config.server.palette.as_deref(), Some("3"));
        assert_eq!(config.server.cache_max_age_secs, 600);
        assert_eq!(
            config.storage.db_path,
            Some(PathBuf::from("/var/lib/fieldsat/fields.redb"))
        );

        let settings = config.sync.settings();
        assert_eq!(settings.window_days, 30);
        assert_eq!(settings.policy.cloud_ceiling, 35.5);
        assert!(!settings.policy.allow_fallback);

        let timing = config.sync.timing();
        assert_eq!(timing.initial_delay, Duration::from_secs(10));
        assert_eq!(timing.interval, Duration::from_secs(12 * 3600));
        assert_eq!(timing.field_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_field_delay_below_floor_is_raised() {
        let config: Config = toml::from_str("[sync]\nfield_delay_ms = 100\n").unwrap();
        assert_eq!(config.sync.timing().field_delay, MIN_FIELD_DELAY);
    }

    #[test]
    fn test_window_days_is_clamped() {
        let config: Config = toml::from_str("[sync]\nwindow_days = 200000000\n").unwrap();
        assert_eq!(config.sync.settings().window_days, MAX_WINDOW_DAYS);

        let config: Config = toml::from_str("[sync]\nwindow_days = 0\n").unwrap();
        assert_eq!(config.sync.settings().window_days, 1);
    }

    #[test]
    fn test_unknown_provider_kind_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[provider]\nkind = \"landsat\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.sync.interval_hours, 6);
    }

    #[test]
    fn test_invalid_file_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid [[ toml").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_empty_credentials_count_as_absent() {
        let env: HashMap<&str, &str> = [
            ("AGRO_API_KEY", ""),
            ("SENTINEL_CLIENT_ID", "client"),
            ("SENTINEL_CLIENT_SECRET", "  "),
        ]
        .into_iter()
        .collect();
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(creds.agro_api_key.is_none());
        assert_eq!(creds.sentinel_client_id.as_deref(), Some("client"));
        assert!(creds.sentinel_client().is_none());
    }

    #[test]
    fn test_sentinel_client_pair() {
        let creds = Credentials {
            sentinel_client_id: Some("id".to_string()),
            sentinel_client_secret: Some("secret".to_string()),
            ..Credentials::default()
        };
        assert_eq!(creds.sentinel_client(), Some(("id", "secret")));
    }
}
