use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// =============================================================================
// Time-related constants
// =============================================================================

/// Default minimum interval between two sync runs in milliseconds (15 minutes)
pub const DEFAULT_MIN_INTERVAL_MS: i64 = 15 * 60 * 1000;

/// Timeout for a single upstream request in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

/// A run lease older than this is considered abandoned (1 hour)
pub const RUN_LEASE_TIMEOUT_MS: i64 = 60 * 60 * 1000;

/// Backoff before retrying a transient upstream failure (2 seconds)
pub const RETRY_BACKOFF_MS: u64 = 2_000;

/// Environment variable that overrides `api.apiKey`
pub const API_KEY_ENV: &str = "VOLLEY_SYNC_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Application configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub api: ApiConfig,
    pub club: ClubConfig,
    pub sync: SyncConfig,
    pub calendar: CalendarConfig,
    pub feed: FeedConfig,
}

impl AppConfig {
    /// Loads the config from a JSON file, then applies environment overrides.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<AppConfig>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.api.api_key = key;
        }

        Ok(config)
    }
}

/// Upstream federation API settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.volleyball-bundesliga.de/api/v2".to_string(),
            api_key: String::new(),
            timeout_ms: FETCH_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClubConfig {
    /// Upstream club id whose teams are synced
    pub id: String,
}

/// Sync scheduling configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Local wall-clock time of the daily run, `HH:MM`
    pub daily_at: String,
    /// Minimum interval between two runs in milliseconds
    pub min_interval_ms: i64,
    pub max_concurrent_fetches: usize,
    /// Extra attempts for transient upstream failures within one run
    pub retries: u32,
    pub lease_timeout_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            daily_at: "04:30".to_string(),
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            max_concurrent_fetches: 4,
            retries: 1,
            lease_timeout_ms: RUN_LEASE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CalendarConfig {
    /// Domain used for document-level UIDs (`<scope>@<domain>`)
    pub domain: String,
    pub product_id: String,
    /// Event length when no explicit end is known
    pub duration_minutes: i64,
    pub cache_max_age_secs: u64,
    pub timezone_name: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            domain: "volley-sync.local".to_string(),
            product_id: "-//volley-sync//matches//DE".to_string(),
            duration_minutes: 180,
            cache_max_age_secs: 3600,
            timezone_name: "Europe/Berlin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedConfig {
    pub title: String,
    pub description: String,
    /// Absolute site URL used to resolve relative links and images
    pub base_url: String,
    pub language: String,
    pub author: Option<String>,
    pub max_items: usize,
    pub cache_max_age_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            title: "News".to_string(),
            description: String::new(),
            base_url: "http://localhost/".to_string(),
            language: "de".to_string(),
            author: None,
            max_items: 50,
            cache_max_age_secs: 1800,
        }
    }
}

/// Returns the path to the data directory for volley-sync.
/// Uses $XDG_DATA_HOME/volley-sync if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/volley-sync,
/// or ./volley-sync if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the database file.
pub fn db_path() -> PathBuf {
    data_dir().join("league.db")
}

/// Returns the default config file path.
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("volley-sync")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn app_config_from_partial_object_uses_defaults_for_missing_fields() {
        let result = serde_json::from_value::<AppConfig>(json!({
            "club": { "id": "42" },
            "sync": { "maxConcurrentFetches": 8 }
        }))
        .unwrap();

        assert_eq!(result.club.id, "42");
        assert_eq!(result.sync.max_concurrent_fetches, 8);
        assert_eq!(result.sync.min_interval_ms, DEFAULT_MIN_INTERVAL_MS);
        assert_eq!(result.calendar, CalendarConfig::default());
        assert_eq!(result.api.timeout_ms, FETCH_TIMEOUT_MS);
    }

    #[test]
    fn app_config_load_returns_defaults_when_file_is_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::load(&temp_dir.path().join("missing.json")).unwrap();

        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.feed.max_items, 50);
    }

    #[test]
    fn app_config_load_rejects_malformed_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn data_dir_with_env_uses_xdg_data_home_when_set() {
        let path = data_dir_with_env(
            Some("/tmp/test-data".to_string()),
            Some(PathBuf::from("/home/user")),
        );

        assert_eq!(path, PathBuf::from("/tmp/test-data/volley-sync"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_home_local_share() {
        let path = data_dir_with_env(None, Some(PathBuf::from("/home/user")));

        assert_eq!(path, PathBuf::from("/home/user/.local/share/volley-sync"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_current_dir_when_no_dirs_available() {
        let path = data_dir_with_env(None, None);
        assert_eq!(path, PathBuf::from("./volley-sync"));
    }
}
