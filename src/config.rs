use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "DEVFEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            token: String::new(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    crate::client::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    "devfeed-dev/0.1 (+https://github.com/devfeed/devfeed)".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_time_period")]
    pub time_period: i64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            sort_by: default_sort_by(),
            time_period: default_time_period(),
        }
    }
}

fn default_sort_by() -> String {
    "popularity".into()
}

fn default_time_period() -> i64 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    // The file layer is parsed with per-field serde defaults, so fields the
    // file leaves unset already carry their default values.
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Environment overrides are applied key by key onto the already-loaded
/// config, so variables that are not set leave the file layer untouched.
fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.token" => cfg.api.token = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "feed.sort_by" => cfg.feed.sort_by = value,
        "feed.time_period" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.feed.time_period = parsed;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("devfeed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            env_prefix: Some("DEVFEED_TEST_NONE".into()),
            ..LoadOptions::default()
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, default_base_url());
        assert_eq!(cfg.feed.sort_by, "popularity");
        assert_eq!(cfg.feed.time_period, 7);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  token: secret\nfeed:\n  sort_by: upvotes\n  time_period: 30\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("DEVFEED_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.token, "secret");
        assert_eq!(cfg.feed.sort_by, "upvotes");
        assert_eq!(cfg.feed.time_period, 30);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.api.user_agent, default_user_agent());
    }

    #[test]
    fn env_layer_only_overrides_set_variables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://feed.example.test/\nfeed:\n  sort_by: upvotes\n  time_period: 30\n",
        )
        .unwrap();
        env::set_var("DEVFEED_TEST_MIX_FEED__SORT_BY", "time");
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("DEVFEED_TEST_MIX".into()),
        })
        .unwrap();
        // The one env variable wins, everything else keeps the file values.
        assert_eq!(cfg.feed.sort_by, "time");
        assert_eq!(cfg.feed.time_period, 30);
        assert_eq!(cfg.api.base_url, "https://feed.example.test/");
        env::remove_var("DEVFEED_TEST_MIX_FEED__SORT_BY");
    }

    #[test]
    fn env_overrides() {
        env::set_var("DEVFEED_TEST_ENV_FEED__SORT_BY", "time");
        let cfg = load(LoadOptions {
            env_prefix: Some("DEVFEED_TEST_ENV".into()),
            ..LoadOptions::default()
        })
        .unwrap();
        assert_eq!(cfg.feed.sort_by, "time");
        env::remove_var("DEVFEED_TEST_ENV_FEED__SORT_BY");
    }
}
