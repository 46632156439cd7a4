use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use webmention_scanner::HttpConfig;

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/webmention";
pub const CONFIG_FILE: &str = "config.json";
pub const DATABASE_FILE: &str = "webmention.db";

/// Site and engine settings, loaded from `config.json`. Every field has a
/// default so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheme and host of the site, no trailing slash.
    pub site_url: String,
    /// Path segment in front of every post slug, e.g. `/blog`.
    pub path_prefix: String,
    /// Site timezone as an offset from UTC.
    pub utc_offset_minutes: i32,
    /// Post types that send and receive mentions.
    pub post_types: Vec<String>,
    pub outgoing_enabled: bool,
    /// Queued mentions handled per processing run.
    pub batch_size: usize,
    /// Source fetch failures tolerated before a mention is marked invalid.
    pub max_fetch_attempts: u32,
    pub process_interval_secs: i64,
    /// How often `serve` checks for due work.
    pub tick_secs: u64,
    /// Hosts whose published times are already UTC.
    pub bridging_hosts: Vec<String>,
    pub listen_addr: String,
    pub endpoint_path: String,
    /// Take the sender IP from X-Forwarded-For / X-Real-IP.
    pub trust_forwarded_for: bool,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_url: "http://localhost:8080".to_string(),
            path_prefix: String::new(),
            utc_offset_minutes: 0,
            post_types: vec!["post".to_string()],
            outgoing_enabled: true,
            batch_size: 5,
            max_fetch_attempts: 3,
            process_interval_secs: 3600,
            tick_secs: 60,
            bridging_hosts: vec!["brid-gy.appspot.com".to_string(), "brid.gy".to_string()],
            listen_addr: "127.0.0.1:8080".to_string(),
            endpoint_path: "/webmention".to_string(),
            trust_forwarded_for: false,
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Public URL of the intake endpoint.
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}{}",
            self.site_url.trim_end_matches('/'),
            self.endpoint_path
        )
    }

    pub fn utc_offset_secs(&self) -> i64 {
        i64::from(self.utc_offset_minutes) * 60
    }
}

/// Expands `~` in a configured directory.
pub fn expand_dir(dir: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(dir).to_string())
}

pub fn default_config_path() -> PathBuf {
    expand_dir(DEFAULT_CONFIG_DIR).join(CONFIG_FILE)
}

pub fn default_database_path() -> PathBuf {
    expand_dir(DEFAULT_CONFIG_DIR).join(DATABASE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"site_url": "https://blog.example", "batch_size": 10}"#)
                .unwrap();

        assert_eq!(config.site_url, "https://blog.example");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.post_types, vec!["post"]);
        assert_eq!(config.max_fetch_attempts, 3);
        assert_eq!(config.http.timeout_secs, 15);
        assert_eq!(config.endpoint_url(), "https://blog.example/webmention");
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(CONFIG_FILE);

        let config = Config {
            path_prefix: "/blog".to_string(),
            utc_offset_minutes: 120,
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.utc_offset_secs(), 7200);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_or_default(&temp_dir.path().join("missing.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_expand_dir() {
        assert!(!expand_dir("~/x").to_string_lossy().starts_with('~'));
        assert_eq!(expand_dir("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
