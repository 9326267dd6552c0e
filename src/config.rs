use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineSettings;

/// File name of the SQLite database inside `storage.path`.
pub const DB_FILE_NAME: &str = "cloudsearch.sqlite";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_true")]
    pub cache_results: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout_secs(),
            max_results: default_max_results(),
            cache_results: true,
        }
    }
}

fn default_search_timeout_secs() -> u64 {
    15
}
fn default_max_results() -> usize {
    100
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokensConfig {
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
    #[serde(default = "default_reauth_lookahead_secs")]
    pub reauth_lookahead_secs: i64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            watch_interval_secs: default_watch_interval_secs(),
            reauth_lookahead_secs: default_reauth_lookahead_secs(),
        }
    }
}

fn default_watch_interval_secs() -> u64 {
    600
}
fn default_reauth_lookahead_secs() -> i64 {
    1800
}

/// Upper bound for `tokens.reauth_lookahead_secs` (one week).
pub const MAX_REAUTH_LOOKAHEAD_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings of the local-folder connector.
#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    /// Extra patterns skipped on top of `.git`, `target` and `node_modules`.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files larger than this are matched by name only.
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_text_bytes: default_max_text_bytes(),
        }
    }
}

fn default_max_text_bytes() -> u64 {
    1024 * 1024
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Every section at its default. Used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.path.join(DB_FILE_NAME)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            search_timeout: Duration::from_secs(self.search.timeout_secs),
            token_watch_interval: Duration::from_secs(self.tokens.watch_interval_secs),
            reauth_lookahead: chrono::Duration::seconds(
                self.tokens
                    .reauth_lookahead_secs
                    .clamp(0, MAX_REAUTH_LOOKAHEAD_SECS),
            ),
            max_results: self.search.max_results,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.search.timeout_secs == 0 {
        anyhow::bail!("search.timeout_secs must be > 0");
    }
    if config.search.max_results == 0 {
        anyhow::bail!("search.max_results must be >= 1");
    }
    if config.tokens.watch_interval_secs == 0 {
        anyhow::bail!("tokens.watch_interval_secs must be > 0");
    }
    if !(0..=MAX_REAUTH_LOOKAHEAD_SECS).contains(&config.tokens.reauth_lookahead_secs) {
        anyhow::bail!(
            "tokens.reauth_lookahead_secs must be between 0 and {}",
            MAX_REAUTH_LOOKAHEAD_SECS
        );
    }
    if !LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
        anyhow::bail!(
            "Unknown logging.level: '{}'. Must be one of {}.",
            config.logging.level,
            LOG_LEVELS.join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.path, PathBuf::from("./data"));
        assert_eq!(config.search.timeout_secs, 15);
        assert_eq!(config.search.max_results, 100);
        assert!(config.search.cache_results);
        assert_eq!(config.tokens.watch_interval_secs, 600);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
        assert_eq!(config.db_path(), PathBuf::from("./data/cloudsearch.sqlite"));
    }

    #[test]
    fn test_engine_settings_follow_config() {
        let file = write_config(
            r#"
[search]
timeout_secs = 3
max_results = 20

[tokens]
watch_interval_secs = 60
reauth_lookahead_secs = 120
"#,
        );
        let settings = load_config(file.path()).unwrap().engine_settings();
        assert_eq!(settings.search_timeout, Duration::from_secs(3));
        assert_eq!(settings.token_watch_interval, Duration::from_secs(60));
        assert_eq!(settings.reauth_lookahead, chrono::Duration::minutes(2));
        assert_eq!(settings.max_results, 20);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for body in [
            "[search]\ntimeout_secs = 0\n",
            "[search]\nmax_results = 0\n",
            "[tokens]\nwatch_interval_secs = 0\n",
            "[tokens]\nreauth_lookahead_secs = -1\n",
            "[tokens]\nreauth_lookahead_secs = 9223372036854775807\n",
            "[logging]\nlevel = \"loud\"\n",
        ] {
            let file = write_config(body);
            assert!(load_config(file.path()).is_err(), "accepted: {}", body);
        }
    }

    #[test]
    fn test_engine_settings_clamp_unvalidated_lookahead() {
        let mut config = Config::minimal();
        config.tokens.reauth_lookahead_secs = i64::MAX;
        assert_eq!(
            config.engine_settings().reauth_lookahead,
            chrono::Duration::seconds(MAX_REAUTH_LOOKAHEAD_SECS)
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config(Path::new("/nonexistent/cloudsearch.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
