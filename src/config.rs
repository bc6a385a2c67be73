use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::directory::{ChannelDefaults, Instance};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub channel: ChannelDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// How much of a failed response body is read before giving up on it.
    #[serde(default = "default_drain_bytes")]
    pub drain_bytes: usize,

    #[serde(default)]
    pub instance: Instance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default)]
    pub json_format: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|_| Error::NotFound(path.as_ref().display().to_string()))?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given. Otherwise reads the default config file if
    /// one exists and falls back to built-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_with_env(path);
        }

        match Self::config_file() {
            Ok(default_path) if default_path.exists() => Self::load_with_env(default_path),
            _ => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.settings.workers == 0 {
            return Err(Error::Config("Workers must be greater than 0".to_string()));
        }

        if self.settings.timeout == 0 {
            return Err(Error::Config("Timeout must be greater than 0".to_string()));
        }

        if self.settings.user_agent.trim().is_empty() {
            return Err(Error::Config("User agent cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(workers) = var("FEED_DIRECTORY_WORKERS") {
            if let Ok(val) = workers.parse() {
                self.settings.workers = val;
            }
        }

        if let Some(timeout) = var("FEED_DIRECTORY_TIMEOUT") {
            if let Ok(val) = timeout.parse() {
                self.settings.timeout = val;
            }
        }

        if let Some(instance) = var("FEED_DIRECTORY_INSTANCE") {
            match instance.parse() {
                Ok(val) => self.settings.instance = val,
                Err(e) => warn!("Ignoring FEED_DIRECTORY_INSTANCE: {}", e),
            }
        }

        if let Some(level) = var("FEED_DIRECTORY_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("feed-directory"))
            .ok_or_else(|| Error::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
            drain_bytes: default_drain_bytes(),
            instance: Instance::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: false,
            log_file: default_log_file(),
            json_format: false,
        }
    }
}

fn default_workers() -> usize { 100 }
fn default_timeout() -> u64 { 30 }
fn default_drain_bytes() -> usize { 512 }
pub fn default_user_agent() -> String {
    format!("feed-directory/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String { "warn".to_string() }
fn default_log_file() -> String { "logs/feed-directory.log".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.settings.workers, 100);
        assert_eq!(config.settings.timeout, 30);
        assert_eq!(config.settings.drain_bytes, 512);
        assert_eq!(config.settings.instance, Instance::Public);
        assert!(config.settings.user_agent.starts_with("feed-directory/"));
        assert_eq!(config.channel, ChannelDefaults::default());
        assert_eq!(config.logging.level, "warn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let toml = r#"
            [settings]
            workers = 8
            instance = "private"

            [channel]
            country = "BE"
            type = "blog"
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.settings.workers, 8);
        assert_eq!(config.settings.timeout, 30);
        assert_eq!(config.settings.instance, Instance::Private);
        assert_eq!(config.channel.country, "BE");
        assert_eq!(config.channel.kind, "blog");
        assert_eq!(config.channel.region, "Global");
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let mut config = Config::default();
        config.settings.workers = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.settings.timeout = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.settings.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FEED_DIRECTORY_WORKERS", "12"),
            ("FEED_DIRECTORY_TIMEOUT", "not-a-number"),
            ("FEED_DIRECTORY_INSTANCE", "Private"),
            ("FEED_DIRECTORY_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.settings.workers, 12);
        assert_eq!(config.settings.timeout, 30);
        assert_eq!(config.settings.instance, Instance::Private);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.settings.workers = 4;
        config.channel.update_frequency = 2;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.settings.workers, 4);
        assert_eq!(loaded.channel.update_frequency, 2);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load("/nonexistent/feed-directory.toml");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
