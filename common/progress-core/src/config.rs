//! Configuration loading
//!
//! Settings come from `progress.toml`. Every field has a default, so an
//! absent file or a partial one is fine.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default debounce window for durable saves
pub const DEFAULT_AUTOSAVE_DELAY_MS: u64 = 30_000;

const CONFIG_FILE_NAME: &str = "progress.toml";

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/binks/
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("binks").join(filename))
        .filter(|path| path.exists())
}

/// Top-level configuration (from progress.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressConfig {
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ProgressConfig {
    /// Load from the nearest progress.toml, or defaults if none exists
    pub fn load() -> Result<Self> {
        match find_config_file(CONFIG_FILE_NAME) {
            Some(path) => {
                tracing::debug!("Loading progress config from: {}", path.display());
                Self::load_from_path(&path)
            }
            None => {
                tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                Ok(Self::default())
            }
        }
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// `[autosave]` section
#[derive(Debug, Clone, Deserialize)]
pub struct AutosaveConfig {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl AutosaveConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
        }
    }
}

/// `[retry]` section: bounded retry performed inside each durable-store call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before the attempt following failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding workflow instances
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Single-slot ephemeral backup file
    #[serde(default = "default_ephemeral_path")]
    pub ephemeral_path: PathBuf,
    /// Directory of custom preset TOML files
    #[serde(default = "default_presets_dir")]
    pub presets_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            ephemeral_path: default_ephemeral_path(),
            presets_dir: default_presets_dir(),
        }
    }
}

// Default value functions
fn default_delay_ms() -> u64 {
    DEFAULT_AUTOSAVE_DELAY_MS
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_multiplier() -> u32 {
    4
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn binks_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".binks")
}

fn default_database_path() -> PathBuf {
    binks_dir().join("progress.db")
}

fn default_ephemeral_path() -> PathBuf {
    binks_dir().join("progress-backup.json")
}

fn default_presets_dir() -> PathBuf {
    binks_dir().join("presets")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ProgressConfig::default();
        assert_eq!(config.autosave.delay(), Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.storage.database_path.ends_with("progress.db"));
    }

    #[test]
    fn test_partial_file() {
        let config = ProgressConfig::from_toml(
            r#"
            [autosave]
            delay_ms = 500

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.autosave.delay_ms, 500);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 100);
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\ndatabase_path = \"/tmp/p.db\"").unwrap();

        let config = ProgressConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/p.db"));
        assert!(ProgressConfig::from_toml("autosave = 3").is_err());
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(1600));
        assert_eq!(policy.backoff(4), Duration::from_millis(2000));
        assert_eq!(policy.backoff(40), Duration::from_millis(2000));
    }
}
