use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ai::CLAUDE_API_URL;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub storage: StorageBackend,

    /// Enables topic news summaries. Without it only RSS feeds are used.
    pub claude_api_key: Option<String>,

    #[serde(default = "default_claude_api_url")]
    pub claude_api_url: String,

    #[serde(default = "default_notebook_service_url")]
    pub notebook_service_url: String,

    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,

    #[serde(default = "default_due_window")]
    pub due_window_minutes: u64,

    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_seconds: u64,

    #[serde(default = "default_topic_timeout")]
    pub topic_timeout_seconds: u64,

    #[serde(default = "default_source_timeout")]
    pub source_timeout_seconds: u64,

    #[serde(default = "default_artifact_timeout")]
    pub artifact_timeout_seconds: u64,

    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_seconds: u64,

    #[serde(default = "default_max_entries_per_feed")]
    pub max_entries_per_feed: usize,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("daily-brief");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("daily-brief.db").to_string_lossy().to_string()
}

fn default_claude_api_url() -> String {
    CLAUDE_API_URL.to_string()
}

fn default_notebook_service_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_tick_interval() -> u64 {
    60
}

fn default_due_window() -> u64 {
    5
}

fn default_feed_timeout() -> u64 {
    30
}

fn default_topic_timeout() -> u64 {
    60
}

fn default_source_timeout() -> u64 {
    120
}

fn default_artifact_timeout() -> u64 {
    180
}

fn default_synthesis_timeout() -> u64 {
    900
}

fn default_max_entries_per_feed() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage: StorageBackend::default(),
            claude_api_key: None,
            claude_api_url: default_claude_api_url(),
            notebook_service_url: default_notebook_service_url(),
            tick_interval_seconds: default_tick_interval(),
            due_window_minutes: default_due_window(),
            feed_timeout_seconds: default_feed_timeout(),
            topic_timeout_seconds: default_topic_timeout(),
            source_timeout_seconds: default_source_timeout(),
            artifact_timeout_seconds: default_artifact_timeout(),
            synthesis_timeout_seconds: default_synthesis_timeout(),
            max_entries_per_feed: default_max_entries_per_feed(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("daily-brief")
            .join("config.toml")
    }

    /// The due window must cover at least one tick, or a late tick can skip
    /// an occurrence entirely. A single feed or topic request must finish
    /// inside the family deadline, or it can never contribute.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_seconds == 0 {
            return Err(AppError::Config(
                "tick_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.due_window_minutes == 0 {
            return Err(AppError::Config(
                "due_window_minutes must be greater than zero".to_string(),
            ));
        }
        if self.due_window().as_secs() < self.tick_interval_seconds {
            return Err(AppError::Config(format!(
                "due_window_minutes ({}) must cover tick_interval_seconds ({})",
                self.due_window_minutes, self.tick_interval_seconds
            )));
        }
        for (name, value) in [
            ("feed_timeout_seconds", self.feed_timeout_seconds),
            ("topic_timeout_seconds", self.topic_timeout_seconds),
        ] {
            if value >= self.source_timeout_seconds {
                return Err(AppError::Config(format!(
                    "{} ({}) must be shorter than source_timeout_seconds ({})",
                    name, value, self.source_timeout_seconds
                )));
            }
        }
        if self.max_entries_per_feed == 0 {
            return Err(AppError::Config(
                "max_entries_per_feed must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn due_window(&self) -> Duration {
        Duration::from_secs(self.due_window_minutes * 60)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_seconds)
    }

    pub fn topic_timeout(&self) -> Duration {
        Duration::from_secs(self.topic_timeout_seconds)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_seconds)
    }

    pub fn artifact_timeout(&self) -> Duration {
        Duration::from_secs(self.artifact_timeout_seconds)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "storage = \"memory\"\nclaude_api_key = \"sk-test\"\ndue_window_minutes = 10\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.claude_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.due_window(), Duration::from_secs(600));
        assert_eq!(config.tick_interval_seconds, 60);
        assert_eq!(config.synthesis_timeout_seconds, 900);
        assert_eq!(config.notebook_service_url, "http://localhost:3001");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            db_path: "/tmp/brief.db".to_string(),
            max_entries_per_feed: 3,
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.db_path, "/tmp/brief.db");
        assert_eq!(loaded.max_entries_per_feed, 3);
        assert_eq!(loaded.storage, StorageBackend::Sqlite);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let zero_tick = Config {
            tick_interval_seconds: 0,
            ..Config::default()
        };
        assert!(zero_tick.validate().is_err());

        let zero_window = Config {
            due_window_minutes: 0,
            ..Config::default()
        };
        assert!(zero_window.validate().is_err());

        let window_shorter_than_tick = Config {
            tick_interval_seconds: 600,
            due_window_minutes: 5,
            ..Config::default()
        };
        assert!(matches!(
            window_shorter_than_tick.validate(),
            Err(AppError::Config(_))
        ));

        let feed_outlives_family = Config {
            feed_timeout_seconds: 120,
            source_timeout_seconds: 120,
            ..Config::default()
        };
        assert!(matches!(
            feed_outlives_family.validate(),
            Err(AppError::Config(msg)) if msg.contains("feed_timeout_seconds")
        ));

        let topic_outlives_family = Config {
            topic_timeout_seconds: 300,
            ..Config::default()
        };
        assert!(matches!(
            topic_outlives_family.validate(),
            Err(AppError::Config(msg)) if msg.contains("topic_timeout_seconds")
        ));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tick_interval_seconds = \"soon\"").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(AppError::TomlParse(_))
        ));
    }
}
