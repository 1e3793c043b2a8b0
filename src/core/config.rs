//! # Configuration
//!
//! Process configuration comes from environment variables (with `.env` support in the binary);
//! scheduler tuning comes from an optional YAML file.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Added `confirm_ceiling_outcome` and the adoption interval
//! - 1.0.0: Initial release with env config and YAML scheduler settings

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Process-level configuration read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file
    pub database_path: String,

    /// Default `env_logger` filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Telegram bot token; reminders are only logged when absent
    pub telegram_bot_token: Option<String>,

    /// Telegram Bot API base URL
    pub telegram_api_url: String,

    /// Path of the YAML scheduler settings file
    pub scheduler_config_path: String,
}

impl Config {
    /// Build the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_path: env_or("DATABASE_PATH", "nudge.db"),
            log_level: env_or("LOG_LEVEL", "info"),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            telegram_api_url: env_or("TELEGRAM_API_URL", "https://api.telegram.org"),
            scheduler_config_path: env_or("SCHEDULER_CONFIG_PATH", "scheduler.yaml"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Final status when the confirming loop hits its ceiling without an acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CeilingOutcome {
    /// Delivered at least once, treat as done
    Sent,
    /// Never confirmed, treat as a failure
    Failed,
}

/// Tuning knobs for the scheduling process
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerSettings {
    /// Send attempts per notification occasion
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for a single send attempt
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_seconds: u64,

    /// First backoff delay, doubled after every failed attempt
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Total time the confirming loop keeps repeating
    #[serde(default = "default_confirm_ceiling")]
    pub confirm_ceiling_minutes: u64,

    #[serde(default = "default_ceiling_outcome")]
    pub confirm_ceiling_outcome: CeilingOutcome,

    /// How often a waiting process re-reads the signal table
    #[serde(default = "default_signal_poll")]
    pub signal_poll_seconds: u64,

    /// How often the daemon looks for reminders that never got a process
    #[serde(default = "default_adopt_interval")]
    pub adopt_interval_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_seconds: default_attempt_timeout(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            confirm_ceiling_minutes: default_confirm_ceiling(),
            confirm_ceiling_outcome: default_ceiling_outcome(),
            signal_poll_seconds: default_signal_poll(),
            adopt_interval_seconds: default_adopt_interval(),
        }
    }
}

impl SchedulerSettings {
    /// Load settings from a YAML file, falling back to defaults when the file does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate settings from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let settings: SchedulerSettings = serde_yaml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be at least 1"));
        }
        if self.attempt_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("attempt_timeout_seconds must be positive"));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(anyhow::anyhow!(
                "backoff_max_ms ({}) is smaller than backoff_initial_ms ({})",
                self.backoff_max_ms,
                self.backoff_initial_ms
            ));
        }
        if self.confirm_ceiling_minutes == 0 {
            return Err(anyhow::anyhow!("confirm_ceiling_minutes must be positive"));
        }
        if self.signal_poll_seconds == 0 {
            return Err(anyhow::anyhow!("signal_poll_seconds must be positive"));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_seconds)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn confirm_ceiling(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.confirm_ceiling_minutes as i64)
    }

    pub fn signal_poll_interval(&self) -> Duration {
        Duration::from_secs(self.signal_poll_seconds)
    }

    pub fn adopt_interval(&self) -> Duration {
        Duration::from_secs(self.adopt_interval_seconds.max(1))
    }
}

// Default value functions
fn default_max_attempts() -> u32 {
    5
}

fn default_attempt_timeout() -> u64 {
    30
}

fn default_backoff_initial() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    60_000
}

fn default_confirm_ceiling() -> u64 {
    600 // 10 hours
}

fn default_ceiling_outcome() -> CeilingOutcome {
    CeilingOutcome::Sent
}

fn default_signal_poll() -> u64 {
    5
}

fn default_adopt_interval() -> u64 {
    30
}
