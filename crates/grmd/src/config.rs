//! Daemon configuration.
//!
//! Loaded from a TOML file; every field has a default so a missing or
//! partial file still yields a runnable configuration. Example:
//!
//! ```toml
//! database_path = "/var/lib/grmd/grm.db"
//! pii_vault_path = "/var/lib/grmd/pii.db"
//!
//! [jobs]
//! check_interval_secs = 300
//! deadline_secs = 240
//!
//! [webhook]
//! url = "https://notify.example.org/send"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrmdConfig {
    /// SQLite document store (regions, workers, issues, ...).
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// SQLite PII vault, kept separate from the document store.
    #[serde(default = "default_vault_path")]
    pub pii_vault_path: PathBuf,

    #[serde(default)]
    pub jobs: JobsConfig,

    /// Notification transport; the notification job is skipped when
    /// absent.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for GrmdConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pii_vault_path: default_vault_path(),
            jobs: JobsConfig::default(),
            webhook: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Integrity-repair job period (seconds).
    #[serde(default = "default_interval")]
    pub check_interval_secs: u64,
    /// Escalation job period (seconds).
    #[serde(default = "default_interval")]
    pub escalate_interval_secs: u64,
    /// Notification job period (seconds).
    #[serde(default = "default_interval")]
    pub notify_interval_secs: u64,
    /// Overall deadline of a single job run (seconds). Past it, the
    /// run stops starting new per-issue repairs.
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    /// Bound on retry-on-conflict cycles per issue write.
    #[serde(default = "default_write_retries")]
    pub write_retries: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_interval(),
            escalate_interval_secs: default_interval(),
            notify_interval_secs: default_interval(),
            deadline_secs: default_deadline(),
            write_retries: default_write_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/grmd/grm.db")
}

fn default_vault_path() -> PathBuf {
    PathBuf::from("/var/lib/grmd/pii.db")
}

fn default_interval() -> u64 {
    300
}

fn default_deadline() -> u64 {
    240
}

fn default_write_retries() -> usize {
    3
}

fn default_webhook_timeout() -> u64 {
    10
}

impl GrmdConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Load the config, falling back to defaults when the file does not
    /// exist. Parse errors in an existing file are still fatal.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(config = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: GrmdConfig = toml::from_str("").unwrap();
        assert_eq!(config.jobs.check_interval_secs, 300);
        assert_eq!(config.jobs.deadline_secs, 240);
        assert_eq!(config.jobs.write_retries, 3);
        assert!(config.webhook.is_none());
        assert_eq!(config.database_path, PathBuf::from("/var/lib/grmd/grm.db"));
    }

    #[test]
    fn test_partial_config_overrides() {
        let config: GrmdConfig = toml::from_str(
            r#"
            database_path = "/tmp/grm.db"

            [jobs]
            check_interval_secs = 60

            [webhook]
            url = "https://notify.example.org/send"
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/grm.db"));
        assert_eq!(config.jobs.check_interval_secs, 60);
        assert_eq!(config.jobs.escalate_interval_secs, 300);
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.url, "https://notify.example.org/send");
        assert_eq!(webhook.timeout_secs, 10);
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = GrmdConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.jobs.notify_interval_secs, 300);
    }
}
