//! Database sink and sink retry configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Database sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Enable the database sink.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `sqlite::memory:` or `sqlite://<path>`.
    #[serde(default = "default_connection_string")]
    pub connection_string: String,
    /// Depth of the database queue at which admission closes.
    #[serde(default = "default_db_queue_depth")]
    pub max_queue_depth: usize,
    /// Records per database transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Drain rounds a partial batch may wait before it is flushed anyway.
    #[serde(default = "default_max_batch_before_flush")]
    pub max_batch_before_flush: u32,
    /// Idle time after which a partial batch is flushed.
    #[serde(default = "default_idle_flush_ms")]
    pub idle_flush_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            connection_string: default_connection_string(),
            max_queue_depth: default_db_queue_depth(),
            batch_size: default_batch_size(),
            max_batch_before_flush: default_max_batch_before_flush(),
            idle_flush_ms: default_idle_flush_ms(),
        }
    }
}

impl DatabaseConfig {
    /// Parse the connection string.
    pub fn target(&self) -> Result<DatabaseTarget, ConfigError> {
        DatabaseTarget::parse(&self.connection_string)
    }
}

/// Where the SQLite sink lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// Private in-memory database.
    Memory,
    /// Database file.
    File(PathBuf),
}

impl DatabaseTarget {
    /// Parse `sqlite::memory:` or `sqlite://<path>`.
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let trimmed = connection_string.trim();
        if trimmed == "sqlite::memory:" {
            return Ok(Self::Memory);
        }
        match trimmed.strip_prefix("sqlite://") {
            Some(path) if !path.is_empty() => Ok(Self::File(PathBuf::from(path))),
            _ => Err(ConfigError::UnsupportedDatabase(connection_string.to_string())),
        }
    }
}

/// Retry policy for failed sink writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First backoff after a failure.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failures before an alert is raised.
    #[serde(default = "default_alert_after_failures")]
    pub alert_after_failures: u32,
    /// Attempts for the final flush during stop.
    #[serde(default = "default_final_flush_attempts")]
    pub final_flush_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            alert_after_failures: default_alert_after_failures(),
            final_flush_attempts: default_final_flush_attempts(),
        }
    }
}

const fn default_enabled() -> bool {
    true
}

fn default_connection_string() -> String {
    "sqlite://./data/journal.db".to_string()
}

const fn default_db_queue_depth() -> usize {
    50_000
}

const fn default_batch_size() -> usize {
    200
}

const fn default_max_batch_before_flush() -> u32 {
    4
}

const fn default_idle_flush_ms() -> u64 {
    50
}

const fn default_initial_backoff_ms() -> u64 {
    10
}

const fn default_max_backoff_ms() -> u64 {
    1000
}

const fn default_alert_after_failures() -> u32 {
    5
}

const fn default_final_flush_attempts() -> u32 {
    3
}
