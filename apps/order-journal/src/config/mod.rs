//! Configuration module for the order journal.
//!
//! Provides configuration loading, validation, and environment variable
//! interpolation for the journal, its sinks and the strategy container.
//!
//! # Usage
//!
//! ```rust,ignore
//! use order_journal::config::{Config, load_config};
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Journal-only settings for `OrderJournal::init`
//! let settings = config.journal_settings();
//! ```

mod container;
mod database;
mod journal;
mod observability;
mod recovery;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use container::{ContainerConfig, PersistOrdering};
pub use database::{DatabaseConfig, DatabaseTarget, RetryConfig};
pub use journal::{FileJournalConfig, FsyncPolicy, PoolConfig};
pub use observability::ObservabilityConfig;
pub use recovery::{RecoveryConfig, RecoverySource};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// Connection string names a database this build cannot open.
    #[error("Unsupported database connection string: '{0}'")]
    UnsupportedDatabase(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// File journal configuration.
    #[serde(default)]
    pub journal: FileJournalConfig,
    /// Item pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Database sink configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Sink retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Crash recovery configuration.
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Strategy container configuration.
    #[serde(default)]
    pub container: ContainerConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Settings consumed by `OrderJournal::init`.
    #[must_use]
    pub fn journal_settings(&self) -> JournalSettings {
        JournalSettings {
            file: self.journal.clone(),
            pool: self.pool.clone(),
            database: self.database.clone(),
            retry: self.retry.clone(),
        }
    }
}

/// The subset of [`Config`] the journal façade needs.
#[derive(Debug, Clone, Default)]
pub struct JournalSettings {
    /// File journal.
    pub file: FileJournalConfig,
    /// Item pool.
    pub pool: PoolConfig,
    /// Database sink.
    pub database: DatabaseConfig,
    /// Sink retry.
    pub retry: RetryConfig,
}

impl JournalSettings {
    /// File-only settings rooted at `file_path`, with the database disabled.
    #[must_use]
    pub fn file_only(file_path: impl Into<String>) -> Self {
        Self {
            file: FileJournalConfig {
                file_path: file_path.into(),
                ..FileJournalConfig::default()
            },
            database: DatabaseConfig {
                enabled: false,
                ..DatabaseConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate the journal settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let path = self.file.file_path.trim();
        if path.is_empty() {
            return Err(ConfigError::ValidationError(
                "journal.file_path must not be empty".to_string(),
            ));
        }
        check_journal_path(Path::new(path))?;

        if self.database.enabled {
            self.database.target()?;
            if self.database.batch_size == 0 {
                return Err(ConfigError::ValidationError(
                    "database.batch_size must be positive".to_string(),
                ));
            }
            if self.database.max_batch_before_flush == 0 {
                return Err(ConfigError::ValidationError(
                    "database.max_batch_before_flush must be positive".to_string(),
                ));
            }
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }
        if self.retry.final_flush_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.final_flush_attempts must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// The journal file must be a writable regular file, or creatable under a
/// directory. Checked before any sink is opened.
fn check_journal_path(path: &Path) -> Result<(), ConfigError> {
    let display = path.display();
    if let Ok(meta) = std::fs::metadata(path) {
        if !meta.is_file() {
            return Err(ConfigError::ValidationError(format!(
                "journal.file_path '{display}' is not a regular file"
            )));
        }
        if meta.permissions().readonly() {
            return Err(ConfigError::ValidationError(format!(
                "journal.file_path '{display}' is read-only"
            )));
        }
        return Ok(());
    }

    // Nearest existing ancestor must be a directory; missing ones are created.
    let existing = path
        .ancestors()
        .skip(1)
        .filter(|p| !p.as_os_str().is_empty())
        .find(|p| p.exists());
    if let Some(parent) = existing.filter(|p| !p.is_dir()) {
        return Err(ConfigError::ValidationError(format!(
            "journal.file_path '{display}' has non-directory parent '{}'",
            parent.display()
        )));
    }
    Ok(())
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. Unset or empty
/// variables without a default become the empty string.
#[allow(clippy::expect_used)] // Regex is compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    config.journal_settings().validate()?;

    if config.recovery.account.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "recovery.account must not be empty".to_string(),
        ));
    }
    if config.recovery.source == RecoverySource::Database && !config.database.enabled {
        return Err(ConfigError::ValidationError(
            "recovery.source = database requires database.enabled".to_string(),
        ));
    }

    if config.container.drain_iterations == 0 {
        return Err(ConfigError::ValidationError(
            "container.drain_iterations must be positive".to_string(),
        ));
    }

    Ok(())
}
