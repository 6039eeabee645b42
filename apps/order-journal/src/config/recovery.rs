//! Crash recovery configuration.

use serde::{Deserialize, Serialize};

/// Which sink recovery treats as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    /// Replay the file journal.
    #[default]
    File,
    /// Query the database sink.
    Database,
}

/// Crash recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Account whose open orders and positions are rebuilt.
    #[serde(default = "default_account")]
    pub account: String,
    /// Authoritative sink.
    #[serde(default)]
    pub source: RecoverySource,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            source: RecoverySource::default(),
        }
    }
}

fn default_account() -> String {
    "default".to_string()
}
