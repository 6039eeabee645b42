//! File journal and item pool configuration.

use serde::{Deserialize, Serialize};

/// When the file sink forces written records to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// Leave buffering to the OS.
    Never,
    /// Flush and `sync_data` once per drained batch.
    #[default]
    Batch,
    /// Flush and `sync_data` after every record.
    Record,
}

/// Append-only file journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileJournalConfig {
    /// Path of the JSON-lines journal. The rotated backup lives at `<path>.bak`.
    #[serde(default = "default_file_path")]
    pub file_path: String,
    /// Fsync policy.
    #[serde(default)]
    pub fsync: FsyncPolicy,
    /// Depth of the file queue at which admission closes.
    #[serde(default = "default_file_queue_depth")]
    pub max_queue_depth: usize,
}

impl Default for FileJournalConfig {
    fn default() -> Self {
        Self {
            file_path: default_file_path(),
            fsync: FsyncPolicy::default(),
            max_queue_depth: default_file_queue_depth(),
        }
    }
}

/// Item pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Items pre-allocated at startup.
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
    /// Allocate past the initial capacity instead of failing.
    #[serde(default = "default_allow_growth")]
    pub allow_growth: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            allow_growth: default_allow_growth(),
        }
    }
}

fn default_file_path() -> String {
    "./data/journal.jsonl".to_string()
}

const fn default_file_queue_depth() -> usize {
    10_000
}

const fn default_initial_capacity() -> usize {
    4096
}

const fn default_allow_growth() -> bool {
    true
}
