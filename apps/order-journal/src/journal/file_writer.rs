//! Append-only JSON-lines file journal.
//!
//! One self-describing record per line. The file is re-readable for
//! recovery and rotatable: `remove(true)` renames it to `<path>.bak` and
//! starts a fresh file, and readers always read the backup first so a
//! rotation racing a restart loses nothing.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::pool::ItemHandle;
use super::worker::{BatchSink, FlushRound};
use crate::config::FsyncPolicy;
use crate::domain::JournalRecord;
use crate::error::SinkError;

/// Upper bound on records written per file batch.
const MAX_FILE_BATCH: usize = 4096;

/// Path of the rotated backup for a journal file.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Writer half of the file journal.
#[derive(Debug)]
pub struct FileWriter {
    path: PathBuf,
    file: File,
    fsync: FsyncPolicy,
    torn: bool,
}

impl FileWriter {
    /// Open (or create) the journal at `path` for appending.
    ///
    /// Missing parent directories are created. If the file ends in a torn
    /// line from an earlier crash, the next record starts on a new line.
    pub fn open(path: impl AsRef<Path>, fsync: FsyncPolicy) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = open_append(&path)?;
        let torn = !ends_with_newline(&path)?;
        if torn {
            warn!(path = %path.display(), "Journal ends in a partial line; it will be skipped on read");
        }

        info!(path = %path.display(), fsync = ?fsync, "File journal opened");

        Ok(Self {
            path,
            file,
            fsync,
            torn,
        })
    }

    /// Journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records in order.
    ///
    /// The batch is serialized up front, so a serialization failure writes
    /// nothing. After an I/O failure the next append starts on a fresh line.
    pub fn append(&mut self, items: &[ItemHandle]) -> Result<(), SinkError> {
        let mut lines = Vec::with_capacity(items.len());
        for handle in items {
            let item = handle.read();
            let mut line =
                serde_json::to_vec(&item.as_record()).map_err(|e| SinkError::Serialization {
                    seq: item.id,
                    kind: item.kind(),
                    message: e.to_string(),
                })?;
            line.push(b'\n');
            lines.push(line);
        }

        let result = self.write_lines(&lines);
        if result.is_err() {
            self.torn = true;
        }
        result
    }

    fn write_lines(&mut self, lines: &[Vec<u8>]) -> Result<(), SinkError> {
        if self.torn {
            self.file.write_all(b"\n")?;
            self.torn = false;
        }

        match self.fsync {
            FsyncPolicy::Record => {
                for line in lines {
                    self.file.write_all(line)?;
                    self.file.sync_data()?;
                }
            }
            FsyncPolicy::Batch | FsyncPolicy::Never => {
                let buf = lines.concat();
                self.file.write_all(&buf)?;
                if self.fsync == FsyncPolicy::Batch {
                    self.file.sync_data()?;
                }
            }
        }
        Ok(())
    }

    /// Force written records to stable storage.
    pub fn sync(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Read every record of the backup and the current file.
    pub fn rewind_read(&mut self) -> Result<Vec<JournalRecord>, SinkError> {
        self.file.flush()?;
        read_journal(&self.path)
    }

    /// Highest sequence id in the backup and the current file (0 if none).
    pub fn max_sequence(&mut self) -> Result<u64, SinkError> {
        Ok(self.rewind_read()?.last().map_or(0, |r| r.seq))
    }

    /// Start a fresh journal.
    ///
    /// With `backup` the current file is atomically renamed to `<path>.bak`
    /// (replacing an older backup); otherwise it is truncated.
    pub fn remove(&mut self, backup: bool) -> Result<(), SinkError> {
        self.sync()?;
        if backup {
            let bak = backup_path(&self.path);
            fs::rename(&self.path, &bak)?;
            self.file = open_append(&self.path)?;
            info!(path = %self.path.display(), backup = %bak.display(), "File journal rotated");
        } else {
            self.file.set_len(0)?;
            self.file.sync_all()?;
            info!(path = %self.path.display(), "File journal truncated");
        }
        self.torn = false;
        Ok(())
    }
}

impl BatchSink for FileWriter {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    fn plan(&mut self, pending: usize, _round: FlushRound) -> usize {
        pending.min(MAX_FILE_BATCH)
    }

    fn write_batch(&mut self, batch: &[ItemHandle]) -> Result<(), SinkError> {
        self.append(batch)
    }

    fn finish(&mut self) {
        if let Err(e) = self.sync() {
            warn!(path = %self.path.display(), error = %e, "Final journal sync failed");
        }
    }
}

fn open_append(path: &Path) -> Result<File, SinkError> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)?)
}

fn ends_with_newline(path: &Path) -> Result<bool, SinkError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Read the journal at `path`: its backup first, then the file itself.
///
/// Records come back in sequence order with duplicates (from a retried
/// partial write) removed. Blank, torn, or unknown-kind lines are skipped
/// with a warning. Missing files read as empty.
pub fn read_journal(path: &Path) -> Result<Vec<JournalRecord>, SinkError> {
    let mut records = read_file(&backup_path(path))?;
    records.extend(read_file(path)?);

    records.sort_by_key(|r| r.seq);
    records.dedup_by_key(|r| r.seq);
    Ok(records)
}

fn read_file(path: &Path) -> Result<Vec<JournalRecord>, SinkError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    let mut skipped = 0_usize;
    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<JournalRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable journal line"
                );
            }
        }
    }

    debug!(path = %path.display(), records = records.len(), skipped, "Journal file read");
    Ok(records)
}
