//! The journal façade: lifecycle, `persist`, admission and recovery access.
//!
//! ```text
//! Uninitialized --init--> Initialized --start--> Started --stop--> Stopping --> Stopped
//! ```
//!
//! Records persisted while `Initialized` are buffered in the queues and
//! written once the workers start (or during `stop`).

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::admission::AdmissionControl;
use super::db_writer::{DbSink, DbWriter, SharedConnection, SqliteSink};
use super::file_writer::FileWriter;
use super::pool::ItemPool;
use super::queue::DurableQueue;
use super::recovery::{DbRecoveryReader, FileRecoveryReader, RecoveryReader};
use super::worker::SinkWorker;
use crate::config::{JournalSettings, RecoverySource, RetryConfig};
use crate::domain::{
    Command, Fill, FillDropCopy, FixSessionMsg, FixSessionState, MessagingStats, Order,
    OrderReject, Payload, PnLAuditTrailInfo, SequenceCounter, StorageItem,
};
use crate::error::{JournalError, SinkError};

/// Lifecycle state of an [`OrderJournal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalState {
    /// Created, not yet initialized.
    Uninitialized,
    /// Sinks opened; `persist` buffers.
    Initialized,
    /// Workers running.
    Started,
    /// Final flush in progress.
    Stopping,
    /// Workers joined.
    Stopped,
}

impl JournalState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initialized => "Initialized",
            Self::Started => "Started",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for JournalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives items flagged `send_to_bus` after they were written to the
/// file journal. Called on the file worker thread; must not block.
pub trait JournalObserver: Send + Sync {
    /// An item was durably journaled.
    fn on_persisted(&self, item: &StorageItem);
}

/// The journal as seen by its collaborators.
pub trait JournalPort: Send + Sync {
    /// Journal a payload; returns its sequence id.
    fn persist(&self, payload: Payload, send_to_bus: bool) -> Result<u64, JournalError>;

    /// File sink admission gate.
    fn can_persist(&self) -> bool;

    /// Database sink admission gate (true when the database is disabled).
    fn can_persist_to_db(&self) -> bool;

    /// Current lifecycle state.
    fn state(&self) -> JournalState;

    /// Flush both sinks and stop the workers. Idempotent.
    fn stop(&self);
}

struct Runtime {
    pool: ItemPool,
    counter: SequenceCounter,
    file_queue: Arc<DurableQueue>,
    db_queue: Option<Arc<DurableQueue>>,
    file_writer: Option<FileWriter>,
    db_writer: Option<DbWriter>,
    file_worker: Option<JoinHandle<FileWriter>>,
    db_worker: Option<JoinHandle<DbWriter>>,
    db_conn: Option<SharedConnection>,
    file_path: PathBuf,
    retry: RetryConfig,
}

struct Core {
    state: JournalState,
    runtime: Option<Runtime>,
    observers: Vec<Arc<dyn JournalObserver>>,
}

/// Durable order/fill journal.
///
/// Owned by the composition root and shared by reference (or through
/// [`JournalPort`]). All methods take `&self`.
pub struct OrderJournal {
    core: Mutex<Core>,
    admission: OnceLock<AdmissionControl>,
}

impl Default for OrderJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderJournal {
    /// Create an uninitialized journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Mutex::new(Core {
                state: JournalState::Uninitialized,
                runtime: None,
                observers: Vec::new(),
            }),
            admission: OnceLock::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> JournalState {
        self.core.lock().state
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Validate settings, open the database (if enabled) and the file
    /// journal, and seed the sequence counter from the existing journal.
    ///
    /// On error the journal stays `Uninitialized`.
    pub fn init(&self, settings: JournalSettings) -> Result<(), JournalError> {
        self.init_inner(settings, None)
    }

    /// Like [`init`](Self::init) but writes database records to `sink`
    /// instead of opening the configured connection string.
    pub fn init_with_db_sink(
        &self,
        settings: JournalSettings,
        sink: Box<dyn DbSink>,
    ) -> Result<(), JournalError> {
        self.init_inner(settings, Some(sink))
    }

    fn init_inner(
        &self,
        mut settings: JournalSettings,
        custom_sink: Option<Box<dyn DbSink>>,
    ) -> Result<(), JournalError> {
        let mut core = self.core.lock();
        if core.state != JournalState::Uninitialized {
            return Err(JournalError::InvalidState {
                expected: JournalState::Uninitialized.as_str(),
                found: core.state.as_str(),
            });
        }

        if custom_sink.is_some() {
            settings.database.enabled = true;
        }
        settings.validate()?;

        let mut file_writer = FileWriter::open(&settings.file.file_path, settings.file.fsync)?;
        let file_seq = file_writer.max_sequence()?;

        let (mut db_sink, db_conn) = match custom_sink {
            Some(sink) => (Some(sink), None),
            None if settings.database.enabled => {
                let sqlite = SqliteSink::open(&settings.database.target()?)?;
                let conn = sqlite.connection();
                let sink: Box<dyn DbSink> = Box::new(sqlite);
                (Some(sink), Some(conn))
            }
            None => (None, None),
        };
        let db_seq = match db_sink.as_mut() {
            Some(sink) => sink.last_sequence()?,
            None => 0,
        };
        if db_seq > file_seq {
            warn!(file_seq, db_seq, "Database is ahead of the file journal");
        }
        let last_seq = file_seq.max(db_seq);
        let db_writer = db_sink.map(|sink| DbWriter::new(sink, &settings.database));

        let file_queue = Arc::new(DurableQueue::new("file", settings.file.max_queue_depth));
        let db_queue = db_writer
            .as_ref()
            .map(|_| Arc::new(DurableQueue::new("db", settings.database.max_queue_depth)));

        let admission = AdmissionControl::new(Arc::clone(&file_queue), db_queue.clone());
        if self.admission.set(admission).is_err() {
            return Err(JournalError::InvalidState {
                expected: JournalState::Uninitialized.as_str(),
                found: JournalState::Initialized.as_str(),
            });
        }

        info!(
            file = %settings.file.file_path,
            db_enabled = db_writer.is_some(),
            file_max_depth = settings.file.max_queue_depth,
            db_max_depth = settings.database.max_queue_depth,
            last_seq,
            "Order journal initialized"
        );

        core.runtime = Some(Runtime {
            pool: ItemPool::new(settings.pool.initial_capacity, settings.pool.allow_growth),
            counter: SequenceCounter::starting_after(last_seq),
            file_queue,
            db_queue,
            file_writer: Some(file_writer),
            db_writer,
            file_worker: None,
            db_worker: None,
            db_conn,
            file_path: PathBuf::from(&settings.file.file_path),
            retry: settings.retry,
        });
        core.state = JournalState::Initialized;
        Ok(())
    }

    /// Start the sink workers. Records buffered since `init` are written.
    pub fn start(&self) -> Result<(), JournalError> {
        let mut core = self.core.lock();
        if core.state != JournalState::Initialized {
            return Err(JournalError::InvalidState {
                expected: JournalState::Initialized.as_str(),
                found: core.state.as_str(),
            });
        }

        if let Err(e) = spawn_workers(&mut core) {
            error!(error = %e, "Failed to start journal workers");
            core.state = JournalState::Stopping;
            drop(core);
            self.finish_stop();
            return Err(JournalError::Sink(SinkError::Io(e)));
        }

        core.state = JournalState::Started;
        info!("Order journal started");
        Ok(())
    }

    /// Flush everything enqueued so far and stop the workers.
    ///
    /// Idempotent. Records persisted before the call are in the sinks when
    /// it returns, unless a sink kept failing through its final flush.
    pub fn stop(&self) {
        let mut core = self.core.lock();
        match core.state {
            JournalState::Uninitialized => {
                core.state = JournalState::Stopped;
                return;
            }
            JournalState::Stopping | JournalState::Stopped => return,
            JournalState::Initialized => {
                // Never started: run the workers just for the final flush.
                if let Err(e) = spawn_workers(&mut core) {
                    error!(error = %e, "Failed to start journal workers for final flush");
                }
            }
            JournalState::Started => {}
        }

        core.state = JournalState::Stopping;
        info!("Order journal stopping");
        drop(core);
        self.finish_stop();
    }

    fn finish_stop(&self) {
        let (file_worker, db_worker) = {
            let mut core = self.core.lock();
            let Some(rt) = core.runtime.as_mut() else {
                core.state = JournalState::Stopped;
                return;
            };
            rt.file_queue.close();
            if let Some(db) = &rt.db_queue {
                db.close();
            }
            (rt.file_worker.take(), rt.db_worker.take())
        };

        let file_writer = file_worker.and_then(|h| h.join().ok());
        let db_writer = db_worker.and_then(|h| h.join().ok());

        let mut core = self.core.lock();
        if let Some(rt) = core.runtime.as_mut() {
            if file_writer.is_some() {
                rt.file_writer = file_writer;
            }
            if db_writer.is_some() {
                rt.db_writer = db_writer;
            }
            info!(
                file_unflushed = rt.file_queue.depth(),
                db_unflushed = rt.db_queue.as_ref().map_or(0, |q| q.depth()),
                last_seq = rt.counter.last(),
                "Order journal stopped"
            );
        }
        core.state = JournalState::Stopped;
    }

    /// Register a bus observer. Only allowed before `start`.
    pub fn add_observer(&self, observer: Arc<dyn JournalObserver>) -> Result<(), JournalError> {
        let mut core = self.core.lock();
        match core.state {
            JournalState::Uninitialized | JournalState::Initialized => {
                core.observers.push(observer);
                Ok(())
            }
            other => Err(JournalError::InvalidState {
                expected: JournalState::Initialized.as_str(),
                found: other.as_str(),
            }),
        }
    }

    /// Rotate the file journal (see [`FileWriter::remove`]).
    ///
    /// Only while the file worker is not running.
    pub fn rotate_file(&self, backup: bool) -> Result<(), JournalError> {
        let mut core = self.core.lock();
        let state = core.state;
        let writer = core
            .runtime
            .as_mut()
            .and_then(|rt| rt.file_writer.as_mut())
            .filter(|_| matches!(state, JournalState::Initialized | JournalState::Stopped));
        match writer {
            Some(writer) => Ok(writer.remove(backup)?),
            None => Err(JournalError::InvalidState {
                expected: JournalState::Initialized.as_str(),
                found: state.as_str(),
            }),
        }
    }

    // ========================================================================
    // Persist
    // ========================================================================

    /// Journal a payload.
    ///
    /// Stamps the next sequence id and enqueues the item for the file sink
    /// and, for database-relevant kinds, the database sink. Never blocks on
    /// the sinks and ignores the admission gates.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `init`, `Stopped` once `stop` has begun, and
    /// `PoolExhausted` when the fixed-size pool has no free item.
    pub fn persist(&self, payload: Payload, send_to_bus: bool) -> Result<u64, JournalError> {
        let core = self.core.lock();
        let rt = match (core.state, core.runtime.as_ref()) {
            (JournalState::Initialized | JournalState::Started, Some(rt)) => rt,
            (JournalState::Stopping | JournalState::Stopped, _) => {
                warn!(kind = %payload.kind(), "persist called on a stopped journal");
                return Err(JournalError::Stopped);
            }
            _ => {
                warn!(kind = %payload.kind(), "persist called before init");
                return Err(JournalError::NotInitialized);
            }
        };

        let kind = payload.kind();
        let handle = rt.pool.obtain(&rt.counter, payload, send_to_bus)?;
        let seq = handle.id();
        if kind.is_db_relevant() {
            if let Some(db) = &rt.db_queue {
                db.push(handle.clone());
            }
        }
        rt.file_queue.push(handle);
        Ok(seq)
    }

    /// Journal a strategy command.
    pub fn persist_command(&self, command: Command) -> Result<u64, JournalError> {
        self.persist(Payload::Command(command), false)
    }

    /// Journal an order snapshot.
    pub fn persist_order(&self, order: Order) -> Result<u64, JournalError> {
        self.persist(Payload::Order(order), true)
    }

    /// Journal an order together with its reject.
    pub fn persist_order_reject(
        &self,
        order: Order,
        reject: OrderReject,
    ) -> Result<u64, JournalError> {
        self.persist(Payload::OrderReject { order, reject }, true)
    }

    /// Journal a fill.
    pub fn persist_fill(&self, fill: Fill) -> Result<u64, JournalError> {
        self.persist(Payload::Fill(fill), true)
    }

    /// Journal FIX session sequence state.
    pub fn persist_fix_session_state(&self, state: FixSessionState) -> Result<u64, JournalError> {
        self.persist(Payload::FixSessionState(state), false)
    }

    /// Journal a raw FIX message (file sink only).
    pub fn persist_fix_session_msg(&self, msg: FixSessionMsg) -> Result<u64, JournalError> {
        self.persist(Payload::FixSessionMsg(msg), false)
    }

    /// Journal a drop-copy fill.
    pub fn persist_fill_drop_copy(&self, fill: FillDropCopy) -> Result<u64, JournalError> {
        self.persist(Payload::FillDropCopy(fill), true)
    }

    /// Journal a PnL audit snapshot.
    pub fn persist_pnl_audit(&self, info: PnLAuditTrailInfo) -> Result<u64, JournalError> {
        self.persist(Payload::PnlAuditTrailInfo(info), true)
    }

    /// Journal messaging counters.
    pub fn persist_messaging_stats(&self, stats: MessagingStats) -> Result<u64, JournalError> {
        self.persist(Payload::MessagingStats(stats), false)
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Admission gates; `None` before `init`.
    #[must_use]
    pub fn admission(&self) -> Option<&AdmissionControl> {
        self.admission.get()
    }

    /// File admission gate. False before `init` and after `stop`.
    #[must_use]
    pub fn can_persist(&self) -> bool {
        self.admission.get().is_some_and(AdmissionControl::can_persist)
    }

    /// Database admission gate. True when the database is disabled.
    #[must_use]
    pub fn can_persist_to_db(&self) -> bool {
        self.admission
            .get()
            .is_some_and(AdmissionControl::can_persist_to_db)
    }

    /// Most recently issued sequence id.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.core.lock().runtime.as_ref().map_or(0, |rt| rt.counter.last())
    }

    /// Pool statistics as `(available, allocated)`.
    #[must_use]
    pub fn pool_stats(&self) -> (usize, usize) {
        self.core
            .lock()
            .runtime
            .as_ref()
            .map_or((0, 0), |rt| (rt.pool.available(), rt.pool.allocated()))
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Recovery reader over the authoritative sink.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `init`; `Recovery` when `Database` is asked
    /// for but no SQLite sink is open.
    pub fn recovery_reader(
        &self,
        source: RecoverySource,
    ) -> Result<Box<dyn RecoveryReader>, JournalError> {
        let (path, conn) = {
            let core = self.core.lock();
            let rt = core.runtime.as_ref().ok_or(JournalError::NotInitialized)?;
            (rt.file_path.clone(), rt.db_conn.clone())
        };

        match source {
            RecoverySource::File => Ok(Box::new(FileRecoveryReader::load(&path)?)),
            RecoverySource::Database => conn
                .map(|c| Box::new(DbRecoveryReader::new(c)) as Box<dyn RecoveryReader>)
                .ok_or_else(|| JournalError::Recovery("database sink is not enabled".to_string())),
        }
    }
}

fn spawn_workers(core: &mut Core) -> std::io::Result<()> {
    let observers = core.observers.clone();
    let Some(rt) = core.runtime.as_mut() else {
        return Ok(());
    };

    if let Some(writer) = rt.file_writer.take() {
        let worker = SinkWorker::new(
            Arc::clone(&rt.file_queue),
            writer,
            rt.retry.clone(),
            observers,
        );
        rt.file_worker = Some(worker.spawn("journal-file")?);
    }

    if let (Some(writer), Some(queue)) = (rt.db_writer.take(), rt.db_queue.as_ref()) {
        let worker = SinkWorker::new(Arc::clone(queue), writer, rt.retry.clone(), Vec::new());
        rt.db_worker = Some(worker.spawn("journal-db")?);
    }
    Ok(())
}

impl JournalPort for OrderJournal {
    fn persist(&self, payload: Payload, send_to_bus: bool) -> Result<u64, JournalError> {
        Self::persist(self, payload, send_to_bus)
    }

    fn can_persist(&self) -> bool {
        Self::can_persist(self)
    }

    fn can_persist_to_db(&self) -> bool {
        Self::can_persist_to_db(self)
    }

    fn state(&self) -> JournalState {
        Self::state(self)
    }

    fn stop(&self) {
        Self::stop(self);
    }
}

impl Drop for OrderJournal {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, MessagingStats};
    use tempfile::TempDir;

    fn stats() -> Payload {
        Payload::MessagingStats(MessagingStats {
            component: "gateway".to_string(),
            sent: 1,
            received: 1,
            dropped: 0,
            recorded_at: chrono::Utc::now(),
        })
    }

    fn settings(dir: &TempDir) -> JournalSettings {
        JournalSettings::file_only(dir.path().join("journal.jsonl").to_string_lossy())
    }

    #[test]
    fn persist_before_init_is_refused() {
        let journal = OrderJournal::new();
        let Err(err) = journal.persist(stats(), false) else {
            panic!("expected NotInitialized");
        };
        assert!(matches!(err, JournalError::NotInitialized));
        assert!(!journal.can_persist());
    }

    #[test]
    fn lifecycle_transitions() {
        let dir = TempDir::new().unwrap();
        let journal = OrderJournal::new();
        assert_eq!(journal.state(), JournalState::Uninitialized);

        journal.init(settings(&dir)).unwrap();
        assert_eq!(journal.state(), JournalState::Initialized);
        assert!(journal.init(settings(&dir)).is_err());

        journal.start().unwrap();
        assert_eq!(journal.state(), JournalState::Started);
        let Err(err) = journal.start() else {
            panic!("second start must fail");
        };
        assert!(matches!(err, JournalError::InvalidState { .. }));

        journal.stop();
        journal.stop();
        assert_eq!(journal.state(), JournalState::Stopped);
        assert!(matches!(journal.persist(stats(), false), Err(JournalError::Stopped)));
        assert!(!journal.can_persist());
    }

    #[test]
    fn invalid_settings_leave_journal_uninitialized() {
        let journal = OrderJournal::new();
        let bad = JournalSettings::file_only("  ");
        assert!(matches!(journal.init(bad), Err(JournalError::Config(_))));
        assert_eq!(journal.state(), JournalState::Uninitialized);
    }

    #[test]
    fn unusable_file_path_fails_before_the_database_is_created() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let db_path = dir.path().join("db").join("journal.db");

        let mut bad = JournalSettings::file_only(blocker.join("j.jsonl").to_string_lossy());
        bad.database = crate::config::DatabaseConfig {
            connection_string: format!("sqlite://{}", db_path.display()),
            ..crate::config::DatabaseConfig::default()
        };

        let journal = OrderJournal::new();
        assert!(matches!(journal.init(bad), Err(JournalError::Config(_))));
        assert_eq!(journal.state(), JournalState::Uninitialized);
        assert!(!db_path.exists());
        assert!(!dir.path().join("db").exists());
    }

    #[test]
    fn records_buffered_before_start_are_written_on_stop() {
        let dir = TempDir::new().unwrap();
        let journal = OrderJournal::new();
        journal.init(settings(&dir)).unwrap();
        let seq = journal.persist(stats(), false).unwrap();
        assert_eq!(seq, 1);
        journal.stop();

        let reader = FileRecoveryReader::load(&dir.path().join("journal.jsonl")).unwrap();
        assert_eq!(reader.fold().last_seq(), 1);
    }

    #[test]
    fn rotation_requires_idle_writer() {
        let dir = TempDir::new().unwrap();
        let journal = OrderJournal::new();
        journal.init(settings(&dir)).unwrap();
        journal.start().unwrap();
        assert!(journal.rotate_file(true).is_err());
        journal.stop();
        journal.rotate_file(true).unwrap();
        assert!(dir.path().join("journal.jsonl.bak").exists());
    }

    #[test]
    fn database_recovery_needs_a_database() {
        let dir = TempDir::new().unwrap();
        let journal = OrderJournal::new();
        journal.init(settings(&dir)).unwrap();
        let Err(err) = journal.recovery_reader(RecoverySource::Database) else {
            panic!("file-only journal has no database reader");
        };
        assert!(matches!(err, JournalError::Recovery(_)));
        let reader = journal.recovery_reader(RecoverySource::File).unwrap();
        assert!(reader.open_orders(&AccountId::new("acct")).unwrap().is_empty());
    }
}
