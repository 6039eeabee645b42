//! Batched database sink.
//!
//! [`DbWriter`] decides when a batch goes out; [`DbSink`] writes it. The
//! production sink is [`SqliteSink`], which turns each record into
//! structured upserts inside one transaction per batch. Every statement is
//! keyed so that replaying a batch after a failed commit changes nothing.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use rust_decimal::Decimal;
use tracing::info;

use super::pool::ItemHandle;
use super::worker::{BatchSink, FlushRound};
use crate::config::{DatabaseConfig, DatabaseTarget};
use crate::domain::{
    Fill, FixSessionState, ItemKind, Order, OrderStatus, Payload, PosUpdate, StorageItem,
};
use crate::error::SinkError;

/// A database that accepts journal batches.
pub trait DbSink: Send {
    /// Write all records of `batch` atomically.
    ///
    /// Must be idempotent: the same batch may be written again after a
    /// failure.
    fn write_batch(&mut self, batch: &[ItemHandle]) -> Result<(), SinkError>;

    /// Highest sequence id already stored, 0 when empty.
    fn last_sequence(&mut self) -> Result<u64, SinkError> {
        Ok(0)
    }
}

// ============================================================================
// Batching policy
// ============================================================================

/// Holds partial batches between drain rounds and hands full ones to the sink.
pub struct DbWriter {
    sink: Box<dyn DbSink>,
    batch_size: usize,
    max_batch_before_flush: u32,
    idle_flush: Duration,
}

impl DbWriter {
    /// Create a writer over `sink` with the batching parameters of `config`.
    #[must_use]
    pub fn new(sink: Box<dyn DbSink>, config: &DatabaseConfig) -> Self {
        Self {
            sink,
            batch_size: config.batch_size.max(1),
            max_batch_before_flush: config.max_batch_before_flush.max(1),
            idle_flush: Duration::from_millis(config.idle_flush_ms.max(1)),
        }
    }
}

impl BatchSink for DbWriter {
    fn poll_interval(&self) -> Duration {
        self.idle_flush
    }

    fn plan(&mut self, pending: usize, round: FlushRound) -> usize {
        if pending >= self.batch_size {
            return self.batch_size;
        }
        let forced = round.rounds + 1 >= self.max_batch_before_flush;
        if round.stopping || round.idle || forced {
            pending
        } else {
            0
        }
    }

    fn write_batch(&mut self, batch: &[ItemHandle]) -> Result<(), SinkError> {
        self.sink.write_batch(batch)
    }
}

// ============================================================================
// SQLite
// ============================================================================

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS journal_events (
    seq INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    order_id TEXT PRIMARY KEY,
    account TEXT NOT NULL,
    strategy_id TEXT NOT NULL,
    instrument TEXT NOT NULL,
    status TEXT NOT NULL,
    is_open INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fills (
    exec_id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL,
    account TEXT NOT NULL,
    strategy_id TEXT NOT NULL,
    instrument TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    seq INTEGER NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS positions (
    account TEXT NOT NULL,
    strategy_id TEXT NOT NULL,
    instrument TEXT NOT NULL,
    quantity TEXT NOT NULL,
    avg_price TEXT NOT NULL,
    seq INTEGER NOT NULL,
    PRIMARY KEY (account, strategy_id, instrument)
);

CREATE TABLE IF NOT EXISTS fix_session_state (
    sender_comp_id TEXT NOT NULL,
    target_comp_id TEXT NOT NULL,
    year INTEGER NOT NULL,
    week INTEGER NOT NULL,
    next_sender_seq INTEGER NOT NULL,
    next_target_seq INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    seq INTEGER NOT NULL,
    PRIMARY KEY (sender_comp_id, target_comp_id, year, week)
);

CREATE INDEX IF NOT EXISTS idx_orders_account_open ON orders(account, is_open);
CREATE INDEX IF NOT EXISTS idx_fills_account_date ON fills(account, trade_date);
";

/// SQLite connection shared by the sink and the database recovery reader.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// SQLite-backed [`DbSink`].
pub struct SqliteSink {
    conn: SharedConnection,
}

impl SqliteSink {
    /// Open the database and create the schema if needed.
    pub fn open(target: &DatabaseTarget) -> Result<Self, SinkError> {
        let conn = match target {
            DatabaseTarget::Memory => Connection::open_in_memory()?,
            DatabaseTarget::File(path) => {
                if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
                {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(path)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn
            }
        };

        conn.execute_batch(SCHEMA)?;
        info!(target = ?target, "Journal database initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Connection handle for recovery queries.
    #[must_use]
    pub fn connection(&self) -> SharedConnection {
        Arc::clone(&self.conn)
    }
}

impl DbSink for SqliteSink {
    fn write_batch(&mut self, batch: &[ItemHandle]) -> Result<(), SinkError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for handle in batch {
            write_item(&tx, &handle.read())?;
        }
        tx.commit()?;
        Ok(())
    }

    fn last_sequence(&mut self) -> Result<u64, SinkError> {
        let max: i64 = self.conn.lock().query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM journal_events",
            [],
            |row| row.get(0),
        )?;
        Ok(from_sql_int(max))
    }
}

fn write_item(tx: &Transaction<'_>, item: &StorageItem) -> Result<(), SinkError> {
    let body = to_json(item, &item.as_record())?;
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO journal_events (seq, kind, recorded_at, body) VALUES (?1, ?2, ?3, ?4)",
        params![
            to_sql_int(item.id),
            item.kind().as_str(),
            item.recorded_at.to_rfc3339(),
            body
        ],
    )?;
    if inserted == 0 {
        // Already applied by an earlier attempt.
        return Ok(());
    }

    match &item.payload {
        Payload::Order(order) => upsert_order(tx, item, order),
        Payload::OrderReject { order, .. } => {
            upsert_order(tx, item, &order.with_status(OrderStatus::Rejected))
        }
        Payload::Fill(fill) => insert_fill(tx, item, fill),
        Payload::FixSessionState(state) => upsert_session(tx, item, state),
        _ => Ok(()),
    }
}

fn upsert_order(tx: &Transaction<'_>, item: &StorageItem, order: &Order) -> Result<(), SinkError> {
    tx.execute(
        "INSERT INTO orders (order_id, account, strategy_id, instrument, status, is_open, seq, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(order_id) DO UPDATE SET
             status = excluded.status,
             is_open = excluded.is_open,
             seq = excluded.seq,
             body = excluded.body
         WHERE excluded.seq > orders.seq",
        params![
            order.order_id.as_str(),
            order.account.as_str(),
            order.strategy_id.as_str(),
            order.instrument.as_str(),
            order.status.to_string(),
            order.is_open(),
            to_sql_int(item.id),
            to_json(item, order)?,
        ],
    )?;
    Ok(())
}

fn insert_fill(tx: &Transaction<'_>, item: &StorageItem, fill: &Fill) -> Result<(), SinkError> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO fills
             (exec_id, order_id, account, strategy_id, instrument, trade_date, seq, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            fill.exec_id.as_str(),
            fill.order_id.as_str(),
            fill.account.as_str(),
            fill.strategy_id.as_str(),
            fill.instrument.as_str(),
            fill.executed_at.date_naive().to_string(),
            to_sql_int(item.id),
            to_json(item, fill)?,
        ],
    )?;
    if inserted == 0 {
        return Ok(());
    }

    let current = tx
        .query_row(
            "SELECT quantity, avg_price FROM positions
             WHERE account = ?1 AND strategy_id = ?2 AND instrument = ?3",
            params![
                fill.account.as_str(),
                fill.strategy_id.as_str(),
                fill.instrument.as_str()
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    let mut position = PosUpdate::flat(
        fill.account.clone(),
        fill.strategy_id.clone(),
        fill.instrument.clone(),
    );
    if let Some((quantity, avg_price)) = current {
        position.quantity = parse_decimal(item.id, ItemKind::Fill, "quantity", &quantity)?;
        position.avg_price = parse_decimal(item.id, ItemKind::Fill, "avg_price", &avg_price)?;
    }
    position.apply(fill.side, fill.quantity, fill.price);

    tx.execute(
        "INSERT INTO positions (account, strategy_id, instrument, quantity, avg_price, seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(account, strategy_id, instrument) DO UPDATE SET
             quantity = excluded.quantity,
             avg_price = excluded.avg_price,
             seq = excluded.seq",
        params![
            position.account.as_str(),
            position.strategy_id.as_str(),
            position.instrument.as_str(),
            position.quantity.to_string(),
            position.avg_price.to_string(),
            to_sql_int(item.id),
        ],
    )?;
    Ok(())
}

fn upsert_session(
    tx: &Transaction<'_>,
    item: &StorageItem,
    state: &FixSessionState,
) -> Result<(), SinkError> {
    tx.execute(
        "INSERT INTO fix_session_state
             (sender_comp_id, target_comp_id, year, week, next_sender_seq, next_target_seq, updated_at, seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(sender_comp_id, target_comp_id, year, week) DO UPDATE SET
             next_sender_seq = excluded.next_sender_seq,
             next_target_seq = excluded.next_target_seq,
             updated_at = excluded.updated_at,
             seq = excluded.seq
         WHERE excluded.seq > fix_session_state.seq",
        params![
            state.sender_comp_id,
            state.target_comp_id,
            state.year,
            state.week,
            to_sql_int(state.next_sender_seq),
            to_sql_int(state.next_target_seq),
            state.updated_at.to_rfc3339(),
            to_sql_int(item.id),
        ],
    )?;
    Ok(())
}

fn to_json<T: serde::Serialize>(item: &StorageItem, value: &T) -> Result<String, SinkError> {
    serde_json::to_string(value).map_err(|e| SinkError::Serialization {
        seq: item.id,
        kind: item.kind(),
        message: e.to_string(),
    })
}

/// Decimals are stored as TEXT; a value that does not parse is corrupt.
pub(crate) fn parse_decimal(
    seq: u64,
    kind: ItemKind,
    column: &str,
    value: &str,
) -> Result<Decimal, SinkError> {
    Decimal::from_str(value).map_err(|e| SinkError::Serialization {
        seq,
        kind,
        message: format!("{column} '{value}': {e}"),
    })
}

/// SQLite integers are signed 64-bit.
pub(crate) fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Inverse of [`to_sql_int`]; negative values read as 0.
pub(crate) fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
