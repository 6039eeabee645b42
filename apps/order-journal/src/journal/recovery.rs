//! Startup recovery queries.
//!
//! Two readers implement [`RecoveryReader`]:
//!
//! - [`FileRecoveryReader`] replays the file journal through [`JournalFold`]
//! - [`DbRecoveryReader`] queries the SQLite sink's structured tables
//!
//! Only one sink is authoritative for a given startup; the two are never
//! merged. Every query returns an empty result on a first-ever run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{OptionalExtension, params};
use tracing::info;

use super::db_writer::{SharedConnection, from_sql_int, parse_decimal};
use super::file_writer::read_journal;
use crate::domain::{
    AccountId, ExecId, Fill, FixSessionKey, FixSessionState, InstrumentId, ItemKind,
    JournalRecord, Order, OrderId, OrderStatus, Payload, PosUpdate, StrategyId,
};
use crate::error::{JournalError, SinkError};

/// Read-only recovery surface over the authoritative sink.
pub trait RecoveryReader: Send {
    /// Orders of `account` that were still open, ordered by last update.
    fn open_orders(&self, account: &AccountId) -> Result<Vec<Order>, JournalError>;

    /// Non-flat positions of `account`, ordered by strategy then instrument.
    fn positions(&self, account: &AccountId) -> Result<Vec<PosUpdate>, JournalError>;

    /// Fills of `account` executed on `date` (UTC), in sequence order.
    fn fills_for_date(&self, account: &AccountId, date: NaiveDate)
    -> Result<Vec<Fill>, JournalError>;

    /// Last persisted state of the session identified by `key`.
    fn fix_session_state(&self, key: &FixSessionKey)
    -> Result<Option<FixSessionState>, JournalError>;
}

// ============================================================================
// Deterministic fold
// ============================================================================

type PositionKey = (AccountId, StrategyId, InstrumentId);

/// Order and position state rebuilt from journal records.
///
/// Records must be applied in sequence order. `Order` replaces the latest
/// snapshot, `OrderReject` replaces it with status `Rejected`, and `Fill`
/// (de-duplicated by exec id) moves the strategy's position.
#[derive(Debug, Default)]
pub struct JournalFold {
    orders: HashMap<OrderId, (u64, Order)>,
    fills: Vec<(u64, Fill)>,
    exec_ids: HashSet<ExecId>,
    positions: BTreeMap<PositionKey, PosUpdate>,
    sessions: HashMap<FixSessionKey, FixSessionState>,
    last_seq: u64,
}

impl JournalFold {
    /// Fold a sequence-ordered record stream.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = JournalRecord>) -> Self {
        let mut fold = Self::default();
        for record in records {
            fold.apply(record);
        }
        fold
    }

    /// Apply one record. Records at or below the last applied sequence id
    /// are ignored.
    pub fn apply(&mut self, record: JournalRecord) {
        if record.seq <= self.last_seq && self.last_seq != 0 {
            return;
        }
        self.last_seq = record.seq;
        let seq = record.seq;

        match record.payload {
            Payload::Order(order) => {
                self.orders.insert(order.order_id.clone(), (seq, order));
            }
            Payload::OrderReject { mut order, reject } => {
                order.status = OrderStatus::Rejected;
                order.updated_at = reject.rejected_at;
                self.orders.insert(order.order_id.clone(), (seq, order));
            }
            Payload::Fill(fill) => self.apply_fill(seq, fill),
            Payload::FixSessionState(state) => {
                self.sessions.insert(state.key(), state);
            }
            Payload::Command(_)
            | Payload::FixSessionMsg(_)
            | Payload::FillDropCopy(_)
            | Payload::PnlAuditTrailInfo(_)
            | Payload::MessagingStats(_) => {}
        }
    }

    fn apply_fill(&mut self, seq: u64, fill: Fill) {
        if !self.exec_ids.insert(fill.exec_id.clone()) {
            return;
        }
        let key = (
            fill.account.clone(),
            fill.strategy_id.clone(),
            fill.instrument.clone(),
        );
        self.positions
            .entry(key)
            .or_insert_with(|| {
                PosUpdate::flat(
                    fill.account.clone(),
                    fill.strategy_id.clone(),
                    fill.instrument.clone(),
                )
            })
            .apply(fill.side, fill.quantity, fill.price);
        self.fills.push((seq, fill));
    }

    /// Highest sequence id applied.
    #[must_use]
    pub const fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Open orders of `account`, ordered by last update.
    #[must_use]
    pub fn open_orders(&self, account: &AccountId) -> Vec<Order> {
        let mut open: Vec<&(u64, Order)> = self
            .orders
            .values()
            .filter(|(_, o)| &o.account == account && o.is_open())
            .collect();
        open.sort_by_key(|(seq, _)| *seq);
        open.into_iter().map(|(_, o)| o.clone()).collect()
    }

    /// Non-flat positions of `account`.
    #[must_use]
    pub fn positions(&self, account: &AccountId) -> Vec<PosUpdate> {
        self.positions
            .iter()
            .filter(|((acc, _, _), pos)| acc == account && !pos.is_flat())
            .map(|(_, pos)| pos.clone())
            .collect()
    }

    /// Fills of `account` executed on `date`.
    #[must_use]
    pub fn fills_for_date(&self, account: &AccountId, date: NaiveDate) -> Vec<Fill> {
        self.fills
            .iter()
            .filter(|(_, f)| &f.account == account && f.executed_at.date_naive() == date)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Latest state of a FIX session.
    #[must_use]
    pub fn fix_session_state(&self, key: &FixSessionKey) -> Option<FixSessionState> {
        self.sessions.get(key).cloned()
    }
}

// ============================================================================
// File replay
// ============================================================================

/// Recovery over the file journal (current file plus rotated backup).
#[derive(Debug)]
pub struct FileRecoveryReader {
    fold: JournalFold,
}

impl FileRecoveryReader {
    /// Replay the journal at `path`.
    pub fn load(path: &Path) -> Result<Self, JournalError> {
        let records = read_journal(path)?;
        let count = records.len();
        let fold = JournalFold::from_records(records);
        info!(
            path = %path.display(),
            records = count,
            last_seq = fold.last_seq(),
            "File journal replayed"
        );
        Ok(Self { fold })
    }

    /// The folded state.
    #[must_use]
    pub const fn fold(&self) -> &JournalFold {
        &self.fold
    }
}

impl RecoveryReader for FileRecoveryReader {
    fn open_orders(&self, account: &AccountId) -> Result<Vec<Order>, JournalError> {
        Ok(self.fold.open_orders(account))
    }

    fn positions(&self, account: &AccountId) -> Result<Vec<PosUpdate>, JournalError> {
        Ok(self.fold.positions(account))
    }

    fn fills_for_date(
        &self,
        account: &AccountId,
        date: NaiveDate,
    ) -> Result<Vec<Fill>, JournalError> {
        Ok(self.fold.fills_for_date(account, date))
    }

    fn fix_session_state(
        &self,
        key: &FixSessionKey,
    ) -> Result<Option<FixSessionState>, JournalError> {
        Ok(self.fold.fix_session_state(key))
    }
}

// ============================================================================
// Database queries
// ============================================================================

/// Recovery over the SQLite sink.
pub struct DbRecoveryReader {
    conn: SharedConnection,
}

impl DbRecoveryReader {
    /// Reader over an open sink connection.
    #[must_use]
    pub const fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(
    seq: i64,
    kind: ItemKind,
    body: &str,
) -> Result<T, JournalError> {
    serde_json::from_str(body).map_err(|e| {
        JournalError::Sink(SinkError::Serialization {
            seq: from_sql_int(seq),
            kind,
            message: e.to_string(),
        })
    })
}

impl RecoveryReader for DbRecoveryReader {
    fn open_orders(&self, account: &AccountId) -> Result<Vec<Order>, JournalError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT seq, body FROM orders WHERE account = ?1 AND is_open = 1 ORDER BY seq")
            .map_err(SinkError::from)?;
        let rows = stmt
            .query_map(params![account.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(SinkError::from)?;

        let mut orders = Vec::new();
        for row in rows {
            let (seq, body) = row.map_err(SinkError::from)?;
            orders.push(parse_body(seq, ItemKind::Order, &body)?);
        }
        Ok(orders)
    }

    fn positions(&self, account: &AccountId) -> Result<Vec<PosUpdate>, JournalError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT strategy_id, instrument, quantity, avg_price, seq FROM positions
                 WHERE account = ?1 ORDER BY strategy_id, instrument",
            )
            .map_err(SinkError::from)?;
        let rows = stmt
            .query_map(params![account.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(SinkError::from)?;

        let mut positions = Vec::new();
        for row in rows {
            let (strategy_id, instrument, quantity, avg_price, seq) =
                row.map_err(SinkError::from)?;
            let seq = from_sql_int(seq);
            let position = PosUpdate {
                account: account.clone(),
                strategy_id: StrategyId::new(strategy_id),
                instrument: InstrumentId::new(instrument),
                quantity: parse_decimal(seq, ItemKind::Fill, "quantity", &quantity)?,
                avg_price: parse_decimal(seq, ItemKind::Fill, "avg_price", &avg_price)?,
            };
            if !position.is_flat() {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    fn fills_for_date(
        &self,
        account: &AccountId,
        date: NaiveDate,
    ) -> Result<Vec<Fill>, JournalError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT seq, body FROM fills WHERE account = ?1 AND trade_date = ?2 ORDER BY seq",
            )
            .map_err(SinkError::from)?;
        let rows = stmt
            .query_map(params![account.as_str(), date.to_string()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(SinkError::from)?;

        let mut fills = Vec::new();
        for row in rows {
            let (seq, body) = row.map_err(SinkError::from)?;
            fills.push(parse_body(seq, ItemKind::Fill, &body)?);
        }
        Ok(fills)
    }

    fn fix_session_state(
        &self,
        key: &FixSessionKey,
    ) -> Result<Option<FixSessionState>, JournalError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT next_sender_seq, next_target_seq, updated_at FROM fix_session_state
                 WHERE sender_comp_id = ?1 AND target_comp_id = ?2 AND year = ?3 AND week = ?4",
                params![key.sender_comp_id, key.target_comp_id, key.year, key.week],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(SinkError::from)?;

        let Some((next_sender_seq, next_target_seq, updated_at)) = row else {
            return Ok(None);
        };
        let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| {
                JournalError::Sink(SinkError::Serialization {
                    seq: 0,
                    kind: ItemKind::FixSessionState,
                    message: e.to_string(),
                })
            })?;

        Ok(Some(FixSessionState {
            sender_comp_id: key.sender_comp_id.clone(),
            target_comp_id: key.target_comp_id.clone(),
            year: key.year,
            week: key.week,
            next_sender_seq: from_sql_int(next_sender_seq),
            next_target_seq: from_sql_int(next_target_seq),
            updated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::{OrderReject, OrderSide};
    use crate::journal::db_writer::to_sql_int;

    fn order(id: &str, strategy: &str) -> Order {
        Order::limit(
            OrderId::new(id),
            AccountId::new("X"),
            StrategyId::new(strategy),
            InstrumentId::new("ESZ6"),
            OrderSide::Buy,
            dec!(2),
            dec!(100),
        )
    }

    fn record(seq: u64, payload: Payload) -> JournalRecord {
        JournalRecord {
            seq,
            recorded_at: Utc::now(),
            send_to_bus: false,
            payload,
        }
    }

    #[test]
    fn open_orders_exclude_terminal_snapshots() {
        let a = order("A", "s1");
        let mut b = order("B", "s1");
        let c = order("C", "s2");
        let fold = JournalFold::from_records(vec![
            record(1, Payload::Order(a.clone())),
            record(2, Payload::Order(b.clone())),
            record(3, Payload::Order(c.clone())),
            {
                b.apply_fill(dec!(2), dec!(100));
                record(4, Payload::Order(b))
            },
        ]);

        let open = fold.open_orders(&AccountId::new("X"));
        let ids: Vec<&str> = open.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert!(fold.open_orders(&AccountId::new("other")).is_empty());
    }

    #[test]
    fn reject_closes_order() {
        let a = order("A", "s1");
        let reject = OrderReject::exchange(&a, "no liquidity");
        let fold = JournalFold::from_records(vec![
            record(1, Payload::Order(a.clone())),
            record(2, Payload::OrderReject { order: a, reject }),
        ]);
        assert!(fold.open_orders(&AccountId::new("X")).is_empty());
    }

    #[test]
    fn fills_move_positions_once_per_exec_id() {
        let a = order("A", "s1");
        let day = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
        let mut f1 = Fill::for_order(&a, ExecId::new("e1"), dec!(1), dec!(100));
        f1.executed_at = day;
        let mut f2 = Fill::for_order(&a, ExecId::new("e2"), dec!(1), dec!(110));
        f2.executed_at = day;

        let fold = JournalFold::from_records(vec![
            record(1, Payload::Fill(f1.clone())),
            record(2, Payload::Fill(f1)),
            record(3, Payload::Fill(f2)),
        ]);

        let positions = fold.positions(&AccountId::new("X"));
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(2));
        assert_eq!(positions[0].avg_price, dec!(105));
        assert_eq!(
            fold.fills_for_date(&AccountId::new("X"), day.date_naive()).len(),
            2
        );
        assert!(
            fold.fills_for_date(&AccountId::new("X"), NaiveDate::from_ymd_opt(2026, 3, 3).unwrap())
                .is_empty()
        );
    }

    #[test]
    fn flat_positions_are_omitted() {
        let buy = order("A", "s1");
        let mut sell = order("B", "s1");
        sell.side = OrderSide::Sell;
        let fold = JournalFold::from_records(vec![
            record(1, Payload::Fill(Fill::for_order(&buy, ExecId::new("e1"), dec!(2), dec!(100)))),
            record(2, Payload::Fill(Fill::for_order(&sell, ExecId::new("e2"), dec!(2), dec!(101)))),
        ]);
        assert!(fold.positions(&AccountId::new("X")).is_empty());
    }

    #[test]
    fn session_state_round_trips_key() {
        let state = FixSessionState {
            sender_comp_id: "ME".to_string(),
            target_comp_id: "EX".to_string(),
            year: 2026,
            week: 10,
            next_sender_seq: 42,
            next_target_seq: 17,
            updated_at: Utc::now(),
        };
        let fold = JournalFold::from_records(vec![record(1, Payload::FixSessionState(state.clone()))]);
        assert_eq!(fold.fix_session_state(&state.key()), Some(state));
    }

    #[test]
    fn empty_journal_yields_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileRecoveryReader::load(&dir.path().join("journal.jsonl")).unwrap();
        let account = AccountId::new("X");
        assert!(reader.open_orders(&account).unwrap().is_empty());
        assert!(reader.positions(&account).unwrap().is_empty());
        let key = FixSessionKey::for_time("ME", "EX", Utc::now());
        assert!(reader.fix_session_state(&key).unwrap().is_none());
    }

    #[test]
    fn corrupt_stored_position_fails_database_recovery() {
        let sink = crate::journal::SqliteSink::open(&crate::config::DatabaseTarget::Memory).unwrap();
        let conn = sink.connection();
        conn.lock()
            .execute(
                "INSERT INTO positions (account, strategy_id, instrument, quantity, avg_price, seq)
                 VALUES ('X', 's1', 'ESZ6', '1.2.3', '100', 7)",
                [],
            )
            .unwrap();

        let reader = DbRecoveryReader::new(conn);
        let Err(err) = reader.positions(&AccountId::new("X")) else {
            panic!("an unparseable position must fail recovery");
        };
        assert!(
            matches!(
                err,
                JournalError::Sink(SinkError::Serialization { seq: 7, .. })
            ),
            "{err}"
        );
    }

    #[test]
    fn to_sql_int_saturates() {
        assert_eq!(to_sql_int(u64::MAX), i64::MAX);
        assert_eq!(from_sql_int(-1), 0);
    }
}
