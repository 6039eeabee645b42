//! Integration tests for crash recovery.
//!
//! A journal is written by one `OrderJournal`, then a fresh instance (and a
//! strategy container on top of it) rebuilds state from the file or the
//! SQLite sink.

use std::sync::Arc;

use chrono::Utc;
use order_journal::config::{
    ContainerConfig, DatabaseConfig, DatabaseTarget, JournalSettings, RecoverySource,
};
use order_journal::container::{
    OrderRouter, ProcessorChain, RouteOutcome, Strategy, StrategyContainer,
};
use order_journal::domain::{
    AccountId, ExecId, Fill, FixSessionKey, FixSessionState, InstrumentId, Order, OrderId,
    OrderReject, OrderSide, OrderStatus, Payload, PosUpdate, SequenceCounter, StrategyId,
};
use order_journal::error::ContainerError;
use order_journal::journal::{DbRecoveryReader, DbSink, ItemPool, OrderJournal, SqliteSink};
use order_journal::{ExecutionReport, RecoveryReader};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;
use test_case::test_case;

fn settings(dir: &TempDir, with_db: bool) -> JournalSettings {
    let mut settings =
        JournalSettings::file_only(dir.path().join("journal.jsonl").to_string_lossy());
    if with_db {
        settings.database = DatabaseConfig {
            connection_string: format!("sqlite://{}", dir.path().join("journal.db").display()),
            idle_flush_ms: 5,
            ..DatabaseConfig::default()
        };
    }
    settings
}

fn order(id: &str, account: &str, strategy: &str) -> Order {
    Order::limit(
        OrderId::new(id),
        AccountId::new(account),
        StrategyId::new(strategy),
        InstrumentId::new("ESZ6"),
        OrderSide::Buy,
        dec!(2),
        dec!(4500),
    )
}

/// Journal the A(open) / B(filled) / C(open) history for account X.
fn write_history(journal: &OrderJournal) {
    let a = order("A", "X", "s1");
    let b = order("B", "X", "s1");
    let c = order("C", "X", "s1");
    let other = order("D", "Y", "s1");

    journal.persist_order(a.with_status(OrderStatus::New)).unwrap();
    journal.persist_order(b.with_status(OrderStatus::New)).unwrap();
    journal.persist_order(c.clone()).unwrap();
    journal.persist_order(other).unwrap();

    let fill = Fill::for_order(&b, ExecId::new("E-B"), dec!(2), dec!(4499));
    let mut filled = b;
    filled.apply_fill(fill.quantity, fill.price);
    journal.persist_fill(fill).unwrap();
    journal.persist_order(filled).unwrap();

    let rejected = order("R", "X", "s1");
    journal
        .persist_order_reject(
            rejected.with_status(OrderStatus::Rejected),
            OrderReject::exchange(&rejected, "price band"),
        )
        .unwrap();

    journal
        .persist_fix_session_state(FixSessionState {
            sender_comp_id: "ME".to_string(),
            target_comp_id: "EX".to_string(),
            year: 2026,
            week: 42,
            next_sender_seq: 120,
            next_target_seq: 98,
            updated_at: Utc::now(),
        })
        .unwrap();
}

fn ids(orders: &[Order]) -> Vec<&str> {
    orders.iter().map(|o| o.order_id.as_str()).collect()
}

#[test_case(RecoverySource::File ; "file journal")]
#[test_case(RecoverySource::Database ; "sqlite store")]
fn test_recovery_returns_exactly_the_open_orders(source: RecoverySource) {
    let dir = TempDir::new().unwrap();
    let writer = OrderJournal::new();
    writer.init(settings(&dir, true)).unwrap();
    writer.start().unwrap();
    write_history(&writer);
    writer.stop();
    drop(writer);

    let journal = OrderJournal::new();
    journal.init(settings(&dir, true)).unwrap();
    let reader = journal.recovery_reader(source).unwrap();

    let open = reader.open_orders(&AccountId::new("X")).unwrap();
    assert_eq!(ids(&open), vec!["A", "C"]);

    let positions = reader.positions(&AccountId::new("X")).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, dec!(2));

    let fills = reader
        .fills_for_date(&AccountId::new("X"), Utc::now().date_naive())
        .unwrap();
    assert_eq!(fills.len(), 1);

    let key = FixSessionKey {
        sender_comp_id: "ME".to_string(),
        target_comp_id: "EX".to_string(),
        year: 2026,
        week: 42,
    };
    let state = reader.fix_session_state(&key).unwrap().unwrap();
    assert_eq!(state.next_sender_seq, 120);
    assert_eq!(state.next_target_seq, 98);
    journal.stop();
}

#[test]
fn test_first_run_recovers_nothing() {
    let dir = TempDir::new().unwrap();
    let journal = OrderJournal::new();
    journal.init(settings(&dir, true)).unwrap();

    for source in [RecoverySource::File, RecoverySource::Database] {
        let reader = journal.recovery_reader(source).unwrap();
        let account = AccountId::new("X");
        assert!(reader.open_orders(&account).unwrap().is_empty());
        assert!(reader.positions(&account).unwrap().is_empty());
        assert!(
            reader
                .fills_for_date(&account, Utc::now().date_naive())
                .unwrap()
                .is_empty()
        );
    }
    journal.stop();
}

#[test]
fn test_database_replay_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let target = DatabaseTarget::File(dir.path().join("replay.db"));
    let mut sink = SqliteSink::open(&target).unwrap();

    let pool = ItemPool::new(4, true);
    let counter = SequenceCounter::default();
    let o = order("A", "X", "s1");
    let fill = Fill::for_order(&o, ExecId::new("E-1"), dec!(2), dec!(4500));
    let batch = vec![
        pool.obtain(&counter, Payload::Order(o), true).unwrap(),
        pool.obtain(&counter, Payload::Fill(fill), true).unwrap(),
    ];

    sink.write_batch(&batch).unwrap();
    sink.write_batch(&batch).unwrap();

    let reader = DbRecoveryReader::new(sink.connection());
    let positions = reader.positions(&AccountId::new("X")).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, dec!(2));
    assert_eq!(
        reader
            .fills_for_date(&AccountId::new("X"), Utc::now().date_naive())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_restart_with_database_ahead_of_file_keeps_new_records() {
    let dir = TempDir::new().unwrap();

    let first = OrderJournal::new();
    first.init(settings(&dir, true)).unwrap();
    first.start().unwrap();
    let a_seq = first.persist_order(order("A", "X", "s1")).unwrap();
    first.stop();
    // Truncating the file leaves the database holding the only copy of A.
    first.rotate_file(false).unwrap();
    drop(first);

    let second = OrderJournal::new();
    second.init(settings(&dir, true)).unwrap();
    assert_eq!(second.last_sequence(), a_seq);
    second.start().unwrap();
    let b_seq = second.persist_order(order("B", "X", "s1")).unwrap();
    assert!(b_seq > a_seq);
    second.stop();
    drop(second);

    let journal = OrderJournal::new();
    journal.init(settings(&dir, true)).unwrap();
    let reader = journal.recovery_reader(RecoverySource::Database).unwrap();
    let open = reader.open_orders(&AccountId::new("X")).unwrap();
    assert_eq!(ids(&open), vec!["A", "B"]);
    journal.stop();
}

// ============================================================================
// Container on a real journal
// ============================================================================

#[derive(Default)]
struct Rebuilt {
    orders: Vec<OrderId>,
    positions: Vec<(InstrumentId, Decimal)>,
}

struct TrackingStrategy {
    id: StrategyId,
    rebuilt: Arc<Mutex<Rebuilt>>,
}

impl Strategy for TrackingStrategy {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn on_order_ack(&mut self, _order: &Order) {}

    fn on_order_reject(&mut self, _order: &Order, _reject: &OrderReject) {}

    fn on_fill(&mut self, _order: &Order, _fill: &Fill) {}

    fn on_cancel(&mut self, _order: &Order) {}

    fn rebuild_order(&mut self, order: &Order) {
        self.rebuilt.lock().orders.push(order.order_id.clone());
    }

    fn rebuild_pos(&mut self, position: &PosUpdate) {
        self.rebuilt
            .lock()
            .positions
            .push((position.instrument.clone(), position.quantity));
    }
}

/// Accepts everything; never reports orders as open.
struct AcceptAll;

impl OrderRouter for AcceptAll {
    fn send(&mut self, order: &Order) -> RouteOutcome {
        RouteOutcome::Accepted(order.clone())
    }

    fn cancel(&mut self, _order_id: &OrderId) -> Result<(), String> {
        Ok(())
    }

    fn modify(&mut self, _: &OrderId, _: Decimal, _: Option<Decimal>) -> Result<(), String> {
        Ok(())
    }

    fn open_orders(&self) -> Vec<Order> {
        Vec::new()
    }

    fn restore(&mut self, _order: &Order) {}
}

fn host(
    journal: &Arc<OrderJournal>,
    strategy: &str,
) -> (StrategyContainer<OrderJournal>, Arc<Mutex<Rebuilt>>) {
    let config = ContainerConfig {
        drain_sleep_ms: 1,
        ..ContainerConfig::default()
    };
    let chain = ProcessorChain::from_config(Box::new(AcceptAll), &config);
    let mut container =
        StrategyContainer::new(Arc::clone(journal), chain, AccountId::new("X"), config);
    let rebuilt = Arc::new(Mutex::new(Rebuilt::default()));
    container.register(Box::new(TrackingStrategy {
        id: StrategyId::new(strategy),
        rebuilt: Arc::clone(&rebuilt),
    }));
    (container, rebuilt)
}

#[test]
fn test_container_session_survives_restart() {
    let dir = TempDir::new().unwrap();

    let journal = Arc::new(OrderJournal::new());
    journal.init(settings(&dir, false)).unwrap();
    journal.start().unwrap();
    let (mut first, _) = host(&journal, "s1");
    first
        .start(journal.recovery_reader(RecoverySource::File).unwrap().as_ref())
        .unwrap();

    let filled = order("F-1", "X", "s1");
    let resting = order("F-2", "X", "s1");
    first.send_new(filled.clone()).unwrap();
    first.send_new(resting.clone()).unwrap();
    first
        .on_execution_report(ExecutionReport::Ack(resting.with_status(OrderStatus::New)))
        .unwrap();
    first
        .on_execution_report(ExecutionReport::Fill(Fill::for_order(
            &filled,
            ExecId::new("E-1"),
            dec!(2),
            dec!(4500),
        )))
        .unwrap();
    let report = first.stop();
    assert_eq!(report.remaining, 0);
    drop(first);
    drop(journal);

    let journal = Arc::new(OrderJournal::new());
    journal.init(settings(&dir, false)).unwrap();
    journal.start().unwrap();
    let (mut second, rebuilt) = host(&journal, "s1");
    let recovered = second
        .start(journal.recovery_reader(RecoverySource::File).unwrap().as_ref())
        .unwrap();

    assert_eq!(recovered.orders, 1);
    assert_eq!(recovered.positions, 1);
    assert_eq!(rebuilt.lock().orders, vec![OrderId::new("F-2")]);
    assert_eq!(
        rebuilt.lock().positions,
        vec![(InstrumentId::new("ESZ6"), dec!(2))]
    );
    second.stop();
}

#[test]
fn test_recovery_fails_closed_for_unknown_strategy() {
    let dir = TempDir::new().unwrap();

    let writer = OrderJournal::new();
    writer.init(settings(&dir, false)).unwrap();
    writer.persist_order(order("A", "X", "retired")).unwrap();
    writer.stop();
    drop(writer);

    let journal = Arc::new(OrderJournal::new());
    journal.init(settings(&dir, false)).unwrap();
    journal.start().unwrap();
    let (mut container, rebuilt) = host(&journal, "s1");

    let reader = journal.recovery_reader(RecoverySource::File).unwrap();
    let Err(err) = container.start(reader.as_ref()) else {
        panic!("recovery must fail for an unknown strategy");
    };
    assert!(matches!(err, ContainerError::UnknownStrategy { .. }));
    assert!(rebuilt.lock().orders.is_empty());

    let Err(err) = container.send_new(order("N", "X", "s1")) else {
        panic!("order flow must stay closed");
    };
    assert!(matches!(err, ContainerError::NotReady));
    journal.stop();
}
