//! Integration tests for the journal façade.
//!
//! These run the real worker threads against temporary files and verify
//! ordering, durability on stop, admission and the sequence id space.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use order_journal::config::{DatabaseConfig, JournalSettings, RetryConfig};
use order_journal::domain::{
    AccountId, ExecId, Fill, InstrumentId, MessagingStats, Order, OrderId, OrderSide, Payload,
    StrategyId,
};
use order_journal::error::{JournalError, SinkError};
use order_journal::journal::{DbSink, ItemHandle, OrderJournal, read_journal};
use parking_lot::Mutex;
use proptest::prelude::*;
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn journal_path(dir: &TempDir) -> String {
    dir.path().join("journal.jsonl").to_string_lossy().into_owned()
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        alert_after_failures: 3,
        final_flush_attempts: 2,
    }
}

fn stats(n: u64) -> Payload {
    Payload::MessagingStats(MessagingStats {
        component: format!("c{n}"),
        sent: n,
        received: 0,
        dropped: 0,
        recorded_at: Utc::now(),
    })
}

fn order(id: &str) -> Order {
    Order::limit(
        OrderId::new(id),
        AccountId::new("ACC-1"),
        StrategyId::new("s1"),
        InstrumentId::new("ESZ6"),
        OrderSide::Buy,
        dec!(1),
        dec!(4500),
    )
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn journaled_ids(path: &str) -> Vec<u64> {
    read_journal(std::path::Path::new(path))
        .unwrap()
        .iter()
        .map(|r| r.seq)
        .collect()
}

/// Database sink that fails while `down` is set and records what it wrote.
#[derive(Clone, Default)]
struct FlakyDb {
    down: Arc<AtomicBool>,
    written: Arc<Mutex<Vec<u64>>>,
}

impl DbSink for FlakyDb {
    fn write_batch(&mut self, items: &[ItemHandle]) -> Result<(), SinkError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("database offline".to_string()));
        }
        self.written.lock().extend(items.iter().map(ItemHandle::id));
        Ok(())
    }
}

// ============================================================================
// Ordering and durability
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_file_sink_receives_persist_order(count in 0_u64..150) {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let journal = OrderJournal::new();
        journal.init(JournalSettings::file_only(path.clone())).unwrap();
        journal.start().unwrap();

        let ids: Vec<u64> = (0..count).map(|n| journal.persist(stats(n), false).unwrap()).collect();
        journal.stop();

        prop_assert_eq!(journaled_ids(&path), ids);
    }
}

#[test]
fn test_payloads_arrive_in_persist_order() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);
    let journal = OrderJournal::new();
    journal.init(JournalSettings::file_only(path.clone())).unwrap();
    journal.start().unwrap();

    for n in 0..50 {
        journal.persist(stats(n), false).unwrap();
    }
    journal.stop();

    let sent: Vec<u64> = read_journal(std::path::Path::new(&path))
        .unwrap()
        .into_iter()
        .map(|record| match record.payload {
            Payload::MessagingStats(stats) => stats.sent,
            other => panic!("unexpected payload {:?}", other.kind()),
        })
        .collect();
    assert_eq!(sent, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_no_loss_on_stop_with_full_queue() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);
    let journal = OrderJournal::new();
    journal.init(JournalSettings::file_only(path.clone())).unwrap();
    journal.start().unwrap();

    for n in 0..2_000 {
        journal.persist(stats(n), false).unwrap();
    }
    journal.stop();

    assert_eq!(journaled_ids(&path), (1..=2_000).collect::<Vec<_>>());
}

#[test]
fn test_persist_from_many_threads_keeps_file_in_sequence_order() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);
    let journal = Arc::new(OrderJournal::new());
    journal.init(JournalSettings::file_only(path.clone())).unwrap();
    journal.start().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let journal = Arc::clone(&journal);
            std::thread::spawn(move || {
                for n in 0..100 {
                    journal.persist(stats(t * 1000 + n), false).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    journal.stop();

    assert_eq!(journaled_ids(&path), (1..=400).collect::<Vec<_>>());
}

// ============================================================================
// Admission
// ============================================================================

#[test]
fn test_backpressure_activates_and_releases() {
    let dir = TempDir::new().unwrap();
    let mut settings = JournalSettings::file_only(journal_path(&dir));
    settings.file.max_queue_depth = 2;

    let journal = OrderJournal::new();
    journal.init(settings).unwrap();
    assert!(journal.can_persist());

    // Workers not started yet, so nothing drains.
    for n in 0..3 {
        journal.persist(stats(n), false).unwrap();
    }
    assert!(!journal.can_persist());

    journal.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || journal.can_persist()));
    journal.stop();
}

#[test]
fn test_zero_depth_closes_admission_before_traffic() {
    let dir = TempDir::new().unwrap();
    let mut settings = JournalSettings::file_only(journal_path(&dir));
    settings.file.max_queue_depth = 0;

    let journal = OrderJournal::new();
    journal.init(settings).unwrap();
    journal.start().unwrap();
    assert!(!journal.can_persist());
    // persist itself still works; admission only throttles new orders.
    assert!(journal.persist(stats(1), false).is_ok());
    journal.stop();
}

#[test]
fn test_database_outage_keeps_records_and_trips_db_admission() {
    let dir = TempDir::new().unwrap();
    let mut settings = JournalSettings::file_only(journal_path(&dir));
    settings.database = DatabaseConfig {
        max_queue_depth: 2,
        idle_flush_ms: 5,
        ..DatabaseConfig::default()
    };
    settings.retry = fast_retry();

    let db = FlakyDb::default();
    db.down.store(true, Ordering::SeqCst);

    let journal = OrderJournal::new();
    journal
        .init_with_db_sink(settings, Box::new(db.clone()))
        .unwrap();
    journal.start().unwrap();

    for n in 0..3 {
        journal.persist_order(order(&format!("O-{n}"))).unwrap();
    }

    // The file sink keeps up; the database queue does not drain.
    assert!(wait_until(Duration::from_secs(5), || {
        journal.admission().is_some_and(|a| a.file_depth() == 0)
    }));
    assert!(journal.can_persist());
    assert!(!journal.can_persist_to_db());
    assert_eq!(journal.admission().map(|a| a.db_depth()), Some(3));
    assert!(db.written.lock().is_empty());

    db.down.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(5), || journal.can_persist_to_db()));
    journal.stop();

    assert_eq!(*db.written.lock(), vec![1, 2, 3]);
}

#[test]
fn test_file_only_kinds_skip_the_database_queue() {
    let dir = TempDir::new().unwrap();
    let mut settings = JournalSettings::file_only(journal_path(&dir));
    settings.retry = fast_retry();
    let db = FlakyDb::default();

    let journal = OrderJournal::new();
    journal
        .init_with_db_sink(settings, Box::new(db.clone()))
        .unwrap();
    journal.start().unwrap();
    journal
        .persist_fix_session_msg(order_journal::domain::FixSessionMsg {
            sender_comp_id: "ME".to_string(),
            target_comp_id: "EX".to_string(),
            direction: order_journal::domain::MessageDirection::Outbound,
            seq_num: 1,
            body: "8=FIX.4.4|35=0|".to_string(),
            logged_at: Utc::now(),
        })
        .unwrap();
    let o = order("O-1");
    journal
        .persist_fill(Fill::for_order(&o, ExecId::new("E-1"), dec!(1), dec!(4500)))
        .unwrap();
    journal.stop();

    assert_eq!(*db.written.lock(), vec![2]);
}

// ============================================================================
// Sequence id space
// ============================================================================

#[test]
fn test_ids_strictly_increase_while_items_recycle() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);
    let mut settings = JournalSettings::file_only(path.clone());
    settings.pool.initial_capacity = 2;

    let journal = OrderJournal::new();
    journal.init(settings).unwrap();
    journal.start().unwrap();

    let mut last = 0;
    for n in 0..500 {
        let id = journal.persist(stats(n), false).unwrap();
        assert!(id > last);
        last = id;
    }
    journal.stop();

    let ids = journaled_ids(&path);
    assert_eq!(ids.len(), 500);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_exhausted_fixed_pool_consumes_no_id() {
    let dir = TempDir::new().unwrap();
    let mut settings = JournalSettings::file_only(journal_path(&dir));
    settings.pool.initial_capacity = 1;
    settings.pool.allow_growth = false;

    let journal = OrderJournal::new();
    journal.init(settings).unwrap();
    assert_eq!(journal.persist(stats(1), false).unwrap(), 1);

    let Err(err) = journal.persist(stats(2), false) else {
        panic!("fixed pool of one must be exhausted");
    };
    assert!(matches!(err, JournalError::PoolExhausted { capacity: 1 }));

    journal.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || journal.pool_stats().0 == 1));
    assert_eq!(journal.persist(stats(3), false).unwrap(), 2);
    journal.stop();
}

#[test]
fn test_ids_continue_across_restart() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);

    let first = OrderJournal::new();
    first.init(JournalSettings::file_only(path.clone())).unwrap();
    first.start().unwrap();
    for n in 0..3 {
        first.persist(stats(n), false).unwrap();
    }
    first.stop();

    let second = OrderJournal::new();
    second.init(JournalSettings::file_only(path.clone())).unwrap();
    assert_eq!(second.last_sequence(), 3);
    second.start().unwrap();
    assert_eq!(second.persist(stats(9), false).unwrap(), 4);
    second.stop();

    assert_eq!(journaled_ids(&path), vec![1, 2, 3, 4]);
}

#[test]
fn test_ids_continue_across_rotation() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);

    let first = OrderJournal::new();
    first.init(JournalSettings::file_only(path.clone())).unwrap();
    first.persist(stats(1), false).unwrap();
    first.persist(stats(2), false).unwrap();
    first.stop();
    first.rotate_file(true).unwrap();

    let second = OrderJournal::new();
    second.init(JournalSettings::file_only(path.clone())).unwrap();
    assert_eq!(second.last_sequence(), 2);
    second.stop();
}
