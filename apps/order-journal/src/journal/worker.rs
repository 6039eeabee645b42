//! Sink worker thread.
//!
//! One worker drains one [`DurableQueue`] into one [`BatchSink`]: block
//! until records arrive, take what is available, write, commit, repeat.
//! Failed writes are retried with exponential backoff while the records
//! stay enqueued. After the queue is closed the worker performs a final
//! flush with a bounded number of attempts and exits.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{error, info, warn};

use super::facade::JournalObserver;
use super::pool::ItemHandle;
use super::queue::DurableQueue;
use crate::config::RetryConfig;
use crate::error::SinkError;
use crate::observability;

/// State of the current drain round, passed to [`BatchSink::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRound {
    /// Rounds the pending records have already been held for.
    pub rounds: u32,
    /// No new records arrived within the poll interval.
    pub idle: bool,
    /// The queue is closed; this is the final flush.
    pub stopping: bool,
}

/// A destination the worker writes batches to.
pub trait BatchSink: Send {
    /// How long the worker waits for new records before an idle round.
    fn poll_interval(&self) -> Duration;

    /// Number of the `pending` records to write now; 0 holds them.
    ///
    /// Must return a positive count when `round.stopping` or `round.idle`.
    fn plan(&mut self, pending: usize, round: FlushRound) -> usize;

    /// Write the batch. On error nothing is committed and the same batch
    /// is retried, so writes must be idempotent per record.
    fn write_batch(&mut self, batch: &[ItemHandle]) -> Result<(), SinkError>;

    /// Called once after the final flush.
    fn finish(&mut self) {}
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff with ±20% jitter.
#[derive(Debug)]
struct Backoff {
    next_ms: u64,
    max_ms: u64,
}

impl Backoff {
    const JITTER: f64 = 0.2;

    const fn new(retry: &RetryConfig) -> Self {
        Self {
            next_ms: retry.initial_backoff_ms,
            max_ms: retry.max_backoff_ms,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.next_ms.min(self.max_ms);
        self.next_ms = base.saturating_mul(2).max(1);

        let spread = base as f64 * Self::JITTER;
        let low = (base as f64 - spread).max(0.0);
        let high = base as f64 + spread;
        let jittered = if high > low {
            rand::rng().random_range(low..=high) as u64
        } else {
            base
        };
        Duration::from_millis(jittered.min(self.max_ms))
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Drains a queue into a sink on a dedicated thread.
pub(crate) struct SinkWorker<S> {
    queue: Arc<DurableQueue>,
    sink: S,
    retry: RetryConfig,
    observers: Vec<Arc<dyn JournalObserver>>,
}

impl<S: BatchSink + 'static> SinkWorker<S> {
    pub(crate) fn new(
        queue: Arc<DurableQueue>,
        sink: S,
        retry: RetryConfig,
        observers: Vec<Arc<dyn JournalObserver>>,
    ) -> Self {
        Self {
            queue,
            sink,
            retry,
            observers,
        }
    }

    /// Start the worker thread. Joining it returns the sink.
    pub(crate) fn spawn(self, thread_name: &str) -> std::io::Result<JoinHandle<S>> {
        thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) -> S {
        let sink = self.queue.sink();
        info!(sink, "Journal worker started");

        let mut held = 0_usize;
        let mut rounds = 0_u32;
        loop {
            let grew = self.queue.wait_for_more(held, self.sink.poll_interval());
            let stopping = self.queue.is_closed();
            let pending = self.queue.depth();

            if pending == 0 {
                held = 0;
                rounds = 0;
                if stopping {
                    break;
                }
                continue;
            }

            let round = FlushRound {
                rounds,
                idle: !grew,
                stopping,
            };
            let take = self.sink.plan(pending, round);
            if take == 0 {
                if grew {
                    rounds += 1;
                }
                held = pending;
                continue;
            }

            let batch = self.queue.peek(take);
            if !self.write_with_retry(&batch) {
                error!(
                    sink,
                    unflushed = self.queue.depth(),
                    "Final flush failed; records remain unpersisted in this sink"
                );
                break;
            }
            self.queue.commit(batch.len());
            self.notify(&batch);
            held = 0;
            rounds = 0;
        }

        self.sink.finish();
        info!(sink, "Journal worker stopped");
        self.sink
    }

    /// Returns false only when the final flush ran out of attempts.
    fn write_with_retry(&mut self, batch: &[ItemHandle]) -> bool {
        let sink = self.queue.sink();
        let mut backoff = Backoff::new(&self.retry);
        let mut failures = 0_u32;
        let mut final_attempts = 0_u32;

        loop {
            if self.queue.is_closed() {
                final_attempts += 1;
            }

            let started = Instant::now();
            match self.sink.write_batch(batch) {
                Ok(()) => {
                    observability::record_batch_written(
                        sink,
                        batch.len(),
                        started.elapsed().as_secs_f64(),
                    );
                    if failures > 0 {
                        info!(sink, failures, "Journal sink recovered");
                    }
                    return true;
                }
                Err(e) => {
                    failures += 1;
                    observability::record_sink_failure(sink);
                    warn!(
                        sink,
                        error = %e,
                        failures,
                        records = batch.len(),
                        "Journal sink write failed; records stay enqueued"
                    );

                    let alert_after = self.retry.alert_after_failures;
                    if alert_after > 0 && failures % alert_after == 0 {
                        observability::record_sink_alert(sink);
                        error!(
                            sink,
                            failures,
                            queue_depth = self.queue.depth(),
                            "Journal sink failing persistently"
                        );
                    }

                    if final_attempts >= self.retry.final_flush_attempts {
                        return false;
                    }

                    let delay = backoff.next_delay();
                    if self.queue.is_closed() {
                        thread::sleep(delay);
                    } else {
                        self.queue.wait_closed(delay);
                    }
                }
            }
        }
    }

    fn notify(&self, batch: &[ItemHandle]) {
        if self.observers.is_empty() {
            return;
        }
        for handle in batch {
            let item = handle.read();
            if !item.send_to_bus {
                continue;
            }
            for observer in &self.observers {
                observer.on_persisted(&item);
            }
        }
    }
}
