//! Order Journal Binary
//!
//! Opens the journal, reports what recovery would rebuild, and keeps the
//! sinks running until SIGINT/SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin order-journal
//! ```
//!
//! # Environment Variables
//!
//! - `ORDER_JOURNAL_CONFIG`: path to the YAML config (default: config.yaml)
//! - `RUST_LOG`: log filter, overrides `observability.log_filter`

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use order_journal::config::Config;
use order_journal::domain::{AccountId, StorageItem};
use order_journal::journal::JournalObserver;
use order_journal::observability::{self, MetricsConfig};
use order_journal::{OrderJournal, load_config};
use tokio::signal;

/// Logs every item the journal publishes to the bus.
struct BusLogger;

impl JournalObserver for BusLogger {
    fn on_persisted(&self, item: &StorageItem) {
        tracing::debug!(seq = item.id, kind = %item.kind(), "Journaled");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config_path =
        std::env::var("ORDER_JOURNAL_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = load_config(Some(&config_path))
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    let _telemetry_guard = observability::init_telemetry(&config.observability);
    tracing::info!(config = %config_path, "Starting order journal");

    if let Some(addr) = &config.observability.metrics_addr {
        let addr = addr
            .parse()
            .with_context(|| format!("invalid metrics address {addr}"))?;
        observability::init_metrics(&MetricsConfig::with_addr(addr))?;
    }

    let journal = Arc::new(OrderJournal::new());
    journal.init(config.journal_settings())?;
    journal.add_observer(Arc::new(BusLogger))?;
    journal.start()?;

    log_recovery(&journal, &config)?;

    await_shutdown().await;

    let stopping = Arc::clone(&journal);
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("journal stop task panicked")?;

    tracing::info!(last_seq = journal.last_sequence(), "Order journal shut down");
    Ok(())
}

/// Log what a strategy container would rebuild for the configured account.
fn log_recovery(journal: &OrderJournal, config: &Config) -> anyhow::Result<()> {
    let reader = journal.recovery_reader(config.recovery.source)?;
    let account = AccountId::new(config.recovery.account.as_str());

    let open_orders = reader.open_orders(&account)?;
    let positions = reader.positions(&account)?;
    let fills_today = reader.fills_for_date(&account, Utc::now().date_naive())?;

    tracing::info!(
        account = %account,
        source = ?config.recovery.source,
        open_orders = open_orders.len(),
        positions = positions.len(),
        fills_today = fills_today.len(),
        "Recovery snapshot"
    );
    Ok(())
}

/// Load `.env` from the working directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
