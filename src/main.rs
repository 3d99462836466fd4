//! Headless kiosk daemon
//!
//! Runs the kiosk core without the screen flow: restores today's budget from
//! the local database, keeps the sync worker running against the backend and
//! logs a heartbeat. Coin keys (`1`, `2`, `5`) typed on stdin play a game, which
//! is how the core is exercised on a bench terminal without the UI.
//!
//! ## Environment
//!
//! - `KIOSK_ID`, `KIOSK_DB_PATH`, `KIOSK_BACKEND_URL` (unset runs offline)
//! - `KIOSK_WIN_RATE`, `KIOSK_DAILY_BUDGET`, `KIOSK_LANGUAGE` (fallback config)
//! - `SYNC_INTERVAL_SECS`, `SYNC_REQUEST_TIMEOUT_SECS`, `SYNC_RETENTION_DAYS`
//! - `SYNC_BACKOFF_ENABLED`, `SYNC_BACKOFF_MAX_FAILURES`,
//!   `SYNC_BACKOFF_BASE_SECS`, `SYNC_BACKOFF_MAX_SECS`
//! - `SYNC_DEBUG=1` logs record ids per batch

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kiosk_core::backend::{HttpBackend, SyncBackend};
use kiosk_core::config::{KioskSettings, HEARTBEAT_INTERVAL_SECS};
use kiosk_core::engine::OutcomeEngine;
use kiosk_core::kiosk::Kiosk;
use kiosk_core::storage::{LocalStore, RecordTable};
use kiosk_core::sync::{
    backend_address, is_reachable, Connectivity, ConnectivityFlag, SyncBackoffConfig, SyncWorker,
    SyncWorkerConfig,
};
use kiosk_core::types::CoinValue;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging with both stdout and file output
    let file_appender = tracing_appender::rolling::never(".", "kiosk.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("kiosk_core=info".parse().context("invalid log directive")?);

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let settings = KioskSettings::from_env();
    info!("🎰 Kiosk core v{}", env!("CARGO_PKG_VERSION"));
    info!("   Kiosk: {}", settings.kiosk_id);
    info!("   Database: {}", settings.db_path.display());

    // === Storage & Engine ===

    let store = Arc::new(LocalStore::open(&settings.kiosk_id, &settings.db_path));
    store
        .init()
        .await
        .with_context(|| format!("failed to open database at {}", settings.db_path.display()))?;

    let fallback = settings.default_config.clone();
    let engine = OutcomeEngine::new(fallback.win_rate, fallback.daily_budget);
    let kiosk = Arc::new(
        Kiosk::restore(store.clone(), engine, fallback)
            .await
            .context("failed to restore kiosk state")?,
    );

    // === Sync ===

    let connectivity = Arc::new(ConnectivityFlag::new(true));
    let worker_config = SyncWorkerConfig::from_env();

    let backend = match &settings.backend_url {
        Some(url) => {
            info!("   Backend: {}", url);
            Some(Arc::new(
                HttpBackend::new(url, worker_config.request_timeout)
                    .context("failed to build HTTP client")?,
            ))
        }
        None => {
            warn!("   Backend: none (KIOSK_BACKEND_URL not set), records stay local");
            None
        }
    };

    let worker = backend.as_ref().map(|backend| {
        Arc::new(
            SyncWorker::new(
                store.clone(),
                backend.clone(),
                connectivity.clone(),
                worker_config.clone(),
            )
            .with_backoff(SyncBackoffConfig::from_env()),
        )
    });

    // === Reachability ===

    // Dial the backend every sync interval; while it is down ticks skip
    // instead of spending retries.
    let reachability_handle = match settings.backend_url.as_deref().and_then(backend_address) {
        Some(addr) => {
            connectivity.set_online(is_reachable(&addr, worker_config.request_timeout).await);
            let flag = connectivity.clone();
            let every = worker_config.interval;
            let timeout = worker_config.request_timeout;
            Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                loop {
                    interval.tick().await;
                    flag.set_online(is_reachable(&addr, timeout).await);
                }
            }))
        }
        None => {
            if settings.backend_url.is_some() {
                warn!("[SYNC] Backend URL has no host, reachability not checked");
            }
            None
        }
    };

    if let Some(worker) = &worker {
        worker.start();
    }

    // === Heartbeat ===

    let heartbeat_kiosk = kiosk.clone();
    let heartbeat_worker = worker.clone();
    let heartbeat_backend = backend.clone();
    let heartbeat_connectivity = connectivity.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            interval.tick().await;

            if let Some(backend) = &heartbeat_backend {
                if heartbeat_connectivity.is_online() {
                    let backend: &dyn SyncBackend = backend.as_ref();
                    if let Err(e) = heartbeat_kiosk.refresh_config(backend).await {
                        warn!("[KIOSK] Config refresh failed: {}", e);
                    }
                }
            }

            let store = heartbeat_kiosk.store();
            let results = store.sync_counts(RecordTable::GameResults).await;
            let impressions = store.sync_counts(RecordTable::AdImpressions).await;
            let (results, impressions) = match (results, impressions) {
                (Ok(r), Ok(i)) => (r, i),
                (Err(e), _) | (_, Err(e)) => {
                    error!("💓 Heartbeat: store unavailable: {}", e);
                    continue;
                }
            };

            let sync_state = match &heartbeat_worker {
                Some(worker) => format!("{:?} | {}", worker.status(), worker.backoff().status().await),
                None => "offline".to_string(),
            };
            info!(
                "💓 Heartbeat | budget {} left | results: {} | impressions: {} | sync: {}",
                heartbeat_kiosk.remaining_budget(),
                results,
                impressions,
                sync_state
            );

            if results.stuck > 0 || impressions.stuck > 0 {
                warn!(
                    "[SYNC] {} game results and {} ad impressions exhausted their retries",
                    results.stuck, impressions.stuck
                );
            }
        }
    });

    // === Coin Intake ===

    info!("Ready. Type 1, 2 or 5 and Enter to insert a coin; Ctrl-C to stop.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    for coin in line.chars().filter_map(CoinValue::from_key) {
                        if let Err(e) = kiosk.play(coin).await {
                            error!("[KIOSK] Play with {} coin failed: {}", coin, e);
                        }
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("stdin unreadable, coin intake disabled: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    info!("Shutting down");
    heartbeat_handle.abort();
    if let Some(handle) = reachability_handle {
        handle.abort();
    }
    if let Some(worker) = &worker {
        worker.stop();
    }
    store.close();

    Ok(())
}
