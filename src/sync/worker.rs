//! Periodic sync worker.
//!
//! Each tick uploads every unsynced game result and ad impression in one batch
//! per category. A batch is marked as a whole: all synced on an explicit
//! success, all failed otherwise. A batch whose connection was refused is
//! left untouched, like an offline tick. Offline ticks and ticks that arrive
//! while another is still running are skipped, never queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backoff::{SyncBackoff, SyncBackoffConfig};
use super::connectivity::Connectivity;
use crate::backend::{BackendError, SyncAck, SyncBackend};
use crate::config::{
    env_parse, sync_debug_enabled, CLEANUP_INTERVAL_SECS, RETENTION_DAYS, SYNC_INTERVAL_SECS,
    SYNC_REQUEST_TIMEOUT_SECS,
};
use crate::storage::{LocalStore, RecordTable};

#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    pub interval: Duration,
    /// Upper bound for each backend call
    pub request_timeout: Duration,
    /// Synced records older than this are swept
    pub retention: chrono::Duration,
    pub cleanup_interval: Duration,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(SYNC_INTERVAL_SECS),
            request_timeout: Duration::from_secs(SYNC_REQUEST_TIMEOUT_SECS),
            retention: chrono::Duration::days(RETENTION_DAYS),
            cleanup_interval: Duration::from_secs(CLEANUP_INTERVAL_SECS),
        }
    }
}

impl SyncWorkerConfig {
    pub fn from_env() -> Self {
        Self {
            interval: Duration::from_secs(env_parse("SYNC_INTERVAL_SECS", SYNC_INTERVAL_SECS).max(1)),
            request_timeout: Duration::from_secs(
                env_parse("SYNC_REQUEST_TIMEOUT_SECS", SYNC_REQUEST_TIMEOUT_SECS).max(1),
            ),
            retention: chrono::Duration::days(env_parse("SYNC_RETENTION_DAYS", RETENTION_DAYS).max(0)),
            cleanup_interval: Duration::from_secs(CLEANUP_INTERVAL_SECS),
        }
    }
}

/// What happened to one category's batch during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing to upload
    Empty,
    /// Backend confirmed; this many records marked synced
    Synced(usize),
    /// Backend call failed; this many records marked failed
    Failed { count: usize, reason: String },
    /// Backend could not be reached; this many records left as they were
    Unreachable(usize),
    /// Local store could not be read or updated
    StoreUnavailable(String),
}

impl BatchOutcome {
    /// Counts toward backoff. Only `Failed` consumed a retry.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BatchOutcome::Failed { .. }
                | BatchOutcome::Unreachable(_)
                | BatchOutcome::StoreUnavailable(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    Skipped(SkipReason),
    Completed {
        results: BatchOutcome,
        impressions: BatchOutcome,
    },
}

impl TickReport {
    pub fn is_failure(&self) -> bool {
        match self {
            TickReport::Skipped(_) => false,
            TickReport::Completed { results, impressions } => {
                results.is_failure() || impressions.is_failure()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Clears the in-progress flag when dropped, including on panic.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SyncWorker {
    store: Arc<LocalStore>,
    backend: Arc<dyn SyncBackend>,
    connectivity: Arc<dyn Connectivity>,
    config: SyncWorkerConfig,
    backoff: SyncBackoff,
    in_progress: AtomicBool,
    last_report: Mutex<Option<TickReport>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncWorker {
    pub fn new(
        store: Arc<LocalStore>,
        backend: Arc<dyn SyncBackend>,
        connectivity: Arc<dyn Connectivity>,
        config: SyncWorkerConfig,
    ) -> Self {
        Self {
            store,
            backend,
            connectivity,
            config,
            backoff: SyncBackoff::new(SyncBackoffConfig::default()),
            in_progress: AtomicBool::new(false),
            last_report: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn with_backoff(mut self, config: SyncBackoffConfig) -> Self {
        self.backoff = SyncBackoff::new(config);
        self
    }

    pub fn backoff(&self) -> &SyncBackoff {
        &self.backoff
    }

    pub fn status(&self) -> SyncState {
        if self.in_progress.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Report of the most recent tick, skipped ones included.
    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report.lock().ok().and_then(|last| last.clone())
    }

    // === Lifecycle ===

    /// Start the periodic loop: one tick right away, then every interval.
    /// Calling it again while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut task) = self.task.lock() else {
            error!("[SYNC] Worker state poisoned, not starting");
            return;
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("[SYNC] Worker already started");
            return;
        }

        let worker = Arc::clone(self);
        *task = Some(tokio::spawn(async move { worker.run_loop().await }));
        info!(
            "[SYNC] Worker started for {} (every {}s)",
            self.store.kiosk_id(),
            self.config.interval.as_secs()
        );
    }

    /// Cancel the periodic loop. A tick already in flight is aborted at its
    /// next await; records it had not marked yet stay unsynced.
    pub fn stop(&self) {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            handle.abort();
            info!("[SYNC] Worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .ok()
            .is_some_and(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
    }

    async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sweep: Option<Instant> = None;

        loop {
            ticker.tick().await;

            if self.backoff.should_attempt().await {
                let report = self.run_tick().await;
                match &report {
                    TickReport::Skipped(_) => {}
                    r if r.is_failure() => self.backoff.record_failure().await,
                    _ => self.backoff.record_success().await,
                }
            } else {
                debug!("[SYNC] Backing off, tick skipped");
            }

            if last_sweep.map_or(true, |at| at.elapsed() >= self.config.cleanup_interval) {
                if let Err(e) = self.store.cleanup_synced(self.config.retention).await {
                    warn!("[SYNC] Retention sweep failed: {}", e);
                }
                last_sweep = Some(Instant::now());
            }
        }
    }

    // === Tick ===

    /// Run one sync pass now. Ignores backoff.
    pub async fn run_tick(&self) -> TickReport {
        let report = self.tick().await;
        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
        report
    }

    async fn tick(&self) -> TickReport {
        if !self.connectivity.is_online() {
            debug!("[SYNC] Offline, skipping tick");
            return TickReport::Skipped(SkipReason::Offline);
        }

        let Some(_guard) = TickGuard::acquire(&self.in_progress) else {
            debug!("[SYNC] Already running, skipping tick");
            return TickReport::Skipped(SkipReason::InProgress);
        };

        let results = self.sync_game_results().await;
        let impressions = self.sync_ad_impressions().await;

        TickReport::Completed { results, impressions }
    }

    async fn sync_game_results(&self) -> BatchOutcome {
        let records = match self.store.unsynced_results().await {
            Ok(records) => records,
            Err(e) => {
                error!("[SYNC] Could not read unsynced game results: {}", e);
                return BatchOutcome::StoreUnavailable(e.to_string());
            }
        };
        if records.is_empty() {
            return BatchOutcome::Empty;
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let result = self.bounded(self.backend.sync_game_results(&records)).await;
        self.settle(RecordTable::GameResults, &ids, result).await
    }

    async fn sync_ad_impressions(&self) -> BatchOutcome {
        let records = match self.store.unsynced_impressions().await {
            Ok(records) => records,
            Err(e) => {
                error!("[SYNC] Could not read unsynced ad impressions: {}", e);
                return BatchOutcome::StoreUnavailable(e.to_string());
            }
        };
        if records.is_empty() {
            return BatchOutcome::Empty;
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let result = self.bounded(self.backend.sync_ad_impressions(&records)).await;
        self.settle(RecordTable::AdImpressions, &ids, result).await
    }

    /// Apply the request timeout and treat anything but an explicit success
    /// as a failure.
    async fn bounded<F>(&self, call: F) -> Result<(), BackendError>
    where
        F: Future<Output = Result<SyncAck, BackendError>>,
    {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(Ok(SyncAck { success: true })) => Ok(()),
            Ok(Ok(SyncAck { success: false })) => Err(BackendError::Rejected),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::Timeout(self.config.request_timeout)),
        }
    }

    async fn settle(
        &self,
        table: RecordTable,
        ids: &[String],
        result: Result<(), BackendError>,
    ) -> BatchOutcome {
        match result {
            Err(reason) if reason.is_unreachable() => {
                // Same as an offline tick: nothing was sent, so no retry is spent.
                info!("[SYNC] Backend unreachable, {} {} stay pending: {}", ids.len(), table, reason);
                BatchOutcome::Unreachable(ids.len())
            }
            Ok(()) => {
                let marked = match table {
                    RecordTable::GameResults => self.store.mark_results_synced(ids).await,
                    RecordTable::AdImpressions => self.store.mark_impressions_synced(ids).await,
                };
                if let Err(e) = marked {
                    // Left unsynced; the backend sees them again next tick.
                    error!("[SYNC] Uploaded {} {} but could not mark them: {}", ids.len(), table, e);
                    return BatchOutcome::StoreUnavailable(e.to_string());
                }

                info!("[SYNC] Synced {} {}", ids.len(), table);
                if sync_debug_enabled() {
                    info!("[SYNC]   synced ids: {:?}", ids);
                }
                BatchOutcome::Synced(ids.len())
            }
            Err(reason) => {
                warn!("[SYNC] Failed to sync {} {}: {}", ids.len(), table, reason);
                if sync_debug_enabled() {
                    info!("[SYNC]   failed ids: {:?}", ids);
                }

                let marked = match table {
                    RecordTable::GameResults => self.store.mark_results_failed(ids).await,
                    RecordTable::AdImpressions => self.store.mark_impressions_failed(ids).await,
                };
                if let Err(e) = marked {
                    error!("[SYNC] Could not mark {} {} failed: {}", ids.len(), table, e);
                    return BatchOutcome::StoreUnavailable(e.to_string());
                }

                BatchOutcome::Failed {
                    count: ids.len(),
                    reason: reason.to_string(),
                }
            }
        }
    }
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker")
            .field("kiosk_id", &self.store.kiosk_id())
            .field("config", &self.config)
            .field("state", &self.status())
            .finish()
    }
}
