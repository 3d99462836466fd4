//! Async facade over the writer thread: the only way components touch the
//! local database.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

use super::queries::{self, RecordFilter};
use super::writer::{spawn_writer, DbTarget, StoreChannel};
use super::{RecordTable, StoreError};
use crate::config::{DEFAULT_INVENTORY, MAX_SYNC_RETRIES};
use crate::engine::{LocalClock, SystemClock};
use crate::types::{
    now_millis, AdImpressionRecord, GameResultRecord, InventoryCounter, NewGameResult,
    SyncCounts,
};

/// Rows removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub results: usize,
    pub impressions: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.results + self.impressions
    }
}

/// Durable local store for one kiosk.
///
/// Construction does no I/O. The database is opened by [`LocalStore::init`],
/// which every other method calls first, so a store used before explicit
/// initialization still works.
pub struct LocalStore {
    kiosk_id: String,
    target: DbTarget,
    default_inventory: u32,
    clock: Arc<dyn LocalClock>,
    channel: OnceCell<StoreChannel>,
}

impl LocalStore {
    pub fn open(kiosk_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(kiosk_id, DbTarget::File(path.into()))
    }

    /// Non-persistent store, for simulations and tests.
    pub fn in_memory(kiosk_id: impl Into<String>) -> Self {
        Self::new(kiosk_id, DbTarget::Memory)
    }

    fn new(kiosk_id: impl Into<String>, target: DbTarget) -> Self {
        Self {
            kiosk_id: kiosk_id.into(),
            target,
            default_inventory: DEFAULT_INVENTORY,
            clock: Arc::new(SystemClock),
            channel: OnceCell::new(),
        }
    }

    /// Use a different source for the local calendar day.
    pub fn with_clock(mut self, clock: impl LocalClock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Budget seeded on first initialization.
    pub fn with_default_inventory(mut self, budget: u32) -> Self {
        self.default_inventory = budget;
        self
    }

    pub fn kiosk_id(&self) -> &str {
        &self.kiosk_id
    }

    /// Open the database, create the schema and seed the inventory counter.
    ///
    /// Idempotent. Concurrent callers share one initialization; if it fails,
    /// the error goes to the caller that ran it and the next call retries.
    pub async fn init(&self) -> Result<(), StoreError> {
        self.channel().await.map(|_| ())
    }

    async fn channel(&self) -> Result<&StoreChannel, StoreError> {
        self.channel
            .get_or_try_init(|| async {
                let channel = spawn_writer(self.target.clone()).await?;

                let kiosk_id = self.kiosk_id.clone();
                let today = self.clock.today();
                let budget = self.default_inventory;
                let seeded = channel
                    .call(move |conn| {
                        queries::seed_counter(conn, &kiosk_id, today, budget, now_millis())
                    })
                    .await?;
                if seeded {
                    info!(
                        "[STORE] Seeded inventory for {} with default budget {}",
                        self.kiosk_id, budget
                    );
                }
                Ok::<_, StoreError>(channel)
            })
            .await
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        self.channel().await?.call(f).await
    }

    /// Stop the writer thread after queued jobs finish. Later calls fail with
    /// [`StoreError::WriterClosed`].
    pub fn close(&self) {
        if let Some(channel) = self.channel.get() {
            channel.shutdown();
        }
    }

    // === Game Results ===

    /// Persist a finished game as pending. Returns the new record id.
    pub async fn save_game_result(&self, result: NewGameResult) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let record_id = id.clone();
        let timestamp = now_millis();

        self.call(move |conn| queries::insert_game_result(conn, &record_id, timestamp, &result))
            .await?;
        debug!("[STORE] Saved game result {}", id);
        Ok(id)
    }

    /// Pending results plus failed ones with retries left, in insertion order.
    pub async fn unsynced_results(&self) -> Result<Vec<GameResultRecord>, StoreError> {
        self.call(|conn| queries::select_game_results(conn, RecordFilter::Unsynced, MAX_SYNC_RETRIES))
            .await
    }

    /// Failed results that reached the retry ceiling.
    pub async fn stuck_results(&self) -> Result<Vec<GameResultRecord>, StoreError> {
        self.call(|conn| queries::select_game_results(conn, RecordFilter::Stuck, MAX_SYNC_RETRIES))
            .await
    }

    pub async fn mark_results_synced(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.mark(RecordTable::GameResults, ids, true).await
    }

    pub async fn mark_results_failed(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.mark(RecordTable::GameResults, ids, false).await
    }

    // === Ad Impressions ===

    /// Persist an ad impression as pending. Returns the new record id.
    pub async fn log_ad_impression(
        &self,
        ad_id: &str,
        duration_ms: u64,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let record_id = id.clone();
        let kiosk_id = self.kiosk_id.clone();
        let ad_id = ad_id.to_string();
        let timestamp = now_millis();

        self.call(move |conn| {
            queries::insert_ad_impression(conn, &record_id, &kiosk_id, &ad_id, timestamp, duration_ms)
        })
        .await?;
        Ok(id)
    }

    pub async fn unsynced_impressions(&self) -> Result<Vec<AdImpressionRecord>, StoreError> {
        self.call(|conn| queries::select_ad_impressions(conn, RecordFilter::Unsynced, MAX_SYNC_RETRIES))
            .await
    }

    pub async fn stuck_impressions(&self) -> Result<Vec<AdImpressionRecord>, StoreError> {
        self.call(|conn| queries::select_ad_impressions(conn, RecordFilter::Stuck, MAX_SYNC_RETRIES))
            .await
    }

    pub async fn mark_impressions_synced(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.mark(RecordTable::AdImpressions, ids, true).await
    }

    pub async fn mark_impressions_failed(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.mark(RecordTable::AdImpressions, ids, false).await
    }

    async fn mark(&self, table: RecordTable, ids: &[String], synced: bool) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        self.call(move |conn| {
            if synced {
                queries::mark_synced(conn, table, &ids)
            } else {
                queries::mark_failed(conn, table, &ids)
            }
        })
        .await
    }

    // === Lifecycle Reporting ===

    pub async fn sync_counts(&self, table: RecordTable) -> Result<SyncCounts, StoreError> {
        self.call(move |conn| queries::count_by_status(conn, table, MAX_SYNC_RETRIES))
            .await
    }

    /// Delete synced records older than `retention`. Pending and failed
    /// records are never removed.
    pub async fn cleanup_synced(
        &self,
        retention: chrono::Duration,
    ) -> Result<CleanupReport, StoreError> {
        let cutoff = now_millis() - retention.num_milliseconds();
        let report = self
            .call(move |conn| {
                Ok(CleanupReport {
                    results: queries::delete_synced_before(conn, RecordTable::GameResults, cutoff)?,
                    impressions: queries::delete_synced_before(
                        conn,
                        RecordTable::AdImpressions,
                        cutoff,
                    )?,
                })
            })
            .await?;

        if report.total() > 0 {
            info!(
                "[STORE] Retention sweep removed {} game results, {} ad impressions",
                report.results, report.impressions
            );
        }
        Ok(report)
    }

    // === Inventory ===

    /// Today's budget counter, rolling over from the latest day if needed.
    pub async fn current_counter(&self) -> Result<Option<InventoryCounter>, StoreError> {
        let kiosk_id = self.kiosk_id.clone();
        let today = self.clock.today();
        self.call(move |conn| queries::current_counter(conn, &kiosk_id, today, now_millis()))
            .await
    }

    /// Remaining budget for today, or `None` if no counter was ever stored.
    pub async fn get_inventory(&self) -> Result<Option<u32>, StoreError> {
        Ok(self
            .current_counter()
            .await?
            .map(|counter| counter.remaining_budget))
    }

    /// Reset today's counter to a full budget of `count`.
    pub async fn set_inventory(&self, count: u32) -> Result<(), StoreError> {
        let kiosk_id = self.kiosk_id.clone();
        let today = self.clock.today();
        self.call(move |conn| queries::set_counter(conn, &kiosk_id, today, count, now_millis()))
            .await
    }

    /// Take one unit of today's budget, clamped at zero. Returns what is left.
    pub async fn decrement_inventory(&self) -> Result<u32, StoreError> {
        let kiosk_id = self.kiosk_id.clone();
        let today = self.clock.today();
        let default_budget = self.default_inventory;
        self.call(move |conn| {
            queries::decrement_counter(conn, &kiosk_id, today, default_budget, now_millis())
        })
        .await
    }

    // === Config Cache ===

    pub async fn get_config<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.to_string();
        self.call(move |conn| {
            let Some(json) = queries::select_config(conn, &key)? else {
                return Ok(None);
            };
            serde_json::from_str(&json)
                .map(Some)
                .map_err(|source| StoreError::ConfigValue { key, source })
        })
        .await
    }

    pub async fn set_config<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(value).map_err(|source| StoreError::ConfigValue {
            key: key.to_string(),
            source,
        })?;
        let key = key.to_string();
        self.call(move |conn| queries::upsert_config(conn, &key, &json, now_millis()))
            .await
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("kiosk_id", &self.kiosk_id)
            .field("target", &self.target)
            .field("initialized", &self.channel.initialized())
            .finish()
    }
}
