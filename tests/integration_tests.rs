// tests/integration_tests.rs
// Holistic integration tests for the kiosk core
//
// These tests verify the full flow:
// 1. Budget-gated outcomes and the midnight rollover
// 2. Durable records and their sync lifecycle
// 3. Sync worker ticks against a scripted backend
// 4. Kiosk play, restore and remote config

// ============================================================================
// TEST SUPPORT - Scripted backend and clock helpers
// ============================================================================

mod support {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Notify;

    use kiosk_core::backend::{BackendError, SyncAck, SyncBackend};
    use kiosk_core::types::{AdImpressionRecord, GameResultRecord, KioskConfig};

    pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Backend whose answers are flipped per category by the test.
    pub struct ScriptedBackend {
        pub results_ok: AtomicBool,
        pub impressions_ok: AtomicBool,
        /// Answer `success: false` instead of an error when failing
        pub reject_instead_of_error: AtomicBool,
        pub result_calls: AtomicUsize,
        pub impression_calls: AtomicUsize,
        pub received_results: Mutex<Vec<String>>,
        pub config: Mutex<Option<KioskConfig>>,
    }

    impl ScriptedBackend {
        pub fn succeeding() -> Self {
            Self {
                results_ok: AtomicBool::new(true),
                impressions_ok: AtomicBool::new(true),
                reject_instead_of_error: AtomicBool::new(false),
                result_calls: AtomicUsize::new(0),
                impression_calls: AtomicUsize::new(0),
                received_results: Mutex::new(Vec::new()),
                config: Mutex::new(None),
            }
        }

        pub fn failing() -> Self {
            let backend = Self::succeeding();
            backend.results_ok.store(false, Ordering::SeqCst);
            backend.impressions_ok.store(false, Ordering::SeqCst);
            backend
        }

        pub fn result_calls(&self) -> usize {
            self.result_calls.load(Ordering::SeqCst)
        }

        pub fn impression_calls(&self) -> usize {
            self.impression_calls.load(Ordering::SeqCst)
        }

        fn answer(&self, ok: bool) -> Result<SyncAck, BackendError> {
            if ok {
                Ok(SyncAck { success: true })
            } else if self.reject_instead_of_error.load(Ordering::SeqCst) {
                Ok(SyncAck { success: false })
            } else {
                Err(BackendError::Status {
                    status: 503,
                    body: "unavailable".into(),
                })
            }
        }
    }

    #[async_trait]
    impl SyncBackend for ScriptedBackend {
        async fn sync_game_results(
            &self,
            results: &[GameResultRecord],
        ) -> Result<SyncAck, BackendError> {
            self.result_calls.fetch_add(1, Ordering::SeqCst);
            self.received_results
                .lock()
                .unwrap()
                .extend(results.iter().map(|r| r.id.clone()));
            self.answer(self.results_ok.load(Ordering::SeqCst))
        }

        async fn sync_ad_impressions(
            &self,
            _impressions: &[AdImpressionRecord],
        ) -> Result<SyncAck, BackendError> {
            self.impression_calls.fetch_add(1, Ordering::SeqCst);
            self.answer(self.impressions_ok.load(Ordering::SeqCst))
        }

        async fn fetch_kiosk_config(
            &self,
            _kiosk_id: &str,
        ) -> Result<Option<KioskConfig>, BackendError> {
            Ok(self.config.lock().unwrap().clone())
        }
    }

    /// Backend that parks inside the game results call until released.
    #[derive(Default)]
    pub struct GatedBackend {
        pub entered: Notify,
        pub release: Notify,
    }

    #[async_trait]
    impl SyncBackend for GatedBackend {
        async fn sync_game_results(
            &self,
            _results: &[GameResultRecord],
        ) -> Result<SyncAck, BackendError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(SyncAck { success: true })
        }

        async fn sync_ad_impressions(
            &self,
            _impressions: &[AdImpressionRecord],
        ) -> Result<SyncAck, BackendError> {
            Ok(SyncAck { success: true })
        }

        async fn fetch_kiosk_config(
            &self,
            _kiosk_id: &str,
        ) -> Result<Option<KioskConfig>, BackendError> {
            Ok(None)
        }
    }
}

// ============================================================================
// ENGINE TESTS - Budget gate and lazy midnight rollover
// ============================================================================

mod engine_tests {
    use super::support::day;
    use kiosk_core::engine::*;
    use kiosk_core::types::Outcome;

    /// Win rate 30, budget 2, draws [10, 10, 10] -> win, win, loss
    #[test]
    fn test_budget_gates_third_winning_draw() {
        let clock = ManualClock::new(day(2026, 5, 4));
        let mut engine =
            OutcomeEngine::with_sources(30.0, 2, ScriptedRolls::new([10.0, 10.0, 10.0]), clock);

        assert_eq!(engine.determine_outcome(), Outcome::Win);
        assert_eq!(engine.determine_outcome(), Outcome::Win);
        assert_eq!(engine.determine_outcome(), Outcome::Loss);
        assert_eq!(engine.remaining_budget(), 0);
    }

    /// An exhausted budget forces losses and never goes negative
    #[test]
    fn test_exhausted_budget_forces_loss() {
        let clock = ManualClock::new(day(2026, 5, 4));
        let mut engine = OutcomeEngine::with_sources(100.0, 0, ScriptedRolls::new([0.0]), clock);

        for _ in 0..100 {
            assert_eq!(engine.determine_outcome(), Outcome::Loss);
        }
        assert_eq!(engine.remaining_budget(), 0);
    }

    /// Crossing midnight restores the full budget on the next access
    #[test]
    fn test_midnight_rollover_restores_budget() {
        let clock = ManualClock::new(day(2026, 5, 4));
        let mut engine =
            OutcomeEngine::with_sources(100.0, 3, ScriptedRolls::new([0.0]), clock.clone());

        for _ in 0..3 {
            assert_eq!(engine.determine_outcome(), Outcome::Win);
        }
        assert_eq!(engine.determine_outcome(), Outcome::Loss);

        clock.advance_days(1);
        assert_eq!(engine.remaining_budget(), 3);
        assert_eq!(engine.last_reset_date(), day(2026, 5, 5));
        assert_eq!(engine.determine_outcome(), Outcome::Win);
    }

    /// Rollover is detected on determine_outcome too, not only on queries
    #[test]
    fn test_rollover_detected_by_determine_outcome() {
        let clock = ManualClock::new(day(2026, 12, 31));
        let mut engine =
            OutcomeEngine::with_sources(100.0, 1, ScriptedRolls::new([0.0]), clock.clone());

        assert_eq!(engine.determine_outcome(), Outcome::Win);
        clock.set(day(2027, 1, 1));
        assert_eq!(engine.determine_outcome(), Outcome::Win);
    }

    /// set_budget overrides both initial and remaining immediately
    #[test]
    fn test_set_budget_resets_remaining() {
        let clock = ManualClock::new(day(2026, 5, 4));
        let mut engine =
            OutcomeEngine::with_sources(100.0, 2, ScriptedRolls::new([0.0]), clock);

        engine.determine_outcome();
        assert_eq!(engine.remaining_budget(), 1);

        engine.set_budget(5);
        assert_eq!(engine.remaining_budget(), 5);
        assert_eq!(engine.initial_budget(), 5);
    }

    /// Out-of-range settings are clamped
    #[test]
    fn test_misconfiguration_is_clamped() {
        let clock = ManualClock::new(day(2026, 5, 4));
        let mut engine =
            OutcomeEngine::with_sources(250.0, -4, ScriptedRolls::new([99.9]), clock);

        assert_eq!(engine.win_rate(), 100.0);
        assert_eq!(engine.remaining_budget(), 0);

        engine.set_win_rate(-10.0);
        assert_eq!(engine.win_rate(), 0.0);
    }
}

// ============================================================================
// STORAGE TESTS - Durable records and sync lifecycle
// ============================================================================

mod storage_tests {
    use kiosk_core::storage::*;
    use kiosk_core::types::*;

    fn result(coin: CoinValue, outcome: Outcome) -> NewGameResult {
        NewGameResult {
            kiosk_id: "KIOSK-001".into(),
            coin_value: coin,
            quiz_passed: true,
            outcome,
            prize_value: outcome.is_win().then(|| coin.value() * 2),
        }
    }

    /// Marking synced twice, or marking unknown ids, changes nothing
    #[tokio::test]
    async fn test_mark_synced_is_idempotent() {
        let store = LocalStore::in_memory("KIOSK-001");
        let id = store
            .save_game_result(result(CoinValue::One, Outcome::Loss))
            .await
            .unwrap();

        store.mark_results_synced(&[id.clone()]).await.unwrap();
        store.mark_results_synced(&[id.clone()]).await.unwrap();
        assert_eq!(
            store.mark_results_synced(&["no-such-id".to_string()]).await.unwrap(),
            0
        );

        let counts = store.sync_counts(RecordTable::GameResults).await.unwrap();
        assert_eq!(counts.synced, 1);
        assert_eq!(counts.unsynced, 0);
        assert!(store.unsynced_results().await.unwrap().is_empty());
    }

    /// Five failures take a record out of the unsynced set for good
    #[tokio::test]
    async fn test_retry_ceiling_excludes_record() {
        let store = LocalStore::in_memory("KIOSK-001");
        let id = store
            .save_game_result(result(CoinValue::Two, Outcome::Win))
            .await
            .unwrap();

        for attempt in 1..=4 {
            store.mark_results_failed(&[id.clone()]).await.unwrap();
            let unsynced = store.unsynced_results().await.unwrap();
            assert_eq!(unsynced.len(), 1, "still retryable after {} failures", attempt);
            assert_eq!(unsynced[0].retry_count, attempt);
            assert_eq!(unsynced[0].sync_status, SyncStatus::Failed);
        }

        store.mark_results_failed(&[id.clone()]).await.unwrap();
        assert!(store.unsynced_results().await.unwrap().is_empty());

        let stuck = store.stuck_results().await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, id);
        assert_eq!(stuck[0].retry_count, 5);
    }

    /// Ad impressions carry kiosk, ad and duration and start pending
    #[tokio::test]
    async fn test_ad_impression_lifecycle() {
        let store = LocalStore::in_memory("KIOSK-042");
        let id = store.log_ad_impression("summer-promo", 15_000).await.unwrap();

        let pending = store.unsynced_impressions().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].kiosk_id, "KIOSK-042");
        assert_eq!(pending[0].ad_id, "summer-promo");
        assert_eq!(pending[0].duration, 15_000);
        assert_eq!(pending[0].sync_status, SyncStatus::Pending);

        store.mark_impressions_synced(&[id]).await.unwrap();
        assert!(store.unsynced_impressions().await.unwrap().is_empty());
    }

    /// Records and the counter survive a restart on the same file
    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.db");

        let first = LocalStore::open("KIOSK-001", &path);
        first
            .save_game_result(result(CoinValue::Five, Outcome::Win))
            .await
            .unwrap();
        first.set_inventory(10).await.unwrap();
        first.decrement_inventory().await.unwrap();
        first.close();

        let second = LocalStore::open("KIOSK-001", &path);
        let unsynced = second.unsynced_results().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].prize_value, Some(10));
        assert_eq!(second.get_inventory().await.unwrap(), Some(9));
    }

    /// The retention sweep only removes synced records
    #[tokio::test]
    async fn test_cleanup_keeps_unsynced_records() {
        let store = LocalStore::in_memory("KIOSK-001");
        let synced = store
            .save_game_result(result(CoinValue::One, Outcome::Loss))
            .await
            .unwrap();
        let failed = store
            .save_game_result(result(CoinValue::One, Outcome::Loss))
            .await
            .unwrap();
        store
            .save_game_result(result(CoinValue::One, Outcome::Loss))
            .await
            .unwrap();
        store.mark_results_synced(&[synced]).await.unwrap();
        store.mark_results_failed(&[failed]).await.unwrap();

        // Negative retention puts the cutoff in the future
        let report = store
            .cleanup_synced(chrono::Duration::seconds(-60))
            .await
            .unwrap();
        assert_eq!(report.results, 1);
        assert_eq!(report.impressions, 0);
        assert_eq!(store.unsynced_results().await.unwrap().len(), 2);

        let nothing = store.cleanup_synced(chrono::Duration::days(7)).await.unwrap();
        assert_eq!(nothing.total(), 0);
    }
}

// ============================================================================
// SYNC WORKER TESTS - Ticks against a scripted backend
// ============================================================================

mod sync_tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use super::support::{GatedBackend, ScriptedBackend};
    use kiosk_core::backend::HttpBackend;
    use kiosk_core::storage::{LocalStore, RecordTable};
    use kiosk_core::sync::*;
    use kiosk_core::types::*;

    async fn store_with_results(n: usize) -> (Arc<LocalStore>, Vec<String>) {
        let store = Arc::new(LocalStore::in_memory("KIOSK-001"));
        let mut ids = Vec::new();
        for _ in 0..n {
            let id = store
                .save_game_result(NewGameResult {
                    kiosk_id: "KIOSK-001".into(),
                    coin_value: CoinValue::One,
                    quiz_passed: true,
                    outcome: Outcome::Loss,
                    prize_value: None,
                })
                .await
                .unwrap();
            ids.push(id);
        }
        (store, ids)
    }

    fn worker(
        store: Arc<LocalStore>,
        backend: Arc<dyn kiosk_core::backend::SyncBackend>,
        online: bool,
    ) -> SyncWorker {
        SyncWorker::new(
            store,
            backend,
            Arc::new(ConnectivityFlag::new(online)),
            SyncWorkerConfig::default(),
        )
    }

    /// Successful tick marks the whole batch synced
    #[tokio::test]
    async fn test_successful_tick_marks_batch_synced() {
        let (store, ids) = store_with_results(3).await;
        store.log_ad_impression("ad-1", 10_000).await.unwrap();
        let backend = Arc::new(ScriptedBackend::succeeding());
        let worker = worker(store.clone(), backend.clone(), true);

        let report = worker.run_tick().await;
        assert_eq!(
            report,
            TickReport::Completed {
                results: BatchOutcome::Synced(3),
                impressions: BatchOutcome::Synced(1),
            }
        );
        assert_eq!(*backend.received_results.lock().unwrap(), ids);
        assert!(store.unsynced_results().await.unwrap().is_empty());
        assert!(store.unsynced_impressions().await.unwrap().is_empty());

        // Nothing left: no backend call at all
        let again = worker.run_tick().await;
        assert_eq!(
            again,
            TickReport::Completed {
                results: BatchOutcome::Empty,
                impressions: BatchOutcome::Empty,
            }
        );
        assert_eq!(backend.result_calls(), 1);
    }

    /// Failing tick marks every record failed with one retry and keeps it unsynced
    #[tokio::test]
    async fn test_failed_tick_marks_whole_batch_failed() {
        let (store, ids) = store_with_results(3).await;
        let backend = Arc::new(ScriptedBackend::failing());
        let worker = worker(store.clone(), backend.clone(), true);

        let report = worker.run_tick().await;
        assert!(report.is_failure());
        match report {
            TickReport::Completed { results, .. } => {
                assert!(matches!(results, BatchOutcome::Failed { count: 3, .. }));
            }
            other => panic!("expected a completed tick, got {:?}", other),
        }

        let unsynced = store.unsynced_results().await.unwrap();
        assert_eq!(unsynced.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), ids);
        for record in &unsynced {
            assert_eq!(record.sync_status, SyncStatus::Failed);
            assert_eq!(record.retry_count, 1);
        }
    }

    /// An explicit `success: false` is treated like an error
    #[tokio::test]
    async fn test_rejected_batch_counts_as_failure() {
        let (store, _) = store_with_results(1).await;
        let backend = Arc::new(ScriptedBackend::failing());
        backend.reject_instead_of_error.store(true, Ordering::SeqCst);
        let worker = worker(store.clone(), backend, true);

        match worker.run_tick().await {
            TickReport::Completed { results, .. } => match results {
                BatchOutcome::Failed { count, reason } => {
                    assert_eq!(count, 1);
                    assert!(reason.contains("rejected"));
                }
                other => panic!("expected failure, got {:?}", other),
            },
            other => panic!("expected a completed tick, got {:?}", other),
        }
        assert_eq!(store.unsynced_results().await.unwrap()[0].retry_count, 1);
    }

    /// Five failed ticks exhaust the whole batch; the sixth has nothing to send
    #[tokio::test]
    async fn test_five_failures_stop_retries() {
        let (store, ids) = store_with_results(3).await;
        let backend = Arc::new(ScriptedBackend::failing());
        let worker = worker(store.clone(), backend.clone(), true);

        for _ in 0..5 {
            worker.run_tick().await;
        }
        assert!(store.unsynced_results().await.unwrap().is_empty());
        let stuck: Vec<String> = store
            .stuck_results()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(stuck, ids);

        let report = worker.run_tick().await;
        assert_eq!(
            report,
            TickReport::Completed {
                results: BatchOutcome::Empty,
                impressions: BatchOutcome::Empty,
            }
        );
        assert_eq!(backend.result_calls(), 5);

        let counts = store.sync_counts(RecordTable::GameResults).await.unwrap();
        assert_eq!(counts.stuck, 3);
        assert_eq!(counts.unsynced, 0);
    }

    /// A backend nobody is listening on never costs a retry, even when the
    /// connectivity flag still says online
    #[tokio::test]
    async fn test_unreachable_backend_keeps_retry_count() {
        let (store, ids) = store_with_results(1).await;
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let backend = Arc::new(
            HttpBackend::new(&format!("http://127.0.0.1:{}", port), Duration::from_secs(2))
                .unwrap(),
        );
        let worker = worker(store.clone(), backend, true);

        for _ in 0..5 {
            match worker.run_tick().await {
                TickReport::Completed { results, .. } => {
                    assert_eq!(results, BatchOutcome::Unreachable(1));
                }
                other => panic!("expected a completed tick, got {:?}", other),
            }
        }

        let pending = store.unsynced_results().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[0]);
        assert_eq!(pending[0].retry_count, 0);
        assert_eq!(pending[0].sync_status, SyncStatus::Pending);
        assert!(store.stuck_results().await.unwrap().is_empty());
        assert!(!is_reachable(&format!("127.0.0.1:{}", port), Duration::from_secs(1)).await);
    }

    /// Categories are independent: a failing ad batch leaves results synced
    #[tokio::test]
    async fn test_categories_settle_independently() {
        let (store, _) = store_with_results(2).await;
        store.log_ad_impression("ad-1", 5_000).await.unwrap();
        let backend = Arc::new(ScriptedBackend::succeeding());
        backend.impressions_ok.store(false, Ordering::SeqCst);
        let worker = worker(store.clone(), backend, true);

        match worker.run_tick().await {
            TickReport::Completed { results, impressions } => {
                assert_eq!(results, BatchOutcome::Synced(2));
                assert!(matches!(impressions, BatchOutcome::Failed { count: 1, .. }));
            }
            other => panic!("expected a completed tick, got {:?}", other),
        }
        assert!(store.unsynced_results().await.unwrap().is_empty());
        assert_eq!(store.unsynced_impressions().await.unwrap()[0].retry_count, 1);
    }

    /// Offline tick touches neither the backend nor the records
    #[tokio::test]
    async fn test_offline_tick_is_noop() {
        let (store, _) = store_with_results(2).await;
        let backend = Arc::new(ScriptedBackend::succeeding());
        let worker = worker(store.clone(), backend.clone(), false);

        assert_eq!(worker.run_tick().await, TickReport::Skipped(SkipReason::Offline));
        assert_eq!(backend.result_calls(), 0);
        assert_eq!(backend.impression_calls(), 0);

        for record in store.unsynced_results().await.unwrap() {
            assert_eq!(record.sync_status, SyncStatus::Pending);
            assert_eq!(record.retry_count, 0);
        }
    }

    /// Going back online lets the next tick through
    #[tokio::test]
    async fn test_tick_after_reconnect_syncs() {
        let (store, _) = store_with_results(1).await;
        let backend = Arc::new(ScriptedBackend::succeeding());
        let connectivity = Arc::new(ConnectivityFlag::new(false));
        let worker = SyncWorker::new(
            store.clone(),
            backend,
            connectivity.clone(),
            SyncWorkerConfig::default(),
        );

        assert!(matches!(worker.run_tick().await, TickReport::Skipped(_)));
        connectivity.set_online(true);
        assert!(!worker.run_tick().await.is_failure());
        assert!(store.unsynced_results().await.unwrap().is_empty());
    }

    /// A tick arriving while another is in flight is dropped
    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let (store, _) = store_with_results(1).await;
        let backend = Arc::new(GatedBackend::default());
        let worker = Arc::new(worker(store.clone(), backend.clone(), true));

        let first = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run_tick().await })
        };
        backend.entered.notified().await;

        assert_eq!(worker.status(), SyncState::Syncing);
        assert_eq!(worker.run_tick().await, TickReport::Skipped(SkipReason::InProgress));

        backend.release.notify_one();
        let report = first.await.unwrap();
        assert!(!report.is_failure());
        assert_eq!(worker.status(), SyncState::Idle);
        assert!(store.unsynced_results().await.unwrap().is_empty());
    }

    /// start() ticks immediately and is idempotent; stop() ends the loop
    #[tokio::test]
    async fn test_start_runs_first_tick_immediately() {
        let (store, _) = store_with_results(1).await;
        let backend = Arc::new(ScriptedBackend::succeeding());
        let worker = Arc::new(worker(store.clone(), backend.clone(), true));

        worker.start();
        worker.start();
        assert!(worker.is_running());

        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.result_calls() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first tick should run without waiting a full interval");

        worker.stop();
        assert!(!worker.is_running());
        assert_eq!(backend.result_calls(), 1);
        worker.stop();
    }
}

// ============================================================================
// KIOSK TESTS - Play flow, restore and remote config
// ============================================================================

mod kiosk_tests {
    use std::sync::Arc;

    use super::support::{day, ScriptedBackend};
    use kiosk_core::engine::{ManualClock, OutcomeEngine, ScriptedRolls};
    use kiosk_core::kiosk::Kiosk;
    use kiosk_core::storage::LocalStore;
    use kiosk_core::types::*;

    fn config(win_rate: f64, daily_budget: i64) -> KioskConfig {
        KioskConfig {
            win_rate,
            daily_budget,
            language: Language::Nl,
        }
    }

    fn engine(rolls: Vec<f64>, clock: &ManualClock) -> OutcomeEngine {
        // Initial settings are overridden by the config on restore
        OutcomeEngine::with_sources(0.0, 0, ScriptedRolls::new(rolls), clock.clone())
    }

    fn store(clock: &ManualClock) -> Arc<LocalStore> {
        Arc::new(LocalStore::in_memory("KIOSK-001").with_clock(clock.clone()))
    }

    /// A win records the prize, pays double and consumes persisted budget
    #[tokio::test]
    async fn test_play_win_then_loss() {
        let clock = ManualClock::new(day(2026, 6, 1));
        let store = store(&clock);
        let kiosk = Kiosk::restore(store.clone(), engine(vec![10.0, 99.0], &clock), config(30.0, 50))
            .await
            .unwrap();

        let win = kiosk.play(CoinValue::Two).await.unwrap();
        assert_eq!(win.outcome, Outcome::Win);
        let prize = win.prize.clone().unwrap();
        assert_eq!(prize.value, 4);
        assert_eq!(prize.label(kiosk.language()), "Waardebon 4€");
        assert_eq!(win.remaining_budget, 49);

        let loss = kiosk.play(CoinValue::Two).await.unwrap();
        assert_eq!(loss.outcome, Outcome::Loss);
        assert!(loss.prize.is_none());

        let records = store.unsynced_results().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, win.record_id);
        assert_eq!(records[0].prize_value, Some(4));
        assert!(records[0].quiz_passed);
        assert_eq!(records[1].prize_value, None);
        assert_eq!(store.get_inventory().await.unwrap(), Some(49));
    }

    /// A restart on the same day resumes the remaining budget
    #[tokio::test]
    async fn test_restore_resumes_same_day_budget() {
        let clock = ManualClock::new(day(2026, 6, 1));
        let store = store(&clock);

        let kiosk = Kiosk::restore(store.clone(), engine(vec![0.0], &clock), config(100.0, 3))
            .await
            .unwrap();
        kiosk.play(CoinValue::One).await.unwrap();
        kiosk.play(CoinValue::One).await.unwrap();
        drop(kiosk);

        let restarted = Kiosk::restore(store.clone(), engine(vec![0.0], &clock), config(100.0, 3))
            .await
            .unwrap();
        assert_eq!(restarted.remaining_budget(), 1);

        clock.advance_days(1);
        let next_day = Kiosk::restore(store, engine(vec![0.0], &clock), config(100.0, 3))
            .await
            .unwrap();
        assert_eq!(next_day.remaining_budget(), 3);
    }

    /// Re-applying the same config keeps today's spent wins spent
    #[tokio::test]
    async fn test_apply_config_resets_only_on_budget_change() {
        let clock = ManualClock::new(day(2026, 6, 1));
        let store = store(&clock);
        let kiosk = Kiosk::restore(store.clone(), engine(vec![0.0], &clock), config(100.0, 5))
            .await
            .unwrap();
        kiosk.play(CoinValue::Five).await.unwrap();

        kiosk.apply_config(config(100.0, 5)).await.unwrap();
        assert_eq!(kiosk.remaining_budget(), 4);

        kiosk.apply_config(config(100.0, 8)).await.unwrap();
        assert_eq!(kiosk.remaining_budget(), 8);
        assert_eq!(store.get_inventory().await.unwrap(), Some(8));
    }

    /// The cached remote config beats the fallback on the next start
    #[tokio::test]
    async fn test_refresh_config_is_cached_for_restart() {
        let clock = ManualClock::new(day(2026, 6, 1));
        let store = store(&clock);
        let backend = ScriptedBackend::succeeding();
        *backend.config.lock().unwrap() = Some(KioskConfig {
            win_rate: 45.0,
            daily_budget: 20,
            language: Language::Fr,
        });

        let kiosk = Kiosk::restore(store.clone(), engine(vec![99.0], &clock), config(30.0, 50))
            .await
            .unwrap();
        assert!(kiosk.refresh_config(&backend).await.unwrap());
        assert_eq!(kiosk.remaining_budget(), 20);
        drop(kiosk);

        let restarted = Kiosk::restore(store, engine(vec![99.0], &clock), config(30.0, 50))
            .await
            .unwrap();
        assert_eq!(restarted.config().win_rate, 45.0);
        assert_eq!(restarted.language(), Language::Fr);
        assert_eq!(restarted.remaining_budget(), 20);
    }

    /// Unknown kiosk on the backend leaves the config untouched
    #[tokio::test]
    async fn test_refresh_without_remote_config() {
        let clock = ManualClock::new(day(2026, 6, 1));
        let kiosk = Kiosk::restore(store(&clock), engine(vec![99.0], &clock), config(30.0, 50))
            .await
            .unwrap();

        assert!(!kiosk.refresh_config(&ScriptedBackend::succeeding()).await.unwrap());
        assert_eq!(kiosk.config(), config(30.0, 50));
    }
}
