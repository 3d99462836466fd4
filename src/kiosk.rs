//! Kiosk coordinator: wires the outcome engine to the local store.
//!
//! The shell constructs one [`Kiosk`] per terminal and drives it on coin
//! insertion. The engine decides, the store records, and the persisted
//! inventory counter mirrors the engine's budget so a restart resumes the
//! same day where it left off.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, SyncBackend};
use crate::config::{KIOSK_CONFIG_KEY, PRIZE_EXPIRY_HOURS, PRIZE_MULTIPLIER};
use crate::engine::{clamp_budget, OutcomeEngine};
use crate::storage::{LocalStore, StoreError};
use crate::types::{
    now_millis, CoinValue, EpochMillis, KioskConfig, Language, NewGameResult, Outcome,
};

#[derive(Debug, thiserror::Error)]
pub enum KioskError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Voucher issued on a win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prize {
    pub id: String,
    pub value: u32,
    pub issued_at: EpochMillis,
    pub expires_at: EpochMillis,
}

impl Prize {
    pub fn issue(coin: CoinValue, now: EpochMillis) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            value: coin.value() * PRIZE_MULTIPLIER,
            issued_at: now,
            expires_at: now + PRIZE_EXPIRY_HOURS * 60 * 60 * 1000,
        }
    }

    pub fn label(&self, language: Language) -> String {
        match language {
            Language::Fr => format!("Bon de réduction {}€", self.value),
            Language::Nl => format!("Waardebon {}€", self.value),
        }
    }

    pub fn is_expired(&self, now: EpochMillis) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayResult {
    pub record_id: String,
    pub outcome: Outcome,
    pub prize: Option<Prize>,
    /// Wins left today after this play
    pub remaining_budget: u32,
}

pub struct Kiosk {
    store: Arc<LocalStore>,
    engine: Mutex<OutcomeEngine>,
    config: Mutex<KioskConfig>,
}

impl Kiosk {
    /// Bring a kiosk up from whatever the store holds.
    ///
    /// The cached remote config wins over `fallback`. Today's counter restores
    /// the engine's remaining budget; if its initial budget disagrees with the
    /// active config, the config's budget is applied and persisted.
    pub async fn restore(
        store: Arc<LocalStore>,
        mut engine: OutcomeEngine,
        fallback: KioskConfig,
    ) -> Result<Self, StoreError> {
        store.init().await?;

        let config = match store.get_config::<KioskConfig>(KIOSK_CONFIG_KEY).await {
            Ok(Some(cached)) => {
                info!("[KIOSK] Using cached remote config");
                cached
            }
            Ok(None) => fallback,
            Err(StoreError::ConfigValue { key, source }) => {
                warn!("[KIOSK] Ignoring unreadable cached config '{}': {}", key, source);
                fallback
            }
            Err(e) => return Err(e),
        };

        engine.set_win_rate(config.win_rate);
        if let Some(counter) = store.current_counter().await? {
            engine.restore(&counter);
        }

        let budget = clamp_budget(config.daily_budget);
        if budget != engine.initial_budget() {
            engine.set_budget(config.daily_budget);
            store.set_inventory(budget).await?;
        }

        let remaining = engine.remaining_budget();
        info!(
            "[KIOSK] {} ready: win rate {:.1}%, budget {}/{}, language {:?}",
            store.kiosk_id(),
            engine.win_rate(),
            remaining,
            engine.initial_budget(),
            config.language
        );

        Ok(Self {
            store,
            engine: Mutex::new(engine),
            config: Mutex::new(config),
        })
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    fn engine(&self) -> MutexGuard<'_, OutcomeEngine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> KioskConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn language(&self) -> Language {
        self.config().language
    }

    pub fn remaining_budget(&self) -> u32 {
        self.engine().remaining_budget()
    }

    /// Resolve one paid play and record it.
    pub async fn play(&self, coin: CoinValue) -> Result<PlayResult, StoreError> {
        let (outcome, mut remaining_budget) = {
            let mut engine = self.engine();
            let outcome = engine.determine_outcome();
            (outcome, engine.remaining_budget())
        };

        let prize = outcome.is_win().then(|| Prize::issue(coin, now_millis()));
        let record_id = self
            .store
            .save_game_result(NewGameResult {
                kiosk_id: self.store.kiosk_id().to_string(),
                coin_value: coin,
                quiz_passed: true,
                outcome,
                prize_value: prize.as_ref().map(|p| p.value),
            })
            .await?;

        if let Some(prize) = &prize {
            // The win is already recorded; a failed decrement must not lose the prize.
            let persisted = self.store.decrement_inventory().await;
            remaining_budget = reconcile_remaining(remaining_budget, persisted);
            info!(
                "[KIOSK] WIN with {} coin: prize {} ({}), {} wins left today",
                coin,
                prize.value,
                prize.label(self.language()),
                remaining_budget
            );
        } else {
            info!("[KIOSK] Loss with {} coin", coin);
        }

        Ok(PlayResult {
            record_id,
            outcome,
            prize,
            remaining_budget,
        })
    }

    pub async fn log_ad_impression(&self, ad_id: &str, duration_ms: u64) -> Result<String, StoreError> {
        self.store.log_ad_impression(ad_id, duration_ms).await
    }

    /// Operator override of the daily budget. Resets today's remaining budget.
    pub async fn set_budget(&self, budget: i64) -> Result<(), StoreError> {
        let applied = {
            let mut engine = self.engine();
            engine.set_budget(budget);
            engine.initial_budget()
        };
        self.store.set_inventory(applied).await
    }

    pub fn set_win_rate(&self, rate: f64) {
        self.engine().set_win_rate(rate);
    }

    /// Apply a remote config and cache it for the next start.
    ///
    /// The budget is only reset when it actually changed, so refreshing the
    /// same config does not hand out today's spent wins again.
    pub async fn apply_config(&self, config: KioskConfig) -> Result<(), StoreError> {
        let new_budget = {
            let mut engine = self.engine();
            engine.set_win_rate(config.win_rate);
            let budget = clamp_budget(config.daily_budget);
            if budget != engine.initial_budget() {
                engine.set_budget(config.daily_budget);
                Some(budget)
            } else {
                None
            }
        };

        if let Some(budget) = new_budget {
            self.store.set_inventory(budget).await?;
        }
        self.store.set_config(KIOSK_CONFIG_KEY, &config).await?;

        info!(
            "[KIOSK] Applied config: win rate {:.1}%, daily budget {}{}, language {:?}",
            config.win_rate,
            config.daily_budget,
            if new_budget.is_some() { " (reset)" } else { "" },
            config.language
        );
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }

    /// Pull this kiosk's config from the backend and apply it. Returns whether
    /// the backend had one.
    pub async fn refresh_config(&self, backend: &dyn SyncBackend) -> Result<bool, KioskError> {
        match backend.fetch_kiosk_config(self.store.kiosk_id()).await? {
            Some(config) => {
                self.apply_config(config).await?;
                Ok(true)
            }
            None => {
                warn!("[KIOSK] Backend has no config for {}", self.store.kiosk_id());
                Ok(false)
            }
        }
    }
}

impl std::fmt::Debug for Kiosk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kiosk")
            .field("kiosk_id", &self.store.kiosk_id())
            .field("engine", &*self.engine())
            .finish_non_exhaustive()
    }
}

/// Remaining wins to report after a win: the lower of engine and store.
fn reconcile_remaining(engine: u32, persisted: Result<u32, StoreError>) -> u32 {
    match persisted {
        Ok(persisted) if persisted != engine => {
            warn!(
                "[KIOSK] Budget drift: engine {} vs store {}, keeping the lower",
                engine, persisted
            );
            engine.min(persisted)
        }
        Ok(_) => engine,
        Err(e) => {
            error!("[KIOSK] Inventory decrement failed, store counter is behind: {}", e);
            engine
        }
    }
}
