//! Backoff for the periodic sync loop.
//!
//! Counts consecutive failed ticks. Once the limit is reached the loop pauses
//! for a cooldown that doubles on every further failure, up to a cap. One
//! successful tick clears everything. Records are never touched here; the
//! retry ceiling on records is enforced by the store.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{env_flag, env_parse};

/// Backoff configuration from environment
#[derive(Debug, Clone)]
pub struct SyncBackoffConfig {
    /// Whether backoff is enabled
    pub enabled: bool,

    /// Consecutive failed ticks before pausing
    pub max_consecutive_failures: u32,

    /// First cooldown after the limit is hit (seconds)
    pub base_cooldown_secs: u64,

    /// Cooldown never grows beyond this (seconds)
    pub max_cooldown_secs: u64,
}

impl Default for SyncBackoffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_consecutive_failures: 3,
            base_cooldown_secs: 30,
            max_cooldown_secs: 15 * 60,
        }
    }
}

impl SyncBackoffConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            enabled: env_flag("SYNC_BACKOFF_ENABLED", defaults.enabled),
            max_consecutive_failures: env_parse(
                "SYNC_BACKOFF_MAX_FAILURES",
                defaults.max_consecutive_failures,
            )
            .max(1),
            base_cooldown_secs: env_parse("SYNC_BACKOFF_BASE_SECS", defaults.base_cooldown_secs),
            max_cooldown_secs: env_parse("SYNC_BACKOFF_MAX_SECS", defaults.max_cooldown_secs),
        }
    }

    /// Cooldown for the n-th consecutive pause (1-based).
    pub fn cooldown_for(&self, pauses: u32) -> Duration {
        let shift = pauses.saturating_sub(1).min(16);
        let secs = self
            .base_cooldown_secs
            .saturating_mul(1u64 << shift)
            .min(self.max_cooldown_secs);
        Duration::from_secs(secs)
    }
}

/// Backoff state shared by the sync loop.
pub struct SyncBackoff {
    config: SyncBackoffConfig,

    /// Whether periodic ticks are currently paused
    paused: AtomicBool,

    /// When periodic ticks may resume
    paused_until: RwLock<Option<Instant>>,

    consecutive_failures: AtomicU32,

    /// Pauses since the last success; drives the exponent
    pauses: AtomicU32,
}

impl SyncBackoff {
    pub fn new(config: SyncBackoffConfig) -> Self {
        info!(
            "[SYNC] Backoff: enabled={} after {} failures, cooldown {}s..{}s",
            config.enabled,
            config.max_consecutive_failures,
            config.base_cooldown_secs,
            config.max_cooldown_secs
        );

        Self {
            config,
            paused: AtomicBool::new(false),
            paused_until: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            pauses: AtomicU32::new(0),
        }
    }

    /// Whether the periodic loop may run a tick now.
    pub async fn should_attempt(&self) -> bool {
        self.should_attempt_at(Instant::now()).await
    }

    pub async fn should_attempt_at(&self, now: Instant) -> bool {
        if !self.config.enabled || !self.paused.load(Ordering::SeqCst) {
            return true;
        }

        match *self.paused_until.read().await {
            Some(until) => now >= until,
            None => true,
        }
    }

    pub async fn record_success(&self) {
        let was_paused = self.paused.swap(false, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.pauses.store(0, Ordering::SeqCst);
        *self.paused_until.write().await = None;

        if was_paused {
            info!("[SYNC] Backend reachable again, backoff cleared");
        }
    }

    pub async fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.config.enabled || failures < self.config.max_consecutive_failures {
            return;
        }

        let pauses = self.pauses.fetch_add(1, Ordering::SeqCst) + 1;
        let cooldown = self.config.cooldown_for(pauses);
        warn!(
            "[SYNC] {} consecutive failed ticks, pausing periodic sync for {}s",
            failures,
            cooldown.as_secs()
        );

        self.paused.store(true, Ordering::SeqCst);
        *self.paused_until.write().await = Some(Instant::now() + cooldown);
    }

    pub async fn status(&self) -> SyncBackoffStatus {
        let pauses = self.pauses.load(Ordering::SeqCst);
        let paused = self.paused.load(Ordering::SeqCst);

        SyncBackoffStatus {
            enabled: self.config.enabled,
            paused,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            cooldown: paused.then(|| self.config.cooldown_for(pauses)),
            remaining: self
                .paused_until
                .read()
                .await
                .map(|until| until.saturating_duration_since(Instant::now())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncBackoffStatus {
    pub enabled: bool,
    pub paused: bool,
    pub consecutive_failures: u32,
    pub cooldown: Option<Duration>,
    pub remaining: Option<Duration>,
}

impl std::fmt::Display for SyncBackoffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.enabled {
            return write!(f, "Backoff: DISABLED");
        }

        if self.paused {
            write!(f, "Backoff: PAUSED")?;
            if let Some(remaining) = self.remaining {
                write!(f, " ({}s left)", remaining.as_secs())?;
            }
            Ok(())
        } else {
            write!(f, "Backoff: OK ({} consecutive failures)", self.consecutive_failures)
        }
    }
}
