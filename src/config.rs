//! System configuration constants and environment variable parsing.
//!
//! Tunables that differ per kiosk come from the environment (optionally via a
//! `.env` file loaded by the binary); everything else is a constant here.

use std::path::PathBuf;

use crate::types::{KioskConfig, Language};

/// Sync tick period (seconds)
pub const SYNC_INTERVAL_SECS: u64 = 30;

/// Upper bound for a single backend call (seconds)
pub const SYNC_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Failed records at or above this retry count are no longer retried
pub const MAX_SYNC_RETRIES: u32 = 5;

/// Synced records older than this are removed by the retention sweep (days)
pub const RETENTION_DAYS: i64 = 7;

/// How often the periodic loop runs the retention sweep (seconds)
pub const CLEANUP_INTERVAL_SECS: u64 = 60 * 60;

/// Budget seeded into a fresh store before any remote config arrives
pub const DEFAULT_INVENTORY: u32 = 100;

/// Prize issued on a win is worth this multiple of the coin inserted
pub const PRIZE_MULTIPLIER: u32 = 2;

/// Prize vouchers expire this long after issue (hours)
pub const PRIZE_EXPIRY_HOURS: i64 = 24;

/// Config cache key holding the last remote config seen
pub const KIOSK_CONFIG_KEY: &str = "kiosk_config";

/// Heartbeat log interval for the daemon (seconds)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Per-record sync logging (set SYNC_DEBUG=1 to enable)
///
/// When enabled, every batch logs the ids it uploads and how they were marked.
pub fn sync_debug_enabled() -> bool {
    static CACHED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *CACHED.get_or_init(|| env_flag("SYNC_DEBUG", false))
}

pub(crate) fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Kiosk identity, storage location and the fallback remote config.
#[derive(Debug, Clone)]
pub struct KioskSettings {
    pub kiosk_id: String,
    pub db_path: PathBuf,
    /// Base URL of the backend; `None` runs fully offline
    pub backend_url: Option<String>,
    /// Used until a remote config has been fetched or cached
    pub default_config: KioskConfig,
}

impl KioskSettings {
    pub fn from_env() -> Self {
        let defaults = KioskConfig::default();

        Self {
            kiosk_id: std::env::var("KIOSK_ID").unwrap_or_else(|_| "KIOSK-001".to_string()),
            db_path: std::env::var("KIOSK_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("kiosk.db")),
            backend_url: std::env::var("KIOSK_BACKEND_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            default_config: KioskConfig {
                win_rate: env_parse("KIOSK_WIN_RATE", defaults.win_rate),
                daily_budget: env_parse("KIOSK_DAILY_BUDGET", defaults.daily_budget),
                language: std::env::var("KIOSK_LANGUAGE")
                    .ok()
                    .and_then(|v| Language::parse(&v))
                    .unwrap_or(defaults.language),
            },
        }
    }
}
