//! Core type definitions shared by the outcome engine, local store and sync worker.
//!
//! Records are serialized camelCase because that is the shape the remote
//! backend expects in sync batches.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds.
#[inline]
pub fn now_millis() -> EpochMillis {
    chrono::Utc::now().timestamp_millis()
}

// === Play Types ===

/// Coin denominations accepted by the coin acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CoinValue {
    One,
    Two,
    Five,
}

impl CoinValue {
    pub fn value(self) -> u32 {
        match self {
            CoinValue::One => 1,
            CoinValue::Two => 2,
            CoinValue::Five => 5,
        }
    }

    /// Map a coin-acceptor key press ('1', '2' or '5') to a coin.
    ///
    /// The acceptor is wired as a keyboard; any other key is not a coin.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            '1' => Some(CoinValue::One),
            '2' => Some(CoinValue::Two),
            '5' => Some(CoinValue::Five),
            _ => None,
        }
    }
}

impl TryFrom<u8> for CoinValue {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CoinValue::One),
            2 => Ok(CoinValue::Two),
            5 => Ok(CoinValue::Five),
            other => Err(format!("unsupported coin value: {}", other)),
        }
    }
}

impl From<CoinValue> for u8 {
    fn from(coin: CoinValue) -> Self {
        coin.value() as u8
    }
}

impl std::fmt::Display for CoinValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Result of a single paid play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "loss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win" => Some(Outcome::Win),
            "loss" => Some(Outcome::Loss),
            _ => None,
        }
    }

    pub fn is_win(self) -> bool {
        self == Outcome::Win
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === Sync Lifecycle ===

/// Lifecycle state of a locally persisted record awaiting backend confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === Records ===

/// A completed game, persisted locally until the backend confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResultRecord {
    pub id: String,
    pub kiosk_id: String,
    pub timestamp: EpochMillis,
    pub coin_value: CoinValue,
    pub quiz_passed: bool,
    pub outcome: Outcome,
    /// Present iff `outcome` is a win
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize_value: Option<u32>,
    pub sync_status: SyncStatus,
    pub retry_count: u32,
}

/// Fields supplied by the caller when a game completes.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGameResult {
    pub kiosk_id: String,
    pub coin_value: CoinValue,
    pub quiz_passed: bool,
    pub outcome: Outcome,
    pub prize_value: Option<u32>,
}

/// One ad rotation shown on the idle screen. Counts views, never budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdImpressionRecord {
    pub id: String,
    pub kiosk_id: String,
    pub ad_id: String,
    pub timestamp: EpochMillis,
    /// Milliseconds the ad was on screen
    pub duration: u64,
    pub sync_status: SyncStatus,
    pub retry_count: u32,
}

/// Per-kiosk, per-local-day win budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryCounter {
    pub kiosk_id: String,
    /// Local calendar day, serialized as YYYY-MM-DD
    pub date: NaiveDate,
    pub initial_budget: u32,
    pub remaining_budget: u32,
    pub last_updated: EpochMillis,
}

/// Record counts per lifecycle bucket for one record category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    /// Pending, plus failed with retries left
    pub unsynced: u64,
    /// Failed with retries left
    pub failed: u64,
    /// Failed at or above the retry ceiling
    pub stuck: u64,
    pub synced: u64,
}

impl std::fmt::Display for SyncCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsynced={} (failed={}) stuck={} synced={}",
            self.unsynced, self.failed, self.stuck, self.synced
        )
    }
}

// === Remote Config ===

/// Display language of the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Fr,
    Nl,
}

impl Language {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fr" => Some(Language::Fr),
            "nl" => Some(Language::Nl),
            _ => None,
        }
    }
}

/// Per-kiosk tunables delivered by the remote-config channel.
///
/// Values are taken as sent; the engine clamps them when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KioskConfig {
    /// Percentage chance of a win, 0-100
    pub win_rate: f64,
    /// Wins allowed per local calendar day
    pub daily_budget: i64,
    pub language: Language,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            win_rate: 30.0,
            daily_budget: 50,
            language: Language::Fr,
        }
    }
}
