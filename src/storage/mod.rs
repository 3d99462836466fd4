//! SQLite storage module for offline-first record persistence.
//!
//! Game results, ad impressions, the daily budget counter and the remote
//! config cache live in one SQLite database owned by a dedicated thread.
//! Async callers submit jobs over a channel and await a one-shot reply, so
//! blocking SQLite I/O never runs on the async runtime.

pub mod queries;
pub mod schema;
pub mod store;
pub mod writer;

pub use store::{CleanupReport, LocalStore};
pub use writer::{spawn_writer, DbTarget, StoreChannel};

/// Errors surfaced by the local store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("config value for '{key}' could not be (de)serialized: {source}")]
    ConfigValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },

    #[error("storage writer thread is not running")]
    WriterClosed,
}

/// The two append-only record tables that go through the sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTable {
    GameResults,
    AdImpressions,
}

impl RecordTable {
    pub fn table_name(self) -> &'static str {
        match self {
            RecordTable::GameResults => "game_results",
            RecordTable::AdImpressions => "ad_impressions",
        }
    }
}

impl std::fmt::Display for RecordTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordTable::GameResults => write!(f, "game results"),
            RecordTable::AdImpressions => write!(f, "ad impressions"),
        }
    }
}
