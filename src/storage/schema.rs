//! Database schema creation.

use rusqlite::{Connection, Result};

/// Create all database tables and indexes. Safe to run on every open.
pub fn create_tables(conn: &Connection) -> Result<()> {
    // WAL keeps a crash mid-write from tearing committed rows
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    // Inventory: one daily budget counter per kiosk per local day
    conn.execute(
        "CREATE TABLE IF NOT EXISTS inventory (
            kiosk_id TEXT NOT NULL,
            date TEXT NOT NULL,
            initial_budget INTEGER NOT NULL,
            remaining_budget INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            PRIMARY KEY (kiosk_id, date)
        )",
        [],
    )?;

    // Game results: seq preserves insertion order for deterministic batches
    conn.execute(
        "CREATE TABLE IF NOT EXISTS game_results (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            kiosk_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            coin_value INTEGER NOT NULL,
            quiz_passed INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            prize_value INTEGER,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ad_impressions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            kiosk_id TEXT NOT NULL,
            ad_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            duration INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // Config cache: JSON values from the remote-config channel
    conn.execute(
        "CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Indexes for the sync queries and the retention sweep
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_status ON game_results(sync_status, retry_count)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_time ON game_results(timestamp)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_impressions_status ON ad_impressions(sync_status, retry_count)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_impressions_time ON ad_impressions(timestamp)",
        [],
    )?;

    Ok(())
}
