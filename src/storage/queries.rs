//! Synchronous SQL run on the writer thread.
//!
//! Every mutation goes through a transaction so a crash mid-write leaves each
//! record either fully updated or untouched.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::{RecordTable, StoreError};
use crate::types::{
    AdImpressionRecord, CoinValue, EpochMillis, GameResultRecord, InventoryCounter,
    NewGameResult, Outcome, SyncCounts, SyncStatus,
};

// === Records ===

pub fn insert_game_result(
    conn: &mut Connection,
    id: &str,
    timestamp: EpochMillis,
    result: &NewGameResult,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO game_results (id, kiosk_id, timestamp, coin_value, quiz_passed, outcome, prize_value, sync_status, retry_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0)",
        params![
            id,
            result.kiosk_id,
            timestamp,
            result.coin_value.value(),
            result.quiz_passed,
            result.outcome.as_str(),
            result.prize_value,
        ],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn insert_ad_impression(
    conn: &mut Connection,
    id: &str,
    kiosk_id: &str,
    ad_id: &str,
    timestamp: EpochMillis,
    duration_ms: u64,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO ad_impressions (id, kiosk_id, ad_id, timestamp, duration, sync_status, retry_count)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0)",
        params![id, kiosk_id, ad_id, timestamp, duration_ms as i64],
    )?;
    tx.commit()?;
    Ok(())
}

/// Which slice of the sync lifecycle to select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    /// Pending, or failed with retries left
    Unsynced,
    /// Failed at or above the retry ceiling
    Stuck,
}

impl RecordFilter {
    fn where_clause(self) -> &'static str {
        match self {
            RecordFilter::Unsynced => {
                "sync_status = 'pending' OR (sync_status = 'failed' AND retry_count < ?1)"
            }
            RecordFilter::Stuck => "sync_status = 'failed' AND retry_count >= ?1",
        }
    }
}

pub fn select_game_results(
    conn: &Connection,
    filter: RecordFilter,
    max_retries: u32,
) -> Result<Vec<GameResultRecord>, StoreError> {
    let sql = format!(
        "SELECT id, kiosk_id, timestamp, coin_value, quiz_passed, outcome, prize_value, sync_status, retry_count
         FROM game_results WHERE {} ORDER BY seq",
        filter.where_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([max_retries], RawGameResult::from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

pub fn select_ad_impressions(
    conn: &Connection,
    filter: RecordFilter,
    max_retries: u32,
) -> Result<Vec<AdImpressionRecord>, StoreError> {
    let sql = format!(
        "SELECT id, kiosk_id, ad_id, timestamp, duration, sync_status, retry_count
         FROM ad_impressions WHERE {} ORDER BY seq",
        filter.where_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([max_retries], RawAdImpression::from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

/// Mark records synced. Unknown ids are skipped. Returns rows touched.
pub fn mark_synced(
    conn: &mut Connection,
    table: RecordTable,
    ids: &[String],
) -> Result<usize, StoreError> {
    let sql = format!(
        "UPDATE {} SET sync_status = 'synced' WHERE id = ?1",
        table.table_name()
    );
    update_each(conn, &sql, ids)
}

/// Mark records failed and bump their retry count. Synced records are
/// terminal and left alone. Returns rows touched.
pub fn mark_failed(
    conn: &mut Connection,
    table: RecordTable,
    ids: &[String],
) -> Result<usize, StoreError> {
    let sql = format!(
        "UPDATE {} SET sync_status = 'failed', retry_count = retry_count + 1
         WHERE id = ?1 AND sync_status != 'synced'",
        table.table_name()
    );
    update_each(conn, &sql, ids)
}

fn update_each(conn: &mut Connection, sql: &str, ids: &[String]) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let mut touched = 0;
    {
        let mut stmt = tx.prepare(sql)?;
        for id in ids {
            touched += stmt.execute([id])?;
        }
    }
    tx.commit()?;
    Ok(touched)
}

pub fn count_by_status(
    conn: &Connection,
    table: RecordTable,
    max_retries: u32,
) -> Result<SyncCounts, StoreError> {
    let sql = format!(
        "SELECT
            COALESCE(SUM(CASE WHEN sync_status = 'pending' OR (sync_status = 'failed' AND retry_count < ?1) THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN sync_status = 'failed' AND retry_count < ?1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN sync_status = 'failed' AND retry_count >= ?1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN sync_status = 'synced' THEN 1 ELSE 0 END), 0)
         FROM {}",
        table.table_name()
    );

    let counts = conn.query_row(&sql, [max_retries], |row| {
        Ok(SyncCounts {
            unsynced: row.get::<_, i64>(0)? as u64,
            failed: row.get::<_, i64>(1)? as u64,
            stuck: row.get::<_, i64>(2)? as u64,
            synced: row.get::<_, i64>(3)? as u64,
        })
    })?;
    Ok(counts)
}

/// Delete synced records created before `cutoff`. Returns rows deleted.
pub fn delete_synced_before(
    conn: &mut Connection,
    table: RecordTable,
    cutoff: EpochMillis,
) -> Result<usize, StoreError> {
    let tx = conn.transaction()?;
    let deleted = tx.execute(
        &format!(
            "DELETE FROM {} WHERE sync_status = 'synced' AND timestamp < ?1",
            table.table_name()
        ),
        [cutoff],
    )?;
    tx.commit()?;
    Ok(deleted)
}

struct RawGameResult {
    id: String,
    kiosk_id: String,
    timestamp: i64,
    coin_value: i64,
    quiz_passed: bool,
    outcome: String,
    prize_value: Option<i64>,
    sync_status: String,
    retry_count: i64,
}

impl RawGameResult {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kiosk_id: row.get(1)?,
            timestamp: row.get(2)?,
            coin_value: row.get(3)?,
            quiz_passed: row.get(4)?,
            outcome: row.get(5)?,
            prize_value: row.get(6)?,
            sync_status: row.get(7)?,
            retry_count: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<GameResultRecord, StoreError> {
        let corrupt = |detail: String| StoreError::CorruptRow {
            table: "game_results",
            detail,
        };

        let coin_value = u8::try_from(self.coin_value)
            .map_err(|_| self.coin_value.to_string())
            .and_then(CoinValue::try_from)
            .map_err(|e| corrupt(format!("{}: {}", self.id, e)))?;
        let outcome = Outcome::parse(&self.outcome)
            .ok_or_else(|| corrupt(format!("{}: outcome '{}'", self.id, self.outcome)))?;
        let sync_status = SyncStatus::parse(&self.sync_status)
            .ok_or_else(|| corrupt(format!("{}: sync_status '{}'", self.id, self.sync_status)))?;

        Ok(GameResultRecord {
            id: self.id,
            kiosk_id: self.kiosk_id,
            timestamp: self.timestamp,
            coin_value,
            quiz_passed: self.quiz_passed,
            outcome,
            prize_value: self.prize_value.map(|v| v.max(0) as u32),
            sync_status,
            retry_count: self.retry_count.max(0) as u32,
        })
    }
}

struct RawAdImpression {
    id: String,
    kiosk_id: String,
    ad_id: String,
    timestamp: i64,
    duration: i64,
    sync_status: String,
    retry_count: i64,
}

impl RawAdImpression {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kiosk_id: row.get(1)?,
            ad_id: row.get(2)?,
            timestamp: row.get(3)?,
            duration: row.get(4)?,
            sync_status: row.get(5)?,
            retry_count: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<AdImpressionRecord, StoreError> {
        let sync_status =
            SyncStatus::parse(&self.sync_status).ok_or_else(|| StoreError::CorruptRow {
                table: "ad_impressions",
                detail: format!("{}: sync_status '{}'", self.id, self.sync_status),
            })?;

        Ok(AdImpressionRecord {
            id: self.id,
            kiosk_id: self.kiosk_id,
            ad_id: self.ad_id,
            timestamp: self.timestamp,
            duration: self.duration.max(0) as u64,
            sync_status,
            retry_count: self.retry_count.max(0) as u32,
        })
    }
}

// === Inventory ===

fn select_counter(
    tx: &Transaction<'_>,
    kiosk_id: &str,
    date: Option<NaiveDate>,
) -> Result<Option<InventoryCounter>, StoreError> {
    let map_row = |row: &Row<'_>| -> rusqlite::Result<(String, i64, i64, i64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    };

    let raw = match date {
        Some(date) => tx
            .query_row(
                "SELECT date, initial_budget, remaining_budget, last_updated
                 FROM inventory WHERE kiosk_id = ?1 AND date = ?2",
                params![kiosk_id, date.to_string()],
                map_row,
            )
            .optional()?,
        None => tx
            .query_row(
                "SELECT date, initial_budget, remaining_budget, last_updated
                 FROM inventory WHERE kiosk_id = ?1 ORDER BY date DESC LIMIT 1",
                params![kiosk_id],
                map_row,
            )
            .optional()?,
    };

    let Some((date, initial, remaining, last_updated)) = raw else {
        return Ok(None);
    };

    let date = date
        .parse::<NaiveDate>()
        .map_err(|e| StoreError::CorruptRow {
            table: "inventory",
            detail: format!("{}/{}: {}", kiosk_id, date, e),
        })?;

    let initial_budget = initial.max(0) as u32;
    Ok(Some(InventoryCounter {
        kiosk_id: kiosk_id.to_string(),
        date,
        initial_budget,
        remaining_budget: (remaining.max(0) as u32).min(initial_budget),
        last_updated,
    }))
}

fn upsert_counter(tx: &Transaction<'_>, counter: &InventoryCounter) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO inventory (kiosk_id, date, initial_budget, remaining_budget, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(kiosk_id, date) DO UPDATE SET
            initial_budget = excluded.initial_budget,
            remaining_budget = excluded.remaining_budget,
            last_updated = excluded.last_updated",
        params![
            counter.kiosk_id,
            counter.date.to_string(),
            counter.initial_budget,
            counter.remaining_budget,
            counter.last_updated,
        ],
    )?;
    Ok(())
}

/// Today's counter. If only an older day exists, a fresh counter for today
/// is created from the latest initial budget. `None` if the kiosk has never
/// had a counter.
fn current_counter_tx(
    tx: &Transaction<'_>,
    kiosk_id: &str,
    today: NaiveDate,
    now: EpochMillis,
) -> Result<Option<InventoryCounter>, StoreError> {
    if let Some(counter) = select_counter(tx, kiosk_id, Some(today))? {
        return Ok(Some(counter));
    }

    let Some(latest) = select_counter(tx, kiosk_id, None)? else {
        return Ok(None);
    };

    let rolled = InventoryCounter {
        kiosk_id: kiosk_id.to_string(),
        date: today,
        initial_budget: latest.initial_budget,
        remaining_budget: latest.initial_budget,
        last_updated: now,
    };
    upsert_counter(tx, &rolled)?;
    Ok(Some(rolled))
}

pub fn current_counter(
    conn: &mut Connection,
    kiosk_id: &str,
    today: NaiveDate,
    now: EpochMillis,
) -> Result<Option<InventoryCounter>, StoreError> {
    let tx = conn.transaction()?;
    let counter = current_counter_tx(&tx, kiosk_id, today, now)?;
    tx.commit()?;
    Ok(counter)
}

/// Seed today's counter with `budget` unless the kiosk already has one.
/// Returns true if a counter was created.
pub fn seed_counter(
    conn: &mut Connection,
    kiosk_id: &str,
    today: NaiveDate,
    budget: u32,
    now: EpochMillis,
) -> Result<bool, StoreError> {
    let tx = conn.transaction()?;
    if select_counter(&tx, kiosk_id, None)?.is_some() {
        return Ok(false);
    }
    upsert_counter(
        &tx,
        &InventoryCounter {
            kiosk_id: kiosk_id.to_string(),
            date: today,
            initial_budget: budget,
            remaining_budget: budget,
            last_updated: now,
        },
    )?;
    tx.commit()?;
    Ok(true)
}

/// Replace today's counter with a full budget of `count`.
pub fn set_counter(
    conn: &mut Connection,
    kiosk_id: &str,
    today: NaiveDate,
    count: u32,
    now: EpochMillis,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    upsert_counter(
        &tx,
        &InventoryCounter {
            kiosk_id: kiosk_id.to_string(),
            date: today,
            initial_budget: count,
            remaining_budget: count,
            last_updated: now,
        },
    )?;
    tx.commit()?;
    Ok(())
}

/// Take one unit from today's counter, never going below zero. A kiosk with
/// no counter yet gets one seeded with `default_budget` first.
pub fn decrement_counter(
    conn: &mut Connection,
    kiosk_id: &str,
    today: NaiveDate,
    default_budget: u32,
    now: EpochMillis,
) -> Result<u32, StoreError> {
    let tx = conn.transaction()?;
    let mut counter = match current_counter_tx(&tx, kiosk_id, today, now)? {
        Some(counter) => counter,
        None => InventoryCounter {
            kiosk_id: kiosk_id.to_string(),
            date: today,
            initial_budget: default_budget,
            remaining_budget: default_budget,
            last_updated: now,
        },
    };

    counter.remaining_budget = counter.remaining_budget.saturating_sub(1);
    counter.last_updated = now;
    upsert_counter(&tx, &counter)?;
    tx.commit()?;
    Ok(counter.remaining_budget)
}

// === Config ===

pub fn select_config(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    let value = conn
        .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    Ok(value)
}

pub fn upsert_config(
    conn: &mut Connection,
    key: &str,
    json: &str,
    now: EpochMillis,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, json, now],
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::create_tables;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    #[test]
    fn test_counter_rolls_over_from_latest_day() {
        let mut conn = conn();
        set_counter(&mut conn, "K1", day(1), 10, 0).unwrap();
        decrement_counter(&mut conn, "K1", day(1), 100, 1).unwrap();

        let rolled = current_counter(&mut conn, "K1", day(3), 2).unwrap().unwrap();
        assert_eq!(rolled.date, day(3));
        assert_eq!(rolled.initial_budget, 10);
        assert_eq!(rolled.remaining_budget, 10);

        // The old day is left untouched
        let old = current_counter(&mut conn, "K1", day(1), 3).unwrap().unwrap();
        assert_eq!(old.remaining_budget, 9);
    }

    #[test]
    fn test_counters_are_per_kiosk() {
        let mut conn = conn();
        set_counter(&mut conn, "K1", day(1), 10, 0).unwrap();
        assert!(current_counter(&mut conn, "K2", day(1), 0).unwrap().is_none());
        assert!(seed_counter(&mut conn, "K2", day(1), 7, 0).unwrap());
        assert!(!seed_counter(&mut conn, "K2", day(1), 99, 0).unwrap());
        assert_eq!(
            current_counter(&mut conn, "K2", day(1), 0).unwrap().unwrap().remaining_budget,
            7
        );
    }

    #[test]
    fn test_count_by_status_buckets() {
        let mut conn = conn();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            insert_ad_impression(&mut conn, id, "K1", "ad-1", i as i64, 15_000).unwrap();
        }
        mark_synced(&mut conn, RecordTable::AdImpressions, &["a".to_string()]).unwrap();
        for _ in 0..5 {
            mark_failed(&mut conn, RecordTable::AdImpressions, &["b".to_string()]).unwrap();
        }
        mark_failed(&mut conn, RecordTable::AdImpressions, &["c".to_string()]).unwrap();

        let counts = count_by_status(&conn, RecordTable::AdImpressions, 5).unwrap();
        assert_eq!(
            counts,
            SyncCounts {
                unsynced: 1,
                failed: 1,
                stuck: 1,
                synced: 1
            }
        );
    }

    #[test]
    fn test_mark_failed_leaves_synced_records_alone() {
        let mut conn = conn();
        insert_ad_impression(&mut conn, "a", "K1", "ad-1", 0, 1_000).unwrap();
        mark_synced(&mut conn, RecordTable::AdImpressions, &["a".to_string()]).unwrap();

        let touched = mark_failed(&mut conn, RecordTable::AdImpressions, &["a".to_string()]).unwrap();
        assert_eq!(touched, 0);
        let counts = count_by_status(&conn, RecordTable::AdImpressions, 5).unwrap();
        assert_eq!(counts.synced, 1);
    }
}
