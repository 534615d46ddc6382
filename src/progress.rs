// src/progress.rs
//
// Resumable-run bookkeeping. Processed record ids land in their own SQLite
// file; a rerun over the same source skips them, so a run cancelled at a
// batch boundary picks up where it stopped without double-counting
// occurrences.

use std::collections::HashSet;
use std::path::Path;

use log::info;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

const CREATE_PROCESSED_SQL: &str = "
    CREATE TABLE IF NOT EXISTS processed_records (
        record_id TEXT PRIMARY KEY,
        batch_number INTEGER,
        processed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )";

const CREATE_BATCH_INDEX_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_batch_number
    ON processed_records (batch_number)";

const CREATE_METADATA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS progress_metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )";

/// Tracks which source records a previous run already consumed.
///
/// Lookups go through an in-memory id set loaded at open; the table is the
/// durable side. At the expected cardinality (millions of short ids) this
/// stays comfortably in memory and keeps the per-record check off the disk.
pub struct ProgressTracker {
    conn: Connection,
    seen: HashSet<String>,
}

impl ProgressTracker {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut tracker = ProgressTracker {
            conn,
            seen: HashSet::new(),
        };
        tracker.create_schema()?;
        tracker.load_seen()?;
        Ok(tracker)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut tracker = ProgressTracker {
            conn,
            seen: HashSet::new(),
        };
        tracker.create_schema()?;
        Ok(tracker)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute(CREATE_PROCESSED_SQL, [])?;
        self.conn.execute(CREATE_BATCH_INDEX_SQL, [])?;
        self.conn.execute(CREATE_METADATA_SQL, [])?;
        Ok(())
    }

    fn load_seen(&mut self) -> Result<()> {
        let mut statement = self.conn.prepare("SELECT record_id FROM processed_records")?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            self.seen.insert(row.get(0)?);
        }
        if !self.seen.is_empty() {
            info!("resuming: {} records already processed", self.seen.len());
        }
        Ok(())
    }

    pub fn is_processed(&self, record_id: &str) -> bool {
        self.seen.contains(record_id)
    }

    /// Durably mark a whole batch in one transaction.
    pub fn mark_batch(&mut self, record_ids: &[String], batch_number: usize) -> Result<()> {
        if record_ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut statement = tx.prepare(
                "INSERT OR IGNORE INTO processed_records (record_id, batch_number)
                 VALUES (?1, ?2)",
            )?;
            for record_id in record_ids {
                statement.execute(params![record_id, batch_number as i64])?;
            }
        }
        tx.commit()?;
        for record_id in record_ids {
            self.seen.insert(record_id.clone());
        }
        Ok(())
    }

    pub fn total_processed(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM processed_records", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    pub fn latest_batch_number(&self) -> Result<usize> {
        let latest: Option<i64> = self.conn.query_row(
            "SELECT MAX(batch_number) FROM processed_records",
            [],
            |row| row.get(0),
        )?;
        Ok(latest.unwrap_or(0) as usize)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO progress_metadata (key, value, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM progress_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Forget everything for a fresh start.
    pub fn reset(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM processed_records", [])?;
        self.conn.execute("DELETE FROM progress_metadata", [])?;
        self.seen.clear();
        Ok(())
    }
}
