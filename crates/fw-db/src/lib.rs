//! Work unit history storage.
//!
//! Persists terminal work units using `rusqlite` and answers
//! completed/failed counts per slot.
//!
//! # Thread Safety
//!
//! [`HistoryDatabase`] wraps a `rusqlite::Connection`, which is `Send` but
//! not `Sync`: an instance can move between threads but must not be shared
//! without external synchronization. Retrieval tasks therefore either own
//! their database handle or serialize access through a mutex.
//!
//! # Schema
//!
//! Timestamps are stored as TEXT in ISO 8601 (e.g. `2024-03-01T12:00:00Z`)
//! so lexicographic ordering matches chronological ordering. A unit's
//! natural identity (client, slot, queue index, project tuple, and
//! assignment time) carries a unique index; re-inserting the same unit is
//! a no-op rather than an error.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use uuid::Uuid;

use fw_core::correlate::WorkUnit;
use fw_core::types::SlotIdentifier;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct HistoryDatabase {
    conn: Connection,
}

/// One history row, built from a terminal [`WorkUnit`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnitRow {
    pub client: String,
    pub slot_id: u32,
    /// Canonical slot name (`client:NN`), the query key for counts.
    pub slot_name: String,
    pub queue_index: u32,
    pub project: u32,
    pub run: u32,
    pub clone: u32,
    pub generation: u32,
    /// Final result string (see `fw_core::line::UnitResult`).
    pub result: String,
    /// `completed` or `failed`.
    pub outcome: String,
    pub assigned: Option<String>,
    pub finished: Option<String>,
    pub frames_completed: u32,
    pub frame_time_secs: Option<i64>,
    pub core_version: Option<f64>,
    pub credit: f64,
}

impl WorkUnitRow {
    /// Builds a row from a terminal work unit.
    ///
    /// `finished` is the retrieval reference time: the log does not record
    /// an absolute completion stamp.
    #[must_use]
    pub fn from_unit(slot: &SlotIdentifier, unit: &WorkUnit, finished: DateTime<Utc>, credit: f64) -> Self {
        let outcome = if unit.result.is_completed() {
            "completed"
        } else {
            "failed"
        };
        let frame_time_secs = unit
            .last_frame()
            .and_then(|frame| frame.duration)
            .map(|d| d.num_seconds());
        Self {
            client: slot.client.to_string(),
            slot_id: slot.slot_id,
            slot_name: slot.name(),
            queue_index: unit.key.queue_index,
            project: unit.project.project,
            run: unit.project.run,
            clone: unit.project.clone,
            generation: unit.project.generation,
            result: unit.result.to_string(),
            outcome: outcome.to_string(),
            assigned: unit.assigned.map(format_timestamp),
            finished: Some(format_timestamp(finished)),
            frames_completed: unit.frames_complete(),
            frame_time_secs,
            core_version: unit.core_version,
            credit,
        }
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl HistoryDatabase {
    /// Opens a database at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the schema. Idempotent.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS work_unit_history (
                id TEXT PRIMARY KEY,
                client TEXT NOT NULL,
                slot_id INTEGER NOT NULL,
                slot_name TEXT NOT NULL,
                queue_index INTEGER NOT NULL,
                project INTEGER NOT NULL,
                run INTEGER NOT NULL,
                clone INTEGER NOT NULL,
                gen INTEGER NOT NULL,
                result TEXT NOT NULL,
                outcome TEXT NOT NULL,
                assigned TEXT,
                finished TEXT,
                frames_completed INTEGER NOT NULL DEFAULT 0,
                frame_time_secs INTEGER,
                core_version REAL,
                credit REAL NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_history_identity
                ON work_unit_history(client, slot_id, queue_index, project, run, clone, gen, IFNULL(assigned, ''));

            CREATE INDEX IF NOT EXISTS idx_history_slot_name ON work_unit_history(slot_name);
            CREATE INDEX IF NOT EXISTS idx_history_finished ON work_unit_history(finished);
            ",
        )?;
        Ok(())
    }

    /// Inserts one terminal work unit, ignoring duplicates by identity.
    ///
    /// Returns the number of rows affected (0 when the unit was already
    /// recorded).
    pub fn insert(&mut self, row: &WorkUnitRow) -> Result<usize, DbError> {
        let affected = self.conn.execute(
            "
            INSERT OR IGNORE INTO work_unit_history
            (id, client, slot_id, slot_name, queue_index, project, run, clone, gen,
             result, outcome, assigned, finished, frames_completed, frame_time_secs,
             core_version, credit)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                Uuid::new_v4().to_string(),
                row.client,
                row.slot_id,
                row.slot_name,
                row.queue_index,
                row.project,
                row.run,
                row.clone,
                row.generation,
                row.result,
                row.outcome,
                row.assigned,
                row.finished,
                row.frames_completed,
                row.frame_time_secs,
                row.core_version,
                row.credit,
            ],
        )?;
        if affected == 0 {
            tracing::debug!(
                slot_name = %row.slot_name,
                queue_index = row.queue_index,
                project = row.project,
                "history row already present, skipping"
            );
        }
        Ok(affected)
    }

    /// Counts completed units for a slot, optionally since a point in time.
    pub fn count_completed(
        &self,
        slot_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, DbError> {
        self.count_outcome(slot_name, "completed", since)
    }

    /// Counts failed units for a slot, optionally since a point in time.
    pub fn count_failed(
        &self,
        slot_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, DbError> {
        self.count_outcome(slot_name, "failed", since)
    }

    fn count_outcome(
        &self,
        slot_name: &str,
        outcome: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, DbError> {
        let count = match since {
            Some(since) => self
                .conn
                .query_row(
                    "
                    SELECT COUNT(*) FROM work_unit_history
                    WHERE slot_name = ? AND outcome = ? AND finished >= ?
                    ",
                    params![slot_name, outcome, format_timestamp(since)],
                    |row| row.get(0),
                )
                .optional()?,
            None => self
                .conn
                .query_row(
                    "
                    SELECT COUNT(*) FROM work_unit_history
                    WHERE slot_name = ? AND outcome = ?
                    ",
                    params![slot_name, outcome],
                    |row| row.get(0),
                )
                .optional()?,
        };
        Ok(count.unwrap_or(0))
    }

    /// Lists distinct slot names present in the history, ordered.
    pub fn slot_names(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT slot_name FROM work_unit_history ORDER BY slot_name ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}
