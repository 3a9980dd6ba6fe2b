//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The pipeline calls store methods; it never executes SQL directly.

use crate::{error::RiskResult, event::EventLogEntry, pipeline::Stage};
use rusqlite::{params, Connection, OptionalExtension};

mod alert;
mod artifact;
mod metrics;

pub struct RiskStore {
    conn: Connection,
}

impl RiskStore {
    pub fn open(path: &str) -> RiskResult<Self> {
        let conn = Connection::open(path)?;
        // WAL is ignored for :memory: databases.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> RiskResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> RiskResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_artifacts.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_alerts_metrics.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str) -> RiskResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version) VALUES (?1, ?2, ?3)",
            params![run_id, seed as i64, version],
        )?;
        Ok(())
    }

    pub fn run_exists(&self, run_id: &str) -> RiskResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM run WHERE run_id = ?1", params![run_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn complete_run(&self, run_id: &str) -> RiskResult<()> {
        self.conn.execute(
            "UPDATE run SET status = 'completed', failed_stage = NULL WHERE run_id = ?1",
            params![run_id],
        )?;
        Ok(())
    }

    /// Mark a run as stopped at `stage`. Completed stages keep their artifacts.
    pub fn fail_run(&self, run_id: &str, stage: Stage, status: &str) -> RiskResult<()> {
        self.conn.execute(
            "UPDATE run SET status = ?2, failed_stage = ?3 WHERE run_id = ?1",
            params![run_id, status, stage.as_str()],
        )?;
        Ok(())
    }

    /// Returns (status, failed_stage).
    pub fn run_status(&self, run_id: &str) -> RiskResult<Option<(String, Option<String>)>> {
        let status = self
            .conn
            .query_row(
                "SELECT status, failed_stage FROM run WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(status)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> RiskResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, seq, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.seq as i64,
                entry.stage,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> RiskResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY seq ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    seq: row.get::<_, i64>(2)? as u64,
                    stage: row.get(3)?,
                    event_type: row.get(4)?,
                    payload: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
