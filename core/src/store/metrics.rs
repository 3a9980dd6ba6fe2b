//! Store methods for the exposure metrics snapshot.

use super::RiskStore;
use crate::{error::RiskResult, exposure::Metrics};
use rusqlite::{params, OptionalExtension};

impl RiskStore {
    /// Overwrite the single current snapshot.
    pub fn save_metrics(&self, run_id: &str, metrics: &Metrics) -> RiskResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metrics_snapshot (id, run_id, metrics_json) VALUES (1, ?1, ?2)",
            params![run_id, serde_json::to_string(metrics)?],
        )?;
        Ok(())
    }

    /// Returns (run_id, metrics) of the current snapshot, if any.
    pub fn current_metrics(&self) -> RiskResult<Option<(String, Metrics)>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT run_id, metrics_json FROM metrics_snapshot WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((run_id, json)) => Ok(Some((run_id, serde_json::from_str(&json)?))),
            None => Ok(None),
        }
    }
}
