//! Store methods for generated alerts.

use super::RiskStore;
use crate::{alert::Alert, error::RiskResult};
use rusqlite::{params, Transaction};

impl RiskStore {
    /// Append alerts for a run in the given order.
    pub fn insert_alerts(&self, run_id: &str, alerts: &[Alert]) -> RiskResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::write_alerts(&tx, run_id, alerts)?;
        tx.commit()?;
        Ok(())
    }

    /// Replace a run's alerts so a re-run stage does not duplicate them.
    /// The delete and the inserts commit together.
    pub fn replace_alerts(&self, run_id: &str, alerts: &[Alert]) -> RiskResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM alert WHERE run_id = ?1", params![run_id])?;
        Self::write_alerts(&tx, run_id, alerts)?;
        tx.commit()?;
        Ok(())
    }

    fn write_alerts(tx: &Transaction<'_>, run_id: &str, alerts: &[Alert]) -> RiskResult<()> {
        let mut stmt = tx.prepare(
            "INSERT INTO alert (run_id, severity, alert_type, member_id, reason, action, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for a in alerts {
            stmt.execute(params![
                run_id,
                a.severity.as_str(),
                a.alert_type.as_str(),
                a.member_id,
                a.reason,
                a.action,
                a.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            ])?;
        }
        Ok(())
    }

    pub fn alert_count(&self, run_id: &str) -> RiskResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alert WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// (severity, alert_type, member_id) per alert, in insertion order.
    pub fn alert_summaries(&self, run_id: &str) -> RiskResult<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT severity, alert_type, member_id FROM alert
             WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
