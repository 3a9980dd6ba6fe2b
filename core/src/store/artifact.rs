//! Store methods for stage artifacts and the trained model.

use super::RiskStore;
use crate::{
    ensemble::ModelArtifact,
    error::{RiskError, RiskResult},
    pipeline::Stage,
};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

impl RiskStore {
    // ── Stage artifacts ───────────────────────────────────────────

    /// Persist a stage's output. Re-running a stage replaces it.
    pub fn save_artifact<T: Serialize>(&self, run_id: &str, stage: Stage, artifact: &T) -> RiskResult<()> {
        let payload = serde_json::to_string(artifact)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO stage_artifact (run_id, stage, payload) VALUES (?1, ?2, ?3)",
            params![run_id, stage.as_str(), payload],
        )?;
        Ok(())
    }

    pub fn load_artifact<T: DeserializeOwned>(&self, run_id: &str, stage: Stage) -> RiskResult<T> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM stage_artifact WHERE run_id = ?1 AND stage = ?2",
                params![run_id, stage.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let payload = payload.ok_or_else(|| RiskError::MissingArtifact {
            run_id: run_id.to_string(),
            stage,
        })?;
        Ok(serde_json::from_str(&payload)?)
    }

    /// Stages with a persisted artifact, in execution order.
    pub fn completed_stages(&self, run_id: &str) -> RiskResult<Vec<Stage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT stage FROM stage_artifact WHERE run_id = ?1")?;
        let names = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Stage::ALL
            .into_iter()
            .filter(|s| names.iter().any(|n| n == s.as_str()))
            .collect())
    }

    // ── Model artifact ────────────────────────────────────────────

    pub fn save_model(&self, run_id: &str, model: &ModelArtifact) -> RiskResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO model_artifact
                (run_id, version, schema_version, gates_passed, artifact_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                model.version.to_string(),
                model.schema_version,
                if model.quality.all_passed { 1 } else { 0 },
                model.to_json()?,
            ],
        )?;
        Ok(())
    }

    pub fn load_model(&self, run_id: &str) -> RiskResult<ModelArtifact> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT artifact_json FROM model_artifact WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or_else(|| RiskError::MissingArtifact {
            run_id: run_id.to_string(),
            stage: Stage::EnsembleTraining,
        })?;
        ModelArtifact::from_json(&json)
    }
}
