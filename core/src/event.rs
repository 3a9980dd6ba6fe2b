//! The run event log.
//!
//! RULE: every stage boundary and every stage result is recorded as an
//! event. Two runs with the same seed and inputs must produce identical
//! logs, so payloads carry no wall-clock time and no unordered maps.

use crate::{pipeline::Stage, types::RunId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Run events ─────────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
    },
    RunCompleted {
        run_id: RunId,
    },

    // ── Stage results ──────────────────────────────
    RecordsValidated {
        accepted: usize,
        quarantined: usize,
        members: usize,
    },
    AnomaliesScored {
        records: usize,
        flagged: usize,
        farming_recall: Option<f64>,
    },
    RingsDetected {
        rings: usize,
        flagged_members: usize,
        cycling_recall: Option<f64>,
    },
    ModelTrained {
        version: Uuid,
        recall: f64,
        precision: f64,
        auc: Option<f64>,
        false_positive_rate: f64,
        gates_passed: bool,
    },
    AlertsGenerated {
        high: usize,
        medium: usize,
        low: usize,
    },
    ExposureComputed {
        total_annual_exposure: f64,
        abuse_rate: f64,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. } => "run_initialized",
            Self::StageStarted { .. } => "stage_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::RunCompleted { .. } => "run_completed",
            Self::RecordsValidated { .. } => "records_validated",
            Self::AnomaliesScored { .. } => "anomalies_scored",
            Self::RingsDetected { .. } => "rings_detected",
            Self::ModelTrained { .. } => "model_trained",
            Self::AlertsGenerated { .. } => "alerts_generated",
            Self::ExposureComputed { .. } => "exposure_computed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    /// Position in the run, starting at 0.
    pub seq: u64,
    pub stage: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized PipelineEvent
}
