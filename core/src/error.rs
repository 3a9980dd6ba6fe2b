use crate::pipeline::Stage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record {record} at stage '{stage}': field '{field}' {reason}")]
    InvalidRecord {
        stage:  Stage,
        field:  &'static str,
        record: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stage '{stage}' received an empty training set")]
    EmptyTrainingSet { stage: Stage },

    #[error("Feature width mismatch: model expects {expected}, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("Run cancelled before stage '{stage}'")]
    Cancelled { stage: Stage },

    #[error("Run '{run_id}' has no artifact for stage '{stage}'")]
    MissingArtifact { run_id: String, stage: Stage },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type RiskResult<T> = Result<T, RiskError>;
