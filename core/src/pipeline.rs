//! The risk pipeline: one batch run over a Feature Store export.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Validate             (typed records, quarantine)
//!   2. AnomalyScoring       (anomaly flag per record)
//!   3. RingDetection        (network-risk flag per member)
//!   4. EnsembleTraining     (model artifact + hold-out quality)
//!   5. AlertGeneration      (alert feed)
//!   6. ExposureAggregation  (metrics snapshot)
//!
//! RULES:
//!   - Each stage's artifact is persisted before the next stage begins.
//!   - Cancellation is checked between stages, never inside one.
//!   - All randomness flows through the RngBank, one slot per stage.
//!   - Every stage boundary and result is recorded in the event log.

use crate::{
    alert::{Alert, Severity},
    anomaly::AnomalyScorer,
    config::RiskConfig,
    ensemble::{EnsembleClassifier, ModelArtifact, ScoredRecord},
    error::{RiskError, RiskResult},
    evaluation::{
        log_detector_recall, member_recall, members_with_fraud_type, CYCLING_FRAUD_TYPE,
        FARMING_FRAUD_TYPE,
    },
    event::{EventLogEntry, PipelineEvent},
    exposure::{ExposureAggregator, Metrics},
    record::{validate_members, validate_rows, FeatureRecord, FeatureStoreRow, Member, QuarantinedRow, ValidationPolicy},
    ring::{RingDetector, RingReport},
    rng::{RngBank, StageSlot},
    service::AlertService,
    store::RiskStore,
    types::{RunId, TransactionId},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    AnomalyScoring,
    RingDetection,
    EnsembleTraining,
    AlertGeneration,
    ExposureAggregation,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Validate,
        Stage::AnomalyScoring,
        Stage::RingDetection,
        Stage::EnsembleTraining,
        Stage::AlertGeneration,
        Stage::ExposureAggregation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::AnomalyScoring => "anomaly_scoring",
            Self::RingDetection => "ring_detection",
            Self::EnsembleTraining => "ensemble_training",
            Self::AlertGeneration => "alert_generation",
            Self::ExposureAggregation => "exposure_aggregation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Stage artifacts ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub accepted: usize,
    pub members: usize,
    pub quarantined: Vec<QuarantinedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub flagged: Vec<TransactionId>,
    pub farming_recall: Option<f64>,
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run_id: RunId,
    /// Validated records with anomaly and network flags written back.
    pub records: Vec<FeatureRecord>,
    pub quarantined: Vec<QuarantinedRow>,
    pub anomalies: usize,
    pub farming_recall: Option<f64>,
    pub rings: RingReport,
    pub cycling_recall: Option<f64>,
    pub artifact: ModelArtifact,
    /// Hold-out records scored by the trained model.
    pub test_results: Vec<ScoredRecord>,
    /// Feed built from the hold-out records only.
    pub alerts: Vec<Alert>,
    pub metrics: Metrics,
}

pub struct RiskPipeline<'a> {
    pub run_id: RunId,
    config: &'a RiskConfig,
    rng_bank: RngBank,
    store: RiskStore,
    cancel: CancelToken,
    policy: ValidationPolicy,
    on_stage_complete: Option<Box<dyn FnMut(Stage) + 'a>>,
    seq: u64,
    current: Stage,
}

impl<'a> RiskPipeline<'a> {
    pub fn new(run_id: RunId, config: &'a RiskConfig, store: RiskStore) -> Self {
        Self {
            rng_bank: RngBank::new(config.seed),
            config,
            store,
            cancel: CancelToken::new(),
            policy: ValidationPolicy::Quarantine,
            on_stage_complete: None,
            seq: 0,
            current: Stage::Validate,
            run_id,
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Called after each stage's artifact has been persisted.
    pub fn on_stage_complete(mut self, hook: impl FnMut(Stage) + 'a) -> Self {
        self.on_stage_complete = Some(Box::new(hook));
        self
    }

    pub fn store(&self) -> &RiskStore {
        &self.store
    }

    pub fn into_store(self) -> RiskStore {
        self.store
    }

    /// Persisted event log for this run, in order.
    pub fn events(&self) -> RiskResult<Vec<EventLogEntry>> {
        self.store.events_for_run(&self.run_id)
    }

    /// Run every stage in order. On failure the run is marked with the
    /// stage it stopped at; artifacts of completed stages stay in the store.
    pub fn run(&mut self, rows: Vec<FeatureStoreRow>, members: Vec<Member>) -> RiskResult<PipelineOutcome> {
        if !self.store.run_exists(&self.run_id)? {
            self.store
                .insert_run(&self.run_id, self.config.seed, env!("CARGO_PKG_VERSION"))?;
        }
        // A re-run of the same run id appends after its earlier events.
        self.seq = self.store.events_for_run(&self.run_id)?.len() as u64;
        log::info!("Run {} starting (seed {})", self.run_id, self.config.seed);

        match self.run_stages(rows, members) {
            Ok(outcome) => {
                self.store.complete_run(&self.run_id)?;
                log::info!("Run {} completed", self.run_id);
                Ok(outcome)
            }
            Err(e) => {
                let status = if matches!(e, RiskError::Cancelled { .. }) { "cancelled" } else { "failed" };
                log::warn!("Run {} {status} at stage {}: {e}", self.run_id, self.current);
                self.store.fail_run(&self.run_id, self.current, status)?;
                Err(e)
            }
        }
    }

    fn run_stages(&mut self, rows: Vec<FeatureStoreRow>, members: Vec<Member>) -> RiskResult<PipelineOutcome> {
        self.config.validate()?;
        self.emit(
            "pipeline",
            PipelineEvent::RunInitialized {
                run_id: self.run_id.clone(),
                seed: self.config.seed,
            },
        )?;

        let (mut records, quarantined) = self.validate(rows, &members)?;
        let (anomalies, farming_recall) = self.score_anomalies(&mut records)?;
        let (rings, cycling_recall) = self.detect_rings(&mut records, &members)?;
        let (artifact, test_results) = self.train_ensemble(&records)?;
        let held_out = held_out_records(&records, &test_results);
        let alerts = self.generate_alerts(&held_out, &members, &rings, &artifact)?;
        let metrics = self.aggregate_exposure(&records)?;

        self.emit("pipeline", PipelineEvent::RunCompleted { run_id: self.run_id.clone() })?;

        Ok(PipelineOutcome {
            run_id: self.run_id.clone(),
            records,
            quarantined,
            anomalies,
            farming_recall,
            rings,
            cycling_recall,
            artifact,
            test_results,
            alerts,
            metrics,
        })
    }

    // ── Stage bookkeeping ────────────────────────────────────────────────────

    fn emit(&mut self, stage: &str, event: PipelineEvent) -> RiskResult<()> {
        let entry = EventLogEntry {
            id: None,
            run_id: self.run_id.clone(),
            seq: self.seq,
            stage: stage.to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(&event)?,
        };
        self.store.append_event(&entry)?;
        self.seq += 1;
        Ok(())
    }

    fn begin(&mut self, stage: Stage) -> RiskResult<()> {
        self.current = stage;
        if self.cancel.is_cancelled() {
            return Err(RiskError::Cancelled { stage });
        }
        log::debug!("Stage {stage} started");
        self.emit(stage.as_str(), PipelineEvent::StageStarted { stage })
    }

    fn finish(&mut self, stage: Stage, result: PipelineEvent) -> RiskResult<()> {
        self.emit(stage.as_str(), result)?;
        self.emit(stage.as_str(), PipelineEvent::StageCompleted { stage })?;
        if let Some(hook) = self.on_stage_complete.as_mut() {
            hook(stage);
        }
        Ok(())
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    fn validate(
        &mut self,
        rows: Vec<FeatureStoreRow>,
        members: &[Member],
    ) -> RiskResult<(Vec<FeatureRecord>, Vec<QuarantinedRow>)> {
        self.begin(Stage::Validate)?;
        validate_members(members)?;
        let table = validate_rows(rows, self.policy)?;

        let summary = ValidationSummary {
            accepted: table.records.len(),
            members: members.len(),
            quarantined: table.quarantined.clone(),
        };
        self.store.save_artifact(&self.run_id, Stage::Validate, &summary)?;
        log::info!(
            "Validated {} record(s), quarantined {}, {} member(s)",
            summary.accepted,
            summary.quarantined.len(),
            summary.members
        );

        self.finish(
            Stage::Validate,
            PipelineEvent::RecordsValidated {
                accepted: summary.accepted,
                quarantined: summary.quarantined.len(),
                members: summary.members,
            },
        )?;
        Ok((table.records, table.quarantined))
    }

    fn score_anomalies(&mut self, records: &mut [FeatureRecord]) -> RiskResult<(usize, Option<f64>)> {
        self.begin(Stage::AnomalyScoring)?;
        let aggregates: Vec<_> = records.iter().map(|r| r.velocity).collect();
        let mut rng = self.rng_bank.for_stage(StageSlot::Anomaly);
        let labels = AnomalyScorer::new(&self.config.anomaly).fit_predict(&aggregates, &mut rng)?;

        let mut flagged = Vec::new();
        for (record, label) in records.iter_mut().zip(&labels) {
            record.anomaly_flag = label.is_anomalous();
            if record.anomaly_flag {
                flagged.push(record.transaction.id.clone());
            }
        }

        let flagged_members: BTreeSet<&str> = records
            .iter()
            .filter(|r| r.anomaly_flag)
            .map(|r| r.member_id())
            .collect();
        let farming_recall = member_recall(&flagged_members, &members_with_fraud_type(records, FARMING_FRAUD_TYPE));
        log::info!("Anomaly scorer flagged {} of {} record(s)", flagged.len(), records.len());
        log_detector_recall("Points farming", farming_recall, self.config.anomaly.farming_recall_target);

        let summary = AnomalySummary { flagged, farming_recall };
        self.store.save_artifact(&self.run_id, Stage::AnomalyScoring, &summary)?;
        self.finish(
            Stage::AnomalyScoring,
            PipelineEvent::AnomaliesScored {
                records: records.len(),
                flagged: summary.flagged.len(),
                farming_recall,
            },
        )?;
        Ok((summary.flagged.len(), farming_recall))
    }

    fn detect_rings(
        &mut self,
        records: &mut [FeatureRecord],
        members: &[Member],
    ) -> RiskResult<(RingReport, Option<f64>)> {
        self.begin(Stage::RingDetection)?;
        let report = RingDetector::new(&self.config.ring).detect(members);

        for record in records.iter_mut() {
            record.network_risk_flag = report.is_flagged(record.member_id());
        }

        let ring_members: BTreeSet<&str> = report.flagged_members().map(String::as_str).collect();
        let cycling_recall = member_recall(&ring_members, &members_with_fraud_type(records, CYCLING_FRAUD_TYPE));
        log_detector_recall("Account cycling", cycling_recall, self.config.ring.cycling_recall_target);

        self.store.save_artifact(&self.run_id, Stage::RingDetection, &report)?;
        self.finish(
            Stage::RingDetection,
            PipelineEvent::RingsDetected {
                rings: report.rings.len(),
                flagged_members: ring_members.len(),
                cycling_recall,
            },
        )?;
        Ok((report, cycling_recall))
    }

    fn train_ensemble(&mut self, records: &[FeatureRecord]) -> RiskResult<(ModelArtifact, Vec<ScoredRecord>)> {
        self.begin(Stage::EnsembleTraining)?;
        let outcome = EnsembleClassifier::new(&self.config.ensemble).train(records, &self.rng_bank)?;
        let artifact = outcome.artifact;

        self.store.save_model(&self.run_id, &artifact)?;
        self.store
            .save_artifact(&self.run_id, Stage::EnsembleTraining, &outcome.test_results)?;
        log::info!("Model {} trained", artifact.version);

        let q = &artifact.quality;
        self.finish(
            Stage::EnsembleTraining,
            PipelineEvent::ModelTrained {
                version: artifact.version,
                recall: q.recall,
                precision: q.precision,
                auc: q.auc,
                false_positive_rate: q.false_positive_rate,
                gates_passed: q.all_passed,
            },
        )?;
        Ok((artifact, outcome.test_results))
    }

    fn generate_alerts(
        &mut self,
        records: &[FeatureRecord],
        members: &[Member],
        rings: &RingReport,
        artifact: &ModelArtifact,
    ) -> RiskResult<Vec<Alert>> {
        self.begin(Stage::AlertGeneration)?;
        let mut service = AlertService::new(&self.config.alerts, artifact);
        service.register_members(members, rings);
        let alerts = service.build_feed(records);

        self.store.replace_alerts(&self.run_id, &alerts)?;
        self.store.save_artifact(&self.run_id, Stage::AlertGeneration, &alerts)?;

        let count = |s: Severity| alerts.iter().filter(|a| a.severity == s).count();
        let event = PipelineEvent::AlertsGenerated {
            high: count(Severity::High),
            medium: count(Severity::Medium),
            low: count(Severity::Low),
        };
        self.finish(Stage::AlertGeneration, event)?;
        Ok(alerts)
    }

    fn aggregate_exposure(&mut self, records: &[FeatureRecord]) -> RiskResult<Metrics> {
        self.begin(Stage::ExposureAggregation)?;
        let labeled: Vec<FeatureRecord> = records.iter().filter(|r| r.label.is_some()).cloned().collect();
        let metrics = ExposureAggregator::new(&self.config.exposure).aggregate(&labeled);

        self.store.save_metrics(&self.run_id, &metrics)?;
        self.store.save_artifact(&self.run_id, Stage::ExposureAggregation, &metrics)?;
        self.finish(
            Stage::ExposureAggregation,
            PipelineEvent::ExposureComputed {
                total_annual_exposure: metrics.total_annual_exposure,
                abuse_rate: metrics.abuse_rate,
            },
        )?;
        Ok(metrics)
    }
}

/// Records on the hold-out side of the split, in input order. Training rows
/// never reach the feed: the model has already seen their labels.
fn held_out_records(records: &[FeatureRecord], scored: &[ScoredRecord]) -> Vec<FeatureRecord> {
    let ids: BTreeSet<&str> = scored.iter().map(|s| s.transaction_id.as_str()).collect();
    records
        .iter()
        .filter(|r| ids.contains(r.transaction.id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_stable() {
        let names: Vec<String> = Stage::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            [
                "validate",
                "anomaly_scoring",
                "ring_detection",
                "ensemble_training",
                "alert_generation",
                "exposure_aggregation"
            ]
        );
        assert_eq!(serde_json::to_string(&Stage::AlertGeneration).unwrap(), "\"alert_generation\"");
    }

    #[test]
    fn cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn cancelled_before_start_stops_at_validate() {
        let config = RiskConfig::default_test();
        let store = RiskStore::in_memory().unwrap();
        store.migrate().unwrap();
        let token = CancelToken::new();
        token.cancel();

        let mut pipeline = RiskPipeline::new("cancelled".into(), &config, store).with_cancel_token(token);
        let err = pipeline.run(Vec::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, RiskError::Cancelled { stage: Stage::Validate }));
        assert_eq!(
            pipeline.store().run_status("cancelled").unwrap(),
            Some(("cancelled".into(), Some("validate".into())))
        );
    }
}
