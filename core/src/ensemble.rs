//! Supervised ensemble: three heterogeneous learners fused by soft voting.
//!
//! Training produces a `ModelArtifact`: an immutable, versioned scoring
//! function. The artifact carries its own feature encoder, so scoring a
//! record later applies exactly the encoding it was trained on.

use crate::{
    classifier::{
        soft_vote, BaggedLearner, BoostedLearner, ConstituentModel, Learner, LinearLearner,
        ProbabilisticModel, TrainingSet,
    },
    config::{EnsembleConfig, QualityGates},
    error::{RiskError, RiskResult},
    evaluation::{roc_auc, ConfusionMatrix},
    pipeline::Stage,
    record::FeatureRecord,
    rng::{RngBank, StageRng, StageSlot},
    types::{MemberId, TransactionId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Numeric columns, in encoding order. Identifiers, timestamps and the
/// label never appear here.
const NUMERIC_FEATURES: [&str; 20] = [
    "points_redeemed",
    "amount_usd",
    "account_age_days",
    "time_since_last_redemption_h",
    "total_redemptions",
    "total_points_redeemed",
    "avg_points_redeemed",
    "std_points_redeemed",
    "max_points_redeemed",
    "total_value_usd",
    "avg_value_usd",
    "hour_of_day",
    "day_of_week",
    "is_weekend",
    "shared_ip_count",
    "shared_device_count",
    "is_shared_ip_high",
    "is_shared_device_high",
    "network_risk_flag",
    "anomaly_flag",
];

fn indicator(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

// ── Feature encoding ─────────────────────────────────────────────────────────

/// Numeric columns plus one-hot tier, category and channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    pub tiers: Vec<String>,
    pub categories: Vec<String>,
    pub channels: Vec<String>,
}

impl FeatureEncoder {
    /// Learn sorted vocabularies from the training records.
    pub fn fit<'r>(records: impl IntoIterator<Item = &'r FeatureRecord>) -> Self {
        let mut tiers = BTreeSet::new();
        let mut categories = BTreeSet::new();
        let mut channels = BTreeSet::new();
        for r in records {
            tiers.insert(r.tier.clone());
            categories.insert(r.transaction.category.clone());
            channels.insert(r.transaction.channel.clone());
        }
        Self {
            tiers: tiers.into_iter().collect(),
            categories: categories.into_iter().collect(),
            channels: channels.into_iter().collect(),
        }
    }

    pub fn width(&self) -> usize {
        NUMERIC_FEATURES.len() + self.tiers.len() + self.categories.len() + self.channels.len()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = NUMERIC_FEATURES.iter().map(|s| s.to_string()).collect();
        names.extend(self.tiers.iter().map(|v| format!("tier_{v}")));
        names.extend(self.categories.iter().map(|v| format!("category_{v}")));
        names.extend(self.channels.iter().map(|v| format!("channel_{v}")));
        names
    }

    /// Unseen categorical values encode as all zeros.
    pub fn encode(&self, r: &FeatureRecord) -> Vec<f64> {
        let t = &r.transaction;
        let mut x = vec![
            t.points_redeemed as f64,
            t.amount_usd,
            r.account_age_days,
            r.velocity.time_since_last_redemption_h,
            r.total_redemptions,
            r.velocity.total_points_redeemed,
            r.velocity.avg_points_redeemed,
            r.std_points_redeemed,
            r.velocity.max_points_redeemed,
            r.total_value_usd,
            r.avg_value_usd,
            r.hour_of_day,
            r.day_of_week,
            indicator(r.is_weekend),
            r.shared_ip_count,
            r.shared_device_count,
            indicator(r.is_shared_ip_high),
            indicator(r.is_shared_device_high),
            indicator(r.network_risk_flag),
            indicator(r.anomaly_flag),
        ];
        x.iter_mut().filter(|v| !v.is_finite()).for_each(|v| *v = 0.0);
        for (vocab, value) in [
            (&self.tiers, &r.tier),
            (&self.categories, &t.category),
            (&self.channels, &t.channel),
        ] {
            x.extend(vocab.iter().map(|v| indicator(v == value)));
        }
        x
    }
}

// ── Train/evaluation split ───────────────────────────────────────────────────

/// Stratified split. Each class contributes round(n_class * test_fraction)
/// rows to the test side. Both index lists come back sorted.
pub fn stratified_split(labels: &[bool], test_fraction: f64, rng: &mut StageRng) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [false, true] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        rng.shuffle(&mut idx);
        let n_test = (idx.len() as f64 * test_fraction).round() as usize;
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

// ── Quality report ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub value: f64,
    pub target: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub confusion: ConfusionMatrix,
    pub recall: f64,
    pub precision: f64,
    pub auc: Option<f64>,
    pub false_positive_rate: f64,
    pub gates: Vec<GateResult>,
    pub all_passed: bool,
}

impl QualityReport {
    pub fn evaluate(actual: &[bool], probabilities: &[f64], threshold: f64, gates: &QualityGates) -> Self {
        let predicted: Vec<bool> = probabilities.iter().map(|&p| p >= threshold).collect();
        let confusion = ConfusionMatrix::from_predictions(actual, &predicted);
        let recall = confusion.recall();
        let precision = confusion.precision();
        let false_positive_rate = confusion.false_positive_rate();
        let auc = roc_auc(actual, probabilities);

        let gate = |name: &str, value: f64, target: f64, passed: bool| GateResult {
            name: name.to_string(),
            value,
            target,
            passed,
        };
        let gates = vec![
            gate("recall", recall, gates.min_recall, recall >= gates.min_recall),
            gate("precision", precision, gates.min_precision, precision >= gates.min_precision),
            gate(
                "auc",
                auc.unwrap_or(0.0),
                gates.min_auc,
                auc.is_some_and(|a| a >= gates.min_auc),
            ),
            gate(
                "false_positive_rate",
                false_positive_rate,
                gates.max_false_positive_rate,
                false_positive_rate <= gates.max_false_positive_rate,
            ),
        ];
        let all_passed = gates.iter().all(|g| g.passed);

        Self {
            confusion,
            recall,
            precision,
            auc,
            false_positive_rate,
            gates,
            all_passed,
        }
    }

    /// Advisory only: misses are logged, the run continues.
    pub fn log(&self) {
        log::info!(
            "Ensemble evaluation: recall {:.2}%, precision {:.2}%, AUC {}, FPR {:.2}%",
            self.recall * 100.0,
            self.precision * 100.0,
            self.auc.map_or("n/a".to_string(), |a| format!("{:.2}%", a * 100.0)),
            self.false_positive_rate * 100.0
        );
        for g in self.gates.iter().filter(|g| !g.passed) {
            log::warn!("Quality gate missed: {} = {:.4} (target {:.4})", g.name, g.value, g.target);
        }
        if self.all_passed {
            log::info!("All model quality gates met");
        }
    }
}

// ── Artifact ─────────────────────────────────────────────────────────────────

/// The trained ensemble as an immutable scoring function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: Uuid,
    pub schema_version: u32,
    pub seed: u64,
    pub test_fraction: f64,
    pub decision_threshold: f64,
    pub encoder: FeatureEncoder,
    pub models: Vec<ConstituentModel>,
    pub quality: QualityReport,
}

impl ModelArtifact {
    /// Fused fraud probability, always within [0, 1].
    pub fn score(&self, record: &FeatureRecord) -> f64 {
        soft_vote(&self.models, &self.encoder.encode(record))
    }

    /// Score an already-encoded row.
    pub fn score_encoded(&self, x: &[f64]) -> RiskResult<f64> {
        let expected = self.encoder.width();
        if x.len() != expected {
            return Err(RiskError::FeatureMismatch { expected, actual: x.len() });
        }
        Ok(soft_vote(&self.models, x))
    }

    pub fn predict(&self, record: &FeatureRecord) -> bool {
        self.score(record) >= self.decision_threshold
    }

    /// Each member's own probability, for explainability.
    pub fn constituent_scores(&self, record: &FeatureRecord) -> Vec<(&'static str, f64)> {
        let x = self.encoder.encode(record);
        self.models.iter().map(|m| (m.name(), m.predict_proba(&x))).collect()
    }

    pub fn to_json(&self) -> RiskResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> RiskResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A held-out record with its fused probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub transaction_id: TransactionId,
    pub member_id: MemberId,
    pub is_fraud: bool,
    pub fraud_type: Option<String>,
    pub probability: f64,
    pub predicted: bool,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub test_results: Vec<ScoredRecord>,
}

// ── Classifier ───────────────────────────────────────────────────────────────

pub struct EnsembleClassifier<'a> {
    config: &'a EnsembleConfig,
}

impl<'a> EnsembleClassifier<'a> {
    pub fn new(config: &'a EnsembleConfig) -> Self {
        Self { config }
    }

    fn fit_one<L: Learner>(
        learner: L,
        data: &TrainingSet,
        bank: &RngBank,
    ) -> RiskResult<ConstituentModel>
    where
        ConstituentModel: From<L::Model>,
    {
        let mut rng = bank.for_stage(learner.slot());
        log::debug!("Training {} model on {} rows", learner.name(), data.len());
        Ok(learner.fit(data, &mut rng)?.into())
    }

    /// Train on labeled records. Unlabeled records are ignored.
    pub fn train(&self, records: &[FeatureRecord], bank: &RngBank) -> RiskResult<TrainingOutcome> {
        let labeled: Vec<&FeatureRecord> = records.iter().filter(|r| r.label.is_some()).collect();
        if labeled.is_empty() {
            return Err(RiskError::EmptyTrainingSet { stage: Stage::EnsembleTraining });
        }
        let labels: Vec<bool> = labeled.iter().map(|r| r.is_fraud()).collect();

        let mut split_rng = bank.for_stage(StageSlot::Split);
        let (train_idx, test_idx) = stratified_split(&labels, self.config.test_fraction, &mut split_rng);
        if train_idx.is_empty() {
            return Err(RiskError::EmptyTrainingSet { stage: Stage::EnsembleTraining });
        }

        let encoder = FeatureEncoder::fit(train_idx.iter().map(|&i| labeled[i]));
        let train = TrainingSet::new(
            train_idx.iter().map(|&i| encoder.encode(labeled[i])).collect(),
            train_idx.iter().map(|&i| labels[i]).collect(),
        )?;
        if train.positives() == 0 {
            log::warn!("Training split has no positive examples; imbalance correction disabled");
        }
        log::info!(
            "Training ensemble on {} rows ({} fraud), {} features; holding out {}",
            train.len(),
            train.positives(),
            encoder.width(),
            test_idx.len()
        );

        let models = vec![
            Self::fit_one(LinearLearner::new(&self.config.linear), &train, bank)?,
            Self::fit_one(BaggedLearner::new(&self.config.bagged), &train, bank)?,
            Self::fit_one(BoostedLearner::new(&self.config.boosted), &train, bank)?,
        ];

        let version = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            &serde_json::to_vec(&(&encoder, &models))?,
        );

        let test_results: Vec<ScoredRecord> = test_idx
            .iter()
            .map(|&i| {
                let r = labeled[i];
                let probability = soft_vote(&models, &encoder.encode(r));
                ScoredRecord {
                    transaction_id: r.transaction.id.clone(),
                    member_id: r.transaction.member_id.clone(),
                    is_fraud: labels[i],
                    fraud_type: r.fraud_type().map(str::to_string),
                    probability,
                    predicted: probability >= self.config.decision_threshold,
                }
            })
            .collect();

        let actual: Vec<bool> = test_results.iter().map(|s| s.is_fraud).collect();
        let probabilities: Vec<f64> = test_results.iter().map(|s| s.probability).collect();
        let quality = QualityReport::evaluate(
            &actual,
            &probabilities,
            self.config.decision_threshold,
            &self.config.quality_gates,
        );
        quality.log();

        let artifact = ModelArtifact {
            version,
            schema_version: ARTIFACT_SCHEMA_VERSION,
            seed: bank.master_seed(),
            test_fraction: self.config.test_fraction,
            decision_threshold: self.config.decision_threshold,
            encoder,
            models,
            quality,
        };
        log::info!("Model artifact {} ready", artifact.version);
        Ok(TrainingOutcome { artifact, test_results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stratified_split_keeps_class_ratio() {
        let labels: Vec<bool> = (0..1000).map(|i| i % 20 == 0).collect();
        let mut rng = RngBank::new(42).for_stage(StageSlot::Split);
        let (train, test) = stratified_split(&labels, 0.3, &mut rng);

        assert_eq!(train.len() + test.len(), 1000);
        assert_eq!(test.len(), 300);
        let test_pos = test.iter().filter(|&&i| labels[i]).count();
        let train_pos = train.iter().filter(|&&i| labels[i]).count();
        assert_eq!(test_pos, 15);
        assert_eq!(train_pos, 35);
    }

    #[test]
    fn split_is_reproducible() {
        let labels: Vec<bool> = (0..200).map(|i| i % 7 == 0).collect();
        let split = || {
            let mut rng = RngBank::new(42).for_stage(StageSlot::Split);
            stratified_split(&labels, 0.3, &mut rng)
        };
        assert_eq!(split(), split());
    }

    #[test]
    fn quality_gates_flag_misses() {
        let actual = [true, true, false, false];
        let probs = [0.9, 0.2, 0.1, 0.6];
        let report = QualityReport::evaluate(&actual, &probs, 0.5, &QualityGates::default());
        assert_eq!(report.recall, 0.5);
        assert!(!report.all_passed);
        assert!(report.gates.iter().any(|g| g.name == "recall" && !g.passed));
    }
}
