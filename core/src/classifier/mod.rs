//! Probabilistic classifiers behind one interface.
//!
//! RULE: The ensemble only ever sees `Learner` and `ProbabilisticModel`.
//! Each variant trains on a `TrainingSet` and scores a dense feature row.
//! Variants correct class imbalance themselves.

mod boosted;
mod forest;
mod linear;
mod tree;

pub use boosted::{BoostedLearner, BoostedModel};
pub use forest::{BaggedLearner, ForestModel};
pub use linear::{LinearLearner, LinearModel};

use crate::{
    error::{RiskError, RiskResult},
    pipeline::Stage,
    rng::{StageRng, StageSlot},
};
use serde::{Deserialize, Serialize};

/// Anything that maps a feature row to P(fraud).
pub trait ProbabilisticModel {
    /// Probability of the positive class, in [0, 1].
    fn predict_proba(&self, x: &[f64]) -> f64;
}

/// Anything that trains a `ProbabilisticModel`.
pub trait Learner {
    type Model: ProbabilisticModel;

    fn name(&self) -> &'static str;

    /// The RNG slot this learner draws from.
    fn slot(&self) -> StageSlot;

    fn fit(&self, data: &TrainingSet, rng: &mut StageRng) -> RiskResult<Self::Model>;
}

/// Dense, labeled training rows.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
}

impl TrainingSet {
    pub fn new(rows: Vec<Vec<f64>>, labels: Vec<bool>) -> RiskResult<Self> {
        if rows.is_empty() || rows.len() != labels.len() {
            return Err(RiskError::EmptyTrainingSet { stage: Stage::EnsembleTraining });
        }
        let width = rows[0].len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(RiskError::FeatureMismatch { expected: width, actual: bad.len() });
        }
        Ok(Self { rows, labels })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&y| y).count()
    }

    pub fn negatives(&self) -> usize {
        self.len() - self.positives()
    }

    /// Per-class weights n / (2 * n_class). Uniform when a class is absent.
    pub fn balanced_class_weights(&self) -> (f64, f64) {
        let (pos, neg) = (self.positives(), self.negatives());
        if pos == 0 || neg == 0 {
            return (1.0, 1.0);
        }
        let n = self.len() as f64;
        (n / (2.0 * neg as f64), n / (2.0 * pos as f64))
    }

    /// Per-row weights from `balanced_class_weights`.
    pub fn balanced_sample_weights(&self) -> Vec<f64> {
        let (w_neg, w_pos) = self.balanced_class_weights();
        self.labels.iter().map(|&y| if y { w_pos } else { w_neg }).collect()
    }

    /// negatives / positives, or 1.0 without positives.
    pub fn scale_pos_weight(&self) -> f64 {
        match self.positives() {
            0 => 1.0,
            pos => self.negatives() as f64 / pos as f64,
        }
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// One trained member of the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstituentModel {
    Linear(LinearModel),
    Bagged(ForestModel),
    Boosted(BoostedModel),
}

impl ConstituentModel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear(_) => "linear",
            Self::Bagged(_) => "bagged",
            Self::Boosted(_) => "boosted",
        }
    }
}

impl ProbabilisticModel for ConstituentModel {
    fn predict_proba(&self, x: &[f64]) -> f64 {
        match self {
            Self::Linear(m) => m.predict_proba(x),
            Self::Bagged(m) => m.predict_proba(x),
            Self::Boosted(m) => m.predict_proba(x),
        }
    }
}

impl From<LinearModel> for ConstituentModel {
    fn from(m: LinearModel) -> Self {
        Self::Linear(m)
    }
}

impl From<ForestModel> for ConstituentModel {
    fn from(m: ForestModel) -> Self {
        Self::Bagged(m)
    }
}

impl From<BoostedModel> for ConstituentModel {
    fn from(m: BoostedModel) -> Self {
        Self::Boosted(m)
    }
}

/// Soft voting: the unweighted mean of the members' probabilities.
pub fn soft_vote<M: ProbabilisticModel>(models: &[M], x: &[f64]) -> f64 {
    if models.is_empty() {
        return 0.0;
    }
    let sum: f64 = models.iter().map(|m| m.predict_proba(x).clamp(0.0, 1.0)).sum();
    (sum / models.len() as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl ProbabilisticModel for Fixed {
        fn predict_proba(&self, _x: &[f64]) -> f64 {
            self.0
        }
    }

    #[test]
    fn soft_vote_is_plain_mean() {
        let models = [Fixed(0.2), Fixed(0.5), Fixed(0.8)];
        assert!((soft_vote(&models, &[]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn soft_vote_stays_in_unit_interval() {
        let models = [Fixed(1.7), Fixed(1.0), Fixed(-0.3)];
        let p = soft_vote(&models, &[]);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn scale_pos_weight_without_positives_is_one() {
        let data = TrainingSet::new(vec![vec![0.0]; 4], vec![false; 4]).unwrap();
        assert_eq!(data.scale_pos_weight(), 1.0);
        assert_eq!(data.balanced_class_weights(), (1.0, 1.0));
    }

    #[test]
    fn balanced_weights_equalise_class_mass() {
        let labels = vec![true, false, false, false];
        let data = TrainingSet::new(vec![vec![0.0]; 4], labels).unwrap();
        let w = data.balanced_sample_weights();
        let pos_mass: f64 = w[..1].iter().sum();
        let neg_mass: f64 = w[1..].iter().sum();
        assert!((pos_mass - neg_mass).abs() < 1e-12);
        assert_eq!(data.scale_pos_weight(), 3.0);
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = TrainingSet::new(vec![vec![0.0, 1.0], vec![0.0]], vec![true, false]);
        assert!(matches!(err, Err(RiskError::FeatureMismatch { expected: 2, actual: 1 })));
    }
}
