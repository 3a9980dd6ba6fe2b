//! Gradient-boosted trees on logistic loss.
//!
//! Second-order (Newton) boosting: each round fits a regression tree to
//! the per-row gradient and hessian of the log loss. Positive rows are
//! up-weighted by negatives / positives to offset class imbalance.

use super::{
    sigmoid,
    tree::{Criterion, DecisionTree, TreeParams},
    Learner, ProbabilisticModel, TrainingSet,
};
use crate::{
    config::BoostedConfig,
    error::RiskResult,
    rng::{StageRng, StageSlot},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    /// Margin before the first tree (logit of 0.5).
    base_margin: f64,
    learning_rate: f64,
    scale_pos_weight: f64,
    trees: Vec<DecisionTree>,
}

impl BoostedModel {
    fn margin(&self, x: &[f64]) -> f64 {
        self.base_margin + self.learning_rate * self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn scale_pos_weight(&self) -> f64 {
        self.scale_pos_weight
    }
}

impl ProbabilisticModel for BoostedModel {
    fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.margin(x))
    }
}

pub struct BoostedLearner<'a> {
    config: &'a BoostedConfig,
}

impl<'a> BoostedLearner<'a> {
    pub fn new(config: &'a BoostedConfig) -> Self {
        Self { config }
    }
}

impl Learner for BoostedLearner<'_> {
    type Model = BoostedModel;

    fn name(&self) -> &'static str {
        "boosted"
    }

    fn slot(&self) -> StageSlot {
        StageSlot::Boosted
    }

    fn fit(&self, data: &TrainingSet, rng: &mut StageRng) -> RiskResult<BoostedModel> {
        let scale_pos_weight = data.scale_pos_weight();
        let row_weights: Vec<f64> = data
            .labels
            .iter()
            .map(|&y| if y { scale_pos_weight } else { 1.0 })
            .collect();
        let params = TreeParams {
            max_depth: self.config.max_depth,
            min_samples_split: 2,
            max_features: None,
            criterion: Criterion::Newton {
                lambda: self.config.lambda,
                min_child_weight: self.config.min_child_weight,
            },
        };

        let mut margins = vec![0.0; data.len()];
        let mut trees = Vec::with_capacity(self.config.n_rounds);
        let all_rows: Vec<usize> = (0..data.len()).collect();

        for _ in 0..self.config.n_rounds {
            let mut grad = Vec::with_capacity(data.len());
            let mut hess = Vec::with_capacity(data.len());
            for ((&m, &y), &w) in margins.iter().zip(&data.labels).zip(&row_weights) {
                let p = sigmoid(m);
                let target = if y { 1.0 } else { 0.0 };
                grad.push(w * (p - target));
                hess.push((w * p * (1.0 - p)).max(1e-16));
            }

            let tree = DecisionTree::fit(&data.rows, &grad, &hess, all_rows.clone(), params, rng);
            for (m, row) in margins.iter_mut().zip(&data.rows) {
                *m += self.config.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        log::debug!(
            "Boosted ensemble grown: {} rounds, scale_pos_weight {:.2}",
            trees.len(),
            scale_pos_weight
        );
        Ok(BoostedModel {
            base_margin: 0.0,
            learning_rate: self.config.learning_rate,
            scale_pos_weight,
            trees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_threshold_signal() {
        let rows: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64]).collect();
        let labels: Vec<bool> = (0..60).map(|i| i >= 50).collect();
        let data = TrainingSet::new(rows, labels).unwrap();
        let config = BoostedConfig { n_rounds: 40, ..Default::default() };
        let mut rng = StageRng::new(3, 4);
        let model = BoostedLearner::new(&config).fit(&data, &mut rng).unwrap();

        assert_eq!(model.scale_pos_weight(), 5.0);
        assert!(model.predict_proba(&[55.0]) > 0.9);
        assert!(model.predict_proba(&[10.0]) < 0.1);
    }

    #[test]
    fn no_positives_defaults_scale_to_one() {
        let data = TrainingSet::new(vec![vec![1.0], vec![2.0]], vec![false, false]).unwrap();
        let config = BoostedConfig { n_rounds: 3, ..Default::default() };
        let mut rng = StageRng::new(3, 4);
        let model = BoostedLearner::new(&config).fit(&data, &mut rng).unwrap();
        assert_eq!(model.scale_pos_weight(), 1.0);
        assert!(model.predict_proba(&[1.5]) < 0.5);
    }
}
