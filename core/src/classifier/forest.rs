//! Bagged decision trees (random forest) with balanced class weights.

use super::{
    tree::{Criterion, DecisionTree, TreeParams},
    Learner, ProbabilisticModel, TrainingSet,
};
use crate::{
    config::BaggedConfig,
    error::RiskResult,
    rng::{StageRng, StageSlot},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    trees: Vec<DecisionTree>,
}

impl ForestModel {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl ProbabilisticModel for ForestModel {
    fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }
}

pub struct BaggedLearner<'a> {
    config: &'a BaggedConfig,
}

impl<'a> BaggedLearner<'a> {
    pub fn new(config: &'a BaggedConfig) -> Self {
        Self { config }
    }
}

impl Learner for BaggedLearner<'_> {
    type Model = ForestModel;

    fn name(&self) -> &'static str {
        "bagged"
    }

    fn slot(&self) -> StageSlot {
        StageSlot::Bagged
    }

    fn fit(&self, data: &TrainingSet, rng: &mut StageRng) -> RiskResult<ForestModel> {
        let n = data.len();
        let weights = data.balanced_sample_weights();
        let weighted_labels: Vec<f64> = data
            .labels
            .iter()
            .zip(&weights)
            .map(|(&y, &w)| if y { w } else { 0.0 })
            .collect();

        let params = TreeParams {
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split,
            max_features: Some(((data.n_features() as f64).sqrt().round() as usize).max(1)),
            criterion: Criterion::Gini,
        };

        // Per-tree streams are forked up front so the result does not
        // depend on how rayon schedules the trees.
        let streams: Vec<StageRng> = (0..self.config.n_trees).map(|_| rng.fork()).collect();

        let trees: Vec<DecisionTree> = streams
            .into_par_iter()
            .map(|mut tree_rng| {
                let bootstrap: Vec<usize> = (0..n).map(|_| tree_rng.next_below(n)).collect();
                DecisionTree::fit(&data.rows, &weighted_labels, &weights, bootstrap, params, &mut tree_rng)
            })
            .collect();

        log::debug!("Bagged ensemble grown: {} trees over {} rows", trees.len(), n);
        Ok(ForestModel { trees })
    }
}
