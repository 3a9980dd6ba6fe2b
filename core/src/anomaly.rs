//! Unsupervised anomaly scorer over velocity aggregates.
//!
//! An isolation forest: random axis-aligned splits isolate outliers in
//! fewer steps than inliers. The decision threshold is placed at the
//! (1 - contamination) quantile of the fitted scores, so each run flags
//! roughly `contamination * n` records.
//!
//! The output is a binary label only. Scores stay internal.

use crate::{
    config::AnomalyConfig,
    error::RiskResult,
    record::VelocityAggregates,
    rng::StageRng,
};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
const N_FEATURES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyLabel {
    Anomalous,
    Normal,
}

impl AnomalyLabel {
    pub fn is_anomalous(self) -> bool {
        self == AnomalyLabel::Anomalous
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum INode {
    Split {
        feature: usize,
        value: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<INode>,
}

impl IsolationTree {
    fn grow(data: &[[f64; N_FEATURES]], sample: Vec<usize>, height_limit: usize, rng: &mut StageRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(data, sample, 0, height_limit, rng);
        tree
    }

    fn grow_node(
        &mut self,
        data: &[[f64; N_FEATURES]],
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StageRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(INode::Leaf { size: rows.len() });

        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        // Only features that still vary in this partition can split it.
        let ranges: Vec<(usize, f64, f64)> = (0..N_FEATURES)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    (lo.min(data[r][f]), hi.max(data[r][f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if ranges.is_empty() {
            return id;
        }

        let (feature, lo, hi) = ranges[rng.next_below(ranges.len())];
        let value = rng.uniform(lo, hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] < value);

        let left = self.grow_node(data, left_rows, depth + 1, height_limit, rng);
        let right = self.grow_node(data, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = INode::Split { feature, value, left, right };
        id
    }

    fn path_length(&self, x: &[f64; N_FEATURES]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                INode::Leaf { size } => return depth + average_path_length(*size),
                INode::Split { feature, value, left, right } => {
                    node = if x[*feature] < *value { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// A fitted forest with its contamination threshold.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    threshold: f64,
}

impl IsolationForest {
    /// Anomaly score in (0, 1]; higher is more isolated.
    fn score(&self, x: &[f64; N_FEATURES]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / average_path_length(self.sample_size))
    }

    pub fn label(&self, aggregates: &VelocityAggregates) -> AnomalyLabel {
        if self.score(&aggregates.as_array()) > self.threshold {
            AnomalyLabel::Anomalous
        } else {
            AnomalyLabel::Normal
        }
    }
}

/// Linear-interpolated quantile of an ascending slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

pub struct AnomalyScorer<'a> {
    config: &'a AnomalyConfig,
}

impl<'a> AnomalyScorer<'a> {
    pub fn new(config: &'a AnomalyConfig) -> Self {
        Self { config }
    }

    /// Fit on the given aggregates. Returns None when fewer than two
    /// records exist, since nothing can be isolated.
    pub fn fit(
        &self,
        aggregates: &[VelocityAggregates],
        rng: &mut StageRng,
    ) -> RiskResult<Option<IsolationForest>> {
        if aggregates.len() < 2 {
            return Ok(None);
        }
        let data: Vec<[f64; N_FEATURES]> = aggregates
            .iter()
            .map(|a| a.as_array().map(|v| if v.is_finite() { v } else { 0.0 }))
            .collect();

        let sample_size = self.config.max_samples.min(data.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..self.config.n_trees)
            .map(|_| {
                let sample = rng.sample_indices(data.len(), sample_size);
                IsolationTree::grow(&data, sample, height_limit, rng)
            })
            .collect();

        let mut forest = IsolationForest {
            trees,
            sample_size,
            threshold: f64::INFINITY,
        };

        let mut scores: Vec<f64> = data.iter().map(|x| forest.score(x)).collect();
        scores.sort_by(f64::total_cmp);
        forest.threshold = quantile(&scores, 1.0 - self.config.contamination);

        log::debug!(
            "Isolation forest fitted: {} trees, subsample {}, threshold {:.4}",
            self.config.n_trees,
            sample_size,
            forest.threshold
        );
        Ok(Some(forest))
    }

    /// Fit and label the same records in one pass.
    pub fn fit_predict(
        &self,
        aggregates: &[VelocityAggregates],
        rng: &mut StageRng,
    ) -> RiskResult<Vec<AnomalyLabel>> {
        let labels = match self.fit(aggregates, rng)? {
            Some(forest) => aggregates.iter().map(|a| forest.label(a)).collect(),
            None => vec![AnomalyLabel::Normal; aggregates.len()],
        };
        Ok(labels)
    }
}
