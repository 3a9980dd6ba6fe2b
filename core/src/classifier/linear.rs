//! L2-regularised logistic regression with balanced class weights.
//!
//! Inputs are standardised with the training mean and deviation, which
//! are kept in the model so scoring applies the same transform.

use super::{sigmoid, Learner, ProbabilisticModel, TrainingSet};
use crate::{
    config::LinearConfig,
    error::RiskResult,
    rng::{StageRng, StageSlot},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    means: Vec<f64>,
    scales: Vec<f64>,
    weights: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    fn margin(&self, x: &[f64]) -> f64 {
        self.weights
            .iter()
            .enumerate()
            .map(|(j, w)| {
                let v = x.get(j).copied().unwrap_or(0.0);
                w * (v - self.means[j]) / self.scales[j]
            })
            .sum::<f64>()
            + self.intercept
    }
}

impl ProbabilisticModel for LinearModel {
    fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.margin(x))
    }
}

pub struct LinearLearner<'a> {
    config: &'a LinearConfig,
}

impl<'a> LinearLearner<'a> {
    pub fn new(config: &'a LinearConfig) -> Self {
        Self { config }
    }
}

impl Learner for LinearLearner<'_> {
    type Model = LinearModel;

    fn name(&self) -> &'static str {
        "linear"
    }

    fn slot(&self) -> StageSlot {
        StageSlot::Linear
    }

    /// Full-batch gradient descent; deterministic, so the RNG is unused.
    fn fit(&self, data: &TrainingSet, _rng: &mut StageRng) -> RiskResult<LinearModel> {
        let n = data.len() as f64;
        let d = data.n_features();

        let means: Vec<f64> = (0..d)
            .map(|j| data.rows.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        let scales: Vec<f64> = (0..d)
            .map(|j| {
                let var = data.rows.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
                if var > 0.0 { var.sqrt() } else { 1.0 }
            })
            .collect();
        let z: Vec<Vec<f64>> = data
            .rows
            .iter()
            .map(|r| (0..d).map(|j| (r[j] - means[j]) / scales[j]).collect())
            .collect();
        let sample_weights = data.balanced_sample_weights();

        let mut weights = vec![0.0; d];
        let mut intercept = 0.0;
        let lr = self.config.learning_rate;
        let penalty = self.config.l2 / n;

        for iter in 0..self.config.max_iter {
            let mut grad_w = vec![0.0; d];
            let mut grad_b = 0.0;
            for (i, row) in z.iter().enumerate() {
                let margin: f64 = row.iter().zip(&weights).map(|(x, w)| x * w).sum::<f64>() + intercept;
                let y = if data.labels[i] { 1.0 } else { 0.0 };
                let residual = sample_weights[i] * (sigmoid(margin) - y);
                for (g, x) in grad_w.iter_mut().zip(row) {
                    *g += residual * x;
                }
                grad_b += residual;
            }
            let mut largest: f64 = (grad_b / n).abs();
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                let step = g / n + penalty * *w;
                largest = largest.max(step.abs());
                *w -= lr * step;
            }
            intercept -= lr * grad_b / n;

            if largest < self.config.tolerance {
                log::debug!("Linear model converged after {} iterations", iter + 1);
                break;
            }
        }

        Ok(LinearModel { means, scales, weights, intercept })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learns_monotone_signal() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, 1.0]).collect();
        let labels: Vec<bool> = (0..40).map(|i| i >= 30).collect();
        let data = TrainingSet::new(rows, labels).unwrap();
        let config = LinearConfig::default();
        let mut rng = StageRng::new(0, 0);
        let model = LinearLearner::new(&config).fit(&data, &mut rng).unwrap();

        assert!(model.predict_proba(&[39.0, 1.0]) > 0.7);
        assert!(model.predict_proba(&[0.0, 1.0]) < 0.3);
    }

    #[test]
    fn constant_column_does_not_blow_up() {
        let rows = vec![vec![5.0]; 6];
        let labels = vec![true, false, false, true, false, false];
        let data = TrainingSet::new(rows, labels).unwrap();
        let config = LinearConfig::default();
        let mut rng = StageRng::new(0, 0);
        let model = LinearLearner::new(&config).fit(&data, &mut rng).unwrap();
        let p = model.predict_proba(&[5.0]);
        assert!(p.is_finite() && (0.0..=1.0).contains(&p));
    }
}
