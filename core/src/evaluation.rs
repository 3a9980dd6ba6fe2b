//! Detection quality measures.
//!
//! Ratios with an empty denominator report 0.0; AUC is undefined with a
//! single class present and reports None.

use crate::record::FeatureRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Labeled fraud types each detector is measured against.
pub const FARMING_FRAUD_TYPE: &str = "farming";
pub const CYCLING_FRAUD_TYPE: &str = "cycling";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub true_positives: u64,
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ConfusionMatrix {
    pub fn from_predictions(actual: &[bool], predicted: &[bool]) -> Self {
        let mut cm = Self::default();
        for (&y, &p) in actual.iter().zip(predicted) {
            match (y, p) {
                (false, false) => cm.true_negatives += 1,
                (false, true) => cm.false_positives += 1,
                (true, false) => cm.false_negatives += 1,
                (true, true) => cm.true_positives += 1,
            }
        }
        cm
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn false_positive_rate(&self) -> f64 {
        ratio(self.false_positives, self.false_positives + self.true_negatives)
    }
}

/// Area under the ROC curve via the rank-sum statistic.
/// Tied scores share their average rank.
pub fn roc_auc(actual: &[bool], scores: &[f64]) -> Option<f64> {
    let n_pos = actual.iter().filter(|&&y| y).count();
    let n_neg = actual.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; the tie group spans i..=j.
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if actual[k] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let u = rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}

/// Share of `actual` members that appear in `flagged`.
/// None when there is nothing to find.
pub fn member_recall(flagged: &BTreeSet<&str>, actual: &BTreeSet<&str>) -> Option<f64> {
    if actual.is_empty() {
        return None;
    }
    let found = actual.intersection(flagged).count();
    Some(found as f64 / actual.len() as f64)
}

/// Distinct members with at least one record labeled `fraud_type`.
pub fn members_with_fraud_type<'r>(records: &'r [FeatureRecord], fraud_type: &str) -> BTreeSet<&'r str> {
    records
        .iter()
        .filter(|r| r.is_fraud() && r.fraud_type() == Some(fraud_type))
        .map(|r| r.member_id())
        .collect()
}

/// Log a detector's recall against its advisory target.
pub fn log_detector_recall(detector: &str, recall: Option<f64>, target: f64) {
    match recall {
        Some(r) if r >= target => {
            log::info!("{detector} recall {:.1}% (target {:.0}%)", r * 100.0, target * 100.0)
        }
        Some(r) => log::warn!(
            "{detector} recall {:.1}% is below target {:.0}%",
            r * 100.0,
            target * 100.0
        ),
        None => log::debug!("{detector} recall not measurable: no labeled examples"),
    }
}
