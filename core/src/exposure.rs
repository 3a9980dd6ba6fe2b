//! Financial exposure and abuse-rate reporting over labeled history.
//!
//! RULE: every division is guarded. An empty dataset reports an abuse
//! rate of 0; a zero-length span reports an annual exposure of 0.

use crate::{config::ExposureConfig, record::FeatureRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNKNOWN_FRAUD_TYPE: &str = "unknown";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// The reporting document handed to the presentation layer.
/// One current snapshot; each run replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_annual_exposure: f64,
    /// Percentage of all transactions labeled fraudulent.
    pub abuse_rate: f64,
    pub category_exposure: BTreeMap<String, f64>,
    pub type_exposure: BTreeMap<String, f64>,
}

pub struct ExposureAggregator<'a> {
    config: &'a ExposureConfig,
}

impl<'a> ExposureAggregator<'a> {
    pub fn new(config: &'a ExposureConfig) -> Self {
        Self { config }
    }

    /// Dataset span in fractional days: configured, or max - min timestamp.
    pub fn span_days(&self, records: &[FeatureRecord]) -> f64 {
        if let Some(days) = self.config.span_days {
            return days;
        }
        let mut stamps = records.iter().map(|r| r.transaction.timestamp);
        let Some(first) = stamps.next() else {
            return 0.0;
        };
        let (min, max) = stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
        (max - min).num_seconds() as f64 / SECONDS_PER_DAY
    }

    pub fn aggregate(&self, records: &[FeatureRecord]) -> Metrics {
        let total = records.len();
        let mut metrics = Metrics::default();
        let mut fraud_count = 0usize;
        let mut fraud_amount = 0.0;

        for r in records.iter().filter(|r| r.is_fraud()) {
            fraud_count += 1;
            let amount = r.transaction.amount_usd;
            fraud_amount += amount;
            *metrics
                .category_exposure
                .entry(r.transaction.category.clone())
                .or_insert(0.0) += amount;
            let fraud_type = r.fraud_type().unwrap_or(UNKNOWN_FRAUD_TYPE);
            *metrics.type_exposure.entry(fraud_type.to_string()).or_insert(0.0) += amount;
        }

        if total > 0 {
            metrics.abuse_rate = 100.0 * fraud_count as f64 / total as f64;
        }
        let span = self.span_days(records);
        if span > 0.0 {
            metrics.total_annual_exposure = fraud_amount / span * 365.0;
        }

        log::info!(
            "Exposure: {fraud_count}/{total} fraud rows, abuse rate {:.2}%, annualised ${:.2} over {span:.1} days",
            metrics.abuse_rate,
            metrics.total_annual_exposure
        );
        metrics
    }
}
