use crate::error::{RiskError, RiskResult};
use serde::{Deserialize, Serialize};

// ── Anomaly scorer ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Expected fraction of anomalous records.
    pub contamination: f64,
    pub n_trees: usize,
    /// Upper bound on the per-tree subsample.
    pub max_samples: usize,
    /// Advisory recall target for points-farming rows.
    pub farming_recall_target: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.023,
            n_trees: 100,
            max_samples: 256,
            farming_recall_target: 0.80,
        }
    }
}

// ── Ring detector ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Smallest member count that makes a component a ring.
    pub min_ring_members: usize,
    /// Advisory recall target for account-cycling members.
    pub cycling_recall_target: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            min_ring_members: 3,
            cycling_recall_target: 0.75,
        }
    }
}

// ── Ensemble classifier ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// L2 penalty strength (inverse of sklearn's C).
    pub l2: f64,
    pub tolerance: f64,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            learning_rate: 0.5,
            l2: 1.0,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaggedConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl Default for BaggedConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostedConfig {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// L2 penalty on leaf weights.
    pub lambda: f64,
    pub min_child_weight: f64,
}

impl Default for BoostedConfig {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 6,
            lambda: 1.0,
            min_child_weight: 1.0,
        }
    }
}

/// Advisory targets. Misses are logged, never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGates {
    pub min_recall: f64,
    pub min_precision: f64,
    pub min_auc: f64,
    pub max_false_positive_rate: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_recall: 0.89,
            min_precision: 0.75,
            min_auc: 0.92,
            max_false_positive_rate: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub test_fraction: f64,
    pub decision_threshold: f64,
    pub linear: LinearConfig,
    pub bagged: BaggedConfig,
    pub boosted: BoostedConfig,
    pub quality_gates: QualityGates,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.30,
            decision_threshold: 0.5,
            linear: LinearConfig::default(),
            bagged: BaggedConfig::default(),
            boosted: BoostedConfig::default(),
            quality_gates: QualityGates::default(),
        }
    }
}

// ── Alerting ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Same-day points above this fire the velocity rule (exclusive).
    pub daily_points_threshold: i64,
    /// Amount above this arms the geographic rule (exclusive).
    pub geo_amount_threshold: f64,
    /// Home-to-transaction distance above this fires the geographic rule.
    pub max_home_distance_km: f64,
    /// Probability above this yields a fallback model alert.
    pub model_alert_threshold: f64,
    /// Size of the presentation-layer alert feed.
    pub feed_size: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            daily_points_threshold: 10_000,
            geo_amount_threshold: 1_000.0,
            max_home_distance_km: 800.0,
            model_alert_threshold: 0.8,
            feed_size: 20,
        }
    }
}

// ── Exposure ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Fixed dataset span in days; measured from timestamps when absent.
    pub span_days: Option<f64>,
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub seed: u64,
    pub anomaly: AnomalyConfig,
    pub ring: RingConfig,
    pub ensemble: EnsembleConfig,
    pub alerts: AlertConfig,
    pub exposure: ExposureConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            anomaly: AnomalyConfig::default(),
            ring: RingConfig::default(),
            ensemble: EnsembleConfig::default(),
            alerts: AlertConfig::default(),
            exposure: ExposureConfig::default(),
        }
    }
}

impl RiskConfig {
    /// Load from a JSON file. Absent keys take their defaults.
    /// In tests, use RiskConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: RiskConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Small, fast settings for unit and integration tests.
    pub fn default_test() -> Self {
        let mut config = Self::default();
        config.anomaly.n_trees = 50;
        config.ensemble.linear.max_iter = 300;
        config.ensemble.bagged.n_trees = 15;
        config.ensemble.bagged.max_depth = 6;
        config.ensemble.boosted.n_rounds = 30;
        config.ensemble.boosted.max_depth = 4;
        config
    }

    pub fn validate(&self) -> RiskResult<()> {
        let c = self.anomaly.contamination;
        if !(c > 0.0 && c <= 0.5) {
            return Err(RiskError::InvalidConfig(format!(
                "anomaly.contamination must be in (0, 0.5], got {c}"
            )));
        }
        if self.anomaly.n_trees == 0 || self.anomaly.max_samples < 2 {
            return Err(RiskError::InvalidConfig(
                "anomaly.n_trees must be > 0 and anomaly.max_samples >= 2".into(),
            ));
        }
        let t = self.ensemble.test_fraction;
        if !(t > 0.0 && t < 1.0) {
            return Err(RiskError::InvalidConfig(format!(
                "ensemble.test_fraction must be in (0, 1), got {t}"
            )));
        }
        if self.ensemble.bagged.n_trees == 0 || self.ensemble.boosted.n_rounds == 0 {
            return Err(RiskError::InvalidConfig(
                "tree ensembles need at least one tree".into(),
            ));
        }
        if self.ring.min_ring_members < 2 {
            return Err(RiskError::InvalidConfig(
                "ring.min_ring_members must be >= 2".into(),
            ));
        }
        if let Some(span) = self.exposure.span_days {
            if span < 0.0 || !span.is_finite() {
                return Err(RiskError::InvalidConfig(format!(
                    "exposure.span_days must be a non-negative number, got {span}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let config = RiskConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.anomaly.contamination, 0.023);
        assert_eq!(config.ensemble.test_fraction, 0.30);
        assert_eq!(config.alerts.daily_points_threshold, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RiskConfig =
            serde_json::from_str(r#"{ "seed": 7, "alerts": { "max_home_distance_km": 500.0 } }"#)
                .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.alerts.max_home_distance_km, 500.0);
        assert_eq!(config.alerts.model_alert_threshold, 0.8);
        assert_eq!(config.ensemble.test_fraction, 0.30);
    }

    #[test]
    fn bad_contamination_rejected() {
        let mut config = RiskConfig::default();
        config.anomaly.contamination = 0.0;
        assert!(matches!(config.validate(), Err(RiskError::InvalidConfig(_))));
    }
}
