//! Rule-based alert synthesis.
//!
//! RULES (evaluated independently, each may fire):
//!   1. Velocity:   same-day points above the threshold        → HIGH
//!   2. Network:    member sits in a fraud ring                → HIGH
//!   3. Geographic: large amount far from the member's home    → MEDIUM
//! If none fired and the model probability is above the alert threshold,
//! a single MEDIUM model-prediction alert is raised instead.
//!
//! Output is ordered HIGH, MEDIUM, LOW; rule order is kept within a level.
//! Generation is a pure function: no I/O, no randomness, no mutation.

use crate::{
    config::AlertConfig,
    geo::{state_distance, StateDistance},
    record::Transaction,
    types::MemberId,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// Triage precedence: HIGH > MEDIUM > LOW.
impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "Points Farming")]
    PointsFarming,
    #[serde(rename = "Account Cycling / Network Risk")]
    NetworkRisk,
    #[serde(rename = "Geographic Anomaly")]
    GeographicAnomaly,
    #[serde(rename = "Model Prediction")]
    ModelPrediction,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointsFarming => "Points Farming",
            Self::NetworkRisk => "Account Cycling / Network Risk",
            Self::GeographicAnomaly => "Geographic Anomaly",
            Self::ModelPrediction => "Model Prediction",
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::PointsFarming => "Block account, manual review",
            Self::NetworkRisk => "Flag related accounts, investigate",
            Self::GeographicAnomaly => "Verify with member, monitor",
            Self::ModelPrediction => "Investigate",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub member_id: MemberId,
    pub reason: String,
    pub action: String,
    pub timestamp: NaiveDateTime,
}

impl Alert {
    fn new(severity: Severity, alert_type: AlertType, tx: &Transaction, reason: String) -> Self {
        Self {
            severity,
            alert_type,
            member_id: tx.member_id.clone(),
            reason,
            action: alert_type.action().to_string(),
            timestamp: tx.timestamp,
        }
    }
}

/// Per-member context at the moment a transaction arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberHistory {
    /// Points redeemed earlier the same day, excluding this transaction.
    pub daily_points: i64,
    pub network_risk_flag: bool,
    /// None when the home state is unknown.
    pub home_state: Option<String>,
}

pub struct AlertGenerator<'a> {
    config: &'a AlertConfig,
}

impl<'a> AlertGenerator<'a> {
    pub fn new(config: &'a AlertConfig) -> Self {
        Self { config }
    }

    fn velocity_rule(&self, tx: &Transaction, history: &MemberHistory) -> Option<Alert> {
        let total = history.daily_points.saturating_add(tx.points_redeemed);
        (total > self.config.daily_points_threshold).then(|| {
            Alert::new(
                Severity::High,
                AlertType::PointsFarming,
                tx,
                format!(
                    "Redeemed {total} points today (threshold: {})",
                    self.config.daily_points_threshold
                ),
            )
        })
    }

    fn network_rule(&self, tx: &Transaction, history: &MemberHistory) -> Option<Alert> {
        history.network_risk_flag.then(|| {
            Alert::new(
                Severity::High,
                AlertType::NetworkRisk,
                tx,
                "Member linked to known fraud network (shared IP/Device ring)".to_string(),
            )
        })
    }

    fn geographic_rule(&self, tx: &Transaction, history: &MemberHistory) -> Option<Alert> {
        if tx.amount_usd <= self.config.geo_amount_threshold {
            return None;
        }
        let home = history
            .home_state
            .as_deref()
            .filter(|s| !s.trim().is_empty() && !s.eq_ignore_ascii_case("unknown"))?;

        let detail = match state_distance(home, &tx.state) {
            StateDistance::Km(km) if km > self.config.max_home_distance_km => {
                format!("{km:.0} km from home state {home}")
            }
            StateDistance::Unmeasured { same_state: false } => {
                format!("in {} outside home state {home}", tx.state)
            }
            _ => return None,
        };
        Some(Alert::new(
            Severity::Medium,
            AlertType::GeographicAnomaly,
            tx,
            format!("High value transaction (${:.2}) {detail}", tx.amount_usd),
        ))
    }

    /// Evaluate every rule for one transaction.
    /// `probability` is the ensemble's fused score, when one is available.
    pub fn generate(
        &self,
        tx: &Transaction,
        history: &MemberHistory,
        probability: Option<f64>,
    ) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = [
            self.velocity_rule(tx, history),
            self.network_rule(tx, history),
            self.geographic_rule(tx, history),
        ]
        .into_iter()
        .flatten()
        .collect();

        if alerts.is_empty() {
            if let Some(p) = probability.filter(|&p| p > self.config.model_alert_threshold) {
                alerts.push(Alert::new(
                    Severity::Medium,
                    AlertType::ModelPrediction,
                    tx,
                    format!("Model scored {p:.2} probability of fraud"),
                ));
            }
        }

        // Stable sort keeps rule order within a severity.
        alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tx(points: i64, amount: f64, state: &str) -> Transaction {
        Transaction {
            id: "t-1".into(),
            member_id: "m-1".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            points_redeemed: points,
            amount_usd: amount,
            category: "travel".into(),
            channel: "web".into(),
            state: state.into(),
        }
    }

    fn history(daily: i64, flag: bool, home: Option<&str>) -> MemberHistory {
        MemberHistory {
            daily_points: daily,
            network_risk_flag: flag,
            home_state: home.map(Into::into),
        }
    }

    #[test]
    fn velocity_threshold_is_exclusive() {
        let config = AlertConfig::default();
        let gen = AlertGenerator::new(&config);

        let fired = gen.generate(&tx(11, 10.0, "CA"), &history(9_990, false, None), None);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].alert_type, AlertType::PointsFarming);
        assert_eq!(fired[0].severity, Severity::High);
        assert!(fired[0].reason.contains("10001"));
        assert!(fired[0].reason.contains("10000"));

        let quiet = gen.generate(&tx(10, 10.0, "CA"), &history(9_990, false, None), None);
        assert!(quiet.is_empty());
    }

    #[test]
    fn network_flag_alone_yields_one_high_alert() {
        let config = AlertConfig::default();
        let gen = AlertGenerator::new(&config);
        let alerts = gen.generate(&tx(100, 50.0, "NY"), &history(0, true, Some("CA")), None);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::NetworkRisk);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].action, "Flag related accounts, investigate");
    }

    #[test]
    fn geographic_rule_needs_amount_and_distance() {
        let config = AlertConfig::default();
        let gen = AlertGenerator::new(&config);

        let far = gen.generate(&tx(10, 1_500.0, "NY"), &history(0, false, Some("CA")), None);
        assert_eq!(far.len(), 1);
        assert_eq!(far[0].alert_type, AlertType::GeographicAnomaly);
        assert_eq!(far[0].severity, Severity::Medium);

        let small = gen.generate(&tx(10, 900.0, "NY"), &history(0, false, Some("CA")), None);
        assert!(small.is_empty());

        let home = gen.generate(&tx(10, 1_500.0, "CA"), &history(0, false, Some("CA")), None);
        assert!(home.is_empty());

        let unknown = gen.generate(&tx(10, 1_500.0, "NY"), &history(0, false, None), None);
        assert!(unknown.is_empty());
    }

    #[test]
    fn unmapped_states_fall_back_to_mismatch() {
        let config = AlertConfig::default();
        let gen = AlertGenerator::new(&config);
        let alerts = gen.generate(&tx(10, 2_000.0, "ON"), &history(0, false, Some("CA")), None);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::GeographicAnomaly);
    }

    #[test]
    fn high_precedes_medium() {
        let config = AlertConfig::default();
        let gen = AlertGenerator::new(&config);
        let alerts = gen.generate(&tx(20_000, 5_000.0, "NY"), &history(0, true, Some("CA")), None);
        let severities: Vec<Severity> = alerts.iter().map(|a| a.severity).collect();
        assert_eq!(severities, vec![Severity::High, Severity::High, Severity::Medium]);
        assert_eq!(alerts[0].alert_type, AlertType::PointsFarming);
        assert_eq!(alerts[1].alert_type, AlertType::NetworkRisk);
    }

    #[test]
    fn model_fallback_only_when_no_rule_fired() {
        let config = AlertConfig::default();
        let gen = AlertGenerator::new(&config);

        let fallback = gen.generate(&tx(10, 10.0, "CA"), &history(0, false, None), Some(0.93));
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].alert_type, AlertType::ModelPrediction);
        assert_eq!(fallback[0].reason, "Model scored 0.93 probability of fraud");

        let at_threshold = gen.generate(&tx(10, 10.0, "CA"), &history(0, false, None), Some(0.8));
        assert!(at_threshold.is_empty());

        let with_rule = gen.generate(&tx(10, 10.0, "CA"), &history(0, true, None), Some(0.99));
        assert_eq!(with_rule.len(), 1);
        assert_eq!(with_rule[0].alert_type, AlertType::NetworkRisk);
    }

    #[test]
    fn alert_serialises_with_contract_names() {
        let config = AlertConfig::default();
        let gen = AlertGenerator::new(&config);
        let alerts = gen.generate(&tx(100, 50.0, "NY"), &history(0, true, None), None);
        let json = serde_json::to_value(&alerts[0]).unwrap();
        assert_eq!(json["severity"], "HIGH");
        assert_eq!(json["type"], "Account Cycling / Network Risk");
        assert_eq!(json["member_id"], "m-1");
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
