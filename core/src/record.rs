//! Typed records at the Feature Store boundary.
//!
//! RULE: Loosely typed rows never travel past this module.
//! Every row is validated into a FeatureRecord here; rows missing a
//! required field are rejected or quarantined, never defaulted.
//! Only aggregate columns may be absent, and they read as zero.

use crate::{
    error::{RiskError, RiskResult},
    pipeline::Stage,
    types::{MemberId, TransactionId},
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

// ── Core records ─────────────────────────────────────────────────────────────

/// One redemption. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub member_id: MemberId,
    pub timestamp: NaiveDateTime,
    pub points_redeemed: i64,
    pub amount_usd: f64,
    pub category: String,
    pub channel: String,
    /// Where the redemption took place.
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    #[serde(default)]
    pub join_date: Option<NaiveDate>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub email_domain: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// The velocity subset consumed by the anomaly scorer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityAggregates {
    pub total_points_redeemed: f64,
    pub avg_points_redeemed: f64,
    pub max_points_redeemed: f64,
    pub time_since_last_redemption_h: f64,
}

impl VelocityAggregates {
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.total_points_redeemed,
            self.avg_points_redeemed,
            self.max_points_redeemed,
            self.time_since_last_redemption_h,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudLabel {
    pub is_fraud: bool,
    pub fraud_type: Option<String>,
}

/// Per-transaction feature vector, regenerated by the pipeline each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub transaction: Transaction,
    pub tier: String,
    pub account_age_days: f64,
    pub velocity: VelocityAggregates,
    pub total_redemptions: f64,
    pub std_points_redeemed: f64,
    pub total_value_usd: f64,
    pub avg_value_usd: f64,
    pub hour_of_day: f64,
    pub day_of_week: f64,
    pub is_weekend: bool,
    pub shared_ip_count: f64,
    pub shared_device_count: f64,
    pub is_shared_ip_high: bool,
    pub is_shared_device_high: bool,
    /// Set by the ring detector.
    pub network_risk_flag: bool,
    /// Set by the anomaly scorer.
    pub anomaly_flag: bool,
    /// Present only on historical, labeled rows.
    pub label: Option<FraudLabel>,
}

impl FeatureRecord {
    pub fn member_id(&self) -> &str {
        &self.transaction.member_id
    }

    pub fn is_fraud(&self) -> bool {
        self.label.as_ref().is_some_and(|l| l.is_fraud)
    }

    pub fn fraud_type(&self) -> Option<&str> {
        self.label.as_ref().and_then(|l| l.fraud_type.as_deref())
    }
}

// ── Raw Feature Store rows ───────────────────────────────────────────────────

/// A row as exported by the Feature Store. Every column is optional here;
/// `FeatureStoreRow::validate` decides which absences are fatal.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeatureStoreRow {
    pub transaction_id: Option<String>,
    pub member_id: Option<String>,
    pub timestamp: Option<String>,
    pub points_redeemed: Option<f64>,
    pub amount_usd: Option<f64>,
    pub category: Option<String>,
    pub channel: Option<String>,
    pub state: Option<String>,
    pub tier: Option<String>,
    pub account_age_days: Option<f64>,
    pub total_redemptions: Option<f64>,
    pub total_points_redeemed: Option<f64>,
    pub avg_points_redeemed: Option<f64>,
    pub std_points_redeemed: Option<f64>,
    pub max_points_redeemed: Option<f64>,
    pub total_value_usd: Option<f64>,
    pub avg_value_usd: Option<f64>,
    pub time_since_last_redemption_h: Option<f64>,
    pub hour_of_day: Option<f64>,
    pub day_of_week: Option<f64>,
    pub is_weekend: Option<f64>,
    pub shared_ip_count: Option<f64>,
    pub shared_device_count: Option<f64>,
    pub is_shared_ip_high: Option<f64>,
    pub is_shared_device_high: Option<f64>,
    pub is_fraud: Option<f64>,
    pub fraud_type: Option<String>,
}

fn required<T>(value: Option<T>, field: &'static str, record: &str) -> RiskResult<T> {
    value.ok_or_else(|| invalid(field, record, "is missing"))
}

fn required_text(value: Option<String>, field: &'static str, record: &str) -> RiskResult<String> {
    let text = required(value, field, record)?;
    if text.trim().is_empty() {
        return Err(invalid(field, record, "is empty"));
    }
    Ok(text)
}

fn invalid(field: &'static str, record: &str, reason: &str) -> RiskError {
    RiskError::InvalidRecord {
        stage: Stage::Validate,
        field,
        record: record.to_string(),
        reason: reason.to_string(),
    }
}

/// Missing or non-finite aggregates read as zero.
fn aggregate(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn flag(value: Option<f64>) -> bool {
    aggregate(value) != 0.0
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

impl FeatureStoreRow {
    pub fn validate(self, index: usize) -> RiskResult<FeatureRecord> {
        let record = self
            .transaction_id
            .clone()
            .unwrap_or_else(|| format!("row #{index}"));

        let id = required_text(self.transaction_id, "transaction_id", &record)?;
        let member_id = required_text(self.member_id, "member_id", &record)?;
        let raw_ts = required_text(self.timestamp, "timestamp", &record)?;
        let timestamp = parse_timestamp(&raw_ts)
            .ok_or_else(|| invalid("timestamp", &record, &format!("'{raw_ts}' is not a timestamp")))?;

        let points = required(self.points_redeemed, "points_redeemed", &record)?;
        if !points.is_finite() || points < 0.0 || points.fract() != 0.0 {
            return Err(invalid("points_redeemed", &record, "must be a non-negative integer"));
        }
        let amount_usd = required(self.amount_usd, "amount_usd", &record)?;
        if !amount_usd.is_finite() || amount_usd < 0.0 {
            return Err(invalid("amount_usd", &record, "must be a non-negative amount"));
        }

        let label = match self.is_fraud {
            None => None,
            Some(v) if v == 0.0 || v == 1.0 => Some(FraudLabel {
                is_fraud: v == 1.0,
                fraud_type: self
                    .fraud_type
                    .filter(|t| !t.is_empty() && t != "none"),
            }),
            Some(_) => return Err(invalid("is_fraud", &record, "must be 0 or 1")),
        };

        Ok(FeatureRecord {
            transaction: Transaction {
                id,
                member_id,
                timestamp,
                points_redeemed: points as i64,
                amount_usd,
                category: required_text(self.category, "category", &record)?,
                channel: required_text(self.channel, "channel", &record)?,
                state: required_text(self.state, "state", &record)?,
            },
            tier: required_text(self.tier, "tier", &record)?,
            account_age_days: aggregate(self.account_age_days),
            velocity: VelocityAggregates {
                total_points_redeemed: aggregate(self.total_points_redeemed),
                avg_points_redeemed: aggregate(self.avg_points_redeemed),
                max_points_redeemed: aggregate(self.max_points_redeemed),
                time_since_last_redemption_h: aggregate(self.time_since_last_redemption_h),
            },
            total_redemptions: aggregate(self.total_redemptions),
            std_points_redeemed: aggregate(self.std_points_redeemed),
            total_value_usd: aggregate(self.total_value_usd),
            avg_value_usd: aggregate(self.avg_value_usd),
            hour_of_day: aggregate(self.hour_of_day),
            day_of_week: aggregate(self.day_of_week),
            is_weekend: flag(self.is_weekend),
            shared_ip_count: aggregate(self.shared_ip_count),
            shared_device_count: aggregate(self.shared_device_count),
            is_shared_ip_high: flag(self.is_shared_ip_high),
            is_shared_device_high: flag(self.is_shared_device_high),
            network_risk_flag: false,
            anomaly_flag: false,
            label,
        })
    }
}

// ── Validation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// First bad row fails the stage.
    Strict,
    /// Bad rows are set aside with their error; the rest continue.
    Quarantine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedRow {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedTable {
    pub records: Vec<FeatureRecord>,
    pub quarantined: Vec<QuarantinedRow>,
}

pub fn validate_rows(
    rows: Vec<FeatureStoreRow>,
    policy: ValidationPolicy,
) -> RiskResult<ValidatedTable> {
    let mut table = ValidatedTable::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, row) in rows.into_iter().enumerate() {
        let outcome = row.validate(index).and_then(|rec| {
            if seen.insert(rec.transaction.id.clone()) {
                Ok(rec)
            } else {
                Err(invalid("transaction_id", &rec.transaction.id, "is duplicated"))
            }
        });
        match (outcome, policy) {
            (Ok(rec), _) => table.records.push(rec),
            (Err(e), ValidationPolicy::Strict) => return Err(e),
            (Err(e), ValidationPolicy::Quarantine) => {
                log::warn!("Quarantined feature row {index}: {e}");
                table.quarantined.push(QuarantinedRow {
                    index,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(table)
}

/// Members must carry a unique, non-empty id.
pub fn validate_members(members: &[Member]) -> RiskResult<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for (index, member) in members.iter().enumerate() {
        if member.member_id.trim().is_empty() {
            return Err(RiskError::InvalidRecord {
                stage: Stage::Validate,
                field: "member_id",
                record: format!("member #{index}"),
                reason: "is empty".into(),
            });
        }
        if !seen.insert(member.member_id.as_str()) {
            return Err(RiskError::InvalidRecord {
                stage: Stage::Validate,
                field: "member_id",
                record: member.member_id.clone(),
                reason: "is duplicated".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_row(id: &str) -> FeatureStoreRow {
        FeatureStoreRow {
            transaction_id: Some(id.into()),
            member_id: Some("m-1".into()),
            timestamp: Some("2024-03-01 10:15:00".into()),
            points_redeemed: Some(500.0),
            amount_usd: Some(5.0),
            category: Some("travel".into()),
            channel: Some("web".into()),
            state: Some("CA".into()),
            tier: Some("gold".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_aggregates_read_as_zero() {
        let rec = full_row("t-1").validate(0).unwrap();
        assert_eq!(rec.velocity, VelocityAggregates::default());
        assert_eq!(rec.transaction.points_redeemed, 500);
        assert!(rec.label.is_none());
    }

    #[test]
    fn missing_required_field_names_the_field() {
        let mut row = full_row("t-2");
        row.category = None;
        match row.validate(0) {
            Err(RiskError::InvalidRecord { field, stage, .. }) => {
                assert_eq!(field, "category");
                assert_eq!(stage, Stage::Validate);
            }
            other => panic!("expected InvalidRecord, got {other:?}"),
        }
    }

    #[test]
    fn quarantine_keeps_good_rows() {
        let mut bad = full_row("t-bad");
        bad.timestamp = Some("yesterday".into());
        let rows = vec![full_row("t-1"), bad, full_row("t-3")];

        let table = validate_rows(rows.clone(), ValidationPolicy::Quarantine).unwrap();
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.quarantined.len(), 1);
        assert_eq!(table.quarantined[0].index, 1);

        assert!(validate_rows(rows, ValidationPolicy::Strict).is_err());
    }

    #[test]
    fn none_fraud_type_is_dropped() {
        let mut row = full_row("t-4");
        row.is_fraud = Some(0.0);
        row.fraud_type = Some("none".into());
        let rec = row.validate(0).unwrap();
        assert_eq!(rec.label, Some(FraudLabel { is_fraud: false, fraud_type: None }));
    }

    #[test]
    fn rfc3339_timestamps_parse() {
        assert!(parse_timestamp("2024-03-01T10:15:00Z").is_some());
        assert!(parse_timestamp("2024-03-01T10:15:00").is_some());
        assert!(parse_timestamp("03/01/2024").is_none());
    }

    #[test]
    fn duplicate_member_ids_rejected() {
        let m = Member {
            member_id: "m-1".into(),
            join_date: None,
            tier: None,
            city: None,
            state: None,
            email_domain: None,
            ip_address: None,
            device_id: None,
        };
        assert!(validate_members(&[m.clone(), m]).is_err());
    }
}
