//! Synchronous alerting front door.
//!
//! RULE: no I/O on the request path. The service holds the trained
//! artifact by reference and keeps member context in memory.

use crate::{
    alert::{Alert, AlertGenerator, MemberHistory},
    config::AlertConfig,
    ensemble::ModelArtifact,
    record::{FeatureRecord, Member},
    ring::RingReport,
    types::MemberId,
};
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct MemberContext {
    home_state: Option<String>,
    network_risk_flag: bool,
    day: Option<NaiveDate>,
    daily_points: i64,
}

impl MemberContext {
    fn points_on(&self, day: NaiveDate) -> i64 {
        if self.day == Some(day) { self.daily_points } else { 0 }
    }
}

pub struct AlertService<'a> {
    config: &'a AlertConfig,
    artifact: &'a ModelArtifact,
    cache: HashMap<MemberId, MemberContext>,
}

impl<'a> AlertService<'a> {
    pub fn new(config: &'a AlertConfig, artifact: &'a ModelArtifact) -> Self {
        Self {
            config,
            artifact,
            cache: HashMap::new(),
        }
    }

    /// Seed home states and ring membership from the member table.
    pub fn register_members(&mut self, members: &[Member], rings: &RingReport) {
        for m in members {
            let ctx = self.cache.entry(m.member_id.clone()).or_default();
            ctx.home_state = m.state.clone();
            ctx.network_risk_flag = rings.is_flagged(&m.member_id);
        }
    }

    pub fn cached_members(&self) -> usize {
        self.cache.len()
    }

    /// History as it stood before `record` arrived.
    pub fn history_for(&self, record: &FeatureRecord) -> MemberHistory {
        let day = record.transaction.timestamp.date();
        let ctx = self.cache.get(record.member_id());
        MemberHistory {
            daily_points: ctx.map_or(0, |c| c.points_on(day)),
            network_risk_flag: record.network_risk_flag || ctx.is_some_and(|c| c.network_risk_flag),
            home_state: ctx.and_then(|c| c.home_state.clone()),
        }
    }

    /// Score one incoming record and return its alerts, HIGH first.
    /// The record's points are then added to the member's running day total.
    pub fn submit(&mut self, record: &FeatureRecord) -> Vec<Alert> {
        let probability = self.artifact.score(record);
        let history = self.history_for(record);
        let alerts = AlertGenerator::new(self.config).generate(&record.transaction, &history, Some(probability));

        let day = record.transaction.timestamp.date();
        let ctx = self.cache.entry(record.member_id().to_string()).or_default();
        ctx.daily_points = ctx.points_on(day).saturating_add(record.transaction.points_redeemed);
        ctx.day = Some(day);
        if record.network_risk_flag {
            ctx.network_risk_flag = true;
        }

        if !alerts.is_empty() {
            log::debug!(
                "Transaction {} raised {} alert(s) (p={probability:.3})",
                record.transaction.id,
                alerts.len()
            );
        }
        alerts
    }

    /// (index, probability) of the records that make the feed, highest
    /// probability first. Ties keep input order.
    pub fn feed_candidates(&self, records: &[FeatureRecord]) -> Vec<(usize, f64)> {
        let mut candidates: Vec<(usize, f64)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, self.artifact.score(r)))
            .filter(|&(_, p)| p > self.config.model_alert_threshold)
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.truncate(self.config.feed_size);
        candidates
    }

    /// Live feed: alerts for each of `feed_candidates`, in that order, with
    /// the member's same-day history replayed from `records`. Does not
    /// touch the request cache.
    pub fn build_feed(&self, records: &[FeatureRecord]) -> Vec<Alert> {
        let prior = prior_daily_points(records);
        let generator = AlertGenerator::new(self.config);
        let feed: Vec<Alert> = self
            .feed_candidates(records)
            .into_iter()
            .flat_map(|(i, p)| {
                let record = &records[i];
                let mut history = self.history_for(record);
                history.daily_points = prior[i];
                generator.generate(&record.transaction, &history, Some(p))
            })
            .collect();

        log::info!("Alert feed built: {} alert(s) from {} record(s)", feed.len(), records.len());
        feed
    }
}

/// For each record, points the same member redeemed earlier that day.
/// Ties on timestamp are broken by transaction id.
fn prior_daily_points(records: &[FeatureRecord]) -> Vec<i64> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        let (ra, rb) = (&records[a].transaction, &records[b].transaction);
        ra.member_id
            .cmp(&rb.member_id)
            .then(ra.timestamp.cmp(&rb.timestamp))
            .then(ra.id.cmp(&rb.id))
    });

    let mut prior = vec![0i64; records.len()];
    let mut running: Option<(&str, NaiveDate, i64)> = None;
    for i in order {
        let tx = &records[i].transaction;
        let day = tx.timestamp.date();
        let so_far = match running {
            Some((member, d, total)) if member == tx.member_id && d == day => total,
            _ => 0,
        };
        prior[i] = so_far;
        running = Some((tx.member_id.as_str(), day, so_far.saturating_add(tx.points_redeemed)));
    }
    prior
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alert::{AlertType, Severity},
        config::RiskConfig,
        ensemble::EnsembleClassifier,
        record::{FeatureStoreRow, Member},
        rng::RngBank,
    };

    fn row(id: usize, member: &str, ts: &str, points: f64, fraud: bool) -> FeatureRecord {
        FeatureStoreRow {
            transaction_id: Some(format!("t{id}")),
            member_id: Some(member.to_string()),
            timestamp: Some(ts.to_string()),
            points_redeemed: Some(points),
            amount_usd: Some(points / 100.0),
            category: Some("travel".into()),
            channel: Some("web".into()),
            state: Some("CA".into()),
            tier: Some("Gold".into()),
            total_points_redeemed: Some(if fraud { 50_000.0 } else { 2_000.0 }),
            max_points_redeemed: Some(if fraud { 9_000.0 } else { 400.0 }),
            is_fraud: Some(if fraud { 1.0 } else { 0.0 }),
            ..Default::default()
        }
        .validate(id)
        .unwrap()
    }

    fn trained(config: &RiskConfig) -> ModelArtifact {
        let records: Vec<FeatureRecord> = (0..60)
            .map(|i| row(i, &format!("m{i}"), "2024-03-01 10:00:00", 100.0, i % 5 == 0))
            .collect();
        EnsembleClassifier::new(&config.ensemble)
            .train(&records, &RngBank::new(config.seed))
            .unwrap()
            .artifact
    }

    #[test]
    fn prior_points_accumulate_within_a_day() {
        let records = vec![
            row(0, "a", "2024-03-01 12:00:00", 300.0, false),
            row(1, "a", "2024-03-01 09:00:00", 200.0, false),
            row(2, "a", "2024-03-02 09:00:00", 50.0, false),
            row(3, "b", "2024-03-01 10:00:00", 70.0, false),
        ];
        assert_eq!(prior_daily_points(&records), vec![200, 0, 0, 0]);
    }

    #[test]
    fn submit_tracks_same_day_velocity() {
        let config = RiskConfig::default_test();
        let artifact = trained(&config);
        let mut service = AlertService::new(&config.alerts, &artifact);

        let first = service.submit(&row(100, "x", "2024-03-05 08:00:00", 6_000.0, false));
        assert!(first.iter().all(|a| a.alert_type != AlertType::PointsFarming));

        let second = service.submit(&row(101, "x", "2024-03-05 09:00:00", 4_500.0, false));
        assert_eq!(second[0].alert_type, AlertType::PointsFarming);
        assert!(second[0].reason.contains("10500"));

        // New day resets the total.
        let third = service.submit(&row(102, "x", "2024-03-06 09:00:00", 4_500.0, false));
        assert!(third.iter().all(|a| a.alert_type != AlertType::PointsFarming));
    }

    #[test]
    fn registered_ring_members_raise_network_alerts() {
        let config = RiskConfig::default_test();
        let artifact = trained(&config);
        let mut service = AlertService::new(&config.alerts, &artifact);

        let members = vec![Member {
            member_id: "ring-1".into(),
            state: Some("CA".into()),
            ..Default::default()
        }];
        let mut rings = RingReport::default();
        rings.flags.insert("ring-1".into(), true);
        service.register_members(&members, &rings);
        assert_eq!(service.cached_members(), 1);

        let alerts = service.submit(&row(7, "ring-1", "2024-03-05 08:00:00", 50.0, false));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::NetworkRisk);
    }

    #[test]
    fn feed_takes_the_top_records_in_probability_order() {
        let mut config = RiskConfig::default_test();
        config.alerts.feed_size = 3;
        config.alerts.model_alert_threshold = 0.5;
        let artifact = trained(&config);
        let service = AlertService::new(&config.alerts, &artifact);

        let records: Vec<FeatureRecord> = (0..40)
            .map(|i| row(200 + i, &format!("f{i}"), "2024-03-07 10:00:00", 100.0, i % 2 == 0))
            .collect();
        let candidates = service.feed_candidates(&records);
        assert_eq!(candidates.len(), 3);
        assert!(candidates.windows(2).all(|w| w[0].1 >= w[1].1));
        assert!(candidates.iter().all(|&(i, p)| i % 2 == 0 && p > 0.5));

        let feed = service.build_feed(&records);
        assert_eq!(feed.len(), 3);
        for (alert, &(i, _)) in feed.iter().zip(&candidates) {
            assert_eq!(alert.alert_type, AlertType::ModelPrediction);
            assert_eq!(alert.member_id, records[i].member_id());
        }
    }

    #[test]
    fn ring_member_in_feed_leads_with_network_alert() {
        let mut config = RiskConfig::default_test();
        config.alerts.model_alert_threshold = 0.5;
        let large = |mut r: FeatureRecord| {
            r.transaction.amount_usd = 2_500.0;
            r
        };
        let training: Vec<FeatureRecord> = (0..60)
            .map(|i| large(row(i, &format!("m{i}"), "2024-03-01 10:00:00", 100.0, i % 5 == 0)))
            .collect();
        let artifact = EnsembleClassifier::new(&config.ensemble)
            .train(&training, &RngBank::new(config.seed))
            .unwrap()
            .artifact;

        let mut service = AlertService::new(&config.alerts, &artifact);
        let members = vec![Member {
            member_id: "ring-0".into(),
            state: Some("CA".into()),
            ..Default::default()
        }];
        let mut rings = RingReport::default();
        rings.flags.insert("ring-0".into(), true);
        service.register_members(&members, &rings);

        let mut ring_tx = large(row(300, "ring-0", "2024-03-08 10:00:00", 100.0, true));
        ring_tx.transaction.state = "NY".into();
        let mut records = vec![ring_tx];
        records.extend(
            (1..6).map(|i| large(row(300 + i, &format!("g{i}"), "2024-03-08 10:00:00", 100.0, i % 2 == 0))),
        );

        let feed = service.build_feed(&records);
        let kinds: Vec<(&str, Severity, AlertType)> = feed
            .iter()
            .map(|a| (a.member_id.as_str(), a.severity, a.alert_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("ring-0", Severity::High, AlertType::NetworkRisk),
                ("ring-0", Severity::Medium, AlertType::GeographicAnomaly),
                ("g2", Severity::Medium, AlertType::ModelPrediction),
                ("g4", Severity::Medium, AlertType::ModelPrediction),
            ]
        );
    }
}
