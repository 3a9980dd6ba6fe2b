//! Synthetic Feature Store export shared by the integration tests.
//!
//! Layout (fixed, seeded):
//!   m000..m003  one IP shared by all four   → a ring, labeled "cycling"
//!   m010, m011  one shared device           → a pair, never a ring
//!   m020..m029  extreme velocity aggregates → labeled "farming"
//!   everyone else legitimate, three redemptions each

#![allow(dead_code)]

use redemption_risk_core::{
    record::{FeatureStoreRow, Member},
    rng::StageRng,
};

pub const MEMBERS: usize = 200;
pub const TX_PER_MEMBER: usize = 3;

const STATES: [&str; 6] = ["CA", "NY", "TX", "FL", "WA", "IL"];
const CATEGORIES: [&str; 3] = ["travel", "retail", "gift_card"];
const CHANNELS: [&str; 2] = ["web", "mobile"];
const TIERS: [&str; 3] = ["Silver", "Gold", "Platinum"];

pub fn member_id(i: usize) -> String {
    format!("m{i:03}")
}

pub fn is_cycling(i: usize) -> bool {
    i < 4
}

pub fn is_farming(i: usize) -> bool {
    (20..30).contains(&i)
}

pub fn members() -> Vec<Member> {
    (0..MEMBERS)
        .map(|i| Member {
            member_id: member_id(i),
            tier: Some(TIERS[i % TIERS.len()].to_string()),
            state: Some(STATES[i % STATES.len()].to_string()),
            ip_address: Some(if is_cycling(i) { "10.0.0.1".to_string() } else { format!("192.168.{}.{}", i / 250, i % 250) }),
            device_id: Some(match i {
                10 | 11 => "dev-shared-pair".to_string(),
                _ => format!("dev-{i}"),
            }),
            ..Default::default()
        })
        .collect()
}

pub fn rows(seed: u64) -> Vec<FeatureStoreRow> {
    let mut rng = StageRng::new(seed, 1_000);
    let mut out = Vec::with_capacity(MEMBERS * TX_PER_MEMBER);

    for i in 0..MEMBERS {
        for k in 0..TX_PER_MEMBER {
            let n = i * TX_PER_MEMBER + k;
            let farming = is_farming(i);
            let cycling = is_cycling(i);
            let fraud = farming || cycling;

            let points = if farming {
                rng.uniform(6_000.0, 9_000.0).round()
            } else {
                rng.uniform(100.0, 1_500.0).round()
            };
            let day = 1 + (n % 28);
            let hour = n % 24;

            out.push(FeatureStoreRow {
                transaction_id: Some(format!("tx-{n:05}")),
                member_id: Some(member_id(i)),
                timestamp: Some(format!("2024-{:02}-{day:02} {hour:02}:15:00", 1 + (n % 12))),
                points_redeemed: Some(points),
                amount_usd: Some(points / 100.0),
                category: Some(CATEGORIES[n % CATEGORIES.len()].to_string()),
                channel: Some(CHANNELS[n % CHANNELS.len()].to_string()),
                state: Some(STATES[(i + k) % STATES.len()].to_string()),
                tier: Some(TIERS[i % TIERS.len()].to_string()),
                account_age_days: Some(if cycling { rng.uniform(1.0, 20.0) } else { rng.uniform(90.0, 2_000.0) }),
                total_redemptions: Some(if farming { 60.0 } else { rng.uniform(2.0, 20.0).round() }),
                total_points_redeemed: Some(if farming { rng.uniform(80_000.0, 120_000.0) } else { rng.uniform(1_000.0, 8_000.0) }),
                avg_points_redeemed: Some(if farming { rng.uniform(6_000.0, 8_000.0) } else { rng.uniform(200.0, 700.0) }),
                std_points_redeemed: Some(rng.uniform(10.0, 300.0)),
                max_points_redeemed: Some(if farming { rng.uniform(9_000.0, 12_000.0) } else { rng.uniform(500.0, 1_500.0) }),
                total_value_usd: Some(rng.uniform(10.0, 800.0)),
                avg_value_usd: Some(rng.uniform(5.0, 80.0)),
                time_since_last_redemption_h: Some(if farming { rng.uniform(0.1, 1.0) } else { rng.uniform(24.0, 400.0) }),
                hour_of_day: Some(hour as f64),
                day_of_week: Some((n % 7) as f64),
                is_weekend: Some(if n % 7 >= 5 { 1.0 } else { 0.0 }),
                shared_ip_count: Some(if cycling { 4.0 } else { 1.0 }),
                shared_device_count: Some(1.0),
                is_shared_ip_high: Some(if cycling { 1.0 } else { 0.0 }),
                is_shared_device_high: Some(0.0),
                is_fraud: Some(if fraud { 1.0 } else { 0.0 }),
                fraud_type: Some(
                    match (farming, cycling) {
                        (true, _) => "farming",
                        (_, true) => "cycling",
                        _ => "none",
                    }
                    .to_string(),
                ),
            });
        }
    }
    out
}
