//! Loyalty redemption risk engine.
//!
//! Scores redemption activity for fraud: an isolation forest over velocity
//! aggregates, union-find ring detection over shared IPs and devices, a
//! soft-voting ensemble of three classifiers, and rule-based alerting.
//! `pipeline::RiskPipeline` runs the whole batch against a `RiskStore`.

pub mod alert;
pub mod anomaly;
pub mod classifier;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod exposure;
pub mod geo;
pub mod pipeline;
pub mod record;
pub mod ring;
pub mod rng;
pub mod service;
pub mod store;
pub mod types;
