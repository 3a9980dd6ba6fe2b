//! risk-runner: headless batch runner for the redemption risk engine.
//!
//! Usage:
//!   risk-runner --features rows.json --members members.json --db run.db
//!   risk-runner --features rows.json --members members.json --config risk.json --seed 7
//!   risk-runner --features rows.json --members members.json --serve
//!
//! In --serve mode the trained model stays loaded and newline-delimited
//! JSON commands on stdin are answered with the fused probability, each
//! model's own score and the alerts on stdout.

use anyhow::{Context, Result};
use redemption_risk_core::{
    config::RiskConfig,
    pipeline::{PipelineOutcome, RiskPipeline, Stage},
    record::{FeatureStoreRow, Member, ValidationPolicy},
    service::AlertService,
    store::RiskStore,
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServeCommand {
    Score { record: FeatureStoreRow },
    Metrics,
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let features = string_arg(&args, "--features").context("--features <path> is required")?;
    let members_path = string_arg(&args, "--members").context("--members <path> is required")?;
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let serve = args.iter().any(|a| a == "--serve");
    let strict = args.iter().any(|a| a == "--strict");

    let mut config = match string_arg(&args, "--config") {
        Some(path) => RiskConfig::load(path)?,
        None => RiskConfig::default(),
    };
    config.seed = parse_arg(&args, "--seed", config.seed);

    if !serve {
        println!("Redemption risk engine: risk-runner");
        println!("  seed:      {}", config.seed);
        println!("  features:  {features}");
        println!("  members:   {members_path}");
        println!("  db:        {db}");
        println!();
    }

    let rows: Vec<FeatureStoreRow> = read_json(features)?;
    let members: Vec<Member> = read_json(members_path)?;

    let store = RiskStore::open(db)?;
    store.migrate()?;
    let run_id = format!("run-{}-{}", config.seed, epoch_secs());

    let policy = if strict { ValidationPolicy::Strict } else { ValidationPolicy::Quarantine };
    let mut pipeline = RiskPipeline::new(run_id.clone(), &config, store)
        .with_policy(policy)
        .on_stage_complete(|stage: Stage| log::info!("Stage {stage} persisted"));
    let outcome = pipeline.run(rows, members.clone())?;

    if serve {
        serve_loop(&config, &outcome, &members)?;
    } else {
        print_summary(&outcome, pipeline.store())?;
    }
    Ok(())
}

fn serve_loop(config: &RiskConfig, outcome: &PipelineOutcome, members: &[Member]) -> Result<()> {
    let mut service = AlertService::new(&config.alerts, &outcome.artifact);
    service.register_members(members, &outcome.rings);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();
    let mut received = 0usize;

    loop {
        buffer.clear();
        if handle.read_line(&mut buffer)? == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: ServeCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            ServeCommand::Quit => break,
            ServeCommand::Metrics => {
                writeln!(stdout, "{}", serde_json::to_string(&outcome.metrics)?)?;
            }
            ServeCommand::Score { record } => {
                let reply = match record.validate(received) {
                    Ok(mut record) => {
                        record.network_risk_flag = outcome.rings.is_flagged(record.member_id());
                        let probability = outcome.artifact.score(&record);
                        let models: serde_json::Map<String, serde_json::Value> = outcome
                            .artifact
                            .constituent_scores(&record)
                            .into_iter()
                            .map(|(name, p)| (name.to_string(), p.into()))
                            .collect();
                        let alerts = service.submit(&record);
                        serde_json::json!({
                            "transaction_id": record.transaction.id,
                            "probability": probability,
                            "models": models,
                            "alerts": alerts,
                        })
                    }
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                };
                received += 1;
                writeln!(stdout, "{reply}")?;
            }
        }
        stdout.flush()?;
    }
    log::info!("Serve loop finished after {received} record(s)");
    Ok(())
}

fn print_summary(outcome: &PipelineOutcome, store: &RiskStore) -> Result<()> {
    let quality = &outcome.artifact.quality;
    let pct = |v: Option<f64>| v.map_or("n/a".to_string(), |r| format!("{:.1}%", r * 100.0));

    println!("=== RUN SUMMARY ===");
    println!("  run_id:          {}", outcome.run_id);
    println!("  records:         {}", outcome.records.len());
    println!("  quarantined:     {}", outcome.quarantined.len());
    println!("  anomalies:       {}", outcome.anomalies);
    println!("  farming recall:  {}", pct(outcome.farming_recall));
    println!("  fraud rings:     {}", outcome.rings.rings.len());
    println!("  ring members:    {}", outcome.rings.flagged_members().count());
    println!("  cycling recall:  {}", pct(outcome.cycling_recall));
    println!("  events logged:   {}", store.events_for_run(&outcome.run_id)?.len());

    println!();
    println!("=== MODEL ===");
    println!("  version:         {}", outcome.artifact.version);
    println!("  recall:          {:.1}%", quality.recall * 100.0);
    println!("  precision:       {:.1}%", quality.precision * 100.0);
    println!("  auc:             {}", quality.auc.map_or("n/a".to_string(), |a| format!("{a:.3}")));
    println!("  false positives: {:.2}%", quality.false_positive_rate * 100.0);
    for gate in &quality.gates {
        let mark = if gate.passed { "ok" } else { "MISS" };
        println!("    [{mark:>4}] {} {:.3} (target {:.2})", gate.name, gate.value, gate.target);
    }

    println!();
    println!("=== ALERT FEED ({}) ===", store.alert_count(&outcome.run_id)?);
    for alert in outcome.alerts.iter().take(10) {
        println!(
            "  {:<6} | {:<30} | {} | {}",
            alert.severity.as_str(),
            alert.alert_type.as_str(),
            alert.member_id,
            alert.reason
        );
    }

    println!();
    println!("=== EXPOSURE ===");
    let m = &outcome.metrics;
    println!("  annual exposure: ${:.2}", m.total_annual_exposure);
    println!("  abuse rate:      {:.2}%", m.abuse_rate);
    for (category, amount) in &m.category_exposure {
        println!("    {category:<20} ${amount:.2}");
    }
    for (fraud_type, amount) in &m.type_exposure {
        println!("    {fraud_type:<20} ${amount:.2}");
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("Cannot parse {path}"))
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn epoch_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
