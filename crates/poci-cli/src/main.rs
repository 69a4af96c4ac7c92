#![forbid(unsafe_code)]

//! **poci-cli** – Command-line drivers for POCI.
//!
//! Two drivers layered on top of the core: a guided `demo` that walks the
//! bootstrap → misbehave → reload arc with one honest and one attacking
//! agent, and a `stress` harness that hammers the ledger with a mixed
//! honest/adversarial population and reports anomaly statistics.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ed25519_dalek::VerifyingKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use poci_agents::{Behavior, ModelAgent};
use poci_store_core::{LineageStore, StoreConfig, DEFAULT_DB_PATH};
use poci_store_sled::SledLineageStore;
use poci_types::Event;
use poci_verifier::{ReputationController, Verifier};

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "poci")]
#[command(about = "POCI - tamper-evident lineage ledger for model events")]
#[command(version)]
struct Cli {
    /// Backing database path
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    db_path: PathBuf,

    /// Flush after every append instead of batching
    #[arg(long)]
    autocommit: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the full arc: bootstrap, attack, reload + reverify
    Demo,
    /// Hammer the ledger with a mixed honest/adversarial population
    Stress {
        /// Total number of events to emit
        #[arg(long, default_value_t = 1000)]
        events: usize,
        /// RNG seed for the agent mix (fresh entropy when omitted)
        #[arg(long)]
        seed: Option<u64>,
        /// Misbehavior probability for each attacker strategy
        #[arg(long, default_value_t = 0.35)]
        attack_rate: f64,
        /// Emit the final anomaly counters as JSON
        #[arg(long)]
        json: bool,
    },
}

//─────────────────────────────
//  Main application
//─────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    info!("Starting POCI CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Demo => handle_demo(&cli).await?,
        Commands::Stress {
            events,
            seed,
            attack_rate,
            json,
        } => handle_stress(&cli, events, seed, attack_rate, json).await?,
    }

    Ok(())
}

fn store_config(cli: &Cli) -> StoreConfig {
    StoreConfig::new(&cli.db_path).with_autocommit(cli.autocommit)
}

/// Verify one event, fold the verdict into the controller, and print the
/// per-event report line.
fn verify_and_report(
    phase: &str,
    event: &Event,
    vk: &VerifyingKey,
    verifier: &mut Verifier,
    controller: &mut ReputationController,
) -> bool {
    let verdict = verifier.verify(event, vk);
    let rep = controller.update(&event.model_id, verdict.ok());
    let status = if verdict.ok() { "GOOD" } else { "BAD " };
    println!(
        "[{phase:9}] idx={:03} | {:12} | {status} | w={:.2}, θ={:.2}",
        event.index,
        event.model_id,
        rep.weight_display(),
        rep.theta_display()
    );
    verdict.ok()
}

fn print_summary(title: &str, controller: &ReputationController) {
    println!("\n=== {title} ===");
    for (model, rep) in controller.summary() {
        println!(
            "{model:12} | weight={:.2}, θ={:.2}",
            rep.weight_display(),
            rep.theta_display()
        );
    }
}

//─────────────────────────────
//  Demo driver
//─────────────────────────────

async fn handle_demo(cli: &Cli) -> Result<()> {
    let store = SledLineageStore::open(store_config(cli))?;
    let mut verifier = Verifier::new();
    let mut controller = ReputationController::new();

    let mut honest = ModelAgent::new("honest_core");
    let mut attacker = ModelAgent::new("attacker");
    let keys: HashMap<String, VerifyingKey> = [
        (honest.model_id().to_string(), *honest.verifying_key()),
        (attacker.model_id().to_string(), *attacker.verifying_key()),
    ]
    .into();

    // Phase 1: everyone behaves, both chains bootstrap from genesis.
    println!("=== PHASE 1: BOOTSTRAP ===");
    for round in 0..3 {
        let ev = honest
            .make_event(&store, format!("bootstrap_honest_{round}"))
            .await?;
        store.append(&ev).await?;
        verify_and_report("BOOTSTRAP", &ev, honest.verifying_key(), &mut verifier, &mut controller);

        let ev = attacker
            .make_event(&store, format!("bootstrap_attack_{round}"))
            .await?;
        store.append(&ev).await?;
        verify_and_report("BOOTSTRAP", &ev, attacker.verifying_key(), &mut verifier, &mut controller);
    }

    // Phase 2: the attacker cheats on alternating events.
    println!("\n=== PHASE 2: ATTACKER MISBEHAVES ===");
    for round in 0..6 {
        let ev = honest
            .make_event(&store, format!("honest_phase2_{round}"))
            .await?;
        store.append(&ev).await?;
        verify_and_report("ATTACK", &ev, honest.verifying_key(), &mut verifier, &mut controller);

        attacker.set_behavior(if round % 2 == 0 {
            Behavior::SigCheat { rate: 1.0 }
        } else {
            Behavior::Honest
        });
        let ev = attacker
            .make_event(&store, format!("malicious_{round}"))
            .await?;
        store.append(&ev).await?;
        verify_and_report("ATTACK", &ev, attacker.verifying_key(), &mut verifier, &mut controller);
    }

    print_summary("SUMMARY AFTER PHASE 2", &controller);
    store.close().await?;

    // Phase 3: a fresh store instance on the same backing file must
    // reproduce every verdict from the stored bytes alone.
    println!("\n=== RELOAD + REVERIFY ===");
    let store = SledLineageStore::open(store_config(cli))?;
    let mut reload_verifier = Verifier::new();
    let mut reload_controller = ReputationController::new();

    for model in ["honest_core", "attacker"] {
        for ev in store.chain(model).await? {
            verify_and_report("RELOAD", &ev, &keys[model], &mut reload_verifier, &mut reload_controller);
        }
    }

    print_summary("SUMMARY AFTER RELOAD", &reload_controller);
    if let Some(path) = store.path() {
        println!("\n(DB in {})", path.display());
    }
    store.close().await?;

    Ok(())
}

//─────────────────────────────
//  Stress driver
//─────────────────────────────

async fn handle_stress(
    cli: &Cli,
    events: usize,
    seed: Option<u64>,
    attack_rate: f64,
    json: bool,
) -> Result<()> {
    let store = SledLineageStore::open(store_config(cli))?;
    let mut verifier = Verifier::new();
    let mut controller = ReputationController::new();

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut agents = vec![
        ModelAgent::new("honest_core"),
        ModelAgent::new("honest_aux"),
        ModelAgent::with_behavior("sig_cheat", Behavior::SigCheat { rate: attack_rate }),
        ModelAgent::with_behavior("commit_drift", Behavior::CommitDrift { rate: attack_rate }),
        ModelAgent::with_behavior("slow_drip", Behavior::SlowDrip { rate: attack_rate }),
    ];
    let keys: HashMap<String, VerifyingKey> = agents
        .iter()
        .map(|agent| (agent.model_id().to_string(), *agent.verifying_key()))
        .collect();

    println!(
        "🔨 Stressing {} with {events} events across {} agents",
        cli.db_path.display(),
        agents.len()
    );

    let started = Instant::now();
    let mut good = 0usize;
    for round in 0..events {
        let pick = rng.gen_range(0..agents.len());
        let agent = &mut agents[pick];
        let ev = agent
            .make_event(&store, format!("evt_{round:05}"))
            .await?;
        store.append(&ev).await?;

        let verdict = verifier.verify(&ev, &keys[ev.model_id.as_str()]);
        controller.update(&ev.model_id, verdict.ok());
        if verdict.ok() {
            good += 1;
        }

        if (round + 1) % 200 == 0 {
            info!(appended = round + 1, "stress progress");
        }
    }
    let elapsed = started.elapsed();

    let counters = verifier.counters();
    println!("\n=== STRESS RESULTS ===");
    println!("events        : {events}");
    println!("good          : {good}");
    println!("bad           : {}", counters.bad_events);
    println!("sig invalid   : {}", counters.sig_invalid);
    println!("commit drift  : {}", counters.commit_mismatch);
    println!("hash mismatch : {}", counters.eventhash_mismatch);
    println!(
        "throughput    : {:.0} events/s",
        events as f64 / elapsed.as_secs_f64()
    );
    let mut bad_models: Vec<_> = counters.bad_by_model.iter().collect();
    bad_models.sort();
    for (model, bad) in bad_models {
        println!("  {model:12} | {bad} bad events");
    }

    if json {
        println!("\n{}", serde_json::to_string_pretty(counters)?);
    }

    print_summary("FINAL CONTROLLER SUMMARY", &controller);
    println!("\n(DB in {}, {} bytes on disk)", cli.db_path.display(), store.size_on_disk()?);
    store.close().await?;

    Ok(())
}

//─────────────────────────────
//  Utility functions
//─────────────────────────────

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
