// Scenario Runner - Load and execute protocol scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/byzantine_honest.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/qkd.yaml --seed 0x1234...

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;

use log::LevelFilter;
use simple_logger::SimpleLogger;

use qs_rust::qs_byzantine::{ByzantineAgreement, ByzantineConfig};
use qs_rust::qs_coin_flip::{CoinFlip, CoinFlipConfig};
use qs_rust::qs_commitment::{BitCommitment, CommitmentConfig};
use qs_rust::qs_position::PositionConfig;
use qs_rust::qs_qkd::{Bb84, QkdConfig};
use qs_rust::qs_qrng::{Qrng, QrngConfig};
use qs_rust::qs_random::seed_to_hex;
use qs_rust::qs_secret_sharing::{SecretSharing, SharingConfig};
use qs_rust::qs_time_sync::{TimeSync, TimeSyncConfig};
use qs_rust::{
    resolve_seed, FlakyOracle, PhaseEngine, Protocol, QuantumOracle, RoundController,
    SeededSource, TableOracle,
};

/// Scenario file format
#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    meta: ScenarioMeta,

    /// Oracle overrides (optional)
    #[serde(default)]
    oracle: OracleOverrides,

    /// Protocol selection plus its configuration overrides
    protocol: ProtocolSection,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
    hypothesis: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct OracleOverrides {
    /// Fail every n-th measurement to exercise the degraded path
    fail_every: Option<usize>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum ProtocolSection {
    Byzantine(ByzantineConfig),
    Position(PositionConfig),
    SecretSharing(SharingConfig),
    Commitment(CommitmentConfig),
    CoinFlip(CoinFlipConfig),
    Qkd(QkdConfig),
    TimeSync(TimeSyncConfig),
    Qrng(QrngConfig),
}

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .init()
        .unwrap();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED_HEX]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/byzantine_honest.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/qkd.yaml --seed 0x123456...", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);

    // Parse optional seed
    let seed: Option<[u8; 32]> = if args.len() >= 4 && args[2] == "--seed" {
        Some(parse_seed_hex(&args[3]))
    } else {
        None
    };

    if path.is_file() {
        run_scenario_file(path, seed);
    } else if path.is_dir() {
        run_scenario_directory(path, seed);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn run_scenario_directory(dir: &Path, seed: Option<[u8; 32]>) {
    let mut scenarios = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                  ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, seed);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  All scenarios complete!                               ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
}

fn run_scenario_file(path: &Path, seed: Option<[u8; 32]>) {
    println!("Loading scenario from: {}", path.display());

    let yaml_content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path.display(), e);
        std::process::exit(1);
    });

    let scenario: ScenarioFile = serde_yaml::from_str(&yaml_content).unwrap_or_else(|e| {
        eprintln!("Failed to parse {}: {}", path.display(), e);
        std::process::exit(1);
    });

    println!("\n╔════════════════════════════════════════════════════════╗");
    match scenario.meta.name {
        Some(ref name) => println!("║  {}", name),
        None => println!(
            "║  Scenario: {}",
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("?")
        ),
    }
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc);
    }

    if let Some(ref hypothesis) = scenario.meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    let seed = resolve_seed(seed);
    println!("Seed: 0x{}", seed_to_hex(&seed));
    if let Some(n) = scenario.oracle.fail_every {
        println!("Oracle: failing every {} measurement(s)", n);
    }
    println!();

    let rng = Box::new(SeededSource::from_seed(seed));
    let oracle: Box<dyn QuantumOracle> = match scenario.oracle.fail_every {
        Some(n) => Box::new(FlakyOracle::new(n)),
        None => Box::new(TableOracle),
    };

    let outcome = match scenario.protocol {
        ProtocolSection::Byzantine(config) => {
            run_protocol::<ByzantineAgreement>(config, rng, oracle)
        }
        ProtocolSection::Position(config) => run_position(config, rng, oracle),
        ProtocolSection::SecretSharing(config) => {
            run_protocol::<SecretSharing>(config, rng, oracle)
        }
        ProtocolSection::Commitment(config) => run_protocol::<BitCommitment>(config, rng, oracle),
        ProtocolSection::CoinFlip(config) => run_protocol::<CoinFlip>(config, rng, oracle),
        ProtocolSection::Qkd(config) => run_protocol::<Bb84>(config, rng, oracle),
        ProtocolSection::TimeSync(config) => run_protocol::<TimeSync>(config, rng, oracle),
        ProtocolSection::Qrng(config) => run_protocol::<Qrng>(config, rng, oracle),
    };

    match outcome {
        Ok(()) => println!("\n✓ Scenario complete!\n"),
        Err(e) => {
            eprintln!("\n✗ Scenario failed: {}\n", e);
            std::process::exit(1);
        }
    }
}

fn run_protocol<P: Protocol>(
    config: P::Config,
    rng: Box<SeededSource>,
    oracle: Box<dyn QuantumOracle>,
) -> Result<(), String> {
    let mut engine: PhaseEngine<P> = PhaseEngine::new(rng, oracle);
    engine.initialize(config).map_err(|e| format!("configuration rejected: {}", e))?;

    let mut degraded_steps = 0;
    loop {
        let report = engine.advance().map_err(|e| e.to_string())?;
        if report.degraded {
            degraded_steps += 1;
        }
        print_tick(
            engine.tick(),
            &report.position,
            report.step,
            &report.messages[..],
            &report.notes,
        );
        if report.complete {
            println!("\n╔════════════════════════════════════════════════════════╗");
            println!("║  {} RESULT", P::NAME.to_uppercase());
            println!("╚════════════════════════════════════════════════════════╝\n");
            if let Some(outcome) = report.outcome {
                println!("  {}", outcome);
            }
            println!("  Ticks:               {}", engine.tick());
            println!("  Degraded steps:      {}", degraded_steps);
            return Ok(());
        }
    }
}

fn run_position(
    config: PositionConfig,
    rng: Box<SeededSource>,
    oracle: Box<dyn QuantumOracle>,
) -> Result<(), String> {
    let mut controller = RoundController::new(config, rng, oracle)
        .map_err(|e| format!("configuration rejected: {}", e))?;

    loop {
        let tick = controller.advance().map_err(|e| e.to_string())?;
        if tick.report.idle.is_none() {
            print_tick(
                controller.engine().tick(),
                &format!("r{} {}", tick.round, tick.report.position),
                tick.report.step,
                &tick.report.messages[..],
                &tick.report.notes,
            );
        }
        if let Some(result) = tick.recorded {
            println!("  ── round {}: {}", tick.round, result);
        }
        if tick.finished {
            break;
        }
    }

    controller.summary().print_summary();
    Ok(())
}

fn print_tick<M: Display>(
    tick: u64,
    position: &dyn Display,
    step: u32,
    messages: &[M],
    notes: &[String],
) {
    if messages.is_empty() && notes.is_empty() {
        return;
    }
    let where_ = format!("{}.{}", position, step);
    for message in messages {
        println!("  {:>4}  {:<24} {}", tick, where_, message);
    }
    for note in notes {
        println!("  {:>4}  {:<24} · {}", tick, where_, note);
    }
}

fn parse_seed_hex(hex: &str) -> [u8; 32] {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut seed = [0u8; 32];

    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i >= 32 {
            break;
        }
        let byte_str = std::str::from_utf8(chunk).unwrap_or_else(|e| {
            eprintln!("Invalid hex seed: {}", e);
            std::process::exit(1);
        });
        seed[i] = u8::from_str_radix(byte_str, 16).unwrap_or_else(|e| {
            eprintln!("Invalid hex seed: {}", e);
            std::process::exit(1);
        });
    }

    seed
}
