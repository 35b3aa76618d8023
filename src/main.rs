use log::{info, warn};
use simple_logger::SimpleLogger;

use qs_rust::qs_byzantine::{ByzRole, ByzStrategy, ByzantineAgreement, ByzantineConfig};
use qs_rust::qs_coin_flip::{CoinFlip, CoinFlipConfig};
use qs_rust::qs_commitment::{BitCommitment, CommitmentConfig};
use qs_rust::qs_position::PositionConfig;
use qs_rust::qs_qkd::{Bb84, QkdConfig};
use qs_rust::qs_qrng::{Qrng, QrngConfig};
use qs_rust::qs_random::seed_to_hex;
use qs_rust::qs_secret_sharing::{SecretSharing, SharingConfig};
use qs_rust::qs_time_sync::{TimeSync, TimeSyncConfig};
use qs_rust::{
    resolve_seed, EngineError, LoggingEventSink, PhaseEngine, Protocol, RoundController,
    SeededSource, TableOracle,
};

/// Drive one protocol to completion, logging every tick's messages.
fn run<P: Protocol>(config: P::Config, seed: [u8; 32]) -> Result<(), EngineError> {
    let mut engine: PhaseEngine<P> = PhaseEngine::new(
        Box::new(SeededSource::from_seed(seed)),
        Box::new(TableOracle),
    )
    .with_event_sink(Box::new(LoggingEventSink::new(true)));

    if let Err(err) = engine.initialize(config) {
        warn!("{}: {}", P::NAME, err);
        return Ok(());
    }

    loop {
        let report = engine.advance()?;
        for message in &report.messages {
            info!("{} [{} {}] {}", engine.tick(), report.position, report.step, message);
        }
        for note in &report.notes {
            info!("{} [{} {}] {}", engine.tick(), report.position, report.step, note);
        }
        if report.complete {
            if let Some(outcome) = report.outcome {
                info!("{}: {}", P::NAME, outcome);
            }
            return Ok(());
        }
    }
}

fn main() {
    SimpleLogger::new().init().unwrap();

    info!("starting");

    let seed = resolve_seed(None);
    info!("seed = {}", seed_to_hex(&seed));

    let results = [
        run::<ByzantineAgreement>(ByzantineConfig::honest(1), seed),
        run::<ByzantineAgreement>(
            ByzantineConfig::honest(0)
                .with_adversary(ByzRole::Sender, ByzStrategy::SendInconsistentValues),
            seed,
        ),
        run::<SecretSharing>(SharingConfig::default(), seed),
        run::<BitCommitment>(CommitmentConfig::new(1), seed),
        run::<CoinFlip>(CoinFlipConfig::default(), seed),
        run::<Bb84>(QkdConfig::default(), seed),
        run::<TimeSync>(TimeSyncConfig::default(), seed),
        run::<Qrng>(QrngConfig::default(), seed),
    ];
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        warn!("run aborted: {}", err);
    }

    for config in [PositionConfig::default(), PositionConfig::default().dishonest()] {
        let summary = RoundController::new(
            config,
            Box::new(SeededSource::from_seed(seed)),
            Box::new(TableOracle),
        )
        .map_err(EngineError::from)
        .and_then(|mut controller| controller.run_all());
        match summary {
            Ok(summary) => summary.print_summary(),
            Err(err) => warn!("position verification aborted: {}", err),
        }
    }

    info!("done");
}
