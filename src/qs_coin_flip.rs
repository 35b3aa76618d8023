//! Quantum coin flipping by orientation guessing.
//!
//! Alice encodes a string of random bits in one secret orientation and sends
//! the photons. Bob measures half of them in each orientation, then guesses
//! Alice's orientation; he wins the flip iff the guess is right. Alice then
//! reveals, and Bob checks that every photon he measured in her orientation
//! reproduced her bit.

use std::fmt;

use rand::seq::SliceRandom;

use crate::qs_engine::{PhaseSpec, Protocol, StepContext, StepCount};
use crate::qs_errors::{ConfigError, EngineError};
use crate::qs_interface::{bits_to_string, check_bit, Bit, Role, Step};
use crate::qs_oracle::{Basis, QubitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlipRole {
    Alice,
    Bob,
}

impl Role for FlipRole {}

impl fmt::Display for FlipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlipRole::Alice => write!(f, "Alice"),
            FlipRole::Bob => write!(f, "Bob"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipPhase {
    Preparation,
    Transmission,
    Measurement,
    Guess,
    Reveal,
}

impl fmt::Display for FlipPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlipPhase::Preparation => write!(f, "preparation"),
            FlipPhase::Transmission => write!(f, "transmission"),
            FlipPhase::Measurement => write!(f, "measurement"),
            FlipPhase::Guess => write!(f, "guess"),
            FlipPhase::Reveal => write!(f, "reveal"),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct CoinFlipConfig {
    pub num_bits: usize,
    /// Alice's secret orientation; random when absent
    pub alice_orientation: Option<Basis>,
    /// Bob's guess; random when absent
    pub bob_guess: Option<Basis>,
    pub random_bits: Option<Vec<Bit>>,
}

impl Default for CoinFlipConfig {
    fn default() -> Self {
        Self {
            num_bits: 12,
            alice_orientation: None,
            bob_guess: None,
            random_bits: None,
        }
    }
}

impl CoinFlipConfig {
    pub fn fixed(alice_orientation: Basis, bob_guess: Basis) -> Self {
        Self {
            alice_orientation: Some(alice_orientation),
            bob_guess: Some(bob_guess),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoinFlipState {
    pub random_bits: Vec<Bit>,
    pub alice_orientation: Option<Basis>,
    pub photons_sent: bool,
    pub bob_bases: Vec<Basis>,
    pub bob_results: Vec<Bit>,
    pub bob_guess: Option<Basis>,
    /// Positions Bob measured in Alice's orientation, with agreement
    pub checks: Vec<(usize, bool)>,
    pub revealed: bool,
    pub degraded: bool,
}

type Ctx<'a> = StepContext<'a, CoinFlip>;

fn preparation(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let n = ctx.config.num_bits;
    ctx.state.random_bits = match &ctx.config.random_bits {
        Some(bits) => bits.clone(),
        None => (0..n).map(|_| ctx.rng.next_bit()).collect(),
    };
    let orientation = match ctx.config.alice_orientation {
        Some(basis) => basis,
        None => Basis::random(&mut *ctx.rng),
    };
    ctx.state.alice_orientation = Some(orientation);
    ctx.note(format!(
        "Alice picks bits {} and a secret orientation",
        bits_to_string(&ctx.state.random_bits)
    ));
    Ok(())
}

fn transmission(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let orientation = ctx.state.alice_orientation.ok_or_else(|| ctx.missing("alice_orientation"))?;
    let photons: String = ctx
        .state
        .random_bits
        .iter()
        .map(|bit| QubitState::new(orientation, *bit).photon())
        .collect();
    ctx.quantum(FlipRole::Alice, FlipRole::Bob, photons);
    ctx.state.photons_sent = true;
    Ok(())
}

fn measurement(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let orientation = ctx.state.alice_orientation.ok_or_else(|| ctx.missing("alice_orientation"))?;
    if !ctx.state.photons_sent {
        return Err(ctx.missing("photons_sent"));
    }
    let n = ctx.state.random_bits.len();
    let mut bases: Vec<Basis> = (0..n)
        .map(|i| if i < n / 2 { Basis::Z } else { Basis::X })
        .collect();
    bases.shuffle(ctx.rng.rng());

    let mut results = Vec::with_capacity(n);
    for i in 0..n {
        let prepared = QubitState::new(orientation, ctx.state.random_bits[i]);
        results.push(ctx.measure(prepared, bases[i]));
    }
    ctx.state.degraded |= ctx.degraded();
    ctx.note(format!(
        "Bob measures {} in bases {}",
        bits_to_string(&results),
        bases.iter().map(|b| b.symbol()).collect::<String>()
    ));
    ctx.state.bob_bases = bases;
    ctx.state.bob_results = results;
    Ok(())
}

fn guess(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let guess = match ctx.config.bob_guess {
        Some(basis) => basis,
        None => Basis::random(&mut *ctx.rng),
    };
    ctx.state.bob_guess = Some(guess);
    ctx.classical(FlipRole::Bob, FlipRole::Alice, format!("guess: {}", guess.orientation()));
    Ok(())
}

fn reveal(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let orientation = ctx.state.alice_orientation.ok_or_else(|| ctx.missing("alice_orientation"))?;
    ctx.classical(
        FlipRole::Alice,
        FlipRole::Bob,
        format!(
            "{}, bits {}",
            orientation.orientation(),
            bits_to_string(&ctx.state.random_bits)
        ),
    );
    let checks: Vec<(usize, bool)> = ctx
        .state
        .bob_bases
        .iter()
        .enumerate()
        .filter(|(_, basis)| **basis == orientation)
        .map(|(i, _)| (i, ctx.state.bob_results[i] == ctx.state.random_bits[i]))
        .collect();
    ctx.state.checks = checks;
    ctx.state.revealed = true;
    Ok(())
}

static FLIP_PHASES: [PhaseSpec<CoinFlip>; 5] = [
    PhaseSpec {
        phase: FlipPhase::Preparation,
        steps: StepCount::Fixed(1),
        handler: preparation,
    },
    PhaseSpec {
        phase: FlipPhase::Transmission,
        steps: StepCount::Fixed(1),
        handler: transmission,
    },
    PhaseSpec {
        phase: FlipPhase::Measurement,
        steps: StepCount::Fixed(1),
        handler: measurement,
    },
    PhaseSpec {
        phase: FlipPhase::Guess,
        steps: StepCount::Fixed(1),
        handler: guess,
    },
    PhaseSpec {
        phase: FlipPhase::Reveal,
        steps: StepCount::Fixed(1),
        handler: reveal,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinFlipOutcome {
    pub alice_orientation: Basis,
    pub bob_guess: Basis,
    pub bob_wins: bool,
    /// Every same-orientation measurement matched Alice's bit
    pub honest: bool,
    pub checked: usize,
    pub degraded: bool,
}

impl fmt::Display for CoinFlipOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Alice {} / Bob guessed {}: {} wins, {} ({} checked)",
            self.alice_orientation.orientation(),
            self.bob_guess.orientation(),
            if self.bob_wins { "Bob" } else { "Alice" },
            if self.honest { "honest" } else { "cheating detected" },
            self.checked
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoinFlip;

impl Protocol for CoinFlip {
    type Role = FlipRole;
    type Phase = FlipPhase;
    type Config = CoinFlipConfig;
    type State = CoinFlipState;
    type Outcome = CoinFlipOutcome;

    const NAME: &'static str = "coin-flip";

    fn phase_table() -> &'static [PhaseSpec<Self>] {
        &FLIP_PHASES
    }

    fn initialize(config: &CoinFlipConfig) -> Result<CoinFlipState, ConfigError> {
        if config.num_bits < 2 || config.num_bits % 2 != 0 {
            return Err(ConfigError::OutOfRange {
                field: "num_bits",
                value: config.num_bits as f64,
            });
        }
        if let Some(bits) = &config.random_bits {
            if bits.len() != config.num_bits {
                return Err(ConfigError::Length {
                    field: "random_bits",
                    expected: config.num_bits,
                    actual: bits.len(),
                });
            }
            for bit in bits {
                check_bit("random_bits", *bit)?;
            }
        }
        Ok(CoinFlipState::default())
    }

    fn verify(
        _config: &CoinFlipConfig,
        state: &CoinFlipState,
    ) -> Result<CoinFlipOutcome, EngineError> {
        let missing = |field| EngineError::MissingState {
            phase: FlipPhase::Reveal.to_string(),
            step: 1,
            field,
        };
        let alice_orientation = state
            .alice_orientation
            .ok_or_else(|| missing("alice_orientation"))?;
        let bob_guess = state.bob_guess.ok_or_else(|| missing("bob_guess"))?;
        if !state.revealed {
            return Err(missing("revealed"));
        }
        Ok(CoinFlipOutcome {
            alice_orientation,
            bob_guess,
            bob_wins: alice_orientation == bob_guess,
            honest: state.checks.iter().all(|(_, ok)| *ok),
            checked: state.checks.len(),
            degraded: state.degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qs_engine::PhaseEngine;
    use crate::qs_oracle::FlakyOracle;
    use crate::qs_random::SeededSource;

    fn run(config: CoinFlipConfig, seed: u64) -> CoinFlipOutcome {
        let mut engine: PhaseEngine<CoinFlip> = PhaseEngine::seeded(seed);
        engine.initialize(config).unwrap();
        engine.run_to_completion().unwrap().unwrap()
    }

    #[test]
    fn test_correct_guess_wins() {
        let outcome = run(CoinFlipConfig::fixed(Basis::X, Basis::X), 1);
        assert!(outcome.bob_wins);
        let outcome = run(CoinFlipConfig::fixed(Basis::X, Basis::Z), 1);
        assert!(!outcome.bob_wins);
    }

    #[test]
    fn test_honest_run_passes_check() {
        for seed in 0..20 {
            let outcome = run(CoinFlipConfig::default(), seed);
            assert!(outcome.honest);
            assert_eq!(outcome.checked, 6);
        }
    }

    #[test]
    fn test_bob_measures_half_in_each_basis() {
        let mut engine: PhaseEngine<CoinFlip> = PhaseEngine::seeded(4);
        engine.initialize(CoinFlipConfig::default()).unwrap();
        engine.run_to_completion().unwrap();
        let state = engine.state();
        let z = state.bob_bases.iter().filter(|b| **b == Basis::Z).count();
        assert_eq!(z, 6);
        assert_eq!(state.bob_bases.len(), 12);
        for (i, ok) in &state.checks {
            assert!(*ok);
            assert_eq!(state.bob_results[*i], state.random_bits[*i]);
        }
    }

    #[test]
    fn test_basis_shuffle_follows_seed() {
        let bases = |seed| {
            let mut engine: PhaseEngine<CoinFlip> = PhaseEngine::seeded(seed);
            engine.initialize(CoinFlipConfig::default()).unwrap();
            engine.run_to_completion().unwrap();
            engine.state().bob_bases.clone()
        };
        assert_eq!(bases(11), bases(11));
        let all: Vec<Vec<Basis>> = (0..8).map(bases).collect();
        assert!(all.iter().any(|b| *b != all[0]));
    }

    #[test]
    fn test_photons_use_alice_orientation() {
        let mut config = CoinFlipConfig::fixed(Basis::Z, Basis::Z);
        config.num_bits = 4;
        config.random_bits = Some(vec![0, 1, 1, 0]);
        let mut engine: PhaseEngine<CoinFlip> = PhaseEngine::seeded(0);
        engine.initialize(config).unwrap();
        engine.advance().unwrap();
        engine.advance().unwrap();
        let r = engine.advance().unwrap();
        assert_eq!(r.messages[0].label, "→↑↑→");
    }

    #[test]
    fn test_oracle_outage_may_fail_honesty_check() {
        let mut engine: PhaseEngine<CoinFlip> = PhaseEngine::new(
            Box::new(SeededSource::from_u64(2)),
            Box::new(FlakyOracle::new(1)),
        );
        engine.initialize(CoinFlipConfig::default()).unwrap();
        let outcome = engine.run_to_completion().unwrap().unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.checked, 6);
    }

    #[test]
    fn test_config_validation() {
        let mut engine: PhaseEngine<CoinFlip> = PhaseEngine::seeded(0);
        let mut config = CoinFlipConfig::default();
        config.num_bits = 7;
        assert!(matches!(engine.initialize(config), Err(ConfigError::OutOfRange { .. })));
        let mut config = CoinFlipConfig::default();
        config.random_bits = Some(vec![0; 3]);
        assert!(matches!(engine.initialize(config), Err(ConfigError::Length { .. })));
    }
}
