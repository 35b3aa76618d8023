//! BB84 key distribution with basis sifting.
//!
//! Alice sends one polarized photon per bit in a random basis, Bob measures
//! each in his own random basis. They publish the bases, keep the positions
//! where the bases matched and compute the error rate over the sifted key.

use std::fmt;

use crate::qs_engine::{PhaseSpec, Protocol, StepContext, StepCount};
use crate::qs_errors::{ConfigError, EngineError};
use crate::qs_interface::{bits_to_string, parse_bit, Bit, Role, Step};
use crate::qs_oracle::{Basis, QubitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QkdRole {
    Alice,
    Bob,
}

impl Role for QkdRole {}

impl fmt::Display for QkdRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QkdRole::Alice => write!(f, "Alice"),
            QkdRole::Bob => write!(f, "Bob"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QkdPhase {
    Preparation,
    Transmission,
    Sifting,
}

impl fmt::Display for QkdPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QkdPhase::Preparation => write!(f, "preparation"),
            QkdPhase::Transmission => write!(f, "transmission"),
            QkdPhase::Sifting => write!(f, "sifting"),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct QkdConfig {
    pub num_bits: usize,
    /// String of '0'/'1'; only the first `num_bits` characters are used
    pub custom_bits: Option<String>,
    pub qber_threshold: f64,
}

impl Default for QkdConfig {
    fn default() -> Self {
        Self {
            num_bits: 8,
            custom_bits: None,
            qber_threshold: 0.25,
        }
    }
}

impl QkdConfig {
    pub fn with_custom_bits(mut self, bits: &str) -> Self {
        self.custom_bits = Some(bits.to_string());
        self
    }

    /// Parsed custom bits, truncated to `num_bits`
    pub fn alice_bits(&self) -> Result<Option<Vec<Bit>>, ConfigError> {
        let Some(raw) = &self.custom_bits else {
            return Ok(None);
        };
        let raw = raw.trim();
        let bits = raw
            .chars()
            .map(|c| parse_bit("custom_bits", c))
            .collect::<Result<Vec<Bit>, ConfigError>>()?;
        if bits.len() < self.num_bits {
            return Err(ConfigError::Length {
                field: "custom_bits",
                expected: self.num_bits,
                actual: bits.len(),
            });
        }
        Ok(Some(bits[..self.num_bits].to_vec()))
    }
}

fn photon_steps(config: &QkdConfig) -> Step {
    config.num_bits as Step
}

#[derive(Debug, Clone, Default)]
pub struct QkdState {
    pub alice_bits: Vec<Bit>,
    pub alice_bases: Vec<Basis>,
    pub bob_bases: Vec<Basis>,
    pub bob_bits: Vec<Bit>,
    pub sifted_indices: Vec<usize>,
    pub sifted_key: Vec<Bit>,
    pub bob_key: Vec<Bit>,
    pub qber: Option<f64>,
    pub degraded: bool,
}

/// Positions where both sides used the same basis
pub fn sift(alice_bases: &[Basis], bob_bases: &[Basis]) -> Vec<usize> {
    alice_bases
        .iter()
        .zip(bob_bases)
        .enumerate()
        .filter(|(_, (a, b))| a == b)
        .map(|(i, _)| i)
        .collect()
}

/// Fraction of differing positions; 0.0 for an empty key
pub fn key_error_rate(alice: &[Bit], bob: &[Bit]) -> f64 {
    if alice.is_empty() {
        return 0.0;
    }
    let errors = alice.iter().zip(bob).filter(|(a, b)| a != b).count();
    errors as f64 / alice.len() as f64
}

type Ctx<'a> = StepContext<'a, Bb84>;

fn preparation(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let bits = match ctx.config.alice_bits()? {
        Some(bits) => bits,
        None => (0..ctx.config.num_bits).map(|_| ctx.rng.next_bit()).collect(),
    };
    ctx.note(format!("Alice's raw bits {}", bits_to_string(&bits)));
    ctx.state.alice_bits = bits;
    Ok(())
}

fn transmission(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    let index = step as usize - 1;
    let bit = *ctx.state.alice_bits.get(index).ok_or_else(|| ctx.missing("alice_bits"))?;
    let alice_basis = Basis::random(&mut *ctx.rng);
    let bob_basis = Basis::random(&mut *ctx.rng);

    let photon = QubitState::new(alice_basis, bit);
    ctx.quantum(QkdRole::Alice, QkdRole::Bob, photon.photon());
    let measured = ctx.measure(photon, bob_basis);
    ctx.state.degraded |= ctx.degraded();
    ctx.note(format!(
        "bit {}: Alice {} {} / Bob {} -> {}",
        index + 1,
        alice_basis.symbol(),
        bit,
        bob_basis.symbol(),
        measured
    ));

    ctx.state.alice_bases.push(alice_basis);
    ctx.state.bob_bases.push(bob_basis);
    ctx.state.bob_bits.push(measured);
    Ok(())
}

fn sifting(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    match step {
        1 => {
            if ctx.state.bob_bases.len() != ctx.state.alice_bits.len() {
                return Err(ctx.missing("bob_bases"));
            }
            let symbols: String = ctx.state.bob_bases.iter().map(|b| b.symbol()).collect();
            ctx.classical(QkdRole::Bob, QkdRole::Alice, format!("bases {}", symbols));
            let kept = sift(&ctx.state.alice_bases, &ctx.state.bob_bases);
            let positions: Vec<String> = kept.iter().map(|i| (i + 1).to_string()).collect();
            ctx.classical(QkdRole::Alice, QkdRole::Bob, format!("keep {}", positions.join(",")));
            ctx.state.sifted_indices = kept;
        }
        2 => {
            let state = &*ctx.state;
            let alice: Vec<Bit> =
                state.sifted_indices.iter().map(|i| state.alice_bits[*i]).collect();
            let bob: Vec<Bit> = state.sifted_indices.iter().map(|i| state.bob_bits[*i]).collect();
            let qber = key_error_rate(&alice, &bob);
            ctx.note(format!("sifted key {} (QBER {:.2})", bits_to_string(&alice), qber));
            ctx.state.sifted_key = alice;
            ctx.state.bob_key = bob;
            ctx.state.qber = Some(qber);
        }
        _ => return Err(ctx.unexpected_step()),
    }
    Ok(())
}

static QKD_PHASES: [PhaseSpec<Bb84>; 3] = [
    PhaseSpec {
        phase: QkdPhase::Preparation,
        steps: StepCount::Fixed(1),
        handler: preparation,
    },
    PhaseSpec {
        phase: QkdPhase::Transmission,
        steps: StepCount::PerConfig(photon_steps),
        handler: transmission,
    },
    PhaseSpec {
        phase: QkdPhase::Sifting,
        steps: StepCount::Fixed(2),
        handler: sifting,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct QkdOutcome {
    pub sifted_key: Vec<Bit>,
    pub bob_key: Vec<Bit>,
    pub qber: f64,
    /// QBER at or below the threshold
    pub secure: bool,
    pub degraded: bool,
}

impl fmt::Display for QkdOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key {} (QBER {:.1}%) {}",
            bits_to_string(&self.sifted_key),
            self.qber * 100.0,
            if self.secure { "accepted" } else { "aborted" }
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Bb84;

impl Protocol for Bb84 {
    type Role = QkdRole;
    type Phase = QkdPhase;
    type Config = QkdConfig;
    type State = QkdState;
    type Outcome = QkdOutcome;

    const NAME: &'static str = "bb84";

    fn phase_table() -> &'static [PhaseSpec<Self>] {
        &QKD_PHASES
    }

    fn initialize(config: &QkdConfig) -> Result<QkdState, ConfigError> {
        if config.num_bits == 0 {
            return Err(ConfigError::OutOfRange {
                field: "num_bits",
                value: 0.0,
            });
        }
        if !(0.0..=1.0).contains(&config.qber_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "qber_threshold",
                value: config.qber_threshold,
            });
        }
        config.alice_bits()?;
        Ok(QkdState::default())
    }

    fn verify(config: &QkdConfig, state: &QkdState) -> Result<QkdOutcome, EngineError> {
        let qber = state.qber.ok_or(EngineError::MissingState {
            phase: QkdPhase::Sifting.to_string(),
            step: 2,
            field: "qber",
        })?;
        Ok(QkdOutcome {
            sifted_key: state.sifted_key.clone(),
            bob_key: state.bob_key.clone(),
            qber,
            secure: qber <= config.qber_threshold,
            degraded: state.degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qs_engine::{schedule_length, PhaseEngine};
    use crate::qs_oracle::FlakyOracle;
    use crate::qs_random::SeededSource;

    #[test]
    fn test_noiseless_channel_gives_identical_keys() {
        for seed in 0..20 {
            let mut engine: PhaseEngine<Bb84> = PhaseEngine::seeded(seed);
            engine.initialize(QkdConfig::default()).unwrap();
            let outcome = engine.run_to_completion().unwrap().unwrap();
            assert_eq!(outcome.sifted_key, outcome.bob_key);
            assert_eq!(outcome.qber, 0.0);
            assert!(outcome.secure);

            let state = engine.state();
            assert_eq!(state.sifted_indices, sift(&state.alice_bases, &state.bob_bases));
        }
    }

    #[test]
    fn test_custom_bits_are_truncated() {
        let config = QkdConfig::default().with_custom_bits("1010101011");
        assert_eq!(config.alice_bits().unwrap(), Some(vec![1, 0, 1, 0, 1, 0, 1, 0]));

        let mut engine: PhaseEngine<Bb84> = PhaseEngine::seeded(1);
        engine.initialize(config).unwrap();
        engine.advance().unwrap();
        assert_eq!(engine.state().alice_bits.len(), 8);
    }

    #[test]
    fn test_custom_bits_validation() {
        let mut engine: PhaseEngine<Bb84> = PhaseEngine::seeded(1);
        assert!(matches!(
            engine.initialize(QkdConfig::default().with_custom_bits("0101")),
            Err(ConfigError::Length { expected: 8, actual: 4, .. })
        ));
        assert!(matches!(
            engine.initialize(QkdConfig::default().with_custom_bits("01012010")),
            Err(ConfigError::InvalidBit { .. })
        ));
    }

    #[test]
    fn test_one_photon_per_step() {
        let config = QkdConfig::default();
        assert_eq!(schedule_length::<Bb84>(&config), 2 + 9 + 3);

        let mut engine: PhaseEngine<Bb84> = PhaseEngine::seeded(3);
        engine.initialize(config).unwrap();
        engine.advance().unwrap();
        engine.advance().unwrap();
        let r = engine.advance().unwrap();
        assert_eq!(r.messages.len(), 1);
        assert!(["→", "↑", "↘", "↗"].contains(&r.messages[0].label.as_str()));
        assert_eq!(r.state.bob_bits.len(), 1);
    }

    #[test]
    fn test_error_rate() {
        assert_eq!(key_error_rate(&[], &[]), 0.0);
        assert_eq!(key_error_rate(&[0, 1, 1, 0], &[0, 1, 0, 0]), 0.25);
        assert_eq!(
            sift(&[Basis::Z, Basis::X, Basis::X], &[Basis::Z, Basis::Z, Basis::X]),
            vec![0, 2]
        );
    }

    #[test]
    fn test_outage_raises_error_rate_without_crashing() {
        let mut engine: PhaseEngine<Bb84> = PhaseEngine::new(
            Box::new(SeededSource::from_u64(11)),
            Box::new(FlakyOracle::new(1)),
        );
        let mut config = QkdConfig::default();
        config.num_bits = 64;
        engine.initialize(config).unwrap();
        let outcome = engine.run_to_completion().unwrap().unwrap();
        assert!(outcome.degraded);
        assert!((0.0..=1.0).contains(&outcome.qber));
    }
}
