//! Beam-splitter random number generator: each |+⟩ photon is measured in
//! the Z basis and the detector that clicks is the bit.

use std::fmt;

use crate::qs_engine::{PhaseSpec, Protocol, StepContext, StepCount};
use crate::qs_errors::{ConfigError, EngineError};
use crate::qs_interface::{bits_to_string, Bit, Role, Step};
use crate::qs_oracle::{Basis, QubitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QrngRole {
    Source,
    /// transmitted path
    Detector0,
    /// reflected path
    Detector1,
}

impl Role for QrngRole {}

impl QrngRole {
    pub fn detector(bit: Bit) -> Self {
        if bit == 0 {
            QrngRole::Detector0
        } else {
            QrngRole::Detector1
        }
    }
}

impl fmt::Display for QrngRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QrngRole::Source => write!(f, "source"),
            QrngRole::Detector0 => write!(f, "D0"),
            QrngRole::Detector1 => write!(f, "D1"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrngPhase {
    Generation,
}

impl fmt::Display for QrngPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation")
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct QrngConfig {
    pub num_bits: usize,
}

impl Default for QrngConfig {
    fn default() -> Self {
        Self { num_bits: 10 }
    }
}

fn photon_steps(config: &QrngConfig) -> Step {
    config.num_bits as Step
}

#[derive(Debug, Clone, Default)]
pub struct QrngState {
    pub bits: Vec<Bit>,
    pub degraded: bool,
}

fn generation(ctx: &mut StepContext<'_, Qrng>, _step: Step) -> Result<(), EngineError> {
    let bit = ctx.measure(QubitState::PLUS, Basis::Z);
    ctx.state.degraded |= ctx.degraded();
    ctx.quantum(QrngRole::Source, QrngRole::detector(bit), "photon");
    ctx.state.bits.push(bit);
    Ok(())
}

static QRNG_PHASES: [PhaseSpec<Qrng>; 1] = [PhaseSpec {
    phase: QrngPhase::Generation,
    steps: StepCount::PerConfig(photon_steps),
    handler: generation,
}];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrngOutcome {
    pub bits: Vec<Bit>,
    pub ones: usize,
    pub degraded: bool,
}

impl fmt::Display for QrngOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} ones of {})", bits_to_string(&self.bits), self.ones, self.bits.len())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Qrng;

impl Protocol for Qrng {
    type Role = QrngRole;
    type Phase = QrngPhase;
    type Config = QrngConfig;
    type State = QrngState;
    type Outcome = QrngOutcome;

    const NAME: &'static str = "qrng";

    fn phase_table() -> &'static [PhaseSpec<Self>] {
        &QRNG_PHASES
    }

    fn initialize(config: &QrngConfig) -> Result<QrngState, ConfigError> {
        if config.num_bits == 0 {
            return Err(ConfigError::OutOfRange {
                field: "num_bits",
                value: 0.0,
            });
        }
        Ok(QrngState::default())
    }

    fn verify(config: &QrngConfig, state: &QrngState) -> Result<QrngOutcome, EngineError> {
        if state.bits.len() != config.num_bits {
            return Err(EngineError::MissingState {
                phase: QrngPhase::Generation.to_string(),
                step: state.bits.len() as Step,
                field: "bits",
            });
        }
        Ok(QrngOutcome {
            bits: state.bits.clone(),
            ones: state.bits.iter().filter(|b| **b == 1).count(),
            degraded: state.degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qs_engine::PhaseEngine;
    use crate::qs_oracle::TableOracle;
    use crate::qs_random::ScriptedSource;

    #[test]
    fn test_generates_requested_bits() {
        let mut engine: PhaseEngine<Qrng> = PhaseEngine::seeded(8);
        engine.initialize(QrngConfig::default()).unwrap();
        let outcome = engine.run_to_completion().unwrap().unwrap();
        assert_eq!(outcome.bits.len(), 10);
        assert!(outcome.bits.iter().all(|b| *b <= 1));
        assert!(!outcome.degraded);
    }

    #[test]
    fn test_detector_follows_bit() {
        let rng = ScriptedSource::new().with_bits(&[1, 0, 1]);
        let mut engine: PhaseEngine<Qrng> = PhaseEngine::new(Box::new(rng), Box::new(TableOracle));
        engine.initialize(QrngConfig { num_bits: 3 }).unwrap();
        let r = engine.advance().unwrap();
        assert_eq!(r.messages[0].to, QrngRole::Detector1);
        let outcome = engine.run_to_completion().unwrap().unwrap();
        assert_eq!(outcome.bits, vec![1, 0, 1]);
        assert_eq!(outcome.ones, 2);
    }

    #[test]
    fn test_roughly_balanced() {
        let mut engine: PhaseEngine<Qrng> = PhaseEngine::seeded(21);
        engine.initialize(QrngConfig { num_bits: 2000 }).unwrap();
        let outcome = engine.run_to_completion().unwrap().unwrap();
        assert!(outcome.ones > 850 && outcome.ones < 1150);
    }

    #[test]
    fn test_zero_bits_rejected() {
        let mut engine: PhaseEngine<Qrng> = PhaseEngine::seeded(0);
        assert!(engine.initialize(QrngConfig { num_bits: 0 }).is_err());
    }
}
