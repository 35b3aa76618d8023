//! Threshold secret sharing over a GHZ state.
//!
//! The dealer encodes one secret bit into an n-qubit GHZ state and hands one
//! qubit to each participant. Every participant measures in a random X or Z
//! basis. The first k participants pool their results: Z outcomes must agree
//! with each other, and the secret is the X parity XORed with the common Z
//! value (or just the parity / just the Z value when only one basis was used).

use std::fmt;

use hashbrown::HashSet;

use crate::qs_engine::{PhaseSpec, Protocol, StepContext, StepCount};
use crate::qs_errors::{ConfigError, EngineError};
use crate::qs_interface::{bits_to_string, check_bit, Bit, Role, RolePair, Step};
use crate::qs_oracle::{Basis, QubitState};

pub const MIN_PARTICIPANTS: usize = 2;
pub const MAX_PARTICIPANTS: usize = 10;

const PARTICIPANT_NAMES: [&str; 9] = [
    "Bob", "Charlie", "Dave", "Eve", "Frank", "Grace", "Heidi", "Ivan", "Judy",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShareRole {
    Dealer,
    /// 1-based
    Participant(usize),
}

impl Role for ShareRole {}

impl fmt::Display for ShareRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareRole::Dealer => write!(f, "Alice"),
            ShareRole::Participant(i) => match PARTICIPANT_NAMES.get(i.wrapping_sub(1)) {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "P{}", i),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharePhase {
    Preparation,
    Distribution,
    Measurement,
    Reconstruction,
}

impl fmt::Display for SharePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharePhase::Preparation => write!(f, "preparation"),
            SharePhase::Distribution => write!(f, "distribution"),
            SharePhase::Measurement => write!(f, "measurement"),
            SharePhase::Reconstruction => write!(f, "reconstruction"),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub secret: Bit,
    /// Participants excluding the dealer
    pub participants: usize,
    /// Participants needed to reconstruct
    pub threshold: usize,
    /// Fixed measurement bases, one per participant; random when absent
    pub bases: Option<Vec<Basis>>,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            secret: 1,
            participants: 5,
            threshold: 3,
            bases: None,
        }
    }
}

impl SharingConfig {
    pub fn new(secret: Bit, participants: usize, threshold: usize) -> Self {
        Self {
            secret,
            participants,
            threshold,
            bases: None,
        }
    }

    pub fn with_bases(mut self, bases: Vec<Basis>) -> Self {
        self.bases = Some(bases);
        self
    }
}

fn participant_steps(config: &SharingConfig) -> Step {
    config.participants as Step
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionError {
    /// Z outcomes in the subset disagree
    InconsistentZ,
    /// A subset member has no outcome yet
    Incomplete,
}

impl fmt::Display for ReconstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconstructionError::InconsistentZ => write!(f, "inconsistent Z outcomes"),
            ReconstructionError::Incomplete => write!(f, "missing outcomes"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharingState {
    pub secret: Bit,
    pub participants: usize,
    pub threshold: usize,
    pub ghz_prepared: bool,
    pub entanglement_links: HashSet<RolePair<ShareRole>>,
    /// Qubits handed out so far
    pub distributed: usize,
    pub bases: Vec<Basis>,
    pub outcomes: Vec<Option<Bit>>,
    pub degraded: bool,
    pub reconstruction: Option<Result<Bit, ReconstructionError>>,
}

/// Recover the secret from a subset's bases and outcomes.
pub fn reconstruct(bases: &[Basis], outcomes: &[Option<Bit>]) -> Result<Bit, ReconstructionError> {
    let mut x_parity = 0;
    let mut z_value: Option<Bit> = None;
    for (basis, outcome) in bases.iter().zip(outcomes) {
        let bit = outcome.ok_or(ReconstructionError::Incomplete)?;
        match basis {
            Basis::X => x_parity ^= bit,
            Basis::Z => match z_value {
                None => z_value = Some(bit),
                Some(z) if z != bit => return Err(ReconstructionError::InconsistentZ),
                Some(_) => {}
            },
        }
    }
    Ok(match z_value {
        Some(z) => x_parity ^ z,
        None => x_parity,
    })
}

/// State the participant's qubit behaves as when measured, given the
/// outcomes already drawn. Keeps the first `threshold` shares consistent with
/// the secret; the remaining shares are uniform.
fn effective_preparation(state: &SharingState, index: usize) -> QubitState {
    let basis = state.bases[index];
    let k = state.threshold.min(state.bases.len());
    if index >= k {
        return QubitState::new(basis.other(), 0);
    }
    match basis {
        Basis::Z => QubitState::new(Basis::Z, state.secret),
        Basis::X => {
            let subset = &state.bases[..k];
            let last_x = subset.iter().rposition(|b| *b == Basis::X);
            if last_x != Some(index) {
                return QubitState::new(Basis::Z, 0);
            }
            let target = if subset.contains(&Basis::Z) { 0 } else { state.secret };
            let parity_so_far = (0..index)
                .filter(|i| subset[*i] == Basis::X)
                .filter_map(|i| state.outcomes[i])
                .fold(0, |acc, bit| acc ^ bit);
            QubitState::new(Basis::X, target ^ parity_so_far)
        }
    }
}

type Ctx<'a> = StepContext<'a, SecretSharing>;

fn participant_index(ctx: &Ctx<'_>, step: Step) -> Result<usize, EngineError> {
    let index = step as usize;
    if index == 0 || index > ctx.state.participants {
        return Err(EngineError::RoleOutOfRange {
            index,
            count: ctx.state.participants,
        });
    }
    Ok(index - 1)
}

fn preparation(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let n = ctx.state.participants;
    ctx.state.ghz_prepared = true;
    ctx.state.entanglement_links = (1..=n)
        .map(|i| RolePair::new(ShareRole::Dealer, ShareRole::Participant(i)))
        .collect();
    ctx.note(format!(
        "{} prepares (|{}⟩ + |{}⟩)/√2 with secret {}",
        ShareRole::Dealer,
        "0".repeat(n),
        "1".repeat(n),
        ctx.state.secret
    ));
    Ok(())
}

fn distribution(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    let index = participant_index(ctx, step)?;
    ctx.state.distributed = index + 1;
    ctx.quantum(
        ShareRole::Dealer,
        ShareRole::Participant(index + 1),
        format!("GHZ qubit {}", index + 1),
    );
    Ok(())
}

fn measurement(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    let index = participant_index(ctx, step)?;
    if ctx.state.distributed < ctx.state.participants {
        return Err(ctx.missing("distributed"));
    }
    if step == 1 {
        let n = ctx.state.participants;
        ctx.state.bases = match &ctx.config.bases {
            Some(bases) => bases.clone(),
            None => (0..n).map(|_| Basis::random(&mut *ctx.rng)).collect(),
        };
        ctx.state.outcomes = vec![None; n];
    }

    let prepared = effective_preparation(ctx.state, index);
    let basis = ctx.state.bases[index];
    let bit = ctx.measure(prepared, basis);
    ctx.state.degraded |= ctx.degraded();
    ctx.state.outcomes[index] = Some(bit);

    let participant = ShareRole::Participant(index + 1);
    ctx.state
        .entanglement_links
        .remove(&RolePair::new(ShareRole::Dealer, participant));
    ctx.classical(participant, ShareRole::Dealer, format!("basis {}", basis));
    Ok(())
}

fn reconstruction(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let k = ctx.state.threshold;
    if ctx.state.outcomes.len() < k {
        return Err(ctx.missing("outcomes"));
    }
    let collector = ShareRole::Participant(1);
    for i in 2..=k {
        if let Some(bit) = ctx.state.outcomes[i - 1] {
            let basis = ctx.state.bases[i - 1];
            ctx.classical(ShareRole::Participant(i), collector, format!("{}={}", basis, bit));
        }
    }
    let result = reconstruct(&ctx.state.bases[..k], &ctx.state.outcomes[..k]);
    match &result {
        Ok(bit) => ctx.note(format!("first {} participants reconstruct {}", k, bit)),
        Err(err) => ctx.note(format!("reconstruction failed: {}", err)),
    }
    ctx.state.reconstruction = Some(result);
    Ok(())
}

static SHARING_PHASES: [PhaseSpec<SecretSharing>; 4] = [
    PhaseSpec {
        phase: SharePhase::Preparation,
        steps: StepCount::Fixed(1),
        handler: preparation,
    },
    PhaseSpec {
        phase: SharePhase::Distribution,
        steps: StepCount::PerConfig(participant_steps),
        handler: distribution,
    },
    PhaseSpec {
        phase: SharePhase::Measurement,
        steps: StepCount::PerConfig(participant_steps),
        handler: measurement,
    },
    PhaseSpec {
        phase: SharePhase::Reconstruction,
        steps: StepCount::Fixed(1),
        handler: reconstruction,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingOutcome {
    pub secret: Bit,
    pub reconstructed: Option<Bit>,
    /// Reconstructed value equals the dealer's secret
    pub correct: bool,
    pub failure: Option<ReconstructionError>,
    pub bases: Vec<Basis>,
    pub outcomes: Vec<Bit>,
    pub degraded: bool,
}

impl fmt::Display for SharingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bases: String = self.bases.iter().map(|b| b.to_string()).collect();
        match (self.reconstructed, &self.failure) {
            (Some(bit), _) => write!(
                f,
                "secret={} reconstructed={} correct={} bases={} outcomes={}",
                self.secret,
                bit,
                self.correct,
                bases,
                bits_to_string(&self.outcomes)
            ),
            (None, Some(err)) => write!(f, "secret={} reconstruction failed: {}", self.secret, err),
            (None, None) => write!(f, "secret={} not reconstructed", self.secret),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SecretSharing;

impl Protocol for SecretSharing {
    type Role = ShareRole;
    type Phase = SharePhase;
    type Config = SharingConfig;
    type State = SharingState;
    type Outcome = SharingOutcome;

    const NAME: &'static str = "secret-sharing";

    fn phase_table() -> &'static [PhaseSpec<Self>] {
        &SHARING_PHASES
    }

    fn initialize(config: &SharingConfig) -> Result<SharingState, ConfigError> {
        let secret = check_bit("secret", config.secret)?;
        let n = config.participants;
        if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&n) {
            return Err(ConfigError::ParticipantCount {
                count: n,
                min: MIN_PARTICIPANTS,
                max: MAX_PARTICIPANTS,
            });
        }
        if config.threshold < 2 || config.threshold > n {
            return Err(ConfigError::Threshold {
                threshold: config.threshold,
                participants: n,
            });
        }
        if let Some(bases) = &config.bases {
            if bases.len() != n {
                return Err(ConfigError::Length {
                    field: "bases",
                    expected: n,
                    actual: bases.len(),
                });
            }
        }
        Ok(SharingState {
            secret,
            participants: n,
            threshold: config.threshold,
            ..SharingState::default()
        })
    }

    fn verify(
        _config: &SharingConfig,
        state: &SharingState,
    ) -> Result<SharingOutcome, EngineError> {
        let result = state.reconstruction.clone().ok_or(EngineError::MissingState {
            phase: SharePhase::Reconstruction.to_string(),
            step: 1,
            field: "reconstruction",
        })?;
        let (reconstructed, failure) = match result {
            Ok(bit) => (Some(bit), None),
            Err(err) => (None, Some(err)),
        };
        Ok(SharingOutcome {
            secret: state.secret,
            reconstructed,
            correct: reconstructed == Some(state.secret),
            failure,
            bases: state.bases.clone(),
            outcomes: state.outcomes.iter().map(|b| b.unwrap_or(0)).collect(),
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

    fn run(config: SharingConfig, seed: u64) -> SharingOutcome {
        let mut engine: PhaseEngine<SecretSharing> = PhaseEngine::seeded(seed);
        engine.initialize(config).unwrap();
        engine.run_to_completion().unwrap().unwrap()
    }

    #[test]
    fn test_reconstruct_rules() {
        use Basis::{X, Z};
        assert_eq!(reconstruct(&[X, X, X], &[Some(1), Some(1), Some(1)]), Ok(1));
        assert_eq!(reconstruct(&[Z, Z], &[Some(0), Some(0)]), Ok(0));
        assert_eq!(reconstruct(&[Z, X, Z], &[Some(1), Some(1), Some(1)]), Ok(0));
        assert_eq!(
            reconstruct(&[Z, Z], &[Some(0), Some(1)]),
            Err(ReconstructionError::InconsistentZ)
        );
        assert_eq!(
            reconstruct(&[X, X], &[Some(0), None]),
            Err(ReconstructionError::Incomplete)
        );
    }

    #[test]
    fn test_random_bases_always_reconstruct_secret() {
        for secret in [0, 1] {
            for (n, k) in [(2, 2), (3, 2), (5, 3), (6, 4), (10, 10)] {
                for seed in 0..15 {
                    let outcome = run(SharingConfig::new(secret, n, k), seed);
                    assert_eq!(outcome.reconstructed, Some(secret), "n={} k={}", n, k);
                    assert!(outcome.correct);
                }
            }
        }
    }

    #[test]
    fn test_threshold_z_measurements_fix_secret() {
        // first k measure Z and equal the secret; the rest do not matter
        let bases = vec![Basis::Z, Basis::Z, Basis::Z, Basis::X, Basis::Z];
        for seed in 0..10 {
            let outcome = run(SharingConfig::new(1, 5, 3).with_bases(bases.clone()), seed);
            assert_eq!(&outcome.outcomes[..3], &[1, 1, 1]);
            assert_eq!(outcome.reconstructed, Some(1));
        }
    }

    #[test]
    fn test_even_threshold_all_x() {
        let bases = vec![Basis::X; 4];
        for seed in 0..10 {
            let outcome = run(SharingConfig::new(1, 4, 4).with_bases(bases.clone()), seed);
            let parity = outcome.outcomes.iter().fold(0, |acc, b| acc ^ b);
            assert_eq!(parity, 1);
            assert!(outcome.correct);
        }
    }

    #[test]
    fn test_phase_steps_follow_participant_count() {
        let config = SharingConfig::new(0, 4, 2);
        assert_eq!(schedule_length::<SecretSharing>(&config), 2 + 5 + 5 + 2);

        let mut engine: PhaseEngine<SecretSharing> = PhaseEngine::seeded(1);
        engine.initialize(config).unwrap();
        engine.advance().unwrap();
        assert_eq!(engine.state().entanglement_links.len(), 4);
        engine.run_to_completion().unwrap();
        assert!(engine.state().entanglement_links.is_empty());
        assert_eq!(engine.state().distributed, 4);
    }

    #[test]
    fn test_reconstruction_messages_go_to_first_participant() {
        let mut engine: PhaseEngine<SecretSharing> = PhaseEngine::seeded(3);
        engine.initialize(SharingConfig::new(0, 5, 3)).unwrap();
        let mut last = Vec::new();
        loop {
            let report = engine.advance().unwrap();
            if report.complete {
                break;
            }
            if !report.messages.is_empty() {
                last = report.messages;
            }
        }
        assert_eq!(last.len(), 2);
        assert!(last.iter().all(|m| m.to == ShareRole::Participant(1)));
        assert_eq!(last[0].from.to_string(), "Charlie");
    }

    #[test]
    fn test_degraded_oracle_may_break_reconstruction() {
        let mut engine: PhaseEngine<SecretSharing> = PhaseEngine::new(
            Box::new(SeededSource::from_u64(5)),
            Box::new(FlakyOracle::new(1)),
        );
        engine
            .initialize(SharingConfig::new(1, 3, 3).with_bases(vec![Basis::Z; 3]))
            .unwrap();
        let outcome = engine.run_to_completion().unwrap().unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.correct, outcome.reconstructed == Some(1));
    }

    #[test]
    fn test_config_validation() {
        let mut engine: PhaseEngine<SecretSharing> = PhaseEngine::seeded(0);
        assert!(matches!(
            engine.initialize(SharingConfig::new(0, 1, 2)),
            Err(ConfigError::ParticipantCount { count: 1, .. })
        ));
        assert!(matches!(
            engine.initialize(SharingConfig::new(0, 11, 2)),
            Err(ConfigError::ParticipantCount { count: 11, .. })
        ));
        assert!(matches!(
            engine.initialize(SharingConfig::new(0, 4, 5)),
            Err(ConfigError::Threshold { threshold: 5, .. })
        ));
        assert!(matches!(
            engine.initialize(SharingConfig::new(0, 4, 1)),
            Err(ConfigError::Threshold { threshold: 1, .. })
        ));
        assert!(matches!(
            engine.initialize(SharingConfig::new(0, 4, 2).with_bases(vec![Basis::X])),
            Err(ConfigError::Length { .. })
        ));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(ShareRole::Dealer.to_string(), "Alice");
        assert_eq!(ShareRole::Participant(1).to_string(), "Bob");
        assert_eq!(ShareRole::Participant(9).to_string(), "Judy");
        assert_eq!(ShareRole::Participant(10).to_string(), "P10");
    }
}
