//! Quantum bit commitment over three qubits.
//!
//! The committed bit selects a basis sequence (0 -> X,Z,X and 1 -> Z,X,Z).
//! Alice encodes a random bit per qubit in that sequence, sends the qubits
//! and a blake3 digest of the preparations to Bob, and later reveals the bit
//! and the random bits. Bob recomputes the digest and measures each qubit in
//! the disclosed basis.

use std::fmt;

use crate::qs_engine::{PhaseSpec, Protocol, StepContext, StepCount};
use crate::qs_errors::{ConfigError, EngineError};
use crate::qs_interface::{bits_to_string, check_bit, Bit, Role, Step};
use crate::qs_oracle::{Basis, QubitState};

pub const COMMIT_QUBITS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommitRole {
    Alice,
    Bob,
}

impl Role for CommitRole {}

impl fmt::Display for CommitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitRole::Alice => write!(f, "Alice"),
            CommitRole::Bob => write!(f, "Bob"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Commit,
    Reveal,
    Verify,
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitPhase::Commit => write!(f, "commit"),
            CommitPhase::Reveal => write!(f, "reveal"),
            CommitPhase::Verify => write!(f, "verify"),
        }
    }
}

/// Basis sequence that encodes the committed bit
pub fn commit_bases(bit: Bit) -> [Basis; COMMIT_QUBITS] {
    if bit == 0 {
        [Basis::X, Basis::Z, Basis::X]
    } else {
        [Basis::Z, Basis::X, Basis::Z]
    }
}

/// Digest binding Alice to her preparations
pub fn transcript_digest(bases: &[Basis], bits: &[Bit]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"qsim-commitment");
    for (basis, bit) in bases.iter().zip(bits) {
        let tag = match basis {
            Basis::Z => b'Z',
            Basis::X => b'X',
        };
        hasher.update(&[tag, *bit]);
    }
    hasher.finalize()
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct CommitmentConfig {
    pub bit: Bit,
    /// Per-qubit random bits; drawn from the random source when absent
    pub random_bits: Option<Vec<Bit>>,
}

impl CommitmentConfig {
    pub fn new(bit: Bit) -> Self {
        Self {
            bit,
            random_bits: None,
        }
    }

    pub fn with_random_bits(mut self, bits: Vec<Bit>) -> Self {
        self.random_bits = Some(bits);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitmentState {
    pub bit: Bit,
    pub bases: Vec<Basis>,
    pub random_bits: Vec<Bit>,
    pub prepared: Vec<QubitState>,
    /// Digest Bob keeps from the commit phase
    pub committed_digest: Option<blake3::Hash>,
    pub revealed: Option<(Bit, Vec<Bit>)>,
    pub measured: Vec<Bit>,
    pub checks: Vec<bool>,
    pub digest_ok: Option<bool>,
    pub degraded: bool,
}

type Ctx<'a> = StepContext<'a, BitCommitment>;

fn commit(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    match step {
        1 => {
            ctx.state.bases = commit_bases(ctx.state.bit).to_vec();
            let sequence: String = ctx.state.bases.iter().map(|b| b.to_string()).collect();
            ctx.note(format!("bit {} selects bases {}", ctx.state.bit, sequence));
        }
        2 => {
            let bits = match &ctx.config.random_bits {
                Some(bits) => bits.clone(),
                None => (0..COMMIT_QUBITS).map(|_| ctx.rng.next_bit()).collect(),
            };
            ctx.state.prepared = ctx
                .state
                .bases
                .iter()
                .zip(&bits)
                .map(|(basis, bit)| QubitState::new(*basis, *bit))
                .collect();
            let labels: Vec<&str> = ctx.state.prepared.iter().map(|q| q.label()).collect();
            ctx.note(format!("Alice prepares {}", labels.join(" ")));
            ctx.state.random_bits = bits;
        }
        3 => {
            if ctx.state.prepared.len() != COMMIT_QUBITS {
                return Err(ctx.missing("prepared"));
            }
            for i in 0..COMMIT_QUBITS {
                ctx.quantum(CommitRole::Alice, CommitRole::Bob, format!("qubit {}", i + 1));
            }
            let digest = transcript_digest(&ctx.state.bases, &ctx.state.random_bits);
            ctx.classical(
                CommitRole::Alice,
                CommitRole::Bob,
                format!("commitment {}", &digest.to_hex()[..16]),
            );
            ctx.state.committed_digest = Some(digest);
        }
        _ => return Err(ctx.unexpected_step()),
    }
    Ok(())
}

fn reveal(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let bit = ctx.state.bit;
    let bits = ctx.state.random_bits.clone();
    ctx.classical(
        CommitRole::Alice,
        CommitRole::Bob,
        format!("b={} r={}", bit, bits_to_string(&bits)),
    );
    ctx.state.revealed = Some((bit, bits));
    Ok(())
}

fn verify_step(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let (bit, bits) = ctx.state.revealed.clone().ok_or_else(|| ctx.missing("revealed"))?;
    let committed = ctx.state.committed_digest.ok_or_else(|| ctx.missing("committed_digest"))?;

    let bases = commit_bases(bit);
    let digest_ok = transcript_digest(&bases, &bits) == committed;

    let mut measured = Vec::with_capacity(COMMIT_QUBITS);
    let mut checks = Vec::with_capacity(COMMIT_QUBITS);
    for i in 0..COMMIT_QUBITS {
        let prepared = *ctx.state.prepared.get(i).ok_or_else(|| ctx.missing("prepared"))?;
        let outcome = ctx.measure(prepared, bases[i]);
        let expected = bits.get(i).copied();
        measured.push(outcome);
        checks.push(expected == Some(outcome));
    }

    let passed = checks.iter().filter(|ok| **ok).count();
    ctx.note(format!(
        "{}/{} qubits match, digest {}",
        passed,
        COMMIT_QUBITS,
        if digest_ok { "ok" } else { "mismatch" }
    ));
    ctx.state.degraded |= ctx.degraded();
    ctx.state.measured = measured;
    ctx.state.checks = checks;
    ctx.state.digest_ok = Some(digest_ok);
    Ok(())
}

static COMMIT_PHASES: [PhaseSpec<BitCommitment>; 3] = [
    PhaseSpec {
        phase: CommitPhase::Commit,
        steps: StepCount::Fixed(3),
        handler: commit,
    },
    PhaseSpec {
        phase: CommitPhase::Reveal,
        steps: StepCount::Fixed(1),
        handler: reveal,
    },
    PhaseSpec {
        phase: CommitPhase::Verify,
        steps: StepCount::Fixed(1),
        handler: verify_step,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentOutcome {
    pub bit: Bit,
    pub random_bits: Vec<Bit>,
    pub measured: Vec<Bit>,
    pub checks: Vec<bool>,
    pub digest_ok: bool,
    /// Digest matches and every qubit check passed
    pub verified: bool,
    pub degraded: bool,
}

impl fmt::Display for CommitmentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bit={} r={} measured={} {}",
            self.bit,
            bits_to_string(&self.random_bits),
            bits_to_string(&self.measured),
            if self.verified { "verified" } else { "rejected" }
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BitCommitment;

impl Protocol for BitCommitment {
    type Role = CommitRole;
    type Phase = CommitPhase;
    type Config = CommitmentConfig;
    type State = CommitmentState;
    type Outcome = CommitmentOutcome;

    const NAME: &'static str = "bit-commitment";

    fn phase_table() -> &'static [PhaseSpec<Self>] {
        &COMMIT_PHASES
    }

    fn initialize(config: &CommitmentConfig) -> Result<CommitmentState, ConfigError> {
        let bit = check_bit("bit", config.bit)?;
        if let Some(bits) = &config.random_bits {
            if bits.len() != COMMIT_QUBITS {
                return Err(ConfigError::Length {
                    field: "random_bits",
                    expected: COMMIT_QUBITS,
                    actual: bits.len(),
                });
            }
            for b in bits {
                check_bit("random_bits", *b)?;
            }
        }
        Ok(CommitmentState {
            bit,
            ..CommitmentState::default()
        })
    }

    fn verify(
        _config: &CommitmentConfig,
        state: &CommitmentState,
    ) -> Result<CommitmentOutcome, EngineError> {
        let digest_ok = state.digest_ok.ok_or(EngineError::MissingState {
            phase: CommitPhase::Verify.to_string(),
            step: 1,
            field: "digest_ok",
        })?;
        Ok(CommitmentOutcome {
            bit: state.bit,
            random_bits: state.random_bits.clone(),
            measured: state.measured.clone(),
            checks: state.checks.clone(),
            digest_ok,
            verified: digest_ok && state.checks.iter().all(|ok| *ok),
            degraded: state.degraded,
        })
    }
}
