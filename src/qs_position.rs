//! Position verification by round-trip timing plus a BB84 challenge.
//!
//! Two verifiers challenge a prover that claims distances to each of them.
//! V1 sends a qubit, V2 sends the measurement basis. The prover measures and
//! answers both verifiers. A round is verified when both answers arrive within
//! the time window of the round-trip expected at the declared position and the
//! measured bit matches whenever the state/basis pair makes it deterministic.
//!
//! The Round Controller repeats the round and tracks QBER over all rounds.

use std::fmt;
use std::str::FromStr;

use log::{info, warn};

use crate::qs_engine::{PhaseEngine, PhaseSpec, Protocol, StepContext, StepCount, StepReport};
use crate::qs_errors::{ConfigError, EngineError, SequenceError};
use crate::qs_interface::{AdversarySpec, BehaviorProfile, Bit, Role, Step, Strategy};
use crate::qs_oracle::{Basis, QuantumOracle, QubitState, TableOracle};
use crate::qs_random::{RandomSource, SeededSource};

/// km/s
pub const SPEED_OF_LIGHT: f64 = 299_792.458;

pub const MICROSECOND: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PosRole {
    Verifier1,
    Verifier2,
    Prover,
}

impl PosRole {
    pub const VERIFIERS: [PosRole; 2] = [PosRole::Verifier1, PosRole::Verifier2];
}

impl Role for PosRole {}

impl fmt::Display for PosRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PosRole::Verifier1 => write!(f, "V1"),
            PosRole::Verifier2 => write!(f, "V2"),
            PosRole::Prover => write!(f, "P"),
        }
    }
}

impl FromStr for PosRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" | "verifier1" => Ok(PosRole::Verifier1),
            "v2" | "verifier2" => Ok(PosRole::Verifier2),
            "p" | "prover" => Ok(PosRole::Prover),
            _ => Err(ConfigError::UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosStrategy {
    /// Answer from the true location while claiming the declared one
    DeclareFalsePosition,
}

impl fmt::Display for PosStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "declare-false-position")
    }
}

impl FromStr for PosStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declare-false-position" => Ok(PosStrategy::DeclareFalsePosition),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosPhase {
    Declaration,
    Challenge,
    Response,
    Verification,
}

impl fmt::Display for PosPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PosPhase::Declaration => write!(f, "declaration"),
            PosPhase::Challenge => write!(f, "challenge"),
            PosPhase::Response => write!(f, "response"),
            PosPhase::Verification => write!(f, "verification"),
        }
    }
}

/// Distances in km, times in seconds.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    pub declared_distance_v1: f64,
    pub declared_distance_v2: f64,
    /// Only used when the prover is dishonest
    pub actual_distance_v1: f64,
    pub actual_distance_v2: f64,
    pub round_count: usize,
    pub time_window: f64,
    pub processing_time: f64,
    /// Standard deviation of an honest prover's response jitter
    pub jitter_sigma: f64,
    pub qber_threshold: f64,
    pub speed_of_light: f64,
    pub adversaries: Vec<AdversarySpec>,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            declared_distance_v1: 100.0,
            declared_distance_v2: 100.0,
            actual_distance_v1: 150.0,
            actual_distance_v2: 50.0,
            round_count: 10,
            time_window: 10.0 * MICROSECOND,
            processing_time: MICROSECOND,
            jitter_sigma: MICROSECOND,
            qber_threshold: 0.25,
            speed_of_light: SPEED_OF_LIGHT,
            adversaries: Vec::new(),
        }
    }
}

impl PositionConfig {
    pub fn dishonest(mut self) -> Self {
        self.adversaries
            .push(AdversarySpec::new(PosRole::Prover, PosStrategy::DeclareFalsePosition));
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("declared_distance_v1", self.declared_distance_v1),
            ("declared_distance_v2", self.declared_distance_v2),
            ("actual_distance_v1", self.actual_distance_v1),
            ("actual_distance_v2", self.actual_distance_v2),
            ("processing_time", self.processing_time),
            ("jitter_sigma", self.jitter_sigma),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        let positive = [
            ("time_window", self.time_window),
            ("speed_of_light", self.speed_of_light),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        if !(0.0..=1.0).contains(&self.qber_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "qber_threshold",
                value: self.qber_threshold,
            });
        }
        if self.round_count == 0 {
            return Err(ConfigError::OutOfRange {
                field: "round_count",
                value: 0.0,
            });
        }
        Ok(())
    }

    fn declared(&self) -> [f64; 2] {
        [self.declared_distance_v1, self.declared_distance_v2]
    }

    fn actual(&self) -> [f64; 2] {
        [self.actual_distance_v1, self.actual_distance_v2]
    }
}

/// Outcome of one round; appended by the Round Controller, never changed.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub timing_ok: [bool; 2],
    pub quantum_ok: bool,
    pub overall: bool,
    pub expected_time: [f64; 2],
    pub actual_time: [f64; 2],
    pub time_difference: [f64; 2],
    pub prepared: QubitState,
    pub basis: Basis,
    pub measured_bit: Bit,
    /// None when the state/basis pair gives a fair coin
    pub expected_bit: Option<Bit>,
    pub degraded: bool,
}

impl fmt::Display for RoundResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |ok: bool| if ok { "✓" } else { "✗" };
        write!(
            f,
            "V1 {} ({:+.2} µs) V2 {} ({:+.2} µs) quantum {} ({} in {} -> {}) => {}",
            mark(self.timing_ok[0]),
            self.time_difference[0] / MICROSECOND,
            mark(self.timing_ok[1]),
            self.time_difference[1] / MICROSECOND,
            mark(self.quantum_ok),
            self.prepared,
            self.basis,
            self.measured_bit,
            if self.overall { "verified" } else { "rejected" }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionState {
    pub behavior: BehaviorProfile<PosRole, PosStrategy>,
    pub prepared: Option<QubitState>,
    pub basis: Option<Basis>,
    pub measured_bit: Option<Bit>,
    pub degraded: bool,
    pub expected_time: Option<[f64; 2]>,
    pub actual_time: Option<[f64; 2]>,
    pub result: Option<RoundResult>,
}

// ============================================================================
// Verification rules
// ============================================================================

/// Round trip to a verifier at `distance`: out, processing, back.
pub fn expected_round_trip(distance: f64, processing: f64, speed_of_light: f64) -> f64 {
    distance / speed_of_light + processing + distance / speed_of_light
}

pub fn timing_ok(expected: f64, actual: f64, window: f64) -> bool {
    (actual - expected).abs() <= window
}

/// Vacuously true when the expected bit is undetermined.
pub fn quantum_ok(measured: Bit, expected: Option<Bit>) -> bool {
    expected.map_or(true, |bit| bit == measured)
}

/// Errors over rounds; 0 before any round.
pub fn qber(quantum_errors: usize, rounds: usize) -> f64 {
    if rounds == 0 {
        0.0
    } else {
        quantum_errors as f64 / rounds as f64
    }
}

pub fn verify_round(
    config: &PositionConfig,
    state: &PositionState,
) -> Result<RoundResult, EngineError> {
    let missing = |field| EngineError::MissingState {
        phase: PosPhase::Verification.to_string(),
        step: 2,
        field,
    };
    let prepared = state.prepared.ok_or_else(|| missing("prepared"))?;
    let basis = state.basis.ok_or_else(|| missing("basis"))?;
    let measured_bit = state.measured_bit.ok_or_else(|| missing("measured_bit"))?;
    let expected_time = state.expected_time.ok_or_else(|| missing("expected_time"))?;
    let actual_time = state.actual_time.ok_or_else(|| missing("actual_time"))?;

    let mut timing = [false; 2];
    let mut difference = [0.0; 2];
    for v in 0..2 {
        difference[v] = actual_time[v] - expected_time[v];
        timing[v] = timing_ok(expected_time[v], actual_time[v], config.time_window);
    }
    let expected_bit = prepared.expected_outcome(basis);
    let quantum = quantum_ok(measured_bit, expected_bit);

    Ok(RoundResult {
        timing_ok: timing,
        quantum_ok: quantum,
        overall: timing[0] && timing[1] && quantum,
        expected_time,
        actual_time,
        time_difference: difference,
        prepared,
        basis,
        measured_bit,
        expected_bit,
        degraded: state.degraded,
    })
}

// ============================================================================
// Behavior Selector
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PosAction {
    Idle,
    /// Respond as if located at `distances` from (V1, V2)
    Respond { distances: [f64; 2], jitter: bool },
}

pub fn resolve_action(
    config: &PositionConfig,
    state: &PositionState,
    role: PosRole,
    phase: PosPhase,
    step: Step,
) -> PosAction {
    match (role, phase, step) {
        (PosRole::Prover, PosPhase::Response, 1) => match state.behavior.strategy_of(role) {
            Strategy::Honest => PosAction::Respond {
                distances: config.declared(),
                jitter: true,
            },
            Strategy::Adversarial(PosStrategy::DeclareFalsePosition) => PosAction::Respond {
                distances: config.actual(),
                jitter: false,
            },
        },
        _ => PosAction::Idle,
    }
}

// ============================================================================
// Phase handlers
// ============================================================================

type Ctx<'a> = StepContext<'a, PositionVerification>;

fn declaration(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    let label = format!(
        "position: {:.0} km from V1, {:.0} km from V2",
        ctx.config.declared_distance_v1, ctx.config.declared_distance_v2
    );
    for verifier in PosRole::VERIFIERS {
        ctx.classical(PosRole::Prover, verifier, label.clone());
    }
    Ok(())
}

fn challenge(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    match step {
        1 => {
            let prepared = QubitState::random(ctx.rng);
            ctx.state.prepared = Some(prepared);
            ctx.quantum(PosRole::Verifier1, PosRole::Prover, prepared.label());
            Ok(())
        }
        2 => {
            let basis = Basis::random(ctx.rng);
            ctx.state.basis = Some(basis);
            ctx.classical(PosRole::Verifier2, PosRole::Prover, format!("basis {}", basis));
            Ok(())
        }
        _ => Err(ctx.unexpected_step()),
    }
}

fn response(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    match step {
        1 => {
            let prepared = ctx.state.prepared.ok_or_else(|| ctx.missing("prepared"))?;
            let basis = ctx.state.basis.ok_or_else(|| ctx.missing("basis"))?;
            let PosAction::Respond { distances, jitter } =
                resolve_action(ctx.config, ctx.state, PosRole::Prover, PosPhase::Response, 1)
            else {
                return Err(ctx.unexpected_step());
            };

            let measured = ctx.measure(prepared, basis);
            ctx.state.measured_bit = Some(measured);
            ctx.state.degraded = ctx.degraded();

            let c = ctx.config.speed_of_light;
            let processing = ctx.config.processing_time;
            let mut expected = [0.0; 2];
            let mut actual = [0.0; 2];
            for v in 0..2 {
                expected[v] = expected_round_trip(ctx.config.declared()[v], processing, c);
                actual[v] = expected_round_trip(distances[v], processing, c);
                if jitter {
                    actual[v] += ctx.rng.gaussian(ctx.config.jitter_sigma);
                }
            }
            ctx.state.expected_time = Some(expected);
            ctx.state.actual_time = Some(actual);
            ctx.note(format!("prover measures {} in basis {} -> {}", prepared, basis, measured));
            Ok(())
        }
        2 => {
            let measured = ctx.state.measured_bit.ok_or_else(|| ctx.missing("measured_bit"))?;
            for verifier in PosRole::VERIFIERS {
                ctx.classical(PosRole::Prover, verifier, format!("result={}", measured));
            }
            Ok(())
        }
        _ => Err(ctx.unexpected_step()),
    }
}

fn verification(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    match step {
        1 => {
            let actual = ctx.state.actual_time.ok_or_else(|| ctx.missing("actual_time"))?;
            ctx.classical(
                PosRole::Verifier1,
                PosRole::Verifier2,
                format!("arrival {:.2} µs", actual[0] / MICROSECOND),
            );
            ctx.classical(
                PosRole::Verifier2,
                PosRole::Verifier1,
                format!("arrival {:.2} µs", actual[1] / MICROSECOND),
            );
            Ok(())
        }
        2 => {
            let result = verify_round(ctx.config, ctx.state)?;
            let verdict = if result.overall { "verified" } else { "rejected" };
            for verifier in PosRole::VERIFIERS {
                ctx.classical(verifier, PosRole::Prover, verdict);
            }
            ctx.note(result.to_string());
            ctx.state.result = Some(result);
            Ok(())
        }
        _ => Err(ctx.unexpected_step()),
    }
}

static POSITION_PHASES: [PhaseSpec<PositionVerification>; 4] = [
    PhaseSpec {
        phase: PosPhase::Declaration,
        steps: StepCount::Fixed(1),
        handler: declaration,
    },
    PhaseSpec {
        phase: PosPhase::Challenge,
        steps: StepCount::Fixed(2),
        handler: challenge,
    },
    PhaseSpec {
        phase: PosPhase::Response,
        steps: StepCount::Fixed(2),
        handler: response,
    },
    PhaseSpec {
        phase: PosPhase::Verification,
        steps: StepCount::Fixed(2),
        handler: verification,
    },
];

/// One round of position verification
#[derive(Debug, Clone, Copy)]
pub struct PositionVerification;

impl Protocol for PositionVerification {
    type Role = PosRole;
    type Phase = PosPhase;
    type Config = PositionConfig;
    type State = PositionState;
    type Outcome = RoundResult;

    const NAME: &'static str = "position-verification";

    fn phase_table() -> &'static [PhaseSpec<Self>] {
        &POSITION_PHASES
    }

    fn initialize(config: &PositionConfig) -> Result<PositionState, ConfigError> {
        config.validate()?;
        let behavior: BehaviorProfile<PosRole, PosStrategy> =
            BehaviorProfile::resolve(&config.adversaries, |role, _| role == PosRole::Prover)?;
        Ok(PositionState {
            behavior,
            ..PositionState::default()
        })
    }

    fn verify(_config: &PositionConfig, state: &PositionState) -> Result<RoundResult, EngineError> {
        state.result.clone().ok_or(EngineError::MissingState {
            phase: PosPhase::Verification.to_string(),
            step: 2,
            field: "result",
        })
    }
}

// ============================================================================
// Round Controller
// ============================================================================

/// One controller tick
#[derive(Debug)]
pub struct RoundTick {
    /// 1-based round the tick belongs to
    pub round: usize,
    pub report: StepReport<PositionVerification>,
    /// Set on the tick that completed the round
    pub recorded: Option<RoundResult>,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSummary {
    pub rounds: usize,
    pub successful_rounds: usize,
    pub success_rate: f64,
    pub qber: f64,
    pub fraud_detected: bool,
    /// Last round verified and no fraud flagged
    pub verified: bool,
}

impl PositionSummary {
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║  POSITION VERIFICATION                                 ║");
        println!("╚════════════════════════════════════════════════════════╝\n");
        println!("  Rounds:              {}", self.rounds);
        println!("  Successful rounds:   {}", self.successful_rounds);
        println!("  Success rate:        {:.1}%", self.success_rate * 100.0);
        println!("  QBER:                {:.1}%", self.qber * 100.0);
        println!("  Fraud detected:      {}", self.fraud_detected);
        println!("  Verdict:             {}", if self.verified { "VERIFIED" } else { "REJECTED" });
    }
}

/// Repeats the round `round_count` times and aggregates the results.
pub struct RoundController {
    engine: PhaseEngine<PositionVerification>,
    config: PositionConfig,
    results: Vec<RoundResult>,
    successful_rounds: usize,
    quantum_errors: usize,
    fraud_detected: bool,
}

impl RoundController {
    pub fn new(
        config: PositionConfig,
        rng: Box<dyn RandomSource>,
        oracle: Box<dyn QuantumOracle>,
    ) -> Result<Self, ConfigError> {
        let mut engine = PhaseEngine::new(rng, oracle);
        engine.initialize(config.clone())?;
        Ok(Self {
            engine,
            config,
            results: Vec::new(),
            successful_rounds: 0,
            quantum_errors: 0,
            fraud_detected: false,
        })
    }

    pub fn seeded(config: PositionConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::new(config, Box::new(SeededSource::from_u64(seed)), Box::new(TableOracle))
    }

    /// Advance the current round by one step, starting the next round after
    /// a completed one.
    pub fn advance(&mut self) -> Result<RoundTick, EngineError> {
        if self.is_finished() {
            let report = self.engine.advance()?;
            return Ok(RoundTick {
                round: self.results.len(),
                report,
                recorded: None,
                finished: true,
            });
        }
        if self.engine.is_complete() {
            self.engine.initialize(self.config.clone())?;
        }

        let round = self.results.len() + 1;
        let report = self.engine.advance()?;
        let mut recorded = None;
        if report.complete && report.idle.is_none() {
            if let Some(result) = report.outcome.clone() {
                self.record(result.clone());
                recorded = Some(result);
            }
        }
        Ok(RoundTick {
            round,
            report,
            recorded,
            finished: self.is_finished(),
        })
    }

    /// Run the current round to its end. None once every round is done.
    pub fn run_round(&mut self) -> Result<Option<RoundResult>, EngineError> {
        loop {
            let tick = self.advance()?;
            if let Some(result) = tick.recorded {
                return Ok(Some(result));
            }
            if tick.finished || tick.report.idle == Some(SequenceError::NotInitialized) {
                return Ok(None);
            }
        }
    }

    pub fn run_all(&mut self) -> Result<PositionSummary, EngineError> {
        while self.run_round()?.is_some() {}
        Ok(self.summary())
    }

    /// Start over with the same configuration
    pub fn reset(&mut self) -> Result<(), ConfigError> {
        self.engine.reset();
        self.results.clear();
        self.successful_rounds = 0;
        self.quantum_errors = 0;
        self.fraud_detected = false;
        self.engine.initialize(self.config.clone())?;
        Ok(())
    }

    fn record(&mut self, result: RoundResult) {
        if result.overall {
            self.successful_rounds += 1;
        }
        if !result.quantum_ok {
            self.quantum_errors += 1;
        }
        info!(
            "round {}/{}: {}",
            self.results.len() + 1,
            self.config.round_count,
            result
        );
        self.results.push(result);

        let qber = self.qber();
        if qber > self.config.qber_threshold && !self.fraud_detected {
            warn!(
                "QBER {:.1}% above threshold {:.1}%, fraud detected",
                qber * 100.0,
                self.config.qber_threshold * 100.0
            );
            self.fraud_detected = true;
        }
    }

    pub fn results(&self) -> &[RoundResult] {
        &self.results
    }

    pub fn rounds_completed(&self) -> usize {
        self.results.len()
    }

    pub fn successful_rounds(&self) -> usize {
        self.successful_rounds
    }

    pub fn is_finished(&self) -> bool {
        self.results.len() >= self.config.round_count
    }

    pub fn qber(&self) -> f64 {
        qber(self.quantum_errors, self.results.len())
    }

    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.successful_rounds as f64 / self.results.len() as f64
        }
    }

    /// Sticky once QBER has exceeded the threshold
    pub fn fraud_detected(&self) -> bool {
        self.fraud_detected
    }

    pub fn engine(&self) -> &PhaseEngine<PositionVerification> {
        &self.engine
    }

    pub fn summary(&self) -> PositionSummary {
        let last_ok = self.results.last().map_or(false, |r| r.overall);
        PositionSummary {
            rounds: self.results.len(),
            successful_rounds: self.successful_rounds,
            success_rate: self.success_rate(),
            qber: self.qber(),
            fraud_detected: self.fraud_detected,
            verified: last_ok && !self.fraud_detected,
        }
    }
}
