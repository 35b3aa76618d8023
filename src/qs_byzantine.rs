//! Byzantine agreement over an entangled qutrit triple.
//!
//! A sender and two receivers share the Aharonov state. The sender sends a bit
//! to each receiver, measures its qutrit and discloses the index set (J0 or J1)
//! matching its bit. Receivers check their own outcomes against the disclosed
//! set, exchange what they received, flag inconsistencies and finally agree.
//!
//! At most one role is adversarial and follows one of three strategies:
//! splitting values, disclosing false indices, or refusing agreement.

use std::fmt;
use std::str::FromStr;

use hashbrown::HashSet;
use indexmap::IndexMap;

use crate::qs_engine::{PhaseSpec, Protocol, StepContext, StepCount};
use crate::qs_errors::{ConfigError, EngineError};
use crate::qs_interface::{
    check_bit, flip, AdversarySpec, BehaviorProfile, Bit, Role, RolePair, Step, Strategy,
};
use crate::qs_random::RandomSource;

pub const AHARONOV_STATE: &str =
    "|A⟩ = (|0,1,2⟩ + |1,2,0⟩ + |2,0,1⟩ − |0,2,1⟩ − |1,0,2⟩ − |2,1,0⟩) / √6";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ByzRole {
    Sender,
    Receiver0,
    Receiver1,
}

impl ByzRole {
    pub const ALL: [ByzRole; 3] = [ByzRole::Sender, ByzRole::Receiver0, ByzRole::Receiver1];
    pub const RECEIVERS: [ByzRole; 2] = [ByzRole::Receiver0, ByzRole::Receiver1];

    pub fn receiver(index: usize) -> ByzRole {
        if index == 0 {
            ByzRole::Receiver0
        } else {
            ByzRole::Receiver1
        }
    }

    pub fn receiver_index(self) -> Option<usize> {
        match self {
            ByzRole::Sender => None,
            ByzRole::Receiver0 => Some(0),
            ByzRole::Receiver1 => Some(1),
        }
    }

    /// The other receiver; the sender maps to itself
    pub fn other_receiver(self) -> ByzRole {
        match self {
            ByzRole::Sender => ByzRole::Sender,
            ByzRole::Receiver0 => ByzRole::Receiver1,
            ByzRole::Receiver1 => ByzRole::Receiver0,
        }
    }
}

impl Role for ByzRole {}

impl fmt::Display for ByzRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByzRole::Sender => write!(f, "S"),
            ByzRole::Receiver0 => write!(f, "R0"),
            ByzRole::Receiver1 => write!(f, "R1"),
        }
    }
}

impl FromStr for ByzRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s" | "sender" => Ok(ByzRole::Sender),
            "r0" | "receiver0" => Ok(ByzRole::Receiver0),
            "r1" | "receiver1" => Ok(ByzRole::Receiver1),
            _ => Err(ConfigError::UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByzStrategy {
    /// Tell the receivers different bits
    SendInconsistentValues,
    /// Disclose the index set of the other bit value
    SendFalseIndices,
    /// Decline to adopt the agreed value
    RefuseAgreement,
}

impl fmt::Display for ByzStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByzStrategy::SendInconsistentValues => write!(f, "send-inconsistent-values"),
            ByzStrategy::SendFalseIndices => write!(f, "send-false-indices"),
            ByzStrategy::RefuseAgreement => write!(f, "refuse-agreement"),
        }
    }
}

impl FromStr for ByzStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send-inconsistent-values" => Ok(ByzStrategy::SendInconsistentValues),
            "send-false-indices" => Ok(ByzStrategy::SendFalseIndices),
            "refuse-agreement" => Ok(ByzStrategy::RefuseAgreement),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByzPhase {
    Preparation,
    Transmission,
    Verification,
    Detection,
    Agreement,
}

impl fmt::Display for ByzPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByzPhase::Preparation => write!(f, "preparation"),
            ByzPhase::Transmission => write!(f, "transmission"),
            ByzPhase::Verification => write!(f, "verification"),
            ByzPhase::Detection => write!(f, "detection"),
            ByzPhase::Agreement => write!(f, "agreement"),
        }
    }
}

/// Index sets disclosed by the sender. Each lists the (sender, R0, R1) qutrit
/// outcome classes compatible with one bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSet {
    J0,
    J1,
}

impl IndexSet {
    pub fn for_bit(bit: Bit) -> Self {
        if bit == 0 {
            IndexSet::J0
        } else {
            IndexSet::J1
        }
    }

    pub fn bit(self) -> Bit {
        match self {
            IndexSet::J0 => 0,
            IndexSet::J1 => 1,
        }
    }

    /// Outcome triples (S, R0, R1) of the set
    pub fn classes(self) -> [(u8, u8, u8); 2] {
        match self {
            IndexSet::J0 => [(0, 1, 2), (0, 2, 1)],
            IndexSet::J1 => [(1, 2, 0), (1, 0, 2)],
        }
    }
}

impl fmt::Display for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexSet::J0 => write!(f, "J0"),
            IndexSet::J1 => write!(f, "J1"),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ByzantineConfig {
    /// Bit the sender wants the receivers to agree on
    pub sender_bit: Bit,
    /// At most one entry
    pub adversaries: Vec<AdversarySpec>,
}

impl Default for ByzantineConfig {
    fn default() -> Self {
        Self {
            sender_bit: 0,
            adversaries: Vec::new(),
        }
    }
}

impl ByzantineConfig {
    pub fn honest(sender_bit: Bit) -> Self {
        Self {
            sender_bit,
            adversaries: Vec::new(),
        }
    }

    pub fn with_adversary(mut self, role: ByzRole, strategy: ByzStrategy) -> Self {
        self.adversaries.push(AdversarySpec::new(role, strategy));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ByzantineState {
    pub behavior: BehaviorProfile<ByzRole, ByzStrategy>,
    pub sender_bit: Bit,
    /// Role that prepared and distributed the qutrits
    pub preparer: Option<ByzRole>,
    pub quantum_states: IndexMap<ByzRole, String>,
    pub entanglement_links: HashSet<RolePair<ByzRole>>,
    /// Bit the sender transmitted to each receiver
    pub sent: [Option<Bit>; 2],
    /// Receiver that got the sender's real bit when the sender split values
    pub consistent_receiver: Option<ByzRole>,
    pub disclosed: Option<IndexSet>,
    /// Whether each receiver claims its outcome fits the disclosed set
    pub measurement_consistent: [Option<bool>; 2],
    /// Bit each receiver reported to the other during the exchange
    pub reported: [Option<Bit>; 2],
    pub suspect: Option<ByzRole>,
    pub receiver_values: [Option<Bit>; 2],
    pub agreed_value: Option<Bit>,
    pub refused_by: Option<ByzRole>,
}

impl ByzantineState {
    fn receiver_value(&self, index: usize) -> Option<Bit> {
        self.receiver_values[index]
    }
}

// ============================================================================
// Behavior Selector
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByzAction {
    Idle,
    Transmit { to_receiver0: Bit, to_receiver1: Bit },
    Disclose(IndexSet),
    Measure,
    FakeMeasurement,
    Report(Bit),
    Adopt,
    Refuse,
}

/// Action of `role` at (`phase`, `step`) given its strategy.
///
/// Splitting values picks which receiver gets the real bit uniformly at
/// random, drawn from `rng`.
pub fn resolve_action(
    state: &ByzantineState,
    role: ByzRole,
    phase: ByzPhase,
    step: Step,
    rng: &mut dyn RandomSource,
) -> ByzAction {
    let strategy = state.behavior.strategy_of(role);
    let adversarial = |wanted: ByzStrategy| strategy == Strategy::Adversarial(wanted);
    let bit = state.sender_bit;

    match (role, phase, step) {
        (ByzRole::Sender, ByzPhase::Transmission, 1) => {
            if adversarial(ByzStrategy::SendInconsistentValues) {
                if rng.choose_index(2) == 0 {
                    ByzAction::Transmit {
                        to_receiver0: bit,
                        to_receiver1: flip(bit),
                    }
                } else {
                    ByzAction::Transmit {
                        to_receiver0: flip(bit),
                        to_receiver1: bit,
                    }
                }
            } else {
                ByzAction::Transmit {
                    to_receiver0: bit,
                    to_receiver1: bit,
                }
            }
        }
        (ByzRole::Sender, ByzPhase::Transmission, 2) => {
            if adversarial(ByzStrategy::SendFalseIndices) {
                ByzAction::Disclose(IndexSet::for_bit(flip(bit)))
            } else {
                ByzAction::Disclose(IndexSet::for_bit(bit))
            }
        }
        (ByzRole::Receiver0 | ByzRole::Receiver1, ByzPhase::Verification, 1) => {
            if adversarial(ByzStrategy::SendFalseIndices) {
                ByzAction::FakeMeasurement
            } else {
                ByzAction::Measure
            }
        }
        (ByzRole::Receiver0 | ByzRole::Receiver1, ByzPhase::Verification, 2) => {
            let held = role
                .receiver_index()
                .and_then(|i| state.receiver_value(i))
                .unwrap_or(bit);
            if adversarial(ByzStrategy::SendInconsistentValues) {
                ByzAction::Report(flip(held))
            } else {
                ByzAction::Report(held)
            }
        }
        (_, ByzPhase::Agreement, 1) => {
            if adversarial(ByzStrategy::RefuseAgreement) {
                ByzAction::Refuse
            } else {
                ByzAction::Adopt
            }
        }
        _ => ByzAction::Idle,
    }
}

// ============================================================================
// Phase handlers
// ============================================================================

type Ctx<'a> = StepContext<'a, ByzantineAgreement>;

fn preparation(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    if step != 1 {
        return Err(ctx.unexpected_step());
    }
    let preparer = ByzRole::ALL[ctx.rng.choose_index(ByzRole::ALL.len())];
    ctx.state.preparer = Some(preparer);

    for role in ByzRole::ALL {
        ctx.state.quantum_states.insert(role, "Aharonov".to_string());
    }
    ctx.state.entanglement_links = [
        RolePair::new(ByzRole::Sender, ByzRole::Receiver0),
        RolePair::new(ByzRole::Sender, ByzRole::Receiver1),
        RolePair::new(ByzRole::Receiver0, ByzRole::Receiver1),
    ]
    .into_iter()
    .collect();

    for role in ByzRole::ALL {
        if role != preparer {
            ctx.quantum(preparer, role, "qutrit");
        }
    }
    ctx.note(format!("{} prepares {}", preparer, AHARONOV_STATE));
    Ok(())
}

fn transmission(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    let action = resolve_action(ctx.state, ByzRole::Sender, ByzPhase::Transmission, step, ctx.rng);
    match action {
        ByzAction::Transmit {
            to_receiver0,
            to_receiver1,
        } => {
            let sent = [to_receiver0, to_receiver1];
            ctx.state.sent = [Some(sent[0]), Some(sent[1])];
            ctx.state.receiver_values = ctx.state.sent;
            if sent[0] != sent[1] {
                let consistent = if sent[0] == ctx.state.sender_bit { 0 } else { 1 };
                ctx.state.consistent_receiver = Some(ByzRole::receiver(consistent));
            }
            for (index, bit) in sent.iter().enumerate() {
                ctx.classical(ByzRole::Sender, ByzRole::receiver(index), format!("bit={}", bit));
            }
            Ok(())
        }
        ByzAction::Disclose(set) => {
            let bit = ctx.state.sender_bit;
            ctx.state
                .quantum_states
                .insert(ByzRole::Sender, format!("measured: {}", bit));
            ctx.state
                .entanglement_links
                .retain(|pair| !pair.contains(ByzRole::Sender));
            ctx.state.disclosed = Some(set);
            ctx.note(format!("{} classes (S, R0, R1): {:?}", set, set.classes()));
            for receiver in ByzRole::RECEIVERS {
                ctx.classical(ByzRole::Sender, receiver, format!("indices {}", set));
            }
            Ok(())
        }
        _ => Err(ctx.unexpected_step()),
    }
}

fn verification(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    match step {
        1 => {
            let disclosed = ctx.state.disclosed.ok_or_else(|| ctx.missing("disclosed"))?;
            for (index, receiver) in ByzRole::RECEIVERS.into_iter().enumerate() {
                let held = ctx
                    .state
                    .receiver_value(index)
                    .ok_or_else(|| ctx.missing("receiver_values"))?;
                let action =
                    resolve_action(ctx.state, receiver, ByzPhase::Verification, 1, ctx.rng);
                let (consistent, label) = match action {
                    ByzAction::FakeMeasurement => {
                        (false, format!("fake measurement for bit {}", flip(held)))
                    }
                    _ if held == disclosed.bit() => (true, format!("measured: {}", held)),
                    _ => (false, format!("inconsistent with {}", disclosed)),
                };
                ctx.state.measurement_consistent[index] = Some(consistent);
                ctx.state.quantum_states.insert(receiver, label);
            }
            ctx.state.entanglement_links.clear();
            Ok(())
        }
        2 => {
            for (index, receiver) in ByzRole::RECEIVERS.into_iter().enumerate() {
                let action =
                    resolve_action(ctx.state, receiver, ByzPhase::Verification, 2, ctx.rng);
                let ByzAction::Report(bit) = action else {
                    return Err(ctx.unexpected_step());
                };
                ctx.state.reported[index] = Some(bit);
                ctx.classical(receiver, receiver.other_receiver(), format!("bit={}", bit));
            }
            Ok(())
        }
        _ => Err(ctx.unexpected_step()),
    }
}

/// Compare the measurement claims and reported bits. The sender knows what
/// it sent, which lets the honest receiver expose a lying one.
fn detection(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    if step != 1 {
        return Err(ctx.unexpected_step());
    }
    let disclosed = ctx.state.disclosed.ok_or_else(|| ctx.missing("disclosed"))?;
    let mut claims = [false; 2];
    let mut reported = [0; 2];
    let mut sent = [0; 2];
    for index in 0..2 {
        claims[index] = !ctx.state.measurement_consistent[index]
            .ok_or_else(|| ctx.missing("measurement_consistent"))?;
        reported[index] = ctx.state.reported[index].ok_or_else(|| ctx.missing("reported"))?;
        sent[index] = ctx.state.sent[index].ok_or_else(|| ctx.missing("sent"))?;
    }

    let suspect = match (claims, reported[0] == reported[1]) {
        ([true, true], _) => {
            ctx.classical(ByzRole::Receiver0, ByzRole::Receiver1, "false indices");
            ctx.classical(ByzRole::Receiver1, ByzRole::Receiver0, "false indices");
            Some(ByzRole::Sender)
        }
        ([true, false], false) | ([false, true], false) => {
            let complainer = ByzRole::receiver(if claims[0] { 0 } else { 1 });
            ctx.classical(
                complainer,
                complainer.other_receiver(),
                format!("inconsistent with {}", disclosed),
            );
            Some(ByzRole::Sender)
        }
        ([true, false], true) | ([false, true], true) => {
            let complainer = ByzRole::receiver(if claims[0] { 0 } else { 1 });
            ctx.classical(complainer, complainer.other_receiver(), "inconsistency claim");
            ctx.note(format!(
                "{} holds a consistent outcome, the claim of {} is false",
                complainer.other_receiver(),
                complainer
            ));
            Some(complainer)
        }
        ([false, false], false) => {
            let liar = if reported[0] != sent[0] { 0 } else { 1 };
            let liar = ByzRole::receiver(liar);
            let honest = liar.other_receiver();
            ctx.classical(honest, ByzRole::Sender, "different values");
            ctx.classical(ByzRole::Sender, honest, format!("{} is byzantine", liar));
            Some(liar)
        }
        ([false, false], true) => {
            ctx.note("no inconsistency detected");
            None
        }
    };
    ctx.state.suspect = suspect;
    Ok(())
}

fn agreement(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    if step != 1 {
        return Err(ctx.unexpected_step());
    }
    let r0 = ctx.state.receiver_value(0).ok_or_else(|| ctx.missing("receiver_values"))?;
    let r1 = ctx.state.receiver_value(1).ok_or_else(|| ctx.missing("receiver_values"))?;

    let agreed = match (ctx.state.suspect, ctx.state.consistent_receiver) {
        (Some(ByzRole::Sender), Some(consistent)) => {
            let index = consistent.receiver_index().unwrap_or(0);
            let value = ctx.state.sent[index].ok_or_else(|| ctx.missing("sent"))?;
            ctx.classical(consistent, consistent.other_receiver(), format!("agreement={}", value));
            Some(value)
        }
        (Some(liar @ (ByzRole::Receiver0 | ByzRole::Receiver1)), _) => {
            // the honest receiver keeps what the sender disclosed to it
            let honest = liar.other_receiver();
            let index = honest.receiver_index().unwrap_or(0);
            let value = ctx.state.sent[index].ok_or_else(|| ctx.missing("sent"))?;
            ctx.classical(ByzRole::Sender, honest, format!("agreement={}", value));
            Some(value)
        }
        _ if r0 == r1 => Some(r0),
        _ => None,
    };

    for role in ByzRole::ALL {
        let action = resolve_action(ctx.state, role, ByzPhase::Agreement, 1, ctx.rng);
        match (action, role.receiver_index(), agreed) {
            (ByzAction::Refuse, _, _) => {
                ctx.state.refused_by = Some(role);
                // a receiver only tells its peer; the sender tells both
                if role == ByzRole::Sender {
                    ctx.classical(role, ByzRole::Receiver0, "refuse");
                    ctx.classical(role, ByzRole::Receiver1, "refuse");
                } else {
                    ctx.classical(role, role.other_receiver(), "refuse");
                }
            }
            (ByzAction::Adopt, Some(index), Some(value)) => {
                ctx.state.receiver_values[index] = Some(value);
            }
            _ => {}
        }
    }
    ctx.state.agreed_value = agreed;
    Ok(())
}

static BYZANTINE_PHASES: [PhaseSpec<ByzantineAgreement>; 5] = [
    PhaseSpec {
        phase: ByzPhase::Preparation,
        steps: StepCount::Fixed(1),
        handler: preparation,
    },
    PhaseSpec {
        phase: ByzPhase::Transmission,
        steps: StepCount::Fixed(2),
        handler: transmission,
    },
    PhaseSpec {
        phase: ByzPhase::Verification,
        steps: StepCount::Fixed(2),
        handler: verification,
    },
    PhaseSpec {
        phase: ByzPhase::Detection,
        steps: StepCount::Fixed(1),
        handler: detection,
    },
    PhaseSpec {
        phase: ByzPhase::Agreement,
        steps: StepCount::Fixed(1),
        handler: agreement,
    },
];

// ============================================================================
// Verification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    /// Every party holds the same value and nobody refused
    Full,
    /// The honest parties agree, the adversary does not
    Partial,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementOutcome {
    pub agreed_value: Option<Bit>,
    /// All honest parties hold one value
    pub criterion1: bool,
    /// An honest sender's bit is the agreed value
    pub criterion2: bool,
    pub overall: bool,
    pub consensus: Consensus,
    pub suspect: Option<ByzRole>,
    pub refused_by: Option<ByzRole>,
}

impl fmt::Display for AgreementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self.agreed_value {
            Some(bit) => bit.to_string(),
            None => "-".to_string(),
        };
        write!(
            f,
            "agreed={} criterion1={} criterion2={} consensus={:?}",
            value, self.criterion1, self.criterion2, self.consensus
        )
    }
}

pub fn evaluate(state: &ByzantineState) -> Result<AgreementOutcome, EngineError> {
    let missing = |field| EngineError::MissingState {
        phase: ByzPhase::Agreement.to_string(),
        step: 2,
        field,
    };

    let mut finals = Vec::with_capacity(3);
    let mut honest_values = Vec::with_capacity(3);
    for role in ByzRole::ALL {
        let value = match role.receiver_index() {
            None => state.sender_bit,
            Some(index) => state.receiver_values[index].ok_or_else(|| missing("receiver_values"))?,
        };
        finals.push(value);
        if state.behavior.is_honest(role) {
            honest_values.push(value);
        }
    }

    let distinct: HashSet<Bit> = honest_values.iter().copied().collect();
    let criterion1 = distinct.len() == 1;
    let criterion2 = !state.behavior.is_honest(ByzRole::Sender)
        || honest_values.iter().all(|v| *v == state.sender_bit);

    let consensus = if criterion1
        && state.refused_by.is_none()
        && finals.iter().all(|v| *v == finals[0])
    {
        Consensus::Full
    } else if criterion1 {
        Consensus::Partial
    } else {
        Consensus::None
    };

    Ok(AgreementOutcome {
        agreed_value: if criterion1 { honest_values.first().copied() } else { None },
        criterion1,
        criterion2,
        overall: criterion1 && criterion2,
        consensus,
        suspect: state.suspect,
        refused_by: state.refused_by,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ByzantineAgreement;

impl Protocol for ByzantineAgreement {
    type Role = ByzRole;
    type Phase = ByzPhase;
    type Config = ByzantineConfig;
    type State = ByzantineState;
    type Outcome = AgreementOutcome;

    const NAME: &'static str = "byzantine-agreement";

    fn phase_table() -> &'static [PhaseSpec<Self>] {
        &BYZANTINE_PHASES
    }

    fn initialize(config: &ByzantineConfig) -> Result<ByzantineState, ConfigError> {
        let sender_bit = check_bit("sender_bit", config.sender_bit)?;
        let behavior: BehaviorProfile<ByzRole, ByzStrategy> =
            BehaviorProfile::resolve(&config.adversaries, |_, _| true)?;
        Ok(ByzantineState {
            behavior,
            sender_bit,
            ..ByzantineState::default()
        })
    }

    fn verify(
        _config: &ByzantineConfig,
        state: &ByzantineState,
    ) -> Result<AgreementOutcome, EngineError> {
        evaluate(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qs_engine::{schedule_length, PhaseEngine, Position};
    use crate::qs_oracle::TableOracle;
    use crate::qs_random::ScriptedSource;

    fn run(config: ByzantineConfig, seed: u64) -> (AgreementOutcome, ByzantineState) {
        let mut engine: PhaseEngine<ByzantineAgreement> = PhaseEngine::seeded(seed);
        engine.initialize(config).unwrap();
        let outcome = engine.run_to_completion().unwrap().unwrap();
        (outcome, engine.state().clone())
    }

    #[test]
    fn test_honest_run_agrees_on_sender_bit() {
        for bit in [0, 1] {
            for seed in 0..10 {
                let (outcome, state) = run(ByzantineConfig::honest(bit), seed);
                assert_eq!(outcome.agreed_value, Some(bit));
                assert!(outcome.criterion1);
                assert!(outcome.criterion2);
                assert!(outcome.overall);
                assert_eq!(outcome.consensus, Consensus::Full);
                assert_eq!(outcome.suspect, None);
                assert_eq!(state.receiver_values, [Some(bit), Some(bit)]);
            }
        }
    }

    #[test]
    fn test_sender_bit_one_without_adversary() {
        let (outcome, _) = run(ByzantineConfig::honest(1), 42);
        assert_eq!(outcome.agreed_value, Some(1));
        assert!(outcome.criterion1);
        assert!(outcome.criterion2);
    }

    #[test]
    fn test_phase_order_and_length() {
        let config = ByzantineConfig::honest(0);
        let mut engine: PhaseEngine<ByzantineAgreement> = PhaseEngine::seeded(3);
        engine.initialize(config.clone()).unwrap();

        let mut phases = vec![engine.position()];
        loop {
            let report = engine.advance().unwrap();
            if report.phase_changed {
                phases.push(report.position);
            }
            if report.complete {
                break;
            }
        }
        assert_eq!(
            phases,
            vec![
                Position::Phase(ByzPhase::Preparation),
                Position::Phase(ByzPhase::Transmission),
                Position::Phase(ByzPhase::Verification),
                Position::Phase(ByzPhase::Detection),
                Position::Phase(ByzPhase::Agreement),
                Position::Complete,
            ]
        );
        assert_eq!(engine.tick(), schedule_length::<ByzantineAgreement>(&config));
        assert_eq!(engine.tick(), 12);
    }

    #[test]
    fn test_split_values_pinned_to_receiver1() {
        // preparer index 0, then the consistent receiver index 1
        let rng = ScriptedSource::new().with_indices(&[0, 1]);
        let mut engine: PhaseEngine<ByzantineAgreement> =
            PhaseEngine::new(Box::new(rng), Box::new(TableOracle));
        engine
            .initialize(
                ByzantineConfig::honest(1)
                    .with_adversary(ByzRole::Sender, ByzStrategy::SendInconsistentValues),
            )
            .unwrap();

        engine.advance().unwrap(); // preparation
        engine.advance().unwrap(); // -> transmission
        let report = engine.advance().unwrap();
        assert_eq!(report.state.sent, [Some(0), Some(1)]);
        assert_eq!(report.state.consistent_receiver, Some(ByzRole::Receiver1));
        assert_eq!(report.messages[0].label, "bit=0");
        assert_eq!(report.messages[1].label, "bit=1");

        let outcome = engine.run_to_completion().unwrap().unwrap();
        assert_eq!(outcome.agreed_value, Some(1));
        assert_eq!(outcome.suspect, Some(ByzRole::Sender));
        assert!(outcome.criterion1);
    }

    #[test]
    fn test_split_values_reconcile_to_consistent_receiver() {
        for seed in 0..20 {
            let config = ByzantineConfig::honest(0)
                .with_adversary(ByzRole::Sender, ByzStrategy::SendInconsistentValues);
            let (outcome, state) = run(config, seed);

            let matching = state
                .reported
                .iter()
                .filter(|b| **b == Some(state.sender_bit))
                .count();
            assert_eq!(matching, 1);

            let consistent = state.consistent_receiver.unwrap();
            let index = consistent.receiver_index().unwrap();
            assert_eq!(state.reported[index], Some(state.sender_bit));
            assert_eq!(outcome.agreed_value, state.sent[index]);
            assert!(outcome.criterion1);
        }
    }

    #[test]
    fn test_false_indices_flagged_by_both_receivers() {
        let config = ByzantineConfig::honest(0)
            .with_adversary(ByzRole::Sender, ByzStrategy::SendFalseIndices);
        let (outcome, state) = run(config, 7);
        assert_eq!(state.disclosed, Some(IndexSet::J1));
        assert_eq!(
            state.quantum_states[&ByzRole::Receiver0],
            "inconsistent with J1"
        );
        assert_eq!(
            state.quantum_states[&ByzRole::Receiver1],
            "inconsistent with J1"
        );
        assert_eq!(outcome.suspect, Some(ByzRole::Sender));
        assert_eq!(outcome.agreed_value, Some(0));
        assert!(outcome.overall);
    }

    #[test]
    fn test_sender_refuses() {
        let config = ByzantineConfig::honest(1)
            .with_adversary(ByzRole::Sender, ByzStrategy::RefuseAgreement);
        let mut engine: PhaseEngine<ByzantineAgreement> = PhaseEngine::seeded(2);
        engine.initialize(config).unwrap();

        let mut refusals = 0;
        loop {
            let report = engine.advance().unwrap();
            refusals += report
                .messages
                .iter()
                .filter(|m| m.label == "refuse" && m.from == ByzRole::Sender)
                .count();
            if report.complete {
                break;
            }
        }
        assert_eq!(refusals, 2);
        let outcome = engine.outcome().unwrap();
        assert_eq!(outcome.refused_by, Some(ByzRole::Sender));
        assert!(outcome.criterion1);
        assert_eq!(outcome.consensus, Consensus::Partial);
    }

    #[test]
    fn test_lying_receiver_is_exposed_and_honest_receiver_keeps_value() {
        let config = ByzantineConfig::honest(1)
            .with_adversary(ByzRole::Receiver0, ByzStrategy::SendInconsistentValues);
        let (outcome, state) = run(config, 11);
        assert_eq!(state.reported, [Some(0), Some(1)]);
        assert_eq!(outcome.suspect, Some(ByzRole::Receiver0));
        assert_eq!(state.receiver_values[1], Some(1));
        assert_eq!(outcome.agreed_value, Some(1));
        assert!(outcome.overall);
    }

    #[test]
    fn test_fake_measurement_claim_is_rejected() {
        let config = ByzantineConfig::honest(0)
            .with_adversary(ByzRole::Receiver1, ByzStrategy::SendFalseIndices);
        let (outcome, state) = run(config, 5);
        assert_eq!(
            state.quantum_states[&ByzRole::Receiver1],
            "fake measurement for bit 1"
        );
        assert_eq!(state.quantum_states[&ByzRole::Receiver0], "measured: 0");
        assert_eq!(outcome.suspect, Some(ByzRole::Receiver1));
        assert_eq!(state.receiver_values[0], Some(0));
        assert!(outcome.overall);
    }

    #[test]
    fn test_refusing_receiver_gives_partial_consensus() {
        let config = ByzantineConfig::honest(0)
            .with_adversary(ByzRole::Receiver1, ByzStrategy::RefuseAgreement);
        let (outcome, state) = run(config, 9);
        assert_eq!(outcome.refused_by, Some(ByzRole::Receiver1));
        assert_eq!(state.receiver_values[0], Some(0));
        assert!(outcome.overall);
        assert_eq!(outcome.consensus, Consensus::Partial);
    }

    #[test]
    fn test_refusing_receiver_only_notifies_peer() {
        for (refuser, peer) in [
            (ByzRole::Receiver0, ByzRole::Receiver1),
            (ByzRole::Receiver1, ByzRole::Receiver0),
        ] {
            let config =
                ByzantineConfig::honest(1).with_adversary(refuser, ByzStrategy::RefuseAgreement);
            let mut engine: PhaseEngine<ByzantineAgreement> = PhaseEngine::seeded(3);
            engine.initialize(config).unwrap();

            let mut refusals = Vec::new();
            loop {
                let report = engine.advance().unwrap();
                refusals.extend(
                    report
                        .messages
                        .into_iter()
                        .filter(|m| m.label == "refuse"),
                );
                if report.complete {
                    break;
                }
            }
            assert_eq!(refusals.len(), 1);
            assert_eq!((refusals[0].from, refusals[0].to), (refuser, peer));
        }
    }

    #[test]
    fn test_entanglement_links_consumed_by_measurement() {
        let mut engine: PhaseEngine<ByzantineAgreement> = PhaseEngine::seeded(1);
        engine.initialize(ByzantineConfig::honest(0)).unwrap();
        assert!(engine.state().entanglement_links.is_empty());
        assert!(engine.state().quantum_states.is_empty());

        engine.advance().unwrap();
        assert_eq!(engine.state().entanglement_links.len(), 3);
        assert!(engine.state().preparer.is_some());

        // transition, send bits, sender measures
        engine.advance().unwrap();
        engine.advance().unwrap();
        engine.advance().unwrap();
        let links = &engine.state().entanglement_links;
        assert_eq!(links.len(), 1);
        assert!(links.contains(&RolePair::new(ByzRole::Receiver1, ByzRole::Receiver0)));
    }

    #[test]
    fn test_config_errors() {
        let mut engine: PhaseEngine<ByzantineAgreement> = PhaseEngine::seeded(1);
        assert!(matches!(
            engine.initialize(ByzantineConfig::honest(2)),
            Err(ConfigError::InvalidBit { .. })
        ));

        let two = ByzantineConfig::honest(0)
            .with_adversary(ByzRole::Sender, ByzStrategy::RefuseAgreement)
            .with_adversary(ByzRole::Receiver0, ByzStrategy::RefuseAgreement);
        assert_eq!(
            engine.initialize(two).err(),
            Some(ConfigError::MultipleAdversaries(2))
        );

        let mut unknown = ByzantineConfig::honest(0);
        unknown.adversaries.push(AdversarySpec::new("R2", "refuse-agreement"));
        assert_eq!(
            engine.initialize(unknown).err(),
            Some(ConfigError::UnknownRole("R2".to_string()))
        );
    }

    #[test]
    fn test_index_set_classes() {
        assert_eq!(IndexSet::for_bit(1), IndexSet::J1);
        assert_eq!(IndexSet::J0.bit(), 0);
        for (s, r0, r1) in IndexSet::J1.classes() {
            assert_eq!(s, 1);
            assert_ne!(r0, r1);
        }
    }
}
