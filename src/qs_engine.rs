//! Generic tick-driven phase engine.
//!
//! A protocol describes itself as an ordered table of phases. Each entry has
//! a step count and a handler; the engine owns the protocol state and walks
//! the table one step per `advance()`:
//!
//! ```text
//! init -> phase1 (steps 1..k1) -> phase2 (steps 1..k2) -> ... -> complete
//! ```
//!
//! The tick after a phase's last step is a transition tick: the step counter
//! goes back to 0 and the next phase is entered, or, after the last phase,
//! the protocol's verification runs and the engine completes.

use std::collections::VecDeque;
use std::fmt;

use log::{debug, info, warn};

use crate::qs_errors::{ConfigError, EngineError, OracleFailure, SequenceError};
use crate::qs_interface::{
    Bit, Event, EventSink, Message, MessageKind, NoOpSink, Role, Step, Tick,
};
use crate::qs_oracle::{Basis, QuantumOracle, QubitState, TableOracle};
use crate::qs_random::{RandomSource, SeededSource};

/// Rolling message history kept across ticks for display
pub const HISTORY_CAPACITY: usize = 5;

// ============================================================================
// Protocol description
// ============================================================================

/// A protocol the engine can drive.
pub trait Protocol: Sized + 'static {
    type Role: Role;
    type Phase: Copy + Eq + fmt::Debug + fmt::Display + 'static;
    type Config: Clone;
    /// `Default` is the cleared state returned by `reset()`
    type State: Clone + Default + fmt::Debug;
    type Outcome: Clone + fmt::Debug + fmt::Display;

    const NAME: &'static str;

    /// Ordered phase table, never empty.
    fn phase_table() -> &'static [PhaseSpec<Self>];

    /// Validate the configuration and build the starting state.
    fn initialize(config: &Self::Config) -> Result<Self::State, ConfigError>;

    /// Evaluate the terminal state once every phase has run.
    fn verify(config: &Self::Config, state: &Self::State) -> Result<Self::Outcome, EngineError>;
}

/// Number of steps in a phase. Fixed for the protocol or fixed per instance.
pub enum StepCount<C> {
    Fixed(Step),
    PerConfig(fn(&C) -> Step),
}

impl<C> StepCount<C> {
    pub fn resolve(&self, config: &C) -> Step {
        match self {
            StepCount::Fixed(steps) => *steps,
            StepCount::PerConfig(count) => count(config),
        }
    }
}

pub type PhaseHandler<P> = fn(&mut StepContext<'_, P>, Step) -> Result<(), EngineError>;

pub struct PhaseSpec<P: Protocol> {
    pub phase: P::Phase,
    pub steps: StepCount<P::Config>,
    pub handler: PhaseHandler<P>,
}

/// Ticks from a fresh `initialize` to `complete`, transition ticks included.
pub fn schedule_length<P: Protocol>(config: &P::Config) -> u64 {
    P::phase_table()
        .iter()
        .map(|spec| spec.steps.resolve(config) as u64 + 1)
        .sum()
}

// ============================================================================
// Handler context
// ============================================================================

/// What a phase handler sees during one step. `state` is a working copy that
/// only replaces the engine's state if the handler returns Ok.
pub struct StepContext<'a, P: Protocol> {
    pub config: &'a P::Config,
    pub state: &'a mut P::State,
    pub rng: &'a mut dyn RandomSource,
    phase: P::Phase,
    step: Step,
    oracle: &'a mut dyn QuantumOracle,
    messages: &'a mut Vec<Message<P::Role>>,
    notes: &'a mut Vec<String>,
    degraded: &'a mut Vec<String>,
}

impl<'a, P: Protocol> StepContext<'a, P> {
    pub fn send(
        &mut self,
        from: P::Role,
        to: P::Role,
        kind: MessageKind,
        label: impl Into<String>,
    ) {
        self.messages.push(Message {
            from,
            to,
            kind,
            label: label.into(),
        });
    }

    pub fn classical(&mut self, from: P::Role, to: P::Role, label: impl Into<String>) {
        self.send(from, to, MessageKind::Classical, label);
    }

    pub fn quantum(&mut self, from: P::Role, to: P::Role, label: impl Into<String>) {
        self.send(from, to, MessageKind::Quantum, label);
    }

    /// Narration line shown next to the step's messages
    pub fn note(&mut self, text: impl Into<String>) {
        self.notes.push(text.into());
    }

    /// Measure through the oracle. A failed or malformed outcome is replaced
    /// by a uniform random bit and the step is marked degraded.
    pub fn measure(&mut self, prepared: QubitState, basis: Basis) -> Bit {
        let result = match self.oracle.measure(prepared, basis, &mut *self.rng) {
            Ok(bit) if bit > 1 => Err(OracleFailure::Malformed(bit)),
            other => other,
        };
        match result {
            Ok(bit) => bit,
            Err(failure) => {
                warn!(
                    "{} {} step {}: {}, substituting a random bit",
                    P::NAME,
                    self.phase,
                    self.step,
                    failure
                );
                self.degraded.push(failure.to_string());
                self.rng.next_bit()
            }
        }
    }

    /// An oracle call in this step was substituted
    pub fn degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Invariant fault for a field an earlier step should have set
    pub fn missing(&self, field: &'static str) -> EngineError {
        EngineError::MissingState {
            phase: self.phase.to_string(),
            step: self.step,
            field,
        }
    }

    pub fn unexpected_step(&self) -> EngineError {
        EngineError::UnexpectedStep {
            phase: self.phase.to_string(),
            step: self.step,
        }
    }
}

// ============================================================================
// Message log / history
// ============================================================================

/// Messages of the current tick; replaced every tick
#[derive(Debug, Clone)]
pub struct MessageLog<R: Role> {
    entries: Vec<Message<R>>,
}

impl<R: Role> MessageLog<R> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[Message<R>] {
        &self.entries
    }
}

impl<R: Role> Default for MessageLog<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded rolling history, oldest dropped first
#[derive(Debug, Clone)]
pub struct MessageHistory<R: Role> {
    entries: VecDeque<Message<R>>,
}

impl<R: Role> MessageHistory<R> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn push(&mut self, message: Message<R>) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_vec(&self) -> Vec<Message<R>> {
        self.entries.iter().cloned().collect()
    }
}

impl<R: Role> Default for MessageHistory<R> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Init,
    Active { index: usize, step: Step },
    Complete,
}

/// Where the engine stands in the phase order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position<Ph> {
    Init,
    Phase(Ph),
    Complete,
}

impl<Ph: fmt::Display> fmt::Display for Position<Ph> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Init => write!(f, "init"),
            Position::Phase(phase) => write!(f, "{}", phase),
            Position::Complete => write!(f, "complete"),
        }
    }
}

/// Result of one `advance()` call
#[derive(Debug, Clone)]
pub struct StepReport<P: Protocol> {
    pub position: Position<P::Phase>,
    pub step: Step,
    pub state: P::State,
    pub messages: Vec<Message<P::Role>>,
    pub notes: Vec<String>,
    /// The position moved to a new phase or to complete
    pub phase_changed: bool,
    pub complete: bool,
    /// Oracle failed during this step and a random bit was substituted
    pub degraded: bool,
    /// The tick was ignored
    pub idle: Option<SequenceError>,
    pub info: Option<String>,
    pub outcome: Option<P::Outcome>,
}

/// Immutable copy of everything a renderer needs
#[derive(Debug, Clone)]
pub struct Snapshot<P: Protocol> {
    pub tick: Tick,
    pub position: Position<P::Phase>,
    pub step: Step,
    pub state: P::State,
    pub messages: Vec<Message<P::Role>>,
    pub history: Vec<Message<P::Role>>,
    pub outcome: Option<P::Outcome>,
    pub complete: bool,
    /// Any step since initialize was degraded
    pub degraded: bool,
}

pub struct PhaseEngine<P: Protocol> {
    config: Option<P::Config>,
    state: P::State,
    cursor: Cursor,
    log: MessageLog<P::Role>,
    notes: Vec<String>,
    history: MessageHistory<P::Role>,
    outcome: Option<P::Outcome>,
    degraded: bool,
    tick: Tick,
    rng: Box<dyn RandomSource>,
    oracle: Box<dyn QuantumOracle>,
    events: Box<dyn EventSink>,
}

impl<P: Protocol> PhaseEngine<P> {
    pub fn new(rng: Box<dyn RandomSource>, oracle: Box<dyn QuantumOracle>) -> Self {
        Self {
            config: None,
            state: P::State::default(),
            cursor: Cursor::Init,
            log: MessageLog::new(),
            notes: Vec::new(),
            history: MessageHistory::new(),
            outcome: None,
            degraded: false,
            tick: 0,
            rng,
            oracle,
            events: Box::new(NoOpSink),
        }
    }

    /// Seeded source with the closed-form oracle
    pub fn seeded(seed: u64) -> Self {
        Self::new(Box::new(SeededSource::from_u64(seed)), Box::new(TableOracle))
    }

    pub fn with_event_sink(mut self, events: Box<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Validate `config` and start a fresh run at the first phase.
    /// The previous run, if any, is discarded.
    pub fn initialize(&mut self, config: P::Config) -> Result<&P::State, ConfigError> {
        let state = match P::initialize(&config) {
            Ok(state) => state,
            Err(err) => {
                warn!("{}: rejected configuration: {}", P::NAME, err);
                return Err(err);
            }
        };

        self.clear();
        self.state = state;
        self.config = Some(config);
        self.cursor = Cursor::Active { index: 0, step: 0 };

        if let Some(first) = P::phase_table().first() {
            info!("{}: initialized, entering {}", P::NAME, first.phase);
            self.events.log(
                self.tick,
                Event::PhaseEntered {
                    protocol: P::NAME,
                    phase: first.phase.to_string(),
                },
            );
        }
        Ok(&self.state)
    }

    /// Run one step. Returns Err only for a handler invariant fault, in
    /// which case the state is left as it was.
    pub fn advance(&mut self) -> Result<StepReport<P>, EngineError> {
        let (index, step) = match self.cursor {
            Cursor::Init => return Ok(self.idle(SequenceError::NotInitialized)),
            Cursor::Complete => return Ok(self.idle(SequenceError::AlreadyComplete)),
            Cursor::Active { index, step } => (index, step),
        };
        let config = match self.config.as_ref() {
            Some(config) => config,
            None => return Ok(self.idle(SequenceError::NotInitialized)),
        };

        let table = P::phase_table();
        let spec = table.get(index).ok_or(EngineError::UnexpectedStep {
            phase: format!("#{}", index),
            step,
        })?;

        let next_step = step + 1;
        if next_step > spec.steps.resolve(config) {
            if let Some(next) = table.get(index + 1) {
                self.begin_tick();
                self.cursor = Cursor::Active {
                    index: index + 1,
                    step: 0,
                };
                debug!("{}: {} -> {}", P::NAME, spec.phase, next.phase);
                self.events.log(
                    self.tick,
                    Event::PhaseEntered {
                        protocol: P::NAME,
                        phase: next.phase.to_string(),
                    },
                );
                return Ok(self.report(true, false, None));
            }

            let outcome = P::verify(config, &self.state)?;
            self.begin_tick();
            info!("{}: complete, {}", P::NAME, outcome);
            self.events.log(
                self.tick,
                Event::Completed {
                    protocol: P::NAME,
                    summary: outcome.to_string(),
                },
            );
            self.outcome = Some(outcome);
            self.cursor = Cursor::Complete;
            return Ok(self.report(true, false, None));
        }

        let mut working = self.state.clone();
        let mut messages = Vec::new();
        let mut notes = Vec::new();
        let mut degraded = Vec::new();
        let result = {
            let mut ctx = StepContext {
                config,
                state: &mut working,
                rng: self.rng.as_mut(),
                phase: spec.phase,
                step: next_step,
                oracle: self.oracle.as_mut(),
                messages: &mut messages,
                notes: &mut notes,
                degraded: &mut degraded,
            };
            (spec.handler)(&mut ctx, next_step)
        };

        if let Err(err) = result {
            warn!("{}: {} step {} failed: {}", P::NAME, spec.phase, next_step, err);
            return Err(err);
        }

        self.begin_tick();
        self.log.entries = messages;
        self.notes = notes;
        self.state = working;
        self.cursor = Cursor::Active {
            index,
            step: next_step,
        };
        for message in self.log.entries() {
            self.history.push(message.clone());
        }
        for reason in &degraded {
            self.events.log(
                self.tick,
                Event::OracleDegraded {
                    protocol: P::NAME,
                    phase: spec.phase.to_string(),
                    step: next_step,
                    reason: reason.clone(),
                },
            );
        }
        self.events.log(
            self.tick,
            Event::StepExecuted {
                protocol: P::NAME,
                phase: spec.phase.to_string(),
                step: next_step,
                messages: self.log.entries().len(),
            },
        );

        let step_degraded = !degraded.is_empty();
        self.degraded |= step_degraded;
        Ok(self.report(false, step_degraded, None))
    }

    fn begin_tick(&mut self) {
        self.tick += 1;
        self.log.clear();
        self.notes.clear();
    }

    /// Drive `advance()` until complete. None when the engine was never
    /// initialized.
    pub fn run_to_completion(&mut self) -> Result<Option<P::Outcome>, EngineError> {
        loop {
            let report = self.advance()?;
            match report.idle {
                Some(SequenceError::NotInitialized) => return Ok(None),
                Some(SequenceError::AlreadyComplete) => return Ok(self.outcome.clone()),
                None if report.complete => return Ok(report.outcome),
                None => {}
            }
        }
    }

    /// Discard the run. Safe from any position.
    pub fn reset(&mut self) -> &P::State {
        self.clear();
        self.config = None;
        self.cursor = Cursor::Init;
        debug!("{}: reset", P::NAME);
        &self.state
    }

    pub fn snapshot(&self) -> Snapshot<P> {
        Snapshot {
            tick: self.tick,
            position: self.position(),
            step: self.step(),
            state: self.state.clone(),
            messages: self.log.entries().to_vec(),
            history: self.history.to_vec(),
            outcome: self.outcome.clone(),
            complete: self.is_complete(),
            degraded: self.degraded,
        }
    }

    pub fn position(&self) -> Position<P::Phase> {
        match self.cursor {
            Cursor::Init => Position::Init,
            Cursor::Active { index, .. } => match P::phase_table().get(index) {
                Some(spec) => Position::Phase(spec.phase),
                None => Position::Init,
            },
            Cursor::Complete => Position::Complete,
        }
    }

    pub fn step(&self) -> Step {
        match self.cursor {
            Cursor::Active { step, .. } => step,
            _ => 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == Cursor::Complete
    }

    pub fn state(&self) -> &P::State {
        &self.state
    }

    pub fn config(&self) -> Option<&P::Config> {
        self.config.as_ref()
    }

    pub fn outcome(&self) -> Option<&P::Outcome> {
        self.outcome.as_ref()
    }

    pub fn messages(&self) -> &[Message<P::Role>] {
        self.log.entries()
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    fn clear(&mut self) {
        self.state = P::State::default();
        self.outcome = None;
        self.log.clear();
        self.notes.clear();
        self.history.clear();
        self.degraded = false;
        self.tick = 0;
    }

    fn idle(&mut self, reason: SequenceError) -> StepReport<P> {
        info!("{}: tick ignored, {}", P::NAME, reason);
        self.events.log(
            self.tick,
            Event::TickIgnored {
                protocol: P::NAME,
                reason,
            },
        );
        let mut report = self.report(false, false, Some(reason));
        report.messages.clear();
        report.notes.clear();
        report
    }

    fn report(
        &self,
        phase_changed: bool,
        degraded: bool,
        idle: Option<SequenceError>,
    ) -> StepReport<P> {
        StepReport {
            position: self.position(),
            step: self.step(),
            state: self.state.clone(),
            messages: self.log.entries().to_vec(),
            notes: self.notes.clone(),
            phase_changed,
            complete: self.is_complete(),
            degraded,
            idle,
            info: idle.map(|reason| reason.to_string()),
            outcome: self.outcome.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qs_interface::CollectingSink;
    use crate::qs_oracle::FlakyOracle;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Node {
        Left,
        Right,
    }

    impl fmt::Display for Node {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Role for Node {}

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PingPhase {
        Ping,
        Pong,
    }

    impl fmt::Display for PingPhase {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    #[derive(Debug, Clone)]
    struct PingConfig {
        pongs: Step,
        fail_on_pong: bool,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct PingState {
        pings: u32,
        pongs: u32,
        measured: Vec<Bit>,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct PingOutcome(u32);

    impl fmt::Display for PingOutcome {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} exchanges", self.0)
        }
    }

    #[derive(Debug, Clone, Copy)]
    struct PingPong;

    fn ping(ctx: &mut StepContext<'_, PingPong>, _step: Step) -> Result<(), EngineError> {
        ctx.state.pings += 1;
        let bit = ctx.measure(QubitState::ONE, Basis::Z);
        ctx.state.measured.push(bit);
        ctx.classical(Node::Left, Node::Right, "ping");
        Ok(())
    }

    fn pong(ctx: &mut StepContext<'_, PingPong>, step: Step) -> Result<(), EngineError> {
        ctx.state.pongs += 1;
        ctx.quantum(Node::Right, Node::Left, format!("pong {}", step));
        if ctx.config.fail_on_pong && step == ctx.config.pongs {
            return Err(ctx.missing("pong"));
        }
        Ok(())
    }

    fn pong_steps(config: &PingConfig) -> Step {
        config.pongs
    }

    static PING_PHASES: [PhaseSpec<PingPong>; 2] = [
        PhaseSpec {
            phase: PingPhase::Ping,
            steps: StepCount::Fixed(1),
            handler: ping,
        },
        PhaseSpec {
            phase: PingPhase::Pong,
            steps: StepCount::PerConfig(pong_steps),
            handler: pong,
        },
    ];

    impl Protocol for PingPong {
        type Role = Node;
        type Phase = PingPhase;
        type Config = PingConfig;
        type State = PingState;
        type Outcome = PingOutcome;

        const NAME: &'static str = "ping-pong";

        fn phase_table() -> &'static [PhaseSpec<Self>] {
            &PING_PHASES
        }

        fn initialize(config: &PingConfig) -> Result<PingState, ConfigError> {
            if config.pongs == 0 {
                return Err(ConfigError::OutOfRange {
                    field: "pongs",
                    value: 0.0,
                });
            }
            Ok(PingState::default())
        }

        fn verify(_config: &PingConfig, state: &PingState) -> Result<PingOutcome, EngineError> {
            Ok(PingOutcome(state.pings + state.pongs))
        }
    }

    fn config(pongs: Step) -> PingConfig {
        PingConfig {
            pongs,
            fail_on_pong: false,
        }
    }

    #[test]
    fn test_advance_before_initialize_is_idle() {
        let mut engine: PhaseEngine<PingPong> = PhaseEngine::seeded(1);
        let report = engine.advance().unwrap();
        assert_eq!(report.idle, Some(SequenceError::NotInitialized));
        assert!(report.info.is_some());
        assert!(!report.complete);
        assert_eq!(engine.position(), Position::Init);
        assert_eq!(engine.tick(), 0);
    }

    #[test]
    fn test_walks_phases_with_transition_ticks() {
        let mut engine: PhaseEngine<PingPong> = PhaseEngine::seeded(1);
        engine.initialize(config(2)).unwrap();
        assert_eq!(engine.position(), Position::Phase(PingPhase::Ping));
        assert_eq!(engine.step(), 0);

        // Ping step 1
        let r = engine.advance().unwrap();
        assert_eq!((r.position, r.step), (Position::Phase(PingPhase::Ping), 1));
        assert_eq!(r.messages.len(), 1);
        assert!(!r.phase_changed);

        // transition into Pong
        let r = engine.advance().unwrap();
        assert_eq!((r.position, r.step), (Position::Phase(PingPhase::Pong), 0));
        assert!(r.phase_changed);
        assert!(r.messages.is_empty());

        // Pong steps 1 and 2
        let r = engine.advance().unwrap();
        assert_eq!(r.step, 1);
        assert_eq!(r.messages[0].label, "pong 1");
        let r = engine.advance().unwrap();
        assert_eq!(r.step, 2);
        assert_eq!(r.messages.len(), 1);

        // terminal tick
        let r = engine.advance().unwrap();
        assert!(r.complete);
        assert!(r.phase_changed);
        assert_eq!(r.position, Position::Complete);
        assert_eq!(r.outcome, Some(PingOutcome(3)));
        assert_eq!(engine.tick(), schedule_length::<PingPong>(&config(2)));
    }

    #[test]
    fn test_advance_after_complete_is_idempotent() {
        let mut engine: PhaseEngine<PingPong> = PhaseEngine::seeded(1);
        engine.initialize(config(1)).unwrap();
        engine.run_to_completion().unwrap();

        let before = engine.snapshot();
        for _ in 0..3 {
            let r = engine.advance().unwrap();
            assert!(r.complete);
            assert_eq!(r.idle, Some(SequenceError::AlreadyComplete));
            assert_eq!(r.state, before.state);
        }
        let after = engine.snapshot();
        assert_eq!(after.tick, before.tick);
        assert_eq!(after.state, before.state);
        assert_eq!(after.outcome, before.outcome);
    }

    #[test]
    fn test_failed_step_leaves_state_unchanged() {
        let mut engine: PhaseEngine<PingPong> = PhaseEngine::seeded(1);
        engine
            .initialize(PingConfig {
                pongs: 2,
                fail_on_pong: true,
            })
            .unwrap();
        engine.advance().unwrap();
        engine.advance().unwrap();
        engine.advance().unwrap();
        let before = engine.snapshot();
        assert_eq!(before.messages[0].label, "pong 1");

        let result = engine.advance();
        assert!(matches!(result, Err(EngineError::MissingState { field: "pong", .. })));
        let after = engine.snapshot();
        assert_eq!(after.state, before.state);
        assert_eq!(after.tick, before.tick);
        assert_eq!(after.step, 1);
        assert_eq!(after.messages, before.messages);
        assert_eq!(after.history, before.history);
        assert!(!engine.is_degraded());
    }

    #[test]
    fn test_reset_then_initialize_matches_fresh_run() {
        let mut fresh: PhaseEngine<PingPong> = PhaseEngine::seeded(5);
        fresh.initialize(config(3)).unwrap();
        fresh.run_to_completion().unwrap();

        let mut reused: PhaseEngine<PingPong> = PhaseEngine::seeded(6);
        reused.initialize(config(3)).unwrap();
        reused.advance().unwrap();
        reused.advance().unwrap();
        let cleared = reused.reset().clone();
        assert_eq!(cleared, PingState::default());
        assert!(reused.config().is_none());
        assert_eq!(reused.position(), Position::Init);
        assert!(reused.snapshot().history.is_empty());

        reused.initialize(config(3)).unwrap();
        reused.run_to_completion().unwrap();
        assert_eq!(reused.tick(), fresh.tick());
        assert_eq!(reused.outcome(), fresh.outcome());
    }

    #[test]
    fn test_rejected_config_keeps_engine_uninitialized() {
        let mut engine: PhaseEngine<PingPong> = PhaseEngine::seeded(1);
        let result = engine.initialize(config(0));
        assert!(matches!(result, Err(ConfigError::OutOfRange { .. })));
        assert_eq!(engine.position(), Position::Init);
    }

    #[test]
    fn test_history_is_capped() {
        let mut engine: PhaseEngine<PingPong> = PhaseEngine::seeded(1);
        engine.initialize(config(9)).unwrap();
        engine.run_to_completion().unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.history.len(), HISTORY_CAPACITY);
        assert_eq!(snapshot.history.last().unwrap().label, "pong 9");
    }

    #[test]
    fn test_oracle_failure_degrades_step() {
        let mut engine: PhaseEngine<PingPong> = PhaseEngine::new(
            Box::new(SeededSource::from_u64(2)),
            Box::new(FlakyOracle::new(1)),
        );
        engine.initialize(config(1)).unwrap();
        let r = engine.advance().unwrap();
        assert!(r.degraded);
        assert!(r.state.measured[0] <= 1);
        assert!(engine.snapshot().degraded);
    }

    #[test]
    fn test_events_are_emitted() {
        struct SharedSink(std::rc::Rc<std::cell::RefCell<CollectingSink>>);
        impl EventSink for SharedSink {
            fn log(&mut self, tick: Tick, event: Event) {
                self.0.borrow_mut().log(tick, event);
            }
        }

        let collected = std::rc::Rc::new(std::cell::RefCell::new(CollectingSink::default()));
        let mut engine: PhaseEngine<PingPong> =
            PhaseEngine::seeded(1).with_event_sink(Box::new(SharedSink(collected.clone())));
        engine.initialize(config(1)).unwrap();
        engine.run_to_completion().unwrap();
        engine.advance().unwrap();

        let events = &collected.borrow().events;
        let entered = events
            .iter()
            .filter(|(_, e)| matches!(e, Event::PhaseEntered { .. }))
            .count();
        assert_eq!(entered, 2);
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, Event::Completed { .. })));
        assert!(matches!(
            events.last(),
            Some((_, Event::TickIgnored { reason: SequenceError::AlreadyComplete, .. }))
        ));
    }
}
