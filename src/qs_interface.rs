use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use hashbrown::HashMap;
use log::{debug, info, warn};

use crate::qs_errors::{ConfigError, SequenceError};

// a classical bit, always 0 or 1
pub type Bit = u8;

// step within a phase, 0 right after the phase is entered
pub type Step = u32;

// engine tick counter (one per advance call)
pub type Tick = u64;

#[inline]
pub fn flip(bit: Bit) -> Bit {
    bit ^ 1
}

/// Parse a single '0' / '1' into a bit.
pub fn parse_bit(field: &'static str, value: char) -> Result<Bit, ConfigError> {
    match value {
        '0' => Ok(0),
        '1' => Ok(1),
        other => Err(ConfigError::InvalidBit {
            field,
            value: other.to_string(),
        }),
    }
}

pub fn check_bit(field: &'static str, value: Bit) -> Result<Bit, ConfigError> {
    if value <= 1 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidBit {
            field,
            value: value.to_string(),
        })
    }
}

pub fn bits_to_string(bits: &[Bit]) -> String {
    bits.iter().map(|b| if *b == 0 { '0' } else { '1' }).collect()
}

// ============================================================================
// Actor Registry
// ============================================================================

/// A participant identity scoped to one protocol. Implemented by small
/// per-protocol enums; `Ord` gives unordered pairs a canonical form.
pub trait Role: Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + 'static {}

/// Unordered pair of roles, stored smaller-first so (a, b) == (b, a).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RolePair<R: Role>(R, R);

impl<R: Role> RolePair<R> {
    pub fn new(a: R, b: R) -> Self {
        if a <= b {
            RolePair(a, b)
        } else {
            RolePair(b, a)
        }
    }

    pub fn contains(&self, role: R) -> bool {
        self.0 == role || self.1 == role
    }

    pub fn roles(&self) -> (R, R) {
        (self.0, self.1)
    }
}

impl<R: Role> fmt::Display for RolePair<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}–{}", self.0, self.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Classical,
    Quantum,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Classical => write!(f, "classical"),
            MessageKind::Quantum => write!(f, "quantum"),
        }
    }
}

/// One inter-actor message produced during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<R: Role> {
    pub from: R,
    pub to: R,
    pub kind: MessageKind,
    pub label: String,
}

impl<R: Role> fmt::Display for Message<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.kind {
            MessageKind::Classical => "→",
            MessageKind::Quantum => "⇝",
        };
        write!(f, "{} {} {}: {}", self.from, arrow, self.to, self.label)
    }
}

// ============================================================================
// Behavior profile
// ============================================================================

/// Strategy followed by one role for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy<A> {
    Honest,
    Adversarial(A),
}

impl<A> Strategy<A> {
    pub fn is_honest(&self) -> bool {
        matches!(self, Strategy::Honest)
    }
}

/// Adversary assignment as it appears in configuration files. Names are
/// resolved against the protocol's role and strategy enums at initialize.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AdversarySpec {
    pub role: String,
    pub strategy: String,
}

impl AdversarySpec {
    pub fn new(role: impl fmt::Display, strategy: impl fmt::Display) -> Self {
        Self {
            role: role.to_string(),
            strategy: strategy.to_string(),
        }
    }
}

/// Role -> Strategy mapping with at most one adversarial role.
///
/// Roles missing from the map are honest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorProfile<R: Role, A: Copy + Eq> {
    assignments: HashMap<R, A>,
}

impl<R: Role, A: Copy + Eq> Default for BehaviorProfile<R, A> {
    fn default() -> Self {
        Self::honest()
    }
}

impl<R: Role, A: Copy + Eq> BehaviorProfile<R, A> {
    pub fn honest() -> Self {
        Self {
            assignments: HashMap::new(),
        }
    }

    /// Build a profile from (role, strategy) pairs, rejecting more than one
    /// adversary.
    pub fn from_assignments<I>(assignments: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (R, A)>,
    {
        let assignments: HashMap<R, A> = assignments.into_iter().collect();
        if assignments.len() > 1 {
            return Err(ConfigError::MultipleAdversaries(assignments.len()));
        }
        Ok(Self { assignments })
    }

    /// Resolve configuration names. Every name must parse, and the
    /// `compatible` predicate must accept the pair.
    pub fn resolve<F>(specs: &[AdversarySpec], compatible: F) -> Result<Self, ConfigError>
    where
        R: FromStr<Err = ConfigError>,
        A: FromStr<Err = ConfigError> + fmt::Display,
        F: Fn(R, A) -> bool,
    {
        if specs.len() > 1 {
            return Err(ConfigError::MultipleAdversaries(specs.len()));
        }
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            let role: R = spec.role.parse()?;
            let strategy: A = spec.strategy.parse()?;
            if !compatible(role, strategy) {
                return Err(ConfigError::UnsupportedStrategy {
                    role: role.to_string(),
                    strategy: strategy.to_string(),
                });
            }
            resolved.push((role, strategy));
        }
        Self::from_assignments(resolved)
    }

    pub fn strategy_of(&self, role: R) -> Strategy<A> {
        match self.assignments.get(&role) {
            Some(strategy) => Strategy::Adversarial(*strategy),
            None => Strategy::Honest,
        }
    }

    pub fn is_honest(&self, role: R) -> bool {
        self.strategy_of(role).is_honest()
    }

    pub fn adversary(&self) -> Option<(R, A)> {
        self.assignments.iter().next().map(|(r, a)| (*r, *a))
    }
}

// ============================================================================
// Event Logging System
// ============================================================================

/// Events emitted by the phase engine for debugging and analysis
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A new phase was entered on a transition tick
    PhaseEntered {
        protocol: &'static str,
        phase: String,
    },
    /// A phase handler ran successfully
    StepExecuted {
        protocol: &'static str,
        phase: String,
        step: Step,
        messages: usize,
    },
    /// The oracle failed and a random bit was substituted
    OracleDegraded {
        protocol: &'static str,
        phase: String,
        step: Step,
        reason: String,
    },
    /// advance() was ignored
    TickIgnored {
        protocol: &'static str,
        reason: SequenceError,
    },
    Completed {
        protocol: &'static str,
        summary: String,
    },
}

/// Trait for consuming events from the phase engine
pub trait EventSink {
    fn log(&mut self, tick: Tick, event: Event);
}

/// No-op event sink, the engine default
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _tick: Tick, _event: Event) {}
}

/// Forwards events to the `log` facade
pub struct LoggingEventSink {
    enabled: bool,
}

impl LoggingEventSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl EventSink for LoggingEventSink {
    fn log(&mut self, tick: Tick, event: Event) {
        if !self.enabled {
            return;
        }

        match event {
            Event::PhaseEntered { protocol, phase } => {
                info!("{:>4} {:<22} enter {}", tick, protocol, phase);
            }
            Event::StepExecuted {
                protocol,
                phase,
                step,
                messages,
            } => {
                debug!(
                    "{:>4} {:<22} {} step {} messages:{}",
                    tick, protocol, phase, step, messages
                );
            }
            Event::OracleDegraded {
                protocol,
                phase,
                step,
                reason,
            } => {
                warn!(
                    "{:>4} {:<22} {} step {} degraded: {}",
                    tick, protocol, phase, step, reason
                );
            }
            Event::TickIgnored { protocol, reason } => {
                info!("{:>4} {:<22} ignored: {}", tick, protocol, reason);
            }
            Event::Completed { protocol, summary } => {
                info!("{:>4} {:<22} complete: {}", tick, protocol, summary);
            }
        }
    }
}

/// Collects events in memory, mostly for tests and the scenario runner
#[derive(Default)]
pub struct CollectingSink {
    pub events: Vec<(Tick, Event)>,
}

impl EventSink for CollectingSink {
    fn log(&mut self, tick: Tick, event: Event) {
        self.events.push((tick, event));
    }
}
