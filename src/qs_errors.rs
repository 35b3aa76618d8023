// Error taxonomy shared by every protocol engine.
//
// ConfigError is the only error a caller has to handle up front: it is
// returned from `initialize` and never recovered automatically. SequenceError
// is informational and travels inside a StepReport instead of an Err.
// OracleFailure stays between the oracle and the engine, which substitutes a
// random bit and marks the step as degraded.

use thiserror::Error;

/// Invalid protocol configuration, surfaced synchronously at `initialize`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A role name did not match any role of the protocol
    #[error("unknown role '{0}'")]
    UnknownRole(String),

    /// A strategy name did not match any adversarial variant of the protocol
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    /// The protocol defines no adversarial behavior for this role
    #[error("role {role} cannot follow strategy {strategy}")]
    UnsupportedStrategy { role: String, strategy: String },

    /// More than one role was configured as adversarial
    #[error("at most one adversarial role per run, got {0}")]
    MultipleAdversaries(usize),

    #[error("participant count {count} outside {min}..={max}")]
    ParticipantCount { count: usize, min: usize, max: usize },

    #[error("threshold {threshold} outside 2..={participants}")]
    Threshold { threshold: usize, participants: usize },

    /// A bit-valued field held something other than 0 or 1
    #[error("{field}: '{value}' is not a bit")]
    InvalidBit { field: &'static str, value: String },

    /// A list-valued field has the wrong length
    #[error("{field}: expected {expected} entries, got {actual}")]
    Length {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A numeric field is negative, zero where forbidden, or not finite
    #[error("{field} = {value} is out of range")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Benign ordering problem: the tick is ignored and reported, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("advance called before initialize")]
    NotInitialized,

    #[error("protocol already complete")]
    AlreadyComplete,
}

/// The quantum-outcome collaborator could not produce a bit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleFailure {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle returned malformed outcome {0}")]
    Malformed(u8),
}

/// Internal invariant fault raised by a phase handler. The step is not
/// applied and the run must be reset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A handler read a field that an earlier phase should have set
    #[error("{phase} step {step}: missing {field}")]
    MissingState {
        phase: String,
        step: u32,
        field: &'static str,
    },

    #[error("{phase}: no handler for step {step}")]
    UnexpectedStep { phase: String, step: u32 },

    #[error("participant index {index} out of range ({count} participants)")]
    RoleOutOfRange { index: usize, count: usize },

    /// Re-initializing for another round was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}
