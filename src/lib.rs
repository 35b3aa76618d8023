//! # qsRust - Quantum Protocol Phase Engines
//!
//! Tick-driven simulations of small multi-party quantum protocols, written for
//! teaching the *shape* of each protocol: who sends what to whom, in which
//! phase, and how the final verdict is derived.
//!
//! ## Core Components
//!
//! - **PhaseEngine**: generic state machine walking a protocol's phase table, one step per
//!   `advance()`
//! - **Protocol**: trait each protocol implements (roles, phases, config, state, verification)
//! - **BehaviorProfile**: role to strategy mapping with at most one adversarial role
//! - **RandomSource / QuantumOracle**: injectable randomness and measurement outcomes
//!
//! ## Usage
//!
//! The engine never renders anything. A driver calls `initialize`, then
//! `advance` once per tick, and reads the returned `StepReport` or a
//! `snapshot()`:
//!
//! ```no_run
//! use qs_rust::qs_byzantine::{ByzantineAgreement, ByzantineConfig};
//! use qs_rust::PhaseEngine;
//!
//! let mut engine: PhaseEngine<ByzantineAgreement> = PhaseEngine::seeded(7);
//! engine.initialize(ByzantineConfig::honest(1)).unwrap();
//!
//! loop {
//!     let report = engine.advance().unwrap();
//!     for message in &report.messages {
//!         println!("{} {}", report.position, message);
//!     }
//!     if report.complete {
//!         println!("{}", report.outcome.unwrap());
//!         break;
//!     }
//! }
//! ```
//!
//! ## Simulation
//!
//! `qsim` runs every protocol once; `scenario_runner` loads YAML scenarios
//! from `scenarios/` and prints the message trace and a summary.

// Shared model
pub mod qs_errors;
pub mod qs_interface;
pub mod qs_oracle;
pub mod qs_random;

// Engine
pub mod qs_engine;

// Protocols
pub mod qs_byzantine;
pub mod qs_coin_flip;
pub mod qs_commitment;
pub mod qs_position;
pub mod qs_qkd;
pub mod qs_qrng;
pub mod qs_secret_sharing;
pub mod qs_time_sync;

// Re-export commonly used types
pub use qs_engine::{
    schedule_length, PhaseEngine, PhaseSpec, Position, Protocol, Snapshot, StepContext, StepCount,
    StepReport, HISTORY_CAPACITY,
};
pub use qs_errors::{ConfigError, EngineError, OracleFailure, SequenceError};
pub use qs_interface::{
    AdversarySpec, BehaviorProfile, Bit, Event, EventSink, LoggingEventSink, Message, MessageKind,
    NoOpSink, Role, RolePair, Step, Strategy, Tick,
};
pub use qs_oracle::{Basis, FlakyOracle, QuantumOracle, QubitState, TableOracle};
pub use qs_random::{resolve_seed, RandomSource, ScriptedSource, SeededSource};
pub use qs_position::{PositionSummary, RoundController};
