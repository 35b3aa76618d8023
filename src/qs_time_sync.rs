//! Clock synchronization from the phase precession of two qubit clocks.
//!
//! Both clocks precess at angular frequency ω, Bob's with a phase lead δ.
//! After sharing a Bell pair the parties read off δ, Bob converts it into a
//! time offset δ/ω and compensates.

use std::f64::consts::TAU;
use std::fmt;

use crate::qs_engine::{PhaseSpec, Protocol, StepContext, StepCount};
use crate::qs_errors::{ConfigError, EngineError};
use crate::qs_interface::{Role, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncRole {
    Alice,
    Bob,
}

impl Role for SyncRole {}

impl fmt::Display for SyncRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncRole::Alice => write!(f, "Alice"),
            SyncRole::Bob => write!(f, "Bob"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Clock,
    Entanglement,
    Synchronization,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Clock => write!(f, "clock"),
            SyncPhase::Entanglement => write!(f, "entanglement"),
            SyncPhase::Synchronization => write!(f, "synchronization"),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    /// rad/s
    pub omega: f64,
    /// Bob's initial phase lead, rad
    pub delta: f64,
    /// Clock time added per precession step, s
    pub dt: f64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            omega: 6.28,
            delta: 0.79,
            dt: 0.05,
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Phase difference as measured from the Bell pair correlations
pub fn phase_difference(delta: f64) -> f64 {
    round2(delta.rem_euclid(TAU))
}

pub fn time_offset(phase_difference: f64, omega: f64) -> f64 {
    round2(phase_difference / omega)
}

#[derive(Debug, Clone, Default)]
pub struct TimeSyncState {
    pub omega: f64,
    pub delta: f64,
    pub time: f64,
    pub precessing: bool,
    pub entangled: bool,
    pub phase_difference: Option<f64>,
    pub offset: Option<f64>,
    pub synced: bool,
}

impl TimeSyncState {
    pub fn alice_phase(&self) -> f64 {
        (self.omega * self.time).rem_euclid(TAU)
    }

    pub fn bob_phase(&self) -> f64 {
        (self.omega * self.time + self.delta).rem_euclid(TAU)
    }
}

type Ctx<'a> = StepContext<'a, TimeSync>;

fn clock(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    match step {
        1 => ctx.note("both clocks prepared in (|0⟩ + |1⟩)/√2"),
        2 | 3 => {
            ctx.state.precessing = true;
            ctx.state.time += ctx.config.dt;
            let (a, b) = (ctx.state.alice_phase(), ctx.state.bob_phase());
            ctx.note(format!("t={:.2}s φA={:.2} φB={:.2}", ctx.state.time, a, b));
        }
        _ => return Err(ctx.unexpected_step()),
    }
    Ok(())
}

fn entanglement(ctx: &mut Ctx<'_>, _step: Step) -> Result<(), EngineError> {
    ctx.state.entangled = true;
    ctx.quantum(SyncRole::Alice, SyncRole::Bob, "Bell pair half");
    Ok(())
}

fn synchronization(ctx: &mut Ctx<'_>, step: Step) -> Result<(), EngineError> {
    match step {
        1 => {
            if !ctx.state.entangled {
                return Err(ctx.missing("entangled"));
            }
            let diff = phase_difference(ctx.state.delta);
            ctx.classical(SyncRole::Alice, SyncRole::Bob, "Pauli measurement results");
            ctx.note(format!("phase difference δ = {:.2} rad", diff));
            ctx.state.phase_difference = Some(diff);
        }
        2 => {
            let diff = ctx.state.phase_difference.ok_or_else(|| ctx.missing("phase_difference"))?;
            let offset = time_offset(diff, ctx.state.omega);
            ctx.note(format!("Bob shifts his clock by Δt = {:.2} s", offset));
            ctx.state.offset = Some(offset);
            ctx.state.delta = 0.0;
        }
        3 => {
            ctx.state.synced = true;
            ctx.state.precessing = false;
            ctx.classical(SyncRole::Bob, SyncRole::Alice, "synchronized");
        }
        _ => return Err(ctx.unexpected_step()),
    }
    Ok(())
}

static SYNC_PHASES: [PhaseSpec<TimeSync>; 3] = [
    PhaseSpec {
        phase: SyncPhase::Clock,
        steps: StepCount::Fixed(3),
        handler: clock,
    },
    PhaseSpec {
        phase: SyncPhase::Entanglement,
        steps: StepCount::Fixed(1),
        handler: entanglement,
    },
    PhaseSpec {
        phase: SyncPhase::Synchronization,
        steps: StepCount::Fixed(3),
        handler: synchronization,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSyncOutcome {
    pub phase_difference: f64,
    pub time_offset: f64,
    /// Phase lead left after compensation
    pub residual: f64,
    pub synced: bool,
}

impl fmt::Display for TimeSyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "δ={:.2} rad, Δt={:.2} s, {}",
            self.phase_difference,
            self.time_offset,
            if self.synced { "synchronized" } else { "not synchronized" }
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeSync;

impl Protocol for TimeSync {
    type Role = SyncRole;
    type Phase = SyncPhase;
    type Config = TimeSyncConfig;
    type State = TimeSyncState;
    type Outcome = TimeSyncOutcome;

    const NAME: &'static str = "time-sync";

    fn phase_table() -> &'static [PhaseSpec<Self>] {
        &SYNC_PHASES
    }

    fn initialize(config: &TimeSyncConfig) -> Result<TimeSyncState, ConfigError> {
        let omega = round2(config.omega);
        if !omega.is_finite() || omega <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "omega",
                value: config.omega,
            });
        }
        if !config.delta.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "delta",
                value: config.delta,
            });
        }
        if !config.dt.is_finite() || config.dt <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "dt",
                value: config.dt,
            });
        }
        Ok(TimeSyncState {
            omega,
            delta: round2(config.delta),
            ..TimeSyncState::default()
        })
    }

    fn verify(
        _config: &TimeSyncConfig,
        state: &TimeSyncState,
    ) -> Result<TimeSyncOutcome, EngineError> {
        let missing = |field| EngineError::MissingState {
            phase: SyncPhase::Synchronization.to_string(),
            step: 2,
            field,
        };
        Ok(TimeSyncOutcome {
            phase_difference: state.phase_difference.ok_or_else(|| missing("phase_difference"))?,
            time_offset: state.offset.ok_or_else(|| missing("offset"))?,
            residual: state.delta,
            synced: state.synced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qs_engine::PhaseEngine;

    fn run(config: TimeSyncConfig) -> TimeSyncOutcome {
        let mut engine: PhaseEngine<TimeSync> = PhaseEngine::seeded(0);
        engine.initialize(config).unwrap();
        engine.run_to_completion().unwrap().unwrap()
    }

    #[test]
    fn test_default_clocks() {
        let outcome = run(TimeSyncConfig::default());
        assert_eq!(outcome.phase_difference, 0.79);
        assert_eq!(outcome.time_offset, 0.13);
        assert_eq!(outcome.residual, 0.0);
        assert!(outcome.synced);
    }

    #[test]
    fn test_phase_difference_wraps() {
        assert_eq!(phase_difference(7.0), 0.72);
        assert_eq!(phase_difference(-0.5), round2(TAU - 0.5));
        let outcome = run(TimeSyncConfig {
            delta: 7.0,
            ..TimeSyncConfig::default()
        });
        assert_eq!(outcome.phase_difference, 0.72);
    }

    #[test]
    fn test_precession_advances_time() {
        let mut engine: PhaseEngine<TimeSync> = PhaseEngine::seeded(0);
        engine.initialize(TimeSyncConfig::default()).unwrap();
        for _ in 0..3 {
            engine.advance().unwrap();
        }
        let state = engine.state();
        assert!((state.time - 0.10).abs() < 1e-12);
        let lead = (state.bob_phase() - state.alice_phase()).rem_euclid(TAU);
        assert!((lead - 0.79).abs() < 1e-9);
        assert!(!state.synced);
    }

    #[test]
    fn test_inputs_are_rounded() {
        let mut engine: PhaseEngine<TimeSync> = PhaseEngine::seeded(0);
        let state = engine
            .initialize(TimeSyncConfig {
                omega: 3.14159,
                delta: 1.005,
                dt: 0.05,
            })
            .unwrap();
        assert_eq!(state.omega, 3.14);
    }

    #[test]
    fn test_invalid_frequency() {
        let mut engine: PhaseEngine<TimeSync> = PhaseEngine::seeded(0);
        for omega in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = engine.initialize(TimeSyncConfig {
                omega,
                ..TimeSyncConfig::default()
            });
            assert!(matches!(result, Err(ConfigError::OutOfRange { field: "omega", .. })));
        }
    }
}
