use std::fmt;

use crate::qs_errors::OracleFailure;
use crate::qs_interface::Bit;
use crate::qs_random::RandomSource;

/// Measurement / preparation basis of a single qubit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
pub enum Basis {
    /// rectilinear, ⨁
    #[serde(alias = "z", alias = "rectilinear")]
    Z,
    /// diagonal, ⨂
    #[serde(alias = "x", alias = "diagonal")]
    X,
}

impl Basis {
    pub fn random(rng: &mut dyn RandomSource) -> Self {
        if rng.next_bit() == 0 {
            Basis::Z
        } else {
            Basis::X
        }
    }

    pub fn other(self) -> Self {
        match self {
            Basis::Z => Basis::X,
            Basis::X => Basis::Z,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Basis::Z => "⨁",
            Basis::X => "⨂",
        }
    }

    pub fn orientation(self) -> &'static str {
        match self {
            Basis::Z => "rectilinear",
            Basis::X => "diagonal",
        }
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Basis::Z => write!(f, "Z"),
            Basis::X => write!(f, "X"),
        }
    }
}

/// One of the four BB84 states: the eigenstate `bit` of `basis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QubitState {
    pub basis: Basis,
    pub bit: Bit,
}

impl QubitState {
    pub const ZERO: QubitState = QubitState {
        basis: Basis::Z,
        bit: 0,
    };
    pub const ONE: QubitState = QubitState {
        basis: Basis::Z,
        bit: 1,
    };
    pub const PLUS: QubitState = QubitState {
        basis: Basis::X,
        bit: 0,
    };
    pub const MINUS: QubitState = QubitState {
        basis: Basis::X,
        bit: 1,
    };

    pub fn new(basis: Basis, bit: Bit) -> Self {
        Self {
            basis,
            bit: bit & 1,
        }
    }

    /// States indexed |0⟩, |1⟩, |+⟩, |−⟩
    pub fn from_index(index: usize) -> Self {
        match index % 4 {
            0 => Self::ZERO,
            1 => Self::ONE,
            2 => Self::PLUS,
            _ => Self::MINUS,
        }
    }

    pub fn random(rng: &mut dyn RandomSource) -> Self {
        Self::from_index(rng.choose_index(4))
    }

    pub fn label(&self) -> &'static str {
        match (self.basis, self.bit) {
            (Basis::Z, 0) => "|0⟩",
            (Basis::Z, _) => "|1⟩",
            (Basis::X, 0) => "|+⟩",
            (Basis::X, _) => "|−⟩",
        }
    }

    /// Polarization arrow used for photons
    pub fn photon(&self) -> &'static str {
        match (self.basis, self.bit) {
            (Basis::Z, 0) => "→",
            (Basis::Z, _) => "↑",
            (Basis::X, 0) => "↘",
            (Basis::X, _) => "↗",
        }
    }

    /// Deterministic outcome when measured in `basis`, None when the result
    /// is a fair coin.
    pub fn expected_outcome(&self, basis: Basis) -> Option<Bit> {
        if self.basis == basis {
            Some(self.bit)
        } else {
            None
        }
    }
}

impl fmt::Display for QubitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Black-box measurement collaborator.
pub trait QuantumOracle {
    fn measure(
        &mut self,
        prepared: QubitState,
        basis: Basis,
        rng: &mut dyn RandomSource,
    ) -> Result<Bit, OracleFailure>;
}

/// Closed-form probability table: matching bases reproduce the prepared
/// bit, mismatched bases give a uniform bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableOracle;

impl QuantumOracle for TableOracle {
    fn measure(
        &mut self,
        prepared: QubitState,
        basis: Basis,
        rng: &mut dyn RandomSource,
    ) -> Result<Bit, OracleFailure> {
        match prepared.expected_outcome(basis) {
            Some(bit) => Ok(bit),
            None => Ok(rng.next_bit()),
        }
    }
}

/// Table oracle that fails every `fail_every`-th call. Used to exercise the
/// degraded path from tests and scenarios.
#[derive(Debug, Clone)]
pub struct FlakyOracle {
    fail_every: usize,
    calls: usize,
    inner: TableOracle,
}

impl FlakyOracle {
    pub fn new(fail_every: usize) -> Self {
        Self {
            fail_every: fail_every.max(1),
            calls: 0,
            inner: TableOracle,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl QuantumOracle for FlakyOracle {
    fn measure(
        &mut self,
        prepared: QubitState,
        basis: Basis,
        rng: &mut dyn RandomSource,
    ) -> Result<Bit, OracleFailure> {
        self.calls += 1;
        if self.calls % self.fail_every == 0 {
            return Err(OracleFailure::Unavailable(format!(
                "simulated outage on call {}",
                self.calls
            )));
        }
        self.inner.measure(prepared, basis, rng)
    }
}
