use std::collections::VecDeque;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::qs_interface::Bit;

/// Source of every random choice the engines make: honest coin tosses,
/// adversarial branch picks and timing jitter.
pub trait RandomSource {
    fn next_bit(&mut self) -> Bit;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn choose_index(&mut self, len: usize) -> usize;

    /// Uniform value in [0, 1)
    fn next_unit(&mut self) -> f64;

    /// Underlying generator, for `rand` APIs such as `SliceRandom::shuffle`.
    fn rng(&mut self) -> &mut dyn RngCore;

    /// Normal sample with mean 0, Box-Muller over two unit draws.
    fn gaussian(&mut self, sigma: f64) -> f64 {
        // ln(0) is -inf, keep u1 inside (0, 1]
        let u1 = 1.0 - self.next_unit();
        let u2 = self.next_unit();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        z * sigma
    }
}

/// StdRng-backed source remembering the seed it was built from, so a run can
/// be reproduced.
pub struct SeededSource {
    rng: StdRng,
    seed: [u8; 32],
}

impl SeededSource {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: StdRng::from_seed(seed),
            seed,
        }
    }

    /// Short seed for tests and CLI flags; the value fills the first 8 bytes.
    pub fn from_u64(value: u64) -> Self {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&value.to_le_bytes());
        Self::from_seed(seed)
    }

    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }
}

impl RandomSource for SeededSource {
    fn next_bit(&mut self) -> Bit {
        (self.rng.next_u32() & 1) as Bit
    }

    fn choose_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    fn next_unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}

/// Use the configured seed or draw a fresh one.
pub fn resolve_seed(seed: Option<[u8; 32]>) -> [u8; 32] {
    seed.unwrap_or_else(|| {
        let mut temp_rng = StdRng::from_entropy();
        let mut seed = [0u8; 32];
        temp_rng.fill_bytes(&mut seed);
        seed
    })
}

pub fn seed_to_hex(seed: &[u8; 32]) -> String {
    seed.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Replays scripted values first, then falls back to a seeded stream.
/// Lets tests pin one branch without scripting the whole run.
pub struct ScriptedSource {
    bits: VecDeque<Bit>,
    indices: VecDeque<usize>,
    units: VecDeque<f64>,
    fallback: SeededSource,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            bits: VecDeque::new(),
            indices: VecDeque::new(),
            units: VecDeque::new(),
            fallback: SeededSource::from_u64(0),
        }
    }

    pub fn with_bits(mut self, bits: &[Bit]) -> Self {
        self.bits.extend(bits.iter().copied());
        self
    }

    pub fn with_indices(mut self, indices: &[usize]) -> Self {
        self.indices.extend(indices.iter().copied());
        self
    }

    pub fn with_units(mut self, units: &[f64]) -> Self {
        self.units.extend(units.iter().copied());
        self
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for ScriptedSource {
    fn next_bit(&mut self) -> Bit {
        match self.bits.pop_front() {
            Some(bit) => bit & 1,
            None => self.fallback.next_bit(),
        }
    }

    fn choose_index(&mut self, len: usize) -> usize {
        match self.indices.pop_front() {
            Some(index) => index % len,
            None => self.fallback.choose_index(len),
        }
    }

    fn next_unit(&mut self) -> f64 {
        match self.units.pop_front() {
            Some(unit) => unit,
            None => self.fallback.next_unit(),
        }
    }

    /// Slice shuffles are not scripted; they draw from the fallback stream.
    fn rng(&mut self) -> &mut dyn RngCore {
        self.fallback.rng()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SeededSource::from_u64(42);
        let mut b = SeededSource::from_u64(42);
        for _ in 0..64 {
            assert_eq!(a.next_bit(), b.next_bit());
            assert_eq!(a.choose_index(7), b.choose_index(7));
        }
        assert_eq!(a.seed(), b.seed());
    }

    #[test]
    fn test_bits_and_indices_in_range() {
        let mut rng = SeededSource::from_u64(7);
        for _ in 0..500 {
            assert!(rng.next_bit() <= 1);
            assert!(rng.choose_index(3) < 3);
            let u = rng.next_unit();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn test_gaussian_statistics() {
        let mut rng = SeededSource::from_u64(1234);
        let sigma = 2.0;
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.gaussian(sigma)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

        assert!(mean.abs() < 0.1, "mean {}", mean);
        assert!((var.sqrt() - sigma).abs() < 0.1, "std {}", var.sqrt());
    }

    #[test]
    fn test_scripted_values_come_first() {
        let mut rng = ScriptedSource::new()
            .with_bits(&[1, 0, 1])
            .with_indices(&[2, 5])
            .with_units(&[0.25]);
        assert_eq!(rng.next_unit(), 0.25);
        assert_eq!(rng.next_bit(), 1);
        assert_eq!(rng.next_bit(), 0);
        assert_eq!(rng.next_bit(), 1);
        assert_eq!(rng.choose_index(3), 2);
        // wraps into range
        assert_eq!(rng.choose_index(3), 2);
        assert!(rng.next_bit() <= 1);
    }

    #[test]
    fn test_shuffle_keeps_elements() {
        let mut rng = SeededSource::from_u64(9);
        let mut items: Vec<u32> = (0..12).collect();
        items.shuffle(rng.rng());
        let mut sorted = items.clone();
        sorted.sort();
        assert_eq!(sorted, (0..12).collect::<Vec<u32>>());

        // same seed, same permutation
        let mut again: Vec<u32> = (0..12).collect();
        again.shuffle(SeededSource::from_u64(9).rng());
        assert_eq!(items, again);
    }

    #[test]
    fn test_scripted_shuffle_uses_fallback() {
        let mut scripted = ScriptedSource::new().with_indices(&[0, 0, 0]);
        let mut items: Vec<u32> = (0..12).collect();
        items.shuffle(scripted.rng());
        let mut expected: Vec<u32> = (0..12).collect();
        expected.shuffle(SeededSource::from_u64(0).rng());
        assert_eq!(items, expected);
        // scripted indices are left for choose_index
        assert_eq!(scripted.choose_index(5), 0);
    }

    #[test]
    fn test_seed_hex() {
        let mut seed = [0u8; 32];
        seed[0] = 0xab;
        let hex = seed_to_hex(&seed);
        assert!(hex.starts_with("ab00"));
        assert_eq!(hex.len(), 64);
    }
}
