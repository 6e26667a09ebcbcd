//! Seed mixing and the 32-bit generator behind row shuffles.
//!
//! Both routines must stay bit-for-bit stable: persisted progress replays
//! shuffles from `(sentence seed, row index, policy version)`.

const GOLDEN_GAMMA: u32 = 0x9e37_79b1;
const MULBERRY_INCREMENT: u32 = 0x6d2b_79f5;

/// Mix a sentence seed with a row index and policy version into a row seed.
pub fn combine_seeds(seed: u32, row_index: u32, policy_version: u32) -> u32 {
    let mut result = seed ^ policy_version.wrapping_add(31);
    result = result.wrapping_add(row_index.wrapping_add(1).wrapping_mul(GOLDEN_GAMMA));
    result ^= result << 13;
    result ^= result >> 17;
    result ^= result << 5;
    result
}

/// Mulberry32: a splitmix-style generator with a 32-bit state.
#[derive(Debug, Clone)]
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(MULBERRY_INCREMENT);
        let t = self.state;
        let mut result = (t ^ (t >> 15)).wrapping_mul(1 | t);
        result ^= result.wrapping_add((result ^ (result >> 7)).wrapping_mul(61 | result));
        result ^ (result >> 14)
    }

    /// Uniform float in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }

    /// Uniform index in `0..bound`.
    pub fn next_index(&mut self, bound: usize) -> usize {
        (self.next_f64() * bound as f64).floor() as usize
    }
}
