//! Seedable SplitMix64 generator behind item picks and spawn offsets.
//!
//! The scheduler owns one instance. Tests pin the seed so every roll is
//! reproducible.

use serde::{Deserialize, Serialize};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_1: u64 = 0xBF58_476D_1CE4_E5B9;
const MIX_2: u64 = 0x94D0_49BB_1331_11EB;

/// 2^-53: scales the top 53 bits of a draw into `[0, 1)`.
const UNIT: f64 = 1.0 / (1u64 << 53) as f64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Seeded from wall-clock nanoseconds, for hosts that do not pin a seed.
    pub fn from_entropy() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(GOLDEN_GAMMA, |elapsed| elapsed.as_nanos() as u64);
        Self::new(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        let mixed = (self.state ^ (self.state >> 30)).wrapping_mul(MIX_1);
        let mixed = (mixed ^ (mixed >> 27)).wrapping_mul(MIX_2);
        mixed ^ (mixed >> 31)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * UNIT
    }

    /// Uniform in `[0, len)`; 0 for an empty range.
    pub fn next_index(&mut self, len: usize) -> usize {
        match len {
            0 => 0,
            len => (self.next_u64() % len as u64) as usize,
        }
    }
}
