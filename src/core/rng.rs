//! Dice Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. Each room owns its own generator,
//! so rooms never share RNG state. Production rooms seed from fresh entropy;
//! tests seed explicitly or script the faces they need.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Deserialize};

/// Lowest face of a six-sided die.
pub const DIE_MIN: u8 = 1;

/// Highest face of a six-sided die.
pub const DIE_MAX: u8 = 6;

/// Anything that can produce die faces for a room.
///
/// The turn loop only ever asks for the next face, so a scripted source can
/// stand in for the random one when a test needs a specific sequence.
pub trait DiceSource: Send + Sync {
    /// Roll once, returning a face in `1..=6`.
    fn roll(&mut self) -> u8;
}

/// Xorshift128+ generator.
///
/// Not cryptographic. Uniform over the die faces via rejection sampling.
///
/// # Example
///
/// ```
/// use ludo::core::rng::{DiceRng, DiceSource};
///
/// let mut rng = DiceRng::new(12345);
/// let face = rng.roll();
/// assert!((1..=6).contains(&face));
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiceRng {
    state: [u64; 2],
}

impl Default for DiceRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl DiceRng {
    /// Create a new RNG from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // All-zero state would be a fixed point
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Seed from a v4 UUID mixed with the wall clock.
    pub fn from_entropy() -> Self {
        let uuid_bits = uuid::Uuid::new_v4().as_u128();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mixed = uuid_bits ^ nanos;
        Self::new((mixed >> 64) as u64 ^ mixed as u64)
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max) without modulo bias.
    pub fn next_below(&mut self, max: u64) -> u64 {
        if max == 0 {
            return 0;
        }
        // Largest multiple of `max` that fits; draws above it are rejected
        let zone = u64::MAX - (u64::MAX % max);
        loop {
            let v = self.next_u64();
            if v < zone {
                return v % max;
            }
        }
    }
}

impl DiceSource for DiceRng {
    fn roll(&mut self) -> u8 {
        let span = u64::from(DIE_MAX - DIE_MIN + 1);
        DIE_MIN + self.next_below(span) as u8
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

// =============================================================================
// TESTS
// =============================================================================
