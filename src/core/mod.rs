//! Core primitives.
//!
//! Randomness lives here so the game layer stays pure: rooms receive a
//! [`DiceSource`] and never reach for global state.

pub mod rng;

pub use rng::{DiceRng, DiceSource, DIE_MAX, DIE_MIN};
