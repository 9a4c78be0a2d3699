//! Small deterministic utilities shared across the engine.

pub mod det_rng;

pub use det_rng::{DetRng, RandSource};
