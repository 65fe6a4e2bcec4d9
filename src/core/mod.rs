//! Core deterministic primitives.
//!
//! Fixed-point math, seeded randomness, state digests and the slot pool
//! that backs every entity reference.

pub mod fixed;
pub mod vec2;
pub mod rng;
pub mod hash;
pub mod idpool;

pub use fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use vec2::FixedVec2;
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, StateHash, StateHasher};
pub use idpool::{IdPool, IdRef};
