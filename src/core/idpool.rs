//! Entity Handles
//!
//! Objects that other objects point at live in a [`SlotMap`]. A handle is a
//! slot index plus the slot version at insertion time. Removing an object
//! bumps the slot version, so every handle handed out before the removal
//! stops resolving even after the slot is reused.
//!
//! Iteration is in slot order and slot reuse depends only on the sequence
//! of inserts and removes, so two worlds fed the same commands hand out the
//! same handles.

use std::fmt;
use slotmap::{Key, KeyData, SlotMap};

pub use handle::IdRef;

// new_key_type! expands to an `unsafe impl Key`.
#[allow(unsafe_code)]
mod handle {
    slotmap::new_key_type! {
        /// Reference into an [`IdPool`](super::IdPool).
        pub struct IdRef;
    }
}

/// Generational pool keyed by [`IdRef`].
pub type IdPool<T> = SlotMap<IdRef, T>;

impl IdRef {
    /// Build a reference from raw parts (wire decoding, tests).
    ///
    /// Occupied slots always carry an odd version, so an even `generation`
    /// is rounded up.
    pub fn new(index: u32, generation: u32) -> Self {
        KeyData::from_ffi((u64::from(generation) << 32) | u64::from(index)).into()
    }

    /// Packed index and version, for hashing.
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.data().as_ffi()
    }
}

impl fmt::Display for IdRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:?}", self.data())
    }
}
