//! Fixed-Point 2D Vector
//!
//! Map positions in tile units. A unit standing in the middle of tile (3, 4)
//! sits at (3.5, 4.5).

use std::fmt;
use std::ops::{Add, Sub};
use serde::{Serialize, Deserialize};

use super::fixed::{
    Fixed, FIXED_SCALE, fixed_mul, fixed_div, fixed_hypot, fixed_atan2, to_float, to_tile,
};

/// 2D vector with fixed-point components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FixedVec2 {
    /// X component (Q16.16 fixed-point)
    pub x: Fixed,
    /// Y component (Q16.16 fixed-point)
    pub y: Fixed,
}

impl FixedVec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create a new vector from fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from whole-tile coordinates.
    #[inline]
    pub const fn from_ints(x: i32, y: i32) -> Self {
        Self {
            x: x << FIXED_SCALE,
            y: y << FIXED_SCALE,
        }
    }

    /// Tile containing this point.
    #[inline]
    pub const fn tile(self) -> (i32, i32) {
        (to_tile(self.x), to_tile(self.y))
    }

    /// Scale by a fixed-point scalar.
    #[inline]
    pub fn scale(self, scalar: Fixed) -> Self {
        Self {
            x: fixed_mul(self.x, scalar),
            y: fixed_mul(self.y, scalar),
        }
    }

    /// Length (magnitude).
    #[inline]
    pub fn length(self) -> Fixed {
        fixed_hypot(self.x, self.y)
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_hypot(self.x.wrapping_sub(other.x), self.y.wrapping_sub(other.y))
    }

    /// Heading from this point towards `other`, in radians.
    #[inline]
    pub fn angle_to(self, other: Self) -> Fixed {
        let d = other - self;
        fixed_atan2(d.y, d.x)
    }

    /// Step at most `step` towards `target`.
    ///
    /// Returns the new position and whether the target was reached.
    pub fn move_towards(self, target: Self, step: Fixed) -> (Self, bool) {
        let d = target - self;
        let dist = d.length();
        if dist <= step {
            return (target, true);
        }
        let ratio = fixed_div(step, dist);
        (self + d.scale(ratio), false)
    }

    /// Convert to floats for display/logging.
    pub fn to_floats(self) -> (f32, f32) {
        (to_float(self.x), to_float(self.y))
    }
}

impl Add for FixedVec2 {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self::new(self.x.wrapping_add(other.x), self.y.wrapping_add(other.y))
    }
}

impl Sub for FixedVec2 {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self::new(self.x.wrapping_sub(other.x), self.y.wrapping_sub(other.y))
    }
}

impl fmt::Debug for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.to_floats();
        write!(f, "({:.3}, {:.3})", x, y)
    }
}
