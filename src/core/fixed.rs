//! Q16.16 Fixed-Point Arithmetic
//!
//! Positions, speeds and facing angles in the simulation are all fixed-point
//! so that two worlds fed the same commands end up bit-identical.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  [S][IIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                     │
//! │   │  └─ 15 bits int ─┘└──── 16 bits frac ───┘               │
//! │   └─ sign                                                   │
//! │                                                             │
//! │  One tile = FIXED_ONE. Maps up to 256 tiles fit with room   │
//! │  to spare; distances are widened to i64 before squaring.    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

/// Q16.16 fixed-point number stored as i32.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

/// π in fixed-point: round(3.14159265 * 65536)
pub const FIXED_PI: Fixed = 205887;

/// π/2 in fixed-point
pub const FIXED_HALF_PI: Fixed = 102944;

/// π/4 in fixed-point
const FIXED_QUARTER_PI: Fixed = 51472;

/// Correction term of the atan polynomial: round(0.273 * 65536)
const ATAN_K: Fixed = 17891;

// =============================================================================
// CONVERSIONS
// =============================================================================

/// Convert a float literal to fixed-point at compile time.
///
/// Only meant for constants and test fixtures; gameplay never produces floats.
///
/// ```
/// use empires::core::fixed::{to_fixed, FIXED_ONE};
/// const SPEED: i32 = to_fixed(2.5);
/// assert_eq!(SPEED, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Whole-tile value in fixed-point.
#[inline]
pub const fn from_int(i: i32) -> Fixed {
    i << FIXED_SCALE
}

/// Tile index containing a fixed-point coordinate (floor).
#[inline]
pub const fn to_tile(f: Fixed) -> i32 {
    f >> FIXED_SCALE
}

/// Convert fixed-point to float for display and logging only.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

// =============================================================================
// ARITHMETIC
// =============================================================================

/// Multiply two fixed-point numbers through an i64 intermediate.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers. Division by zero yields 0.
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0;
    }
    let wide = (a as i64) << FIXED_SCALE;
    (wide / b as i64) as Fixed
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 { x.wrapping_neg() } else { x }
}

/// Clamp a fixed-point number to `[min, max]`.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    value.max(min).min(max)
}

/// Integer square root (floor) of a u64.
pub fn isqrt_u64(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    // Newton from above; n/2 + 1 >= sqrt(n) for every n >= 2.
    let mut x = n / 2 + 1;
    let mut y = (x + n / x) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Length of the vector `(dx, dy)`.
///
/// Squares are taken in i64 (Q32.32) so long diagonals across the map do not
/// overflow, and the integer root lands back in Q16.16.
pub fn fixed_hypot(dx: Fixed, dy: Fixed) -> Fixed {
    let dx = dx as i64;
    let dy = dy as i64;
    let squared = (dx * dx + dy * dy) as u64;
    i32::try_from(isqrt_u64(squared)).unwrap_or(i32::MAX)
}

/// atan(z) for z in [0, 1], polynomial approximation (max error ≈ 0.004 rad).
#[inline]
fn atan_unit(z: Fixed) -> Fixed {
    fixed_mul(FIXED_QUARTER_PI, z) + fixed_mul(fixed_mul(ATAN_K, z), FIXED_ONE - z)
}

/// Angle of `(x, y)` in radians, in `[-π, π]`. `(0, 0)` maps to 0.
pub fn fixed_atan2(y: Fixed, x: Fixed) -> Fixed {
    if x == 0 && y == 0 {
        return 0;
    }
    let ax = fixed_abs(x) as i64;
    let ay = fixed_abs(y) as i64;

    let mut angle = if ax >= ay {
        atan_unit(((ay << FIXED_SCALE) / ax) as Fixed)
    } else {
        FIXED_HALF_PI - atan_unit(((ax << FIXED_SCALE) / ay) as Fixed)
    };

    if x < 0 {
        angle = FIXED_PI - angle;
    }
    if y < 0 {
        angle = -angle;
    }
    angle
}

// =============================================================================
// TESTS
// =============================================================================
