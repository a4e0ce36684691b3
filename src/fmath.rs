// src/fmath.rs

//! Float helpers that work identically in `no_std` and test builds.
//!
//! `f32::sqrt` and friends live in `std`, not `core`, so firmware builds
//! route through `micromath`. Calling the trait methods by full path keeps
//! the call sites unambiguous when the inherent `std` methods are also in
//! scope (unit tests).

/// Square root. micromath's approximation is plenty for speed ramps.
#[inline]
pub(crate) fn sqrtf(x: f32) -> f32 {
    micromath::F32Ext::sqrt(x)
}

/// Round to the nearest integer value.
#[inline]
pub(crate) fn roundf(x: f32) -> f32 {
    micromath::F32Ext::round(x)
}

/// Absolute value.
#[inline]
pub(crate) fn absf(x: f32) -> f32 {
    micromath::F32Ext::abs(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_half_up() {
        assert_eq!(roundf(2.5), 3.0);
        assert_eq!(roundf(-1.2), -1.0);
        assert_eq!(roundf(160.0 * 1.5), 240.0);
    }

    #[test]
    fn sqrt_close_enough_for_ramps() {
        let v = sqrtf(2.0 * 160_000.0 * 100.0);
        let exact = (2.0f32 * 160_000.0 * 100.0).sqrt();
        assert!((v - exact).abs() / exact < 1e-2);
    }

    #[test]
    fn abs_signs() {
        assert_eq!(absf(-3.5), 3.5);
        assert_eq!(absf(3.5), 3.5);
    }
}
