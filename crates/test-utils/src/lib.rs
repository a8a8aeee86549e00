//! Test support for the NBM ingestion workspace.
//!
//! - [`fixtures`]: a 12 x 16 grid configuration and fixed cycles
//! - [`generators`]: deterministic synthetic grids per variable
//! - [`source`]: an in-memory [`ingestion::GridSource`] with fault injection
//! - [`digest`]: CRC32 digests of store directories
//!
//! ```ignore
//! use test_utils::{test_config, InMemorySource};
//! ```

pub mod digest;
pub mod fixtures;
pub mod generators;
pub mod source;

pub use digest::*;
pub use fixtures::*;
pub use generators::*;
pub use source::*;

/// Assert that two numbers differ by at most `tolerance`.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(288.14_f32, 288.15_f32, 0.0625_f32);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($actual:expr, $expected:expr, $tolerance:expr) => {{
        let actual: f64 = $actual as f64;
        let expected: f64 = $expected as f64;
        let tolerance: f64 = $tolerance as f64;
        let diff = (actual - expected).abs();
        if diff > tolerance {
            panic!(
                "assertion failed: {} is not within {} of {} (diff {})",
                actual, tolerance, expected, diff
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_within_tolerance() {
        assert_approx_eq!(288.14_f32, 288.15_f32, 0.0625_f32);
        assert_approx_eq!(0.0, 0.0, 0.0);
        assert_approx_eq!(-12.5, -12.5000001, 1e-6);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_outside_tolerance() {
        assert_approx_eq!(101_325.0, 101_300.0, 8.0);
    }
}
