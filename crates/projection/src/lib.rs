//! Coordinate reference system transformations.
//!
//! Implements the map projection used by the published grid from scratch
//! without external dependencies.

pub mod lambert;

pub use lambert::LambertConformal;
