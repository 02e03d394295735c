//! Numerical helpers: polynomial least squares and descriptive statistics.

pub mod ols;
pub mod stats;

pub use ols::*;
pub use stats::*;
