//! Domain types used throughout the fitting pipeline.
//!
//! This module defines:
//!
//! - scatterer populations and the canonical parameter schema keys
//! - keyed parameter / fixed-mask / bounds containers
//! - the measured spectrum (`Spectrum`)
//! - fit outputs (`FitReport`) and the binary's `FitConfig`

pub mod types;

pub use types::*;
