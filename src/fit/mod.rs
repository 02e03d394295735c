//! Fitting core.
//!
//! Responsibilities:
//!
//! - parameter schema, defaults, merging and the flat optimizer form (`params`)
//! - the log chi-square objective (`objective`)
//! - bounded Nelder-Mead (`simplex`)
//! - seeding diffraction peaks from the data (`peaks`)
//! - orchestrating one fit (`fitter`) or many in parallel (`batch`)

pub mod batch;
pub mod fitter;
pub mod objective;
pub mod params;
pub mod peaks;
pub mod simplex;

pub use batch::*;
pub use fitter::*;
pub use objective::*;
pub use params::*;
pub use peaks::*;
pub use simplex::*;
