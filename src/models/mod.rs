//! Scattering intensity models.
//!
//! Models are implemented as small, pure functions behind the `ScatteringModel`
//! trait so that fitting/search code can stay generic.

pub mod model;

pub use model::*;
