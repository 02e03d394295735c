//! Input/output helpers.
//!
//! - CSV spectrum ingest (`ingest`)
//! - CSV exports (`export`)
//! - JSON override and result files (`params`)

pub mod export;
pub mod ingest;
pub mod params;

pub use export::*;
pub use ingest::*;
pub use params::*;
