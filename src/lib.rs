//! `saxs-fit` library crate.
//!
//! Fits small-angle X-ray scattering spectra to a population model
//! (Guinier-Porod scatterers, spheres with normally distributed radii and
//! diffraction peaks). The `saxsfit` binary is a thin wrapper around this
//! library so that the fitting core is testable without spawning processes.

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
