//! Command-line parsing for the SAXS fitter.
//!
//! Argument parsing and command dispatch stay separate from the fitting code.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::domain::Populations;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "saxsfit", version, about = "SAXS spectrum fitter")]
pub struct Cli {
    /// Increase log verbosity (`-v` info, `-vv` debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit one or more spectra and print a summary (several files run in parallel).
    Fit(FitArgs),
    /// Print the peak seeds the fitter would start from.
    Peaks(PeaksArgs),
    /// Write a synthetic spectrum with counting noise.
    Synth(SynthArgs),
    /// Summarize and plot a saved result JSON.
    Show(ShowArgs),
}

/// Population counts (negative counts are rejected by the parser).
#[derive(Debug, Args, Clone, Copy)]
pub struct PopulationArgs {
    /// Guinier-Porod scatterers.
    #[arg(long = "guinier-porod", default_value_t = 0)]
    pub guinier_porod: usize,

    /// Spheres with normally distributed radii.
    #[arg(long = "spheres", default_value_t = 0)]
    pub spherical_normal: usize,

    /// Diffraction peaks.
    #[arg(long = "peaks", default_value_t = 0)]
    pub diffraction_peaks: usize,

    /// Mark the spectrum as unidentified (no fit is attempted).
    #[arg(long)]
    pub unidentified: bool,
}

impl PopulationArgs {
    pub fn to_populations(self) -> Populations {
        Populations {
            unidentified: usize::from(self.unidentified),
            guinier_porod: self.guinier_porod,
            spherical_normal: self.spherical_normal,
            diffraction_peaks: self.diffraction_peaks,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Spectrum CSV files (`q,I[,dI]`).
    #[arg(required = true, value_name = "CSV")]
    pub csv: Vec<PathBuf>,

    #[command(flatten)]
    pub populations: PopulationArgs,

    /// Initial guess JSON.
    #[arg(long, value_name = "JSON")]
    pub params: Option<PathBuf>,

    /// Fixed mask JSON.
    #[arg(long, value_name = "JSON")]
    pub fixed: Option<PathBuf>,

    /// Bounds JSON.
    #[arg(long, value_name = "JSON")]
    pub bounds: Option<PathBuf>,

    /// Do not weight residuals by 1/dI².
    #[arg(long)]
    pub unweighted: bool,

    /// Do not seed peak parameters from the data.
    #[arg(long)]
    pub no_seed_peaks: bool,

    /// Refine amplitudes with shapes held fixed after the full fit.
    #[arg(long)]
    pub intensity_refine: bool,

    /// Objective evaluation budget (default 2000 × (free parameters + 1)).
    #[arg(long)]
    pub max_evals: Option<usize>,

    /// Wall-clock budget per fit, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub time_budget: Option<f64>,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export `q, I, I_fit, residual` to CSV (single spectrum only).
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Export parameters, report and fitted curve to JSON (single spectrum only).
    #[arg(long = "export-result", value_name = "JSON")]
    pub export_result: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PeaksArgs {
    /// Spectrum CSV file.
    #[arg(value_name = "CSV")]
    pub csv: PathBuf,

    /// Number of peaks to seed.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,

    /// Scan window in samples.
    #[arg(long, default_value_t = 20)]
    pub window: usize,

    /// Minimum prominence above the window mean.
    #[arg(long, default_value_t = 0.0)]
    pub min_prominence: f64,
}

#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Output CSV.
    #[arg(value_name = "CSV")]
    pub output: PathBuf,

    #[command(flatten)]
    pub populations: PopulationArgs,

    /// Parameter JSON (missing entries take defaults).
    #[arg(long, value_name = "JSON")]
    pub params: Option<PathBuf>,

    #[arg(long, default_value_t = 0.01)]
    pub q_min: f64,

    #[arg(long, default_value_t = 1.0)]
    pub q_max: f64,

    /// Number of q samples.
    #[arg(long, default_value_t = 100)]
    pub points: usize,

    /// Counts per unit intensity; omit for a noiseless spectrum.
    #[arg(long)]
    pub counts: Option<f64>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    /// Result JSON written by `saxsfit fit --export-result`.
    #[arg(value_name = "JSON")]
    pub result: PathBuf,

    #[arg(long, default_value_t = 100)]
    pub width: usize,

    #[arg(long, default_value_t = 25)]
    pub height: usize,
}
