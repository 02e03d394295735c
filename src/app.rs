//! Top-level application orchestration.
//!
//! `src/main.rs` only maps the result to an exit code; this module is the
//! real main. It parses CLI arguments, sets up logging, runs the requested
//! subcommand and writes optional exports.

use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, FitArgs, PeaksArgs, ShowArgs, SynthArgs};
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::fit::{SeederOptions, seed_peaks};
use crate::report::ResidualRow;

pub mod pipeline;

/// Entry point for the `saxsfit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Peaks(args) => handle_peaks(&args),
        Command::Synth(args) => handle_synth(&args),
        Command::Show(args) => handle_show(&args),
    }
}

/// Log to stderr. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(args)?;

    if config.csv_paths.len() > 1 {
        if config.export_csv.is_some() || config.export_result.is_some() {
            warn!("exports are only written for a single spectrum; ignoring");
        }
        let results = pipeline::run_batch(&config)?;
        print!("{}", crate::report::format_batch_table(&results));
        return Ok(());
    }

    let Some(path) = config.csv_paths.first() else {
        return Err(AppError::new(2, "No input CSV given."));
    };
    let run = pipeline::run_fit(&config, path)?;

    println!(
        "{}",
        crate::report::format_fit_summary(
            &run.source,
            &run.ingest,
            &config.populations,
            &run.params,
            run.report.as_ref(),
        )
    );

    if config.plot && run.report.is_some() {
        println!(
            "{}",
            crate::plot::render_ascii_plot(&run.residuals, config.plot_width, config.plot_height)
        );
    }

    if let Some(out) = &config.export_csv {
        crate::io::export::write_residuals_csv(out, &run.residuals)?;
        info!(path = %out.display(), "wrote residuals CSV");
    }
    if let Some(out) = &config.export_result {
        let file = pipeline::result_file(&run, config.populations);
        crate::io::params::write_result_json(out, &file)?;
        info!(path = %out.display(), "wrote result JSON");
    }
    Ok(())
}

fn handle_peaks(args: &PeaksArgs) -> Result<(), AppError> {
    let ingest = crate::io::ingest::load_spectrum(&args.csv)?;
    let opts = SeederOptions {
        window: args.window,
        min_prominence: args.min_prominence,
    };
    let seeds = seed_peaks(&ingest.spectrum, args.count, &opts);
    print!("{}", crate::report::format_peaks(&seeds));
    Ok(())
}

fn handle_synth(args: &SynthArgs) -> Result<(), AppError> {
    let params = match &args.params {
        Some(path) => crate::io::params::read_params(path)?,
        None => Default::default(),
    };
    let spec = crate::data::SynthSpec {
        q_min: args.q_min,
        q_max: args.q_max,
        points: args.points,
        populations: args.populations.to_populations(),
        params,
        counts_per_unit: args.counts,
        seed: args.seed,
    };
    let spectrum = crate::data::generate_spectrum(&crate::models::SaxsModel, &spec)?;
    crate::io::export::write_spectrum_csv(&args.output, &spectrum)?;
    println!("Wrote {} points to {}", spectrum.len(), args.output.display());
    Ok(())
}

fn handle_show(args: &ShowArgs) -> Result<(), AppError> {
    let file = crate::io::params::read_result_json(&args.result)?;

    println!("Source: {}", file.source.as_deref().unwrap_or("-"));
    println!("Populations: {}", file.populations);
    match &file.report {
        Some(report) => println!(
            "Objective: {:.6e} -> {:.6e} | snr {:.3} | success {}",
            report.initial_objective,
            report.final_objective,
            report.fit_snr,
            if report.success { "yes" } else { "no" }
        ),
        None => println!("Fit skipped: spectrum is unidentified."),
    }
    println!("\nParameters:");
    print!("{}", crate::report::format_params(&file.params));

    // Only the curve is stored; measured points are absent from the plot.
    let rows: Vec<ResidualRow> = file
        .curve
        .q
        .iter()
        .zip(&file.curve.intensity)
        .map(|(&q, &modeled)| ResidualRow {
            q,
            measured: f64::NAN,
            modeled,
            residual: f64::NAN,
        })
        .collect();
    if !rows.is_empty() {
        println!("\n{}", crate::plot::render_ascii_plot(&rows, args.width, args.height));
    }
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let time_budget = match args.time_budget {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => {
            return Err(AppError::new(2, format!("--time-budget must be positive, got {secs}")));
        }
        None => None,
    };
    Ok(FitConfig {
        csv_paths: args.csv.clone(),
        populations: args.populations.to_populations(),
        params_path: args.params.clone(),
        fixed_path: args.fixed.clone(),
        bounds_path: args.bounds.clone(),
        error_weighted: !args.unweighted,
        seed_peaks: !args.no_seed_peaks,
        intensity_refine: args.intensity_refine,
        max_evaluations: args.max_evals,
        time_budget,
        plot: !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        export_csv: args.export.clone(),
        export_result: args.export_result.clone(),
    })
}
