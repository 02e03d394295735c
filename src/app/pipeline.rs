//! Shared fit workflow used by the `fit` subcommand.
//!
//! CSV ingest -> request assembly -> fit (optionally refined) -> residuals.
//! Presentation (printing, plotting, exports) stays in `app`.

use std::path::Path;

use tracing::{info, warn};

use crate::domain::{FitConfig, FitReport, ParamDict, Populations};
use crate::error::AppError;
use crate::fit::{FitJob, FitOptions, FitRequest, JobResult, NelderMeadOptions, SaxsFitter, fit_batch};
use crate::io::ingest::{IngestedSpectrum, load_spectrum};
use crate::io::params::{CurveGrid, FitResultFile, read_bounds, read_fixed, read_params};
use crate::models::SaxsModel;
use crate::report::ResidualRow;

/// All computed outputs of a single-spectrum fit.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub source: String,
    pub ingest: IngestedSpectrum,
    pub params: ParamDict,
    pub report: Option<FitReport>,
    pub residuals: Vec<ResidualRow>,
}

/// Build the per-call fit request from the optional JSON inputs.
pub fn build_request(config: &FitConfig) -> Result<FitRequest, AppError> {
    let mut request = FitRequest {
        error_weighted: config.error_weighted,
        ..FitRequest::default()
    };
    if let Some(path) = &config.params_path {
        request.initial = read_params(path)?;
    }
    if let Some(path) = &config.fixed_path {
        request.fixed = read_fixed(path)?;
    }
    if let Some(path) = &config.bounds_path {
        request.bounds = read_bounds(path)?;
    }
    Ok(request)
}

pub fn fit_options(config: &FitConfig) -> FitOptions {
    FitOptions {
        nelder_mead: NelderMeadOptions {
            max_evaluations: config.max_evaluations,
            time_budget: config.time_budget,
            ..NelderMeadOptions::default()
        },
        seed_peaks: config.seed_peaks,
        ..FitOptions::default()
    }
}

/// Fit one spectrum file.
pub fn run_fit(config: &FitConfig, path: &Path) -> Result<RunOutput, AppError> {
    let source = path.display().to_string();
    let ingest = load_spectrum(path)?;
    warn_row_errors(&source, &ingest);

    let request = build_request(config)?;
    let model = SaxsModel;
    let fitter = SaxsFitter::new(&model, &ingest.spectrum, config.populations).with_options(fit_options(config));

    let (mut params, mut report) = fitter.fit(&request)?;
    if config.intensity_refine && report.is_some() {
        info!(source = %source, "refining intensities with shapes fixed");
        let refine = FitRequest::intensity_only(&config.populations, &params, config.error_weighted);
        (params, report) = fitter.fit(&refine)?;
    }

    let modeled = fitter.evaluator().modeled_intensity(&params);
    let residuals = crate::report::compute_residuals(&ingest.spectrum, &modeled)?;

    Ok(RunOutput {
        source,
        ingest,
        params,
        report,
        residuals,
    })
}

/// Fit several spectrum files in parallel with the same request.
///
/// Every file is loaded before any fit starts; a file that cannot be loaded
/// aborts the run. Fit failures stay in their own row.
pub fn run_batch(config: &FitConfig) -> Result<Vec<JobResult>, AppError> {
    let request = build_request(config)?;
    let options = fit_options(config);
    let model = SaxsModel;

    let mut jobs = Vec::with_capacity(config.csv_paths.len());
    for path in &config.csv_paths {
        let label = path.display().to_string();
        let ingest = load_spectrum(path)?;
        warn_row_errors(&label, &ingest);
        jobs.push(FitJob {
            label,
            spectrum: ingest.spectrum,
            populations: config.populations,
            request: request.clone(),
        });
    }

    let mut results = fit_batch(&model, &jobs, &options);

    if config.intensity_refine {
        for (job, out) in jobs.iter().zip(results.iter_mut()) {
            let Ok((params, Some(_))) = &out.result else {
                continue;
            };
            let refine = FitRequest::intensity_only(&job.populations, params, config.error_weighted);
            let fitter = SaxsFitter::new(&model, &job.spectrum, job.populations).with_options(options.clone());
            out.result = fitter.fit(&refine);
        }
    }
    Ok(results)
}

/// Serializable result of a fit, with the fitted curve on the measured grid.
pub fn result_file(run: &RunOutput, populations: Populations) -> FitResultFile {
    FitResultFile {
        tool: format!("saxsfit {}", env!("CARGO_PKG_VERSION")),
        source: Some(run.source.clone()),
        populations,
        params: run.params.clone(),
        report: run.report.clone(),
        curve: CurveGrid {
            q: run.residuals.iter().map(|r| r.q).collect(),
            intensity: run.residuals.iter().map(|r| r.modeled).collect(),
        },
    }
}

fn warn_row_errors(source: &str, ingest: &IngestedSpectrum) {
    if ingest.row_errors.is_empty() {
        return;
    }
    warn!(
        file = %source,
        skipped = ingest.row_errors.len(),
        used = ingest.rows_used,
        "skipped malformed rows"
    );
    for err in ingest.row_errors.iter().take(5) {
        warn!(line = err.line, "{}", err.message);
    }
}
