//! Parallel fitting of independent spectra.
//!
//! Each job owns its spectrum, population spec and request, so jobs share
//! nothing but the (read-only) model and options.

use rayon::prelude::*;
use tracing::info;

use crate::domain::{FitReport, ParamDict, Populations, Spectrum};
use crate::error::FitError;
use crate::fit::fitter::{FitOptions, FitRequest, SaxsFitter};
use crate::models::ScatteringModel;

/// One spectrum to fit.
#[derive(Debug, Clone)]
pub struct FitJob {
    /// Label used in logs and summaries (usually the source file name).
    pub label: String,
    pub spectrum: Spectrum,
    pub populations: Populations,
    pub request: FitRequest,
}

/// Outcome of one job, in input order.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub label: String,
    pub result: Result<(ParamDict, Option<FitReport>), FitError>,
}

/// Fit every job in parallel. A failing job does not affect the others.
pub fn fit_batch<M>(model: &M, jobs: &[FitJob], options: &FitOptions) -> Vec<JobResult>
where
    M: ScatteringModel + ?Sized,
{
    info!(jobs = jobs.len(), "fitting batch");
    jobs.par_iter()
        .map(|job| {
            let fitter = SaxsFitter::new(model, &job.spectrum, job.populations).with_options(options.clone());
            JobResult {
                label: job.label.clone(),
                result: fitter.fit(&job.request),
            }
        })
        .collect()
}
