//! Residuals and formatted terminal output.
//!
//! Formatting lives here so the fitting code never builds strings.

use crate::domain::{FitReport, ParamDict, Populations, Spectrum};
use crate::error::AppError;
use crate::fit::{JobResult, PeakSeeds, slot_name};
use crate::io::ingest::IngestedSpectrum;

/// Measured vs modeled intensity at one q.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualRow {
    pub q: f64,
    pub measured: f64,
    pub modeled: f64,
    pub residual: f64,
}

pub fn compute_residuals(spectrum: &Spectrum, modeled: &[f64]) -> Result<Vec<ResidualRow>, AppError> {
    if modeled.len() != spectrum.len() {
        return Err(AppError::new(
            4,
            format!("Model returned {} values for {} q points.", modeled.len(), spectrum.len()),
        ));
    }
    let mut out = Vec::with_capacity(modeled.len());
    for ((&q, &measured), &fit) in spectrum.q().iter().zip(spectrum.intensity()).zip(modeled) {
        if !fit.is_finite() {
            return Err(AppError::new(4, format!("Non-finite modeled intensity at q={q}.")));
        }
        out.push(ResidualRow {
            q,
            measured,
            modeled: fit,
            residual: measured - fit,
        });
    }
    Ok(out)
}

/// Format the run summary for one spectrum.
pub fn format_fit_summary(
    source: &str,
    ingest: &IngestedSpectrum,
    populations: &Populations,
    params: &ParamDict,
    report: Option<&FitReport>,
) -> String {
    let mut out = String::new();
    let s = &ingest.spectrum;

    out.push_str("=== saxsfit ===\n");
    out.push_str(&format!("Source: {source}\n"));
    out.push_str(&format!(
        "Points: n={} (fit {}) | q=[{:.4}, {:.4}] | dI={}\n",
        ingest.rows_used,
        s.fit_indices().len(),
        s.q().first().copied().unwrap_or(f64::NAN),
        s.q().last().copied().unwrap_or(f64::NAN),
        if ingest.has_uncertainty { "file" } else { "sqrt(I)" },
    ));
    if !ingest.row_errors.is_empty() {
        out.push_str(&format!("Skipped rows: {}\n", ingest.row_errors.len()));
    }
    out.push_str(&format!("Populations: {populations}\n"));

    let Some(report) = report else {
        out.push_str("\nFit skipped: spectrum is unidentified.\n");
        return out;
    };

    out.push_str("\nFit:\n");
    out.push_str(&format!(
        "- success: {} ({:?})\n",
        if report.success { "yes" } else { "no" },
        report.termination
    ));
    out.push_str(&format!(
        "- objective: {:.6e} -> {:.6e}\n",
        report.initial_objective, report.final_objective
    ));
    out.push_str(&format!("- snr: {:.3}\n", report.fit_snr));
    out.push_str(&format!(
        "- free={} iterations={} evaluations={}\n",
        report.free_parameters, report.iterations, report.evaluations
    ));

    out.push_str("\nParameters:\n");
    out.push_str(&format_params(params));
    out
}

/// One `name = value` line per flat slot.
pub fn format_params(params: &ParamDict) -> String {
    let mut out = String::new();
    for (&key, values) in params {
        for (i, v) in values.iter().enumerate() {
            out.push_str(&format!("  {:<16} {v:.6e}\n", slot_name(key, i)));
        }
    }
    out
}

/// Table of seeded peaks.
pub fn format_peaks(seeds: &PeakSeeds) -> String {
    if seeds.is_empty() {
        return "No peak candidates found.\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!("{:>4} {:>12} {:>12} {:>12}\n", "#", "q_pkcenter", "I_pkcenter", "pk_hwhm"));
    out.push_str(&format!("{:-<4} {:-<12} {:-<12} {:-<12}\n", "", "", "", ""));
    for i in 0..seeds.len() {
        out.push_str(&format!(
            "{:>4} {:>12.6} {:>12.4e} {:>12.4e}\n",
            i, seeds.q_pkcenter[i], seeds.i_pkcenter[i], seeds.pk_hwhm[i]
        ));
    }
    out
}

/// One line per batch job.
pub fn format_batch_table(results: &[JobResult]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<24} {:>8} {:>14} {:>10}\n", "source", "success", "objective", "snr"));
    for r in results {
        let label = truncate(&r.label, 24);
        match &r.result {
            Ok((_, Some(rep))) => out.push_str(&format!(
                "{label:<24} {:>8} {:>14.6e} {:>10.3}\n",
                if rep.success { "yes" } else { "no" },
                rep.final_objective,
                rep.fit_snr
            )),
            Ok((_, None)) => out.push_str(&format!("{label:<24} {:>8}\n", "skipped")),
            Err(e) => out.push_str(&format!("{label:<24} {:>8} {e}\n", "error")),
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
