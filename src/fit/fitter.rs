//! Fit controller for a single spectrum.
//!
//! A fit runs through four stages:
//!
//! - INIT: default parameters for the population spec, plus the user's fixed
//!   mask and bounds merged over their default schemas
//! - SEEDED: peak positions, amplitudes and widths seeded from the data (only
//!   with a diffraction peak population), then the user's initial guess merged
//!   on top so explicit values always win
//! - OPTIMIZING: bounded Nelder-Mead over the free flat slots
//! - REPORTED: best parameters rebuilt, final objective and SNR computed
//!
//! Unidentified spectra skip all of this and return empty results.
//! Non-convergence is reported through `FitReport::success`, never as an error.

use tracing::{debug, warn};

use crate::domain::{BoundsDict, FitReport, FixedMask, ParamDict, PopulationKind, Populations, Spectrum};
use crate::error::FitError;
use crate::fit::objective::{ObjectiveEvaluator, fit_snr};
use crate::fit::params::{ParamSchema, from_flat, merge, to_flat};
use crate::fit::peaks::{SeederOptions, seed_peaks};
use crate::fit::simplex::{NelderMeadOptions, nelder_mead};
use crate::models::ScatteringModel;

/// Options that affect how every fit is run.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub nelder_mead: NelderMeadOptions,
    /// Seed peak parameters from the data before optimizing.
    pub seed_peaks: bool,
    pub seeder: SeederOptions,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            nelder_mead: NelderMeadOptions::default(),
            seed_peaks: true,
            seeder: SeederOptions::default(),
        }
    }
}

impl FitOptions {
    fn validate(&self) -> Result<(), FitError> {
        let nm = &self.nelder_mead;
        if !(nm.f_tolerance >= 0.0) {
            return Err(FitError::InvalidOption {
                field: "tolerance",
                message: format!("tolerance must be non-negative, got {}", nm.f_tolerance),
            });
        }
        if self.seeder.window < 2 {
            return Err(FitError::InvalidOption {
                field: "window",
                message: format!("peak scan window must be at least 2 samples, got {}", self.seeder.window),
            });
        }
        Ok(())
    }
}

/// Per-call inputs of a fit. Every dict may be partial.
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub initial: ParamDict,
    pub fixed: FixedMask,
    pub bounds: BoundsDict,
    pub error_weighted: bool,
}

impl Default for FitRequest {
    fn default() -> Self {
        Self {
            initial: ParamDict::new(),
            fixed: FixedMask::new(),
            bounds: BoundsDict::new(),
            error_weighted: true,
        }
    }
}

impl FitRequest {
    /// Request that holds every shape parameter at `initial` (or its default)
    /// and frees only the amplitude-like ones.
    pub fn intensity_only(populations: &Populations, initial: &ParamDict, error_weighted: bool) -> Self {
        Self {
            initial: initial.clone(),
            fixed: ParamSchema::for_populations(populations).intensity_only_mask(),
            bounds: BoundsDict::new(),
            error_weighted,
        }
    }
}

/// Fits one spectrum against one population spec.
///
/// The spectrum and population spec are fixed for the fitter's lifetime; every
/// `fit` call builds its parameter state from scratch.
pub struct SaxsFitter<'a, M: ScatteringModel + ?Sized> {
    model: &'a M,
    spectrum: &'a Spectrum,
    populations: Populations,
    options: FitOptions,
}

impl<'a, M: ScatteringModel + ?Sized> SaxsFitter<'a, M> {
    pub fn new(model: &'a M, spectrum: &'a Spectrum, populations: Populations) -> Self {
        Self {
            model,
            spectrum,
            populations,
            options: FitOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn populations(&self) -> &Populations {
        &self.populations
    }

    /// Objective evaluator bound to this fitter's spectrum and populations.
    pub fn evaluator(&self) -> ObjectiveEvaluator<'_, M> {
        ObjectiveEvaluator::new(self.model, self.spectrum, &self.populations)
    }

    /// Run one fit.
    ///
    /// Returns the optimized parameters and a report, or `({}, None)` when the
    /// population spec is unidentified.
    pub fn fit(&self, request: &FitRequest) -> Result<(ParamDict, Option<FitReport>), FitError> {
        if self.populations.is_unidentified() {
            debug!(populations = %self.populations, "unidentified spectrum, fit skipped");
            return Ok((ParamDict::new(), None));
        }
        self.options.validate()?;
        if self.spectrum.fit_indices().is_empty() {
            return Err(FitError::NoPositiveIntensity);
        }

        let schema = ParamSchema::for_populations(&self.populations);
        let mut params = schema.defaults();
        let fixed = merge(schema.free_mask(), &request.fixed);
        let bounds = merge(schema.default_bounds(), &request.bounds);
        debug!(
            stage = "INIT",
            populations = %self.populations,
            slots = schema.slot_count(),
            "parameter schema built"
        );

        let n_peaks = self.populations.count(PopulationKind::DiffractionPeaks);
        if n_peaks > 0 && self.options.seed_peaks {
            let seeds = seed_peaks(self.spectrum, n_peaks, &self.options.seeder);
            if seeds.len() < n_peaks {
                debug!(requested = n_peaks, seeded = seeds.len(), "fewer peak candidates than peaks");
            }
            params = merge(params, &seeds.to_param_dict());
            debug!(stage = "SEEDED", seeded = seeds.len(), "peak parameters seeded");
        }
        let params = merge(params, &request.initial);

        let flat = to_flat(&params, &fixed, &bounds)?;
        // Shape check once; the objective closure can then rely on it.
        from_flat(&flat, &schema)?;

        let evaluator = self.evaluator();
        let weighted = request.error_weighted;
        let objective = |internal: &[f64]| {
            from_flat(&flat.with_free_internal(internal), &schema)
                .map_or(f64::NAN, |p| evaluator.evaluate(&p, weighted))
        };

        let start = flat.free_internal();
        let initial_objective = objective(&start);
        debug!(
            stage = "OPTIMIZING",
            free = start.len(),
            initial_objective,
            "starting simplex"
        );

        let outcome = nelder_mead(objective, &start, &self.options.nelder_mead);

        let best = from_flat(&flat.with_free_internal(&outcome.x), &schema)?;
        let modeled = evaluator.modeled_intensity(&best);
        let final_objective = evaluator.evaluate(&best, weighted);
        let report = FitReport {
            success: outcome.termination.is_success(),
            initial_objective,
            final_objective,
            fit_snr: fit_snr(self.spectrum.intensity(), &modeled),
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
            free_parameters: start.len(),
            termination: outcome.termination,
        };

        if !report.success {
            warn!(
                termination = ?report.termination,
                evaluations = report.evaluations,
                final_objective,
                "optimizer stopped before converging"
            );
        }
        debug!(
            stage = "REPORTED",
            success = report.success,
            initial_objective,
            final_objective,
            snr = report.fit_snr,
            "fit finished"
        );

        Ok((best, Some(report)))
    }

    /// Refine amplitudes only: every shape parameter is held at its value in
    /// `initial` (or its default) while amplitude-like parameters are free.
    pub fn fit_intensity_only(&self, initial: &ParamDict) -> Result<(ParamDict, Option<FitReport>), FitError> {
        self.fit(&FitRequest::intensity_only(&self.populations, initial, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bounds, ParamKey};
    use crate::fit::params::defaults_for;
    use crate::models::SaxsModel;

    fn gp_pops() -> Populations {
        Populations {
            guinier_porod: 1,
            ..Populations::default()
        }
    }

    fn gp_spectrum(rg: f64) -> Spectrum {
        let pops = gp_pops();
        let q: Vec<f64> = (1..100).map(|i| i as f64 * 0.01).collect();
        let mut truth = defaults_for(&pops);
        truth.insert(ParamKey::RgGp, vec![rg]);
        let intensity = SaxsModel.compute_intensity(&q, &pops, &truth);
        Spectrum::new(q, intensity, None).unwrap()
    }

    #[test]
    fn unidentified_short_circuits() {
        let spectrum = gp_spectrum(12.0);
        let pops = Populations {
            unidentified: 1,
            guinier_porod: 1,
            ..Populations::default()
        };
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, pops);
        let mut request = FitRequest::default();
        request.initial.insert(ParamKey::RgGp, vec![3.0]);
        let (params, report) = fitter.fit(&request).unwrap();
        assert!(params.is_empty());
        assert!(report.is_none());
    }

    #[test]
    fn recovers_guinier_radius() {
        let spectrum = gp_spectrum(12.0);
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, gp_pops());
        let mut request = FitRequest::default();
        // Hold everything but rg at truth.
        request.fixed.insert(ParamKey::I0Floor, vec![true]);
        request.fixed.insert(ParamKey::GGp, vec![true]);
        request.fixed.insert(ParamKey::DGp, vec![true]);

        let (params, report) = fitter.fit(&request).unwrap();
        let report = report.unwrap();
        assert!(report.success);
        assert_eq!(report.free_parameters, 1);
        assert!((params[&ParamKey::RgGp][0] - 12.0).abs() < 0.1);
        assert!(report.final_objective <= report.initial_objective);
    }

    #[test]
    fn fixed_slots_are_untouched() {
        let spectrum = gp_spectrum(12.0);
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, gp_pops());
        let mut request = FitRequest::default();
        request.initial.insert(ParamKey::DGp, vec![3.3]);
        request.fixed.insert(ParamKey::DGp, vec![true]);
        let (params, _) = fitter.fit(&request).unwrap();
        assert_eq!(params[&ParamKey::DGp][0].to_bits(), 3.3_f64.to_bits());
    }

    #[test]
    fn fully_fixed_fit_reports_success_without_search() {
        let spectrum = gp_spectrum(12.0);
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, gp_pops());
        let schema = ParamSchema::for_populations(&gp_pops());
        let request = FitRequest {
            fixed: schema.fill(|_| true),
            ..FitRequest::default()
        };
        let (params, report) = fitter.fit(&request).unwrap();
        let report = report.unwrap();
        assert!(report.success);
        assert_eq!(report.free_parameters, 0);
        assert_eq!(params, schema.defaults());
        assert_eq!(report.initial_objective, report.final_objective);
    }

    #[test]
    fn free_values_stay_inside_bounds() {
        let spectrum = gp_spectrum(30.0);
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, gp_pops());
        let mut request = FitRequest::default();
        request.bounds.insert(ParamKey::RgGp, vec![Bounds::new(Some(5.0), Some(15.0))]);
        let (params, _) = fitter.fit(&request).unwrap();
        let rg = params[&ParamKey::RgGp][0];
        assert!((5.0..=15.0).contains(&rg), "rg = {rg}");
    }

    #[test]
    fn initial_objective_is_taken_at_the_clamped_start() {
        let spectrum = gp_spectrum(12.0);
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, gp_pops());
        let mut request = FitRequest::default();
        request.initial.insert(ParamKey::RgGp, vec![30.0]);
        request.bounds.insert(ParamKey::RgGp, vec![Bounds::new(Some(5.0), Some(15.0))]);

        let (_, report) = fitter.fit(&request).unwrap();
        let report = report.unwrap();

        let mut clamped = defaults_for(&gp_pops());
        clamped.insert(ParamKey::RgGp, vec![15.0]);
        let expected = fitter.evaluator().evaluate(&clamped, true);
        let raw = fitter.evaluator().evaluate(&merge(defaults_for(&gp_pops()), &request.initial), true);
        assert!((report.initial_objective - expected).abs() <= 1e-9 * expected.max(1e-12));
        assert!((report.initial_objective - raw).abs() > 1e-6);
        assert!(report.final_objective <= report.initial_objective);
    }

    #[test]
    fn exhausted_budget_is_not_an_error() {
        let spectrum = gp_spectrum(12.0);
        let options = FitOptions {
            nelder_mead: NelderMeadOptions {
                max_evaluations: Some(6),
                ..NelderMeadOptions::default()
            },
            ..FitOptions::default()
        };
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, gp_pops()).with_options(options);
        let (_, report) = fitter.fit(&FitRequest::default()).unwrap();
        let report = report.unwrap();
        assert!(!report.success);
        assert_eq!(report.termination, crate::domain::Termination::MaxEvaluations);
    }

    #[test]
    fn rejects_spectrum_without_positive_points() {
        let spectrum = Spectrum::new(vec![0.1, 0.2], vec![0.0, -1.0], None).unwrap();
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, gp_pops());
        assert_eq!(
            fitter.fit(&FitRequest::default()).unwrap_err(),
            FitError::NoPositiveIntensity
        );
    }

    #[test]
    fn user_peak_guess_overrides_seed() {
        let q: Vec<f64> = (1..100).map(|i| i as f64 * 0.01).collect();
        let intensity: Vec<f64> = q
            .iter()
            .map(|&x| 1.0 + 5.0 * (-(x - 0.3_f64).powi(2) / 8.0e-4).exp())
            .collect();
        let spectrum = Spectrum::new(q, intensity, None).unwrap();
        let pops = Populations {
            diffraction_peaks: 1,
            ..Populations::default()
        };
        let fitter = SaxsFitter::new(&SaxsModel, &spectrum, pops);
        let schema = ParamSchema::for_populations(&pops);
        let mut request = FitRequest {
            fixed: schema.fill(|_| true),
            ..FitRequest::default()
        };
        request.initial.insert(ParamKey::QPkcenter, vec![0.5]);

        let (params, _) = fitter.fit(&request).unwrap();
        assert_eq!(params[&ParamKey::QPkcenter], vec![0.5]);
        // Amplitude comes from the seeder (10% of the measured maximum).
        assert!((params[&ParamKey::IPkcenter][0] - 0.6).abs() < 1e-9);
    }
}
