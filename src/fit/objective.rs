//! Fit objective: chi-square between log intensities.
//!
//! SAXS intensities span many decades, so the model is compared to the data in
//! log space over the points with positive measured intensity. With error
//! weighting, each squared log residual is weighted by `1 / dI²` (weights are
//! normalized to sum to one).
//!
//! Optimizers step into infeasible regions routinely, so a non-positive modeled
//! intensity is clamped to `INTENSITY_FLOOR` before taking its log instead of
//! failing the evaluation.

use tracing::trace;

use crate::domain::{ParamDict, Populations, Spectrum};
use crate::math::{chi2_log, mean, std_dev};
use crate::models::ScatteringModel;

/// Smallest modeled intensity allowed into the log.
pub const INTENSITY_FLOOR: f64 = 1e-12;

/// Evaluates the fit objective for candidate parameter dicts.
pub struct ObjectiveEvaluator<'a, M: ScatteringModel + ?Sized> {
    model: &'a M,
    spectrum: &'a Spectrum,
    populations: &'a Populations,
    /// `ln(I)` at the fit-mask points.
    log_measured: Vec<f64>,
    /// `1 / dI²` at the fit-mask points.
    weights: Vec<f64>,
}

impl<'a, M: ScatteringModel + ?Sized> ObjectiveEvaluator<'a, M> {
    pub fn new(model: &'a M, spectrum: &'a Spectrum, populations: &'a Populations) -> Self {
        let idx = spectrum.fit_indices();
        let log_measured = idx.iter().map(|&i| spectrum.log_intensity()[i]).collect();
        let weights = idx
            .iter()
            .map(|&i| {
                let du = spectrum.uncertainty()[i];
                1.0 / (du * du)
            })
            .collect();
        Self {
            model,
            spectrum,
            populations,
            log_measured,
            weights,
        }
    }

    /// Modeled intensity at every q of the spectrum.
    pub fn modeled_intensity(&self, params: &ParamDict) -> Vec<f64> {
        self.model
            .compute_intensity(self.spectrum.q(), self.populations, params)
    }

    /// Objective value for `params`; always `>= 0` or NaN if the model is non-finite.
    pub fn evaluate(&self, params: &ParamDict, error_weighted: bool) -> f64 {
        let modeled = self.modeled_intensity(params);
        let mut clamped = 0usize;
        let log_model: Vec<f64> = self
            .spectrum
            .fit_indices()
            .iter()
            .map(|&i| {
                let v = modeled[i];
                if v < INTENSITY_FLOOR {
                    clamped += 1;
                    INTENSITY_FLOOR.ln()
                } else {
                    v.ln()
                }
            })
            .collect();
        if clamped > 0 {
            trace!(clamped, "modeled intensity clamped to floor before log");
        }

        let weights = if error_weighted {
            Some(self.weights.as_slice())
        } else {
            None
        };
        chi2_log(&log_model, &self.log_measured, weights)
    }
}

/// Signal-to-noise estimate `mean(modeled) / stdev(measured - modeled)`.
///
/// Infinite for a perfect fit; NaN for empty input.
pub fn fit_snr(measured: &[f64], modeled: &[f64]) -> f64 {
    let residuals: Vec<f64> = measured.iter().zip(modeled).map(|(m, f)| m - f).collect();
    match (mean(modeled), std_dev(&residuals)) {
        (Some(signal), Some(noise)) if noise > 0.0 => signal / noise,
        (Some(_), Some(_)) => f64::INFINITY,
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParamKey;
    use crate::fit::params::defaults_for;
    use crate::models::SaxsModel;

    /// Model that returns a fixed curve regardless of parameters.
    struct Constant(Vec<f64>);

    impl ScatteringModel for Constant {
        fn compute_intensity(&self, _q: &[f64], _p: &Populations, _params: &ParamDict) -> Vec<f64> {
            self.0.clone()
        }
    }

    fn sphere_pops() -> Populations {
        Populations {
            spherical_normal: 1,
            ..Populations::default()
        }
    }

    #[test]
    fn self_fit_is_zero_and_perturbation_is_positive() {
        let pops = sphere_pops();
        let q: Vec<f64> = (1..100).map(|i| i as f64 * 0.01).collect();
        let params = defaults_for(&pops);
        let intensity = SaxsModel.compute_intensity(&q, &pops, &params);
        let spectrum = Spectrum::new(q, intensity, None).unwrap();

        let eval = ObjectiveEvaluator::new(&SaxsModel, &spectrum, &pops);
        assert_eq!(eval.evaluate(&params, true), 0.0);
        assert_eq!(eval.evaluate(&params, false), 0.0);

        let mut shifted = params.clone();
        shifted.insert(ParamKey::R0Sphere, vec![22.0]);
        assert!(eval.evaluate(&shifted, true) > 0.0);
        assert!(eval.evaluate(&shifted, false) > 0.0);
    }

    #[test]
    fn non_positive_measured_points_are_masked() {
        let pops = Populations::default();
        let spectrum = Spectrum::new(vec![0.1, 0.2, 0.3], vec![1.0, -5.0, 1.0], None).unwrap();
        let model = Constant(vec![1.0, 123.0, 1.0]);
        let eval = ObjectiveEvaluator::new(&model, &spectrum, &pops);
        assert_eq!(eval.evaluate(&ParamDict::new(), false), 0.0);
    }

    #[test]
    fn non_positive_model_is_clamped_not_nan() {
        let pops = Populations::default();
        let spectrum = Spectrum::new(vec![0.1, 0.2], vec![1.0, 1.0], None).unwrap();
        let model = Constant(vec![0.0, -1.0]);
        let eval = ObjectiveEvaluator::new(&model, &spectrum, &pops);
        let v = eval.evaluate(&ParamDict::new(), true);
        let expected = INTENSITY_FLOOR.ln().powi(2);
        assert!((v - expected).abs() < 1e-9);
    }

    #[test]
    fn snr_is_signal_over_residual_spread() {
        let modeled = [2.0, 2.0, 2.0, 2.0];
        let measured = [3.0, 1.0, 3.0, 1.0];
        assert!((fit_snr(&measured, &modeled) - 2.0).abs() < 1e-12);
        assert_eq!(fit_snr(&modeled, &modeled), f64::INFINITY);
        assert!(fit_snr(&[], &[]).is_nan());
    }

    #[test]
    fn weighting_emphasizes_low_uncertainty_points() {
        let pops = Populations::default();
        let spectrum = Spectrum::new(
            vec![0.1, 0.2],
            vec![1.0, 1.0],
            Some(vec![0.1, 1.0]),
        )
        .unwrap();
        // Residual only at the second (noisy) point.
        let model = Constant(vec![1.0, std::f64::consts::E]);
        let eval = ObjectiveEvaluator::new(&model, &spectrum, &pops);
        let unweighted = eval.evaluate(&ParamDict::new(), false);
        let weighted = eval.evaluate(&ParamDict::new(), true);
        assert!((unweighted - 0.5).abs() < 1e-12);
        // weights 100 and 1 -> 1 / 101
        assert!((weighted - 1.0 / 101.0).abs() < 1e-12);
    }
}
