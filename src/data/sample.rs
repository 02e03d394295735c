//! Synthetic SAXS spectra with counting noise.
//!
//! Used by the `synth` subcommand and by tests. Noise is Poisson on an
//! expected count of `I · counts_per_unit`; output is deterministic for a
//! given seed.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};

use crate::domain::{ParamDict, Populations, Spectrum};
use crate::error::FitError;
use crate::fit::params::{defaults_for, merge};
use crate::models::ScatteringModel;

/// What to synthesize.
#[derive(Debug, Clone)]
pub struct SynthSpec {
    pub q_min: f64,
    pub q_max: f64,
    /// Number of q samples, evenly spaced and inclusive of both ends.
    pub points: usize,
    pub populations: Populations,
    /// Partial parameters; missing entries take their defaults.
    pub params: ParamDict,
    /// Counts per unit intensity. `None` produces a noiseless spectrum.
    pub counts_per_unit: Option<f64>,
    pub seed: u64,
}

/// Evenly spaced q grid from `q_min` to `q_max` inclusive.
pub fn linear_q(q_min: f64, q_max: f64, points: usize) -> Vec<f64> {
    if points < 2 {
        return vec![q_min; points];
    }
    let step = (q_max - q_min) / (points - 1) as f64;
    (0..points).map(|i| q_min + step * i as f64).collect()
}

pub fn generate_spectrum<M>(model: &M, spec: &SynthSpec) -> Result<Spectrum, FitError>
where
    M: ScatteringModel + ?Sized,
{
    if spec.points < 2 {
        return Err(FitError::InvalidOption {
            field: "points",
            message: format!("need at least 2 q samples, got {}", spec.points),
        });
    }
    if !(spec.q_min.is_finite() && spec.q_max.is_finite() && spec.q_max > spec.q_min) {
        return Err(FitError::InvalidOption {
            field: "q range",
            message: format!("invalid q range [{}, {}]", spec.q_min, spec.q_max),
        });
    }

    let q = linear_q(spec.q_min, spec.q_max, spec.points);
    let params = merge(defaults_for(&spec.populations), &spec.params);
    let clean = model.compute_intensity(&q, &spec.populations, &params);

    let Some(scale) = spec.counts_per_unit else {
        return Spectrum::new(q, clean, None);
    };
    if !(scale.is_finite() && scale > 0.0) {
        return Err(FitError::InvalidOption {
            field: "counts",
            message: format!("counts per unit intensity must be > 0, got {scale}"),
        });
    }

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let mut intensity = Vec::with_capacity(clean.len());
    let mut uncertainty = Vec::with_capacity(clean.len());
    for &v in &clean {
        let lambda = v * scale;
        let counts = if lambda > 0.0 && lambda.is_finite() {
            Poisson::new(lambda)
                .map(|p| p.sample(&mut rng))
                .unwrap_or(lambda)
        } else {
            0.0
        };
        intensity.push(counts / scale);
        uncertainty.push(counts.max(1.0).sqrt() / scale);
    }
    Spectrum::new(q, intensity, Some(uncertainty))
}
