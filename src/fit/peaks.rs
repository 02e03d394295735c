//! Diffraction peak seeding.
//!
//! Peak parameters are hard to start from defaults, so the fitter seeds them
//! from the data: a sliding-window scan finds local maxima, candidates are
//! ranked by confidence, and each seeded peak gets a position, a conservative
//! amplitude and a width estimated from a local quadratic fit.

use tracing::debug;

use crate::domain::{ParamDict, ParamKey, Spectrum};
use crate::math::{polyfit, standardize, std_dev};

/// Fraction of the measured intensity used as the amplitude seed.
const AMPLITUDE_FRACTION: f64 = 0.1;
/// Relative half-width of the sub-window used for the width estimate.
const WIDTH_WINDOW: f64 = 0.05;
/// Leading coefficients smaller than this are treated as a flat window.
const MIN_CURVATURE: f64 = 1e-12;
/// Relative floor on the window stdev used for confidence.
const STD_FLOOR: f64 = 1e-9;

/// Sliding-window scan settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeederOptions {
    /// Window size in samples.
    pub window: usize,
    pub min_prominence: f64,
}

impl Default for SeederOptions {
    fn default() -> Self {
        Self {
            window: 20,
            min_prominence: 0.0,
        }
    }
}

/// A local maximum found by `scan_windows`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakCandidate {
    pub index: usize,
    pub q: f64,
    pub confidence: f64,
}

/// Scan `intensity` with a centred window and return every local maximum.
///
/// The window spans `window / 2` samples on each side of its centre; only
/// centres whose full window fits in the data are considered, so a peak within
/// `window / 2` samples of either end of the spectrum is never a candidate.
/// A centre is a candidate when it is the maximum of its window, ties going to
/// the first index (a flat top of equal samples yields its leftmost sample),
/// and its prominence (height above the mean of the other window points)
/// exceeds `min_prominence`. Confidence is the prominence in units of the
/// other points' standard deviation.
///
/// Candidates are returned in index order.
pub fn scan_windows(q: &[f64], intensity: &[f64], window: usize, min_prominence: f64) -> Vec<PeakCandidate> {
    let n = q.len().min(intensity.len());
    let half = window / 2;
    if half == 0 || n < 2 * half + 1 {
        return Vec::new();
    }

    let mut out = Vec::new();
    for i in half..n - half {
        let centre = intensity[i];
        let left = &intensity[i - half..i];
        let right = &intensity[i + 1..=i + half];
        if left.iter().any(|&v| v >= centre) || right.iter().any(|&v| v > centre) {
            continue;
        }
        let others: Vec<f64> = left.iter().chain(right).copied().collect();
        let mean = others.iter().sum::<f64>() / others.len() as f64;
        let prominence = centre - mean;
        if !(prominence > min_prominence) {
            continue;
        }
        let spread = std_dev(&others)
            .unwrap_or(0.0)
            .max(STD_FLOOR * centre.abs().max(f64::MIN_POSITIVE));
        out.push(PeakCandidate {
            index: i,
            q: q[i],
            confidence: prominence / spread,
        });
    }
    out
}

/// Seeded peak parameters, parallel sequences in seeding order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakSeeds {
    pub q_pkcenter: Vec<f64>,
    pub i_pkcenter: Vec<f64>,
    pub pk_hwhm: Vec<f64>,
}

impl PeakSeeds {
    pub fn len(&self) -> usize {
        self.q_pkcenter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q_pkcenter.is_empty()
    }

    /// Partial parameter dict holding the three peak keys.
    pub fn to_param_dict(&self) -> ParamDict {
        let mut out = ParamDict::new();
        out.insert(ParamKey::QPkcenter, self.q_pkcenter.clone());
        out.insert(ParamKey::IPkcenter, self.i_pkcenter.clone());
        out.insert(ParamKey::PkHwhm, self.pk_hwhm.clone());
        out
    }
}

/// Seed up to `count` peaks from `spectrum`.
///
/// Fewer candidates than `count` yields shorter sequences. Candidates whose
/// width cannot be estimated (too few points near the peak, flat window) are
/// ranked behind every well-conditioned candidate and fall back to the local
/// sample spacing as their width.
pub fn seed_peaks(spectrum: &Spectrum, count: usize, opts: &SeederOptions) -> PeakSeeds {
    let q = spectrum.q();
    let intensity = spectrum.intensity();

    let mut candidates = scan_windows(q, intensity, opts.window, opts.min_prominence);
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    debug!(candidates = candidates.len(), requested = count, "peak scan done");

    let mut ranked: Vec<(PeakCandidate, Option<f64>)> = candidates
        .into_iter()
        .map(|c| (c, quadratic_width(q, intensity, c.q)))
        .collect();
    // Stable: keeps confidence order within each group.
    ranked.sort_by_key(|(_, width)| width.is_none());

    let hwhm_bounds = ParamKey::PkHwhm.default_bounds();
    let mut seeds = PeakSeeds::default();
    for (cand, width) in ranked.into_iter().take(count) {
        let width = width.unwrap_or_else(|| {
            debug!(q = cand.q, "peak width falls back to sample spacing");
            sample_spacing(q, cand.index)
        });
        seeds.q_pkcenter.push(cand.q);
        seeds.i_pkcenter.push(AMPLITUDE_FRACTION * intensity[cand.index]);
        seeds.pk_hwhm.push(hwhm_bounds.clamp(width));
    }
    debug!(seeded = seeds.len(), "peaks seeded");
    seeds
}

/// Width from a quadratic fit over the points within ±5% of `center`.
///
/// Both axes are standardized before fitting; the width is `|1/a| · std(q) / 2`
/// where `a` is the fitted leading coefficient.
fn quadratic_width(q: &[f64], intensity: &[f64], center: f64) -> Option<f64> {
    let lo = center * (1.0 - WIDTH_WINDOW);
    let hi = center * (1.0 + WIDTH_WINDOW);
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };

    let (sub_q, sub_i): (Vec<f64>, Vec<f64>) = q
        .iter()
        .zip(intensity)
        .filter(|(qv, _)| **qv > lo && **qv < hi)
        .map(|(qv, iv)| (*qv, *iv))
        .unzip();
    if sub_q.len() < 3 {
        return None;
    }

    let (zq, _, q_std) = standardize(&sub_q)?;
    let (zi, _, _) = standardize(&sub_i)?;
    let coeffs = polyfit(&zq, &zi, 2)?;
    let a = coeffs[0];
    if !a.is_finite() || a.abs() < MIN_CURVATURE {
        return None;
    }
    let width = (1.0 / a).abs() * q_std * 0.5;
    width.is_finite().then_some(width)
}

/// Mean spacing to the neighbours of sample `index`.
fn sample_spacing(q: &[f64], index: usize) -> f64 {
    let left = index.saturating_sub(1);
    let right = (index + 1).min(q.len().saturating_sub(1));
    if right > left {
        (q[right] - q[left]) / (right - left) as f64
    } else {
        0.0
    }
}
