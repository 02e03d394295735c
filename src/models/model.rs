//! Scattering intensity models.
//!
//! The fitter consumes intensities through the `ScatteringModel` trait so the
//! closed-form equations stay swappable. `SaxsModel` is the reference
//! implementation:
//!
//! - flat floor `I0_floor`
//! - Guinier-Porod scatterers (`G_gp`, `rg_gp`, `D_gp`)
//! - spheres with normally distributed radii (`I0_sphere`, `r0_sphere`, `sigma_sphere`)
//! - Lorentzian diffraction peaks (`I_pkcenter`, `q_pkcenter`, `pk_hwhm`)
//!
//! All functions are pure and evaluate one q at a time so that they can be reused
//! by plotting and synthetic-data code.

use crate::domain::{ParamDict, ParamKey, PopulationKind, Populations};

/// Total scattered intensity as a pure function of `(q, populations, params)`.
pub trait ScatteringModel: Sync {
    fn compute_intensity(&self, q: &[f64], populations: &Populations, params: &ParamDict) -> Vec<f64>;
}

/// Reference SAXS model (Guinier-Porod, polydisperse spheres, Lorentzian peaks).
#[derive(Debug, Clone, Copy, Default)]
pub struct SaxsModel;

/// Below this `x = qr`, the sphere form factor uses its series expansion.
const SMALL_QR: f64 = 1e-3;

/// Half-width of the radius quadrature, in units of the radius stdev.
const SPHERE_SIGMA_SPAN: f64 = 4.0;

/// Quadrature nodes for the radius distribution.
const SPHERE_NODES: usize = 41;

impl ScatteringModel for SaxsModel {
    fn compute_intensity(&self, q: &[f64], populations: &Populations, params: &ParamDict) -> Vec<f64> {
        let floor = param(params, ParamKey::I0Floor, 0);
        let mut out = vec![floor; q.len()];
        if populations.is_unidentified() {
            return out;
        }

        for i in 0..populations.count(PopulationKind::GuinierPorod) {
            let g = param(params, ParamKey::GGp, i);
            let rg = param(params, ParamKey::RgGp, i);
            let d = param(params, ParamKey::DGp, i);
            for (o, &qv) in out.iter_mut().zip(q) {
                *o += guinier_porod(qv, g, rg, d);
            }
        }

        for i in 0..populations.count(PopulationKind::SphericalNormal) {
            let i0 = param(params, ParamKey::I0Sphere, i);
            let r0 = param(params, ParamKey::R0Sphere, i);
            let sigma = param(params, ParamKey::SigmaSphere, i);
            let profile = spherical_normal(q, r0, sigma);
            for (o, p) in out.iter_mut().zip(profile) {
                *o += i0 * p;
            }
        }

        for i in 0..populations.count(PopulationKind::DiffractionPeaks) {
            let amp = param(params, ParamKey::IPkcenter, i);
            let center = param(params, ParamKey::QPkcenter, i);
            let hwhm = param(params, ParamKey::PkHwhm, i);
            for (o, &qv) in out.iter_mut().zip(q) {
                *o += lorentzian_peak(qv, amp, center, hwhm);
            }
        }

        out
    }
}

/// Read `params[key][index]`, falling back to the key's default.
fn param(params: &ParamDict, key: ParamKey, index: usize) -> f64 {
    params
        .get(&key)
        .and_then(|v| v.get(index))
        .copied()
        .unwrap_or_else(|| key.default_value())
}

/// Guinier-Porod intensity for spherical scatterers (dimensionality factor s = 0).
///
/// Guinier regime below `q1 = sqrt(3D/2) / rg`, power law `Dp / q^D` above it,
/// with `Dp` chosen so the two regimes join continuously.
pub fn guinier_porod(q: f64, g: f64, rg: f64, d: f64) -> f64 {
    if !(rg > 0.0) {
        return g;
    }
    let q1 = (1.5 * d).sqrt() / rg;
    if q <= q1 {
        g * (-(q * q * rg * rg) / 3.0).exp()
    } else {
        let dp = g * (-d / 2.0).exp() * (1.5 * d).powf(d / 2.0) / rg.powf(d);
        dp / q.powf(d)
    }
}

/// Normalized sphere form factor amplitude `3 (sin x - x cos x) / x³`.
pub fn sphere_amplitude(x: f64) -> f64 {
    if x.abs() < SMALL_QR {
        // Series: 1 - x²/10 + x⁴/280
        let x2 = x * x;
        return 1.0 - x2 / 10.0 + x2 * x2 / 280.0;
    }
    3.0 * (x.sin() - x * x.cos()) / (x * x * x)
}

/// Intensity profile of spheres with normally distributed radii, normalized so
/// that the `q → 0` limit is 1.
///
/// `sigma` is the fractional standard deviation of the radius. Each radius is
/// weighted by its probability density and by its volume squared (`r⁶`).
pub fn spherical_normal(q: &[f64], r0: f64, sigma: f64) -> Vec<f64> {
    if !(r0 > 0.0) {
        return vec![1.0; q.len()];
    }
    if !(sigma > 0.0) {
        return q
            .iter()
            .map(|&qv| {
                let f = sphere_amplitude(qv * r0);
                f * f
            })
            .collect();
    }

    let sd = sigma * r0;
    let r_min = (r0 - SPHERE_SIGMA_SPAN * sd).max(r0 * 1e-3);
    let r_max = r0 + SPHERE_SIGMA_SPAN * sd;
    let step = (r_max - r_min) / (SPHERE_NODES as f64 - 1.0);

    let nodes: Vec<(f64, f64)> = (0..SPHERE_NODES)
        .map(|k| {
            let r = r_min + step * k as f64;
            let z = (r - r0) / sd;
            let w = (-0.5 * z * z).exp() * r.powi(6);
            (r, w)
        })
        .collect();
    let w_sum: f64 = nodes.iter().map(|(_, w)| w).sum();

    q.iter()
        .map(|&qv| {
            let acc: f64 = nodes
                .iter()
                .map(|&(r, w)| {
                    let f = sphere_amplitude(qv * r);
                    w * f * f
                })
                .sum();
            acc / w_sum
        })
        .collect()
}

/// Lorentzian peak with amplitude `amp` at `center` and half-width `hwhm`.
pub fn lorentzian_peak(q: f64, amp: f64, center: f64, hwhm: f64) -> f64 {
    if !(hwhm > 0.0) {
        return 0.0;
    }
    let dq = q - center;
    amp * hwhm * hwhm / (dq * dq + hwhm * hwhm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParamDict;

    fn q_grid() -> Vec<f64> {
        (1..100).map(|i| i as f64 * 0.01).collect()
    }

    #[test]
    fn guinier_porod_is_continuous_at_crossover() {
        let (g, rg, d): (f64, f64, f64) = (1.0e-3, 20.0, 4.0);
        let q1 = (1.5 * d).sqrt() / rg;
        let below = guinier_porod(q1, g, rg, d);
        let above = guinier_porod(q1 * (1.0 + 1e-9), g, rg, d);
        assert!((below - above).abs() / below < 1e-6);
        assert!((guinier_porod(0.0, g, rg, d) - g).abs() < 1e-18);
    }

    #[test]
    fn sphere_profile_is_normalized_and_positive() {
        let q = q_grid();
        for &sigma in &[0.0, 0.05, 0.2] {
            let p = spherical_normal(&q, 20.0, sigma);
            assert_eq!(p.len(), q.len());
            assert!(p[0] <= 1.0 && p[0] > 0.9);
            assert!(p.iter().all(|v| v.is_finite() && *v >= 0.0));
        }
        assert!((spherical_normal(&[1e-6], 20.0, 0.1)[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sphere_amplitude_series_matches_closed_form() {
        let x: f64 = 2.0e-3;
        let closed = 3.0 * (x.sin() - x * x.cos()) / (x * x * x);
        assert!((sphere_amplitude(x) - closed).abs() < 1e-6);
    }

    #[test]
    fn lorentzian_peak_half_max_at_hwhm() {
        let v = lorentzian_peak(0.32, 2.0, 0.3, 0.02);
        assert!((v - 1.0).abs() < 1e-12);
        assert_eq!(lorentzian_peak(0.3, 2.0, 0.3, 0.0), 0.0);
    }

    #[test]
    fn model_sums_populations_over_floor() {
        let q = q_grid();
        let pops = Populations {
            guinier_porod: 1,
            diffraction_peaks: 1,
            ..Populations::default()
        };
        let mut params = ParamDict::new();
        params.insert(ParamKey::I0Floor, vec![0.5]);
        params.insert(ParamKey::GGp, vec![1.0]);
        params.insert(ParamKey::RgGp, vec![10.0]);
        params.insert(ParamKey::DGp, vec![4.0]);
        params.insert(ParamKey::QPkcenter, vec![0.3]);
        params.insert(ParamKey::IPkcenter, vec![2.0]);
        params.insert(ParamKey::PkHwhm, vec![0.01]);

        let total = SaxsModel.compute_intensity(&q, &pops, &params);
        for (k, &qv) in q.iter().enumerate() {
            let expected = 0.5 + guinier_porod(qv, 1.0, 10.0, 4.0) + lorentzian_peak(qv, 2.0, 0.3, 0.01);
            assert!((total[k] - expected).abs() < 1e-12);
        }
    }
}
