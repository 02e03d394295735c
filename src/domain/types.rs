//! Shared domain types.
//!
//! This module defines:
//!
//! - the closed set of scatterer populations (`PopulationKind`, `Populations`)
//! - the canonical parameter keys (`ParamKey`) and the keyed containers built on
//!   them (`ParamDict`, `FixedMask`, `BoundsDict`)
//! - the measured spectrum (`Spectrum`) with its derived log-intensity and fit mask
//! - fit outputs (`FitReport`, `Termination`)
//! - the binary's run configuration (`FitConfig`)

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Category of scattering entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationKind {
    /// Data that no model describes; any count > 0 makes the spectrum unfittable.
    Unidentified,
    GuinierPorod,
    SphericalNormal,
    DiffractionPeaks,
}

impl PopulationKind {
    /// Populations that own fit parameters, in schema order.
    pub const FITTABLE: [PopulationKind; 3] = [
        PopulationKind::GuinierPorod,
        PopulationKind::SphericalNormal,
        PopulationKind::DiffractionPeaks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PopulationKind::Unidentified => "unidentified",
            PopulationKind::GuinierPorod => "guinier_porod",
            PopulationKind::SphericalNormal => "spherical_normal",
            PopulationKind::DiffractionPeaks => "diffraction_peaks",
        }
    }

    /// Parameter keys owned by one instance of this population.
    pub fn param_keys(self) -> &'static [ParamKey] {
        match self {
            PopulationKind::Unidentified => &[],
            PopulationKind::GuinierPorod => &[ParamKey::GGp, ParamKey::RgGp, ParamKey::DGp],
            PopulationKind::SphericalNormal => &[
                ParamKey::I0Sphere,
                ParamKey::R0Sphere,
                ParamKey::SigmaSphere,
            ],
            PopulationKind::DiffractionPeaks => &[
                ParamKey::QPkcenter,
                ParamKey::IPkcenter,
                ParamKey::PkHwhm,
            ],
        }
    }
}

/// Number of scatterer instances per population type.
///
/// Counts are fixed for the lifetime of a fit session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Populations {
    #[serde(default)]
    pub unidentified: usize,
    #[serde(default)]
    pub guinier_porod: usize,
    #[serde(default)]
    pub spherical_normal: usize,
    #[serde(default)]
    pub diffraction_peaks: usize,
}

impl Populations {
    pub fn count(&self, kind: PopulationKind) -> usize {
        match kind {
            PopulationKind::Unidentified => self.unidentified,
            PopulationKind::GuinierPorod => self.guinier_porod,
            PopulationKind::SphericalNormal => self.spherical_normal,
            PopulationKind::DiffractionPeaks => self.diffraction_peaks,
        }
    }

    /// `true` when the spectrum is flagged as not describable by any model.
    pub fn is_unidentified(&self) -> bool {
        self.unidentified > 0
    }
}

impl fmt::Display for Populations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unidentified() {
            return write!(f, "unidentified");
        }
        let parts: Vec<String> = PopulationKind::FITTABLE
            .iter()
            .filter(|k| self.count(**k) > 0)
            .map(|k| format!("{}={}", k.name(), self.count(*k)))
            .collect();
        if parts.is_empty() {
            write!(f, "flat background only")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Canonical parameter keys.
///
/// The declaration order is the schema order used for flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamKey {
    #[serde(rename = "I0_floor")]
    I0Floor,
    #[serde(rename = "G_gp")]
    GGp,
    #[serde(rename = "rg_gp")]
    RgGp,
    #[serde(rename = "D_gp")]
    DGp,
    #[serde(rename = "I0_sphere")]
    I0Sphere,
    #[serde(rename = "r0_sphere")]
    R0Sphere,
    #[serde(rename = "sigma_sphere")]
    SigmaSphere,
    #[serde(rename = "q_pkcenter")]
    QPkcenter,
    #[serde(rename = "I_pkcenter")]
    IPkcenter,
    #[serde(rename = "pk_hwhm")]
    PkHwhm,
}

impl ParamKey {
    pub const ALL: [ParamKey; 10] = [
        ParamKey::I0Floor,
        ParamKey::GGp,
        ParamKey::RgGp,
        ParamKey::DGp,
        ParamKey::I0Sphere,
        ParamKey::R0Sphere,
        ParamKey::SigmaSphere,
        ParamKey::QPkcenter,
        ParamKey::IPkcenter,
        ParamKey::PkHwhm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamKey::I0Floor => "I0_floor",
            ParamKey::GGp => "G_gp",
            ParamKey::RgGp => "rg_gp",
            ParamKey::DGp => "D_gp",
            ParamKey::I0Sphere => "I0_sphere",
            ParamKey::R0Sphere => "r0_sphere",
            ParamKey::SigmaSphere => "sigma_sphere",
            ParamKey::QPkcenter => "q_pkcenter",
            ParamKey::IPkcenter => "I_pkcenter",
            ParamKey::PkHwhm => "pk_hwhm",
        }
    }

    /// Look a key up by its canonical name (case-sensitive).
    pub fn from_name(name: &str) -> Option<ParamKey> {
        ParamKey::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Owning population; `None` for the global floor.
    pub fn owner(self) -> Option<PopulationKind> {
        match self {
            ParamKey::I0Floor => None,
            ParamKey::GGp | ParamKey::RgGp | ParamKey::DGp => Some(PopulationKind::GuinierPorod),
            ParamKey::I0Sphere | ParamKey::R0Sphere | ParamKey::SigmaSphere => {
                Some(PopulationKind::SphericalNormal)
            }
            ParamKey::QPkcenter | ParamKey::IPkcenter | ParamKey::PkHwhm => {
                Some(PopulationKind::DiffractionPeaks)
            }
        }
    }

    pub fn default_value(self) -> f64 {
        match self {
            ParamKey::I0Floor => 0.0,
            ParamKey::GGp => 1.0e-3,
            ParamKey::RgGp => 10.0,
            ParamKey::DGp => 4.0,
            ParamKey::I0Sphere => 1.0e-3,
            ParamKey::R0Sphere => 20.0,
            ParamKey::SigmaSphere => 0.05,
            ParamKey::QPkcenter => 0.1,
            ParamKey::IPkcenter => 1.0,
            ParamKey::PkHwhm => 1.0e-3,
        }
    }

    pub fn default_bounds(self) -> Bounds {
        match self {
            ParamKey::I0Floor => Bounds::new(Some(0.0), Some(100.0)),
            ParamKey::GGp => Bounds::new(Some(0.0), None),
            ParamKey::RgGp => Bounds::new(Some(0.1), Some(1000.0)),
            ParamKey::DGp => Bounds::new(Some(0.0), Some(4.0)),
            ParamKey::I0Sphere => Bounds::new(Some(0.0), None),
            ParamKey::R0Sphere => Bounds::new(Some(1.0), Some(1000.0)),
            ParamKey::SigmaSphere => Bounds::new(Some(0.0), Some(0.5)),
            ParamKey::QPkcenter => Bounds::new(Some(0.0), Some(1.0)),
            ParamKey::IPkcenter => Bounds::new(Some(0.0), None),
            ParamKey::PkHwhm => Bounds::new(Some(1.0e-6), Some(0.1)),
        }
    }

    /// Amplitude-like keys, refined by the intensity-only fit.
    pub fn is_intensity(self) -> bool {
        matches!(
            self,
            ParamKey::I0Floor | ParamKey::GGp | ParamKey::I0Sphere | ParamKey::IPkcenter
        )
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lower/upper limits for one parameter entry. `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bounds {
    pub const UNBOUNDED: Bounds = Bounds {
        lower: None,
        upper: None,
    };

    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    /// Clamp `value` into the bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(lo) = self.lower {
            v = v.max(lo);
        }
        if let Some(hi) = self.upper {
            v = v.min(hi);
        }
        v
    }
}

/// Parameter values keyed by parameter, one entry per population instance.
pub type ParamDict = BTreeMap<ParamKey, Vec<f64>>;
/// Fixed/free flags with the same shape as a `ParamDict` (`true` = held constant).
pub type FixedMask = BTreeMap<ParamKey, Vec<bool>>;
/// Per-entry bounds with the same shape as a `ParamDict`.
pub type BoundsDict = BTreeMap<ParamKey, Vec<Bounds>>;

/// A measured SAXS spectrum.
///
/// Derived quantities (log-intensity, fit mask, default uncertainties) are
/// computed once at construction.
#[derive(Debug, Clone)]
pub struct Spectrum {
    q: Vec<f64>,
    intensity: Vec<f64>,
    /// Per-point uncertainty. NaN where undefined (non-positive intensity without
    /// an explicit uncertainty).
    uncertainty: Vec<f64>,
    /// `ln(I)` where `I > 0`, NaN elsewhere.
    log_intensity: Vec<f64>,
    /// Indices with positive measured intensity.
    fit_idx: Vec<usize>,
}

impl Spectrum {
    /// Build a spectrum from parallel arrays.
    ///
    /// When `uncertainty` is `None`, the Poisson estimate `sqrt(I)` is used at
    /// every point with positive intensity.
    pub fn new(q: Vec<f64>, intensity: Vec<f64>, uncertainty: Option<Vec<f64>>) -> Result<Self, FitError> {
        if q.is_empty() {
            return Err(FitError::EmptySpectrum);
        }
        let du_len = uncertainty.as_ref().map(Vec::len).unwrap_or(q.len());
        if intensity.len() != q.len() || du_len != q.len() {
            return Err(FitError::LengthMismatch {
                q: q.len(),
                intensity: intensity.len(),
                uncertainty: du_len,
            });
        }
        for (i, &v) in q.iter().enumerate() {
            if !v.is_finite() {
                return Err(FitError::NonFiniteValue {
                    field: "q",
                    index: i,
                    value: v,
                });
            }
            if i > 0 && v <= q[i - 1] {
                return Err(FitError::NonIncreasingQ {
                    index: i,
                    previous: q[i - 1],
                    current: v,
                });
            }
        }
        if let Some((i, &v)) = intensity.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(FitError::NonFiniteValue {
                field: "I",
                index: i,
                value: v,
            });
        }

        let fit_idx: Vec<usize> = intensity
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .map(|(i, _)| i)
            .collect();

        let log_intensity: Vec<f64> = intensity
            .iter()
            .map(|&v| if v > 0.0 { v.ln() } else { f64::NAN })
            .collect();

        let uncertainty = match uncertainty {
            Some(du) => {
                for &i in &fit_idx {
                    if !(du[i].is_finite() && du[i] > 0.0) {
                        return Err(FitError::NonFiniteValue {
                            field: "dI",
                            index: i,
                            value: du[i],
                        });
                    }
                }
                du
            }
            None => intensity
                .iter()
                .map(|&v| if v > 0.0 { v.sqrt() } else { f64::NAN })
                .collect(),
        };

        Ok(Self {
            q,
            intensity,
            uncertainty,
            log_intensity,
            fit_idx,
        })
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn q(&self) -> &[f64] {
        &self.q
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn uncertainty(&self) -> &[f64] {
        &self.uncertainty
    }

    pub fn log_intensity(&self) -> &[f64] {
        &self.log_intensity
    }

    /// Indices of points with positive measured intensity.
    pub fn fit_indices(&self) -> &[usize] {
        &self.fit_idx
    }
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Converged,
    NoFreeParameters,
    MaxIterations,
    MaxEvaluations,
    TimeBudget,
}

impl Termination {
    pub fn is_success(self) -> bool {
        matches!(self, Termination::Converged | Termination::NoFreeParameters)
    }
}

/// Result report for one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub success: bool,
    /// Objective at the optimizer's start point. Free values supplied outside
    /// their bounds are clamped first, so this can differ from the objective
    /// of the raw initial guess; `final_objective` never exceeds it.
    #[serde(deserialize_with = "nullable_f64")]
    pub initial_objective: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub final_objective: f64,
    /// `mean(I_fit) / stdev(I - I_fit)`.
    #[serde(deserialize_with = "nullable_f64")]
    pub fit_snr: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub free_parameters: usize,
    pub termination: Termination,
}

/// JSON writes non-finite floats as `null`; read them back as NaN.
fn nullable_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// A full run's configuration as understood by the binary.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// One or more spectra; several files are fitted in parallel.
    pub csv_paths: Vec<PathBuf>,
    pub populations: Populations,

    /// Optional JSON file with an initial guess (`{"rg_gp": [12.0], ...}`).
    pub params_path: Option<PathBuf>,
    /// Optional JSON file with a fixed mask (`{"D_gp": [true]}`).
    pub fixed_path: Option<PathBuf>,
    /// Optional JSON file with bounds (`{"rg_gp": [[1.0, 50.0]]}`).
    pub bounds_path: Option<PathBuf>,

    pub error_weighted: bool,
    pub seed_peaks: bool,
    /// Run the amplitude-only refinement after the full fit.
    pub intensity_refine: bool,

    pub max_evaluations: Option<usize>,
    pub time_budget: Option<Duration>,

    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,

    /// CSV of `q, I, I_fit, residual`.
    pub export_csv: Option<PathBuf>,
    /// JSON result file.
    pub export_result: Option<PathBuf>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            csv_paths: Vec::new(),
            populations: Populations::default(),
            params_path: None,
            fixed_path: None,
            bounds_path: None,
            error_weighted: true,
            seed_peaks: true,
            intensity_refine: false,
            max_evaluations: None,
            time_budget: None,
            plot: true,
            plot_width: 100,
            plot_height: 25,
            export_csv: None,
            export_result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectrum_derives_log_and_mask() {
        let s = Spectrum::new(vec![0.1, 0.2, 0.3], vec![2.0, 0.0, -1.0], None).unwrap();
        assert_eq!(s.fit_indices(), &[0]);
        assert!((s.log_intensity()[0] - 2.0_f64.ln()).abs() < 1e-15);
        assert!(s.log_intensity()[1].is_nan());
        assert!((s.uncertainty()[0] - 2.0_f64.sqrt()).abs() < 1e-15);
        assert!(s.uncertainty()[2].is_nan());
    }

    #[test]
    fn spectrum_rejects_malformed_input() {
        assert_eq!(
            Spectrum::new(vec![], vec![], None).unwrap_err(),
            FitError::EmptySpectrum
        );
        assert!(matches!(
            Spectrum::new(vec![0.1, 0.2], vec![1.0], None),
            Err(FitError::LengthMismatch { .. })
        ));
        assert!(matches!(
            Spectrum::new(vec![0.2, 0.1], vec![1.0, 1.0], None),
            Err(FitError::NonIncreasingQ { index: 1, .. })
        ));
        assert!(matches!(
            Spectrum::new(vec![0.1, 0.2], vec![1.0, 1.0], Some(vec![0.1, 0.0])),
            Err(FitError::NonFiniteValue { field: "dI", .. })
        ));
    }

    #[test]
    fn param_key_names_round_trip() {
        for key in ParamKey::ALL {
            assert_eq!(ParamKey::from_name(key.name()), Some(key));
        }
        assert_eq!(ParamKey::from_name("bogus"), None);
        let json = serde_json::to_string(&ParamKey::I0Floor).unwrap();
        assert_eq!(json, "\"I0_floor\"");
    }

    #[test]
    fn report_reads_null_objective_as_nan() {
        let json = r#"{"success":false,"initial_objective":null,"final_objective":1.0,
            "fit_snr":null,"iterations":0,"evaluations":1,"free_parameters":0,
            "termination":"time_budget"}"#;
        let r: FitReport = serde_json::from_str(json).unwrap();
        assert!(r.initial_objective.is_nan());
        assert!(r.fit_snr.is_nan());
        assert_eq!(r.termination, Termination::TimeBudget);
    }

    #[test]
    fn populations_display() {
        let p = Populations {
            guinier_porod: 1,
            diffraction_peaks: 2,
            ..Populations::default()
        };
        assert_eq!(p.to_string(), "guinier_porod=1, diffraction_peaks=2");
        let u = Populations {
            unidentified: 1,
            ..p
        };
        assert_eq!(u.to_string(), "unidentified");
    }
}
