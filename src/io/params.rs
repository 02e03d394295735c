//! JSON parameter files.
//!
//! Override files map parameter names to one value or a list of values, one
//! per population instance:
//!
//! ```json
//! { "rg_gp": [12.0], "I0_floor": 0.01 }
//! ```
//!
//! Fixed-mask files hold booleans, bounds files hold `[lower, upper]` pairs
//! with `null` for an open side. Names outside the canonical key set are
//! ignored with a warning.
//!
//! A fit result file records the population spec, fitted parameters, the
//! report and the fitted curve on the spectrum's q grid.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Bounds, BoundsDict, FitReport, FixedMask, ParamDict, ParamKey, Populations};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Parse a keyed override document.
pub fn parse_keyed<T: DeserializeOwned>(json: &str) -> Result<BTreeMap<ParamKey, Vec<T>>, AppError> {
    let raw: BTreeMap<String, OneOrMany<T>> =
        serde_json::from_str(json).map_err(|e| AppError::new(2, format!("Invalid parameter JSON: {e}")))?;
    let mut out = BTreeMap::new();
    for (name, values) in raw {
        match ParamKey::from_name(&name) {
            Some(key) => {
                out.insert(key, values.into_vec());
            }
            None => warn!(name = %name, "ignoring unknown parameter name"),
        }
    }
    Ok(out)
}

fn read_keyed<T: DeserializeOwned>(path: &Path) -> Result<BTreeMap<ParamKey, Vec<T>>, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read '{}': {e}", path.display())))?;
    parse_keyed(&text)
}

pub fn read_params(path: &Path) -> Result<ParamDict, AppError> {
    read_keyed(path)
}

pub fn read_fixed(path: &Path) -> Result<FixedMask, AppError> {
    read_keyed(path)
}

pub fn read_bounds(path: &Path) -> Result<BoundsDict, AppError> {
    let pairs: BTreeMap<ParamKey, Vec<[Option<f64>; 2]>> = read_keyed(path)?;
    Ok(bounds_from_pairs(pairs))
}

fn bounds_from_pairs(pairs: BTreeMap<ParamKey, Vec<[Option<f64>; 2]>>) -> BoundsDict {
    pairs
        .into_iter()
        .map(|(k, v)| (k, v.into_iter().map(|[lo, hi]| Bounds::new(lo, hi)).collect()))
        .collect()
}

/// Fitted curve sampled on the measured q grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveGrid {
    pub q: Vec<f64>,
    pub intensity: Vec<f64>,
}

/// Portable record of one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResultFile {
    pub tool: String,
    pub source: Option<String>,
    pub populations: Populations,
    pub params: ParamDict,
    pub report: Option<FitReport>,
    pub curve: CurveGrid,
}

pub fn write_result_json(path: &Path, result: &FitResultFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create result JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, result)
        .map_err(|e| AppError::new(2, format!("Failed to write result JSON: {e}")))?;
    Ok(())
}

pub fn read_result_json(path: &Path) -> Result<FitResultFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open result JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid result JSON: {e}")))
}
