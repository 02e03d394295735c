//! Parameter space: schema, defaults, overrides, and the optimizer-facing flat form.
//!
//! The natural representation is a keyed dict (`ParamDict`): one `Vec<f64>` per
//! parameter key, one entry per population instance. The optimizer instead sees
//! a flat list of `ParameterSlot`s, each carrying its value, bounds and fixed flag.
//!
//! The mapping between the two is driven by an explicit `ParamSchema` so slot
//! order and slot names are a pure function of the population counts.

use std::collections::BTreeMap;

use tracing::warn;

use crate::domain::{Bounds, BoundsDict, FixedMask, ParamDict, ParamKey, PopulationKind, Populations};
use crate::error::FitError;

/// One schema row: a parameter key and how many entries it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaEntry {
    pub key: ParamKey,
    /// Owning population (`None` for the global floor).
    pub population: Option<PopulationKind>,
    pub len: usize,
}

/// Ordered parameter schema for a population spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSchema {
    entries: Vec<SchemaEntry>,
}

impl ParamSchema {
    /// Build the schema for `populations`.
    ///
    /// Unidentified spectra have an empty schema (nothing to fit).
    pub fn for_populations(populations: &Populations) -> Self {
        let mut entries = Vec::new();
        if populations.is_unidentified() {
            return Self { entries };
        }
        entries.push(SchemaEntry {
            key: ParamKey::I0Floor,
            population: None,
            len: 1,
        });
        for kind in PopulationKind::FITTABLE {
            let n = populations.count(kind);
            if n == 0 {
                continue;
            }
            for &key in kind.param_keys() {
                entries.push(SchemaEntry {
                    key,
                    population: Some(kind),
                    len: n,
                });
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of flat slots.
    pub fn slot_count(&self) -> usize {
        self.entries.iter().map(|e| e.len).sum()
    }

    pub fn len_of(&self, key: ParamKey) -> Option<usize> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.len)
    }

    /// A dict with this schema's shape, every entry produced by `value`.
    pub fn fill<T: Clone>(&self, value: impl Fn(ParamKey) -> T) -> BTreeMap<ParamKey, Vec<T>> {
        self.entries
            .iter()
            .map(|e| (e.key, vec![value(e.key); e.len]))
            .collect()
    }

    pub fn defaults(&self) -> ParamDict {
        self.fill(ParamKey::default_value)
    }

    pub fn default_bounds(&self) -> BoundsDict {
        self.fill(ParamKey::default_bounds)
    }

    /// Every entry free.
    pub fn free_mask(&self) -> FixedMask {
        self.fill(|_| false)
    }

    /// Every shape parameter fixed, every amplitude-like parameter free.
    pub fn intensity_only_mask(&self) -> FixedMask {
        self.fill(|k| !k.is_intensity())
    }
}

/// Default parameter dict for a population spec (empty when unidentified).
pub fn defaults_for(populations: &Populations) -> ParamDict {
    ParamSchema::for_populations(populations).defaults()
}

/// Overwrite entries of `base` with entries of `overrides`.
///
/// Only keys present in `base` are touched, and only up to the shorter of the
/// two lengths: the key set and per-key lengths of `base` never change. Extra
/// keys and extra trailing values in `overrides` are dropped with a warning.
pub fn merge<T: Clone>(
    mut base: BTreeMap<ParamKey, Vec<T>>,
    overrides: &BTreeMap<ParamKey, Vec<T>>,
) -> BTreeMap<ParamKey, Vec<T>> {
    for (key, values) in overrides {
        let Some(target) = base.get_mut(key) else {
            warn!(key = %key, "ignoring override for a parameter outside the schema");
            continue;
        };
        if values.len() > target.len() {
            warn!(
                key = %key,
                supplied = values.len(),
                used = target.len(),
                "override has more entries than the schema; extra values dropped"
            );
        }
        for (slot, v) in target.iter_mut().zip(values.iter()) {
            *slot = v.clone();
        }
    }
    base
}

/// Deterministic, collision-free flat slot name for `(key, index)`.
pub fn slot_name(key: ParamKey, index: usize) -> String {
    format!("{}[{index}]", key.name())
}

/// How a slot's bounds map it to the optimizer's unbounded coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BoundKind {
    Free,
    Lower(f64),
    Upper(f64),
    Both(f64, f64),
    Pinned(f64),
}

/// One optimizer-facing scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSlot {
    pub name: String,
    pub key: ParamKey,
    pub index: usize,
    pub value: f64,
    pub bounds: Bounds,
    pub fixed: bool,
}

impl ParameterSlot {
    fn bound_kind(&self) -> BoundKind {
        let lo = self.bounds.lower.filter(|v| v.is_finite());
        let hi = self.bounds.upper.filter(|v| v.is_finite());
        match (lo, hi) {
            (None, None) => BoundKind::Free,
            (Some(l), None) => BoundKind::Lower(l),
            (None, Some(h)) => BoundKind::Upper(h),
            (Some(l), Some(h)) if h > l => BoundKind::Both(l, h),
            (Some(l), Some(_)) => BoundKind::Pinned(l),
        }
    }

    /// Map the (bounded) value to the optimizer's unbounded coordinate.
    ///
    /// Uses the MINUIT transforms: arcsine for two-sided bounds, square-root
    /// forms for one-sided bounds.
    pub fn to_internal(&self) -> f64 {
        let v = self.value;
        match self.bound_kind() {
            BoundKind::Free => v,
            BoundKind::Lower(l) => {
                let t = v - l + 1.0;
                (t * t - 1.0).max(0.0).sqrt()
            }
            BoundKind::Upper(h) => {
                let t = h - v + 1.0;
                (t * t - 1.0).max(0.0).sqrt()
            }
            BoundKind::Both(l, h) => (2.0 * (v - l) / (h - l) - 1.0).clamp(-1.0, 1.0).asin(),
            BoundKind::Pinned(_) => 0.0,
        }
    }

    /// Inverse of `to_internal`; always lands inside the bounds.
    pub fn from_internal(&self, x: f64) -> f64 {
        match self.bound_kind() {
            BoundKind::Free => x,
            BoundKind::Lower(l) => l - 1.0 + (x * x + 1.0).sqrt(),
            BoundKind::Upper(h) => h + 1.0 - (x * x + 1.0).sqrt(),
            BoundKind::Both(l, h) => (l + (x.sin() + 1.0) * (h - l) / 2.0).clamp(l, h),
            BoundKind::Pinned(l) => l,
        }
    }
}

/// Flat optimizer representation of a parameter dict.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatParams {
    slots: Vec<ParameterSlot>,
}

impl FlatParams {
    pub fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Positions of the slots the optimizer may move.
    pub fn free_positions(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.fixed)
            .map(|(i, _)| i)
            .collect()
    }

    /// Internal coordinates of the free slots, in slot order.
    pub fn free_internal(&self) -> Vec<f64> {
        self.slots
            .iter()
            .filter(|s| !s.fixed)
            .map(ParameterSlot::to_internal)
            .collect()
    }

    /// Copy with the free slots set from internal coordinates.
    ///
    /// Fixed slots are copied verbatim.
    pub fn with_free_internal(&self, internal: &[f64]) -> FlatParams {
        let mut out = self.clone();
        for (slot, &x) in out.slots.iter_mut().filter(|s| !s.fixed).zip(internal) {
            slot.value = slot.from_internal(x);
        }
        out
    }

    /// Rebuild a dict against `schema`, reading slots in order.
    fn unflatten<T>(
        &self,
        schema: &ParamSchema,
        read: impl Fn(&ParameterSlot) -> T,
    ) -> Result<BTreeMap<ParamKey, Vec<T>>, FitError> {
        let mut out = BTreeMap::new();
        let mut slots = self.slots.iter();
        let mut position = 0usize;
        for entry in schema.entries() {
            let mut values = Vec::with_capacity(entry.len);
            for index in 0..entry.len {
                let expected = slot_name(entry.key, index);
                let slot = slots.next().ok_or_else(|| FitError::SlotMismatch {
                    position,
                    expected: expected.clone(),
                    found: "<end>".to_string(),
                })?;
                if slot.name != expected {
                    return Err(FitError::SlotMismatch {
                        position,
                        expected,
                        found: slot.name.clone(),
                    });
                }
                values.push(read(slot));
                position += 1;
            }
            out.insert(entry.key, values);
        }
        if let Some(extra) = slots.next() {
            return Err(FitError::SlotMismatch {
                position,
                expected: "<end>".to_string(),
                found: extra.name.clone(),
            });
        }
        Ok(out)
    }

    pub fn fixed_mask(&self, schema: &ParamSchema) -> Result<FixedMask, FitError> {
        self.unflatten(schema, |s| s.fixed)
    }

    pub fn bounds(&self, schema: &ParamSchema) -> Result<BoundsDict, FitError> {
        self.unflatten(schema, |s| s.bounds)
    }
}

/// Flatten a parameter dict into optimizer slots.
///
/// Missing fixed flags default to free; missing bounds default to the key's
/// default bounds. Free values are clamped into their bounds; fixed values are
/// kept verbatim.
pub fn to_flat(params: &ParamDict, fixed: &FixedMask, bounds: &BoundsDict) -> Result<FlatParams, FitError> {
    let mut slots = Vec::with_capacity(params.values().map(Vec::len).sum());
    for (&key, values) in params {
        for (index, &value) in values.iter().enumerate() {
            let is_fixed = fixed
                .get(&key)
                .and_then(|m| m.get(index))
                .copied()
                .unwrap_or(false);
            let b = bounds
                .get(&key)
                .and_then(|m| m.get(index))
                .copied()
                .unwrap_or_else(|| key.default_bounds());
            if let (Some(lo), Some(hi)) = (b.lower, b.upper) {
                if lo > hi {
                    return Err(FitError::InvalidOption {
                        field: "bounds",
                        message: format!("{} has lower bound {lo} above upper bound {hi}", slot_name(key, index)),
                    });
                }
            }
            if !value.is_finite() {
                return Err(FitError::InvalidOption {
                    field: "params",
                    message: format!("{} is not finite ({value})", slot_name(key, index)),
                });
            }
            slots.push(ParameterSlot {
                name: slot_name(key, index),
                key,
                index,
                value: if is_fixed { value } else { b.clamp(value) },
                bounds: b,
                fixed: is_fixed,
            });
        }
    }
    Ok(FlatParams { slots })
}

/// Rebuild a parameter dict from flat slots against `schema`.
pub fn from_flat(flat: &FlatParams, schema: &ParamSchema) -> Result<ParamDict, FitError> {
    flat.unflatten(schema, |s| s.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gp_peaks() -> Populations {
        Populations {
            guinier_porod: 1,
            diffraction_peaks: 2,
            ..Populations::default()
        }
    }

    #[test]
    fn defaults_follow_population_counts() {
        let d = defaults_for(&gp_peaks());
        let keys: Vec<ParamKey> = d.keys().copied().collect();
        assert_eq!(
            keys,
            vec![
                ParamKey::I0Floor,
                ParamKey::GGp,
                ParamKey::RgGp,
                ParamKey::DGp,
                ParamKey::QPkcenter,
                ParamKey::IPkcenter,
                ParamKey::PkHwhm,
            ]
        );
        assert_eq!(d[&ParamKey::I0Floor], vec![0.0]);
        assert_eq!(d[&ParamKey::QPkcenter], vec![0.1, 0.1]);
        assert_eq!(d[&ParamKey::RgGp], vec![10.0]);
    }

    #[test]
    fn defaults_empty_when_unidentified() {
        let p = Populations {
            unidentified: 1,
            guinier_porod: 1,
            ..Populations::default()
        };
        assert!(defaults_for(&p).is_empty());
        assert!(ParamSchema::for_populations(&p).is_empty());
    }

    #[test]
    fn defaults_without_populations_keep_floor() {
        let d = defaults_for(&Populations::default());
        assert_eq!(d.len(), 1);
        assert_eq!(d[&ParamKey::I0Floor], vec![0.0]);
    }

    #[test]
    fn merge_preserves_base_shape() {
        let base = defaults_for(&gp_peaks());
        let mut over = ParamDict::new();
        over.insert(ParamKey::QPkcenter, vec![0.2, 0.3, 0.4]);
        over.insert(ParamKey::RgGp, vec![]);
        over.insert(ParamKey::R0Sphere, vec![50.0]);

        let merged = merge(base.clone(), &over);
        assert_eq!(merged.len(), base.len());
        for (k, v) in &base {
            assert_eq!(merged[k].len(), v.len());
        }
        assert_eq!(merged[&ParamKey::QPkcenter], vec![0.2, 0.3]);
        assert_eq!(merged[&ParamKey::RgGp], vec![10.0]);
        assert!(!merged.contains_key(&ParamKey::R0Sphere));
    }

    #[test]
    fn merge_partial_override_keeps_tail() {
        let base = defaults_for(&gp_peaks());
        let mut over = ParamDict::new();
        over.insert(ParamKey::PkHwhm, vec![0.05]);
        let merged = merge(base, &over);
        assert_eq!(merged[&ParamKey::PkHwhm], vec![0.05, 1.0e-3]);
    }

    #[test]
    fn slot_names_are_unique_and_stable() {
        let schema = ParamSchema::for_populations(&gp_peaks());
        let flat = to_flat(&schema.defaults(), &schema.free_mask(), &schema.default_bounds()).unwrap();
        let names: Vec<&str> = flat.slots().iter().map(|s| s.name.as_str()).collect();
        let mut dedup = names.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), names.len());
        assert_eq!(names[0], "I0_floor[0]");
        assert_eq!(names[4], "q_pkcenter[0]");
        assert_eq!(names[5], "q_pkcenter[1]");
        assert_eq!(flat.slots().len(), schema.slot_count());
    }

    #[test]
    fn flat_round_trip_preserves_values_flags_and_bounds() {
        let schema = ParamSchema::for_populations(&gp_peaks());
        let mut params = schema.defaults();
        params.insert(ParamKey::QPkcenter, vec![0.25, 0.5]);
        let mut fixed = schema.free_mask();
        fixed.insert(ParamKey::DGp, vec![true]);
        let mut bounds = schema.default_bounds();
        bounds.insert(ParamKey::RgGp, vec![Bounds::new(Some(1.0), Some(50.0))]);

        let flat = to_flat(&params, &fixed, &bounds).unwrap();
        assert_eq!(from_flat(&flat, &schema).unwrap(), params);
        assert_eq!(flat.fixed_mask(&schema).unwrap(), fixed);
        assert_eq!(flat.bounds(&schema).unwrap(), bounds);

        let again = to_flat(
            &from_flat(&flat, &schema).unwrap(),
            &flat.fixed_mask(&schema).unwrap(),
            &flat.bounds(&schema).unwrap(),
        )
        .unwrap();
        assert_eq!(again, flat);
    }

    #[test]
    fn from_flat_detects_schema_mismatch() {
        let schema = ParamSchema::for_populations(&gp_peaks());
        let flat = to_flat(&schema.defaults(), &schema.free_mask(), &schema.default_bounds()).unwrap();
        let other = ParamSchema::for_populations(&Populations {
            spherical_normal: 1,
            ..Populations::default()
        });
        assert!(matches!(
            from_flat(&flat, &other),
            Err(FitError::SlotMismatch { position: 1, .. })
        ));
    }

    #[test]
    fn to_flat_clamps_free_values_only() {
        let schema = ParamSchema::for_populations(&gp_peaks());
        let mut params = schema.defaults();
        params.insert(ParamKey::DGp, vec![7.0]);
        params.insert(ParamKey::RgGp, vec![5000.0]);
        let mut fixed = schema.free_mask();
        fixed.insert(ParamKey::RgGp, vec![true]);

        let flat = to_flat(&params, &fixed, &schema.default_bounds()).unwrap();
        assert_eq!(flat.get("D_gp[0]").unwrap().value, 4.0);
        assert_eq!(flat.get("rg_gp[0]").unwrap().value, 5000.0);
    }

    #[test]
    fn to_flat_rejects_inverted_bounds() {
        let schema = ParamSchema::for_populations(&gp_peaks());
        let mut bounds = schema.default_bounds();
        bounds.insert(ParamKey::RgGp, vec![Bounds::new(Some(10.0), Some(1.0))]);
        assert!(matches!(
            to_flat(&schema.defaults(), &schema.free_mask(), &bounds),
            Err(FitError::InvalidOption { field: "bounds", .. })
        ));
    }

    #[test]
    fn bounded_transform_round_trips_and_stays_inside() {
        let cases = [
            (Bounds::new(Some(0.0), Some(4.0)), 2.5),
            (Bounds::new(Some(0.0), None), 1.0e-3),
            (Bounds::new(None, Some(1.0)), -3.0),
            (Bounds::UNBOUNDED, 42.0),
        ];
        for (bounds, value) in cases {
            let slot = ParameterSlot {
                name: "x[0]".to_string(),
                key: ParamKey::RgGp,
                index: 0,
                value,
                bounds,
                fixed: false,
            };
            let back = slot.from_internal(slot.to_internal());
            assert!((back - value).abs() < 1e-9 * value.abs().max(1.0), "{bounds:?}: {back} vs {value}");
            for x in [-1.0e3, -2.0, 0.0, 0.7, 1.0e3] {
                let v = slot.from_internal(x);
                assert_eq!(bounds.clamp(v), v);
            }
        }
    }

    #[test]
    fn intensity_only_mask_fixes_shape_keys() {
        let schema = ParamSchema::for_populations(&gp_peaks());
        let mask = schema.intensity_only_mask();
        assert_eq!(mask[&ParamKey::I0Floor], vec![false]);
        assert_eq!(mask[&ParamKey::GGp], vec![false]);
        assert_eq!(mask[&ParamKey::RgGp], vec![true]);
        assert_eq!(mask[&ParamKey::IPkcenter], vec![false, false]);
        assert_eq!(mask[&ParamKey::PkHwhm], vec![true, true]);
    }
}
