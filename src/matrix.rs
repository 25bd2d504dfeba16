//! Feature-by-sample matrices and the set helpers used to align them.
//!
//! A [`FeatureMatrix`] holds one feature per row and one sample per column. Missing measurements
//! are stored as `NaN`; every engine treats `NaN` as "not observed" and never as a value.

use crate::config::{FeatureClass, IntensityUnit};
use crate::error::ProviderError;
use anyhow::{Result, anyhow};
use ndarray::{Array1, Array2, Axis};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    feature_ids: Vec<String>,
    sample_ids: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    /// Build a matrix from `values` shaped `(feature_ids.len(), sample_ids.len())`.
    ///
    /// Sample identifiers must be unique. Feature identifiers may repeat, which happens after
    /// protein groups are unnested.
    pub fn new(feature_ids: Vec<String>, sample_ids: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.dim() != (feature_ids.len(), sample_ids.len()) {
            return Err(anyhow!(
                "Matrix shape {:?} does not match {} features x {} samples",
                values.dim(),
                feature_ids.len(),
                sample_ids.len()
            ));
        }
        let mut seen = HashSet::with_capacity(sample_ids.len());
        for sample in &sample_ids {
            if !seen.insert(sample.as_str()) {
                return Err(anyhow!("Duplicate sample identifier: {}", sample));
            }
        }
        Ok(Self {
            feature_ids,
            sample_ids,
            values,
        })
    }

    /// Build a matrix from row vectors, one per feature.
    pub fn from_rows(feature_ids: Vec<String>, sample_ids: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_samples = sample_ids.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != n_samples) {
            return Err(anyhow!(
                "Row {} has {} values, expected {}",
                bad,
                rows[bad].len(),
                n_samples
            ));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let values = Array2::from_shape_vec((feature_ids.len(), n_samples), flat)?;
        Self::new(feature_ids, sample_ids, values)
    }

    /// Ingest a wide table whose column names carry an intensity-unit suffix.
    ///
    /// Only columns ending in `unit`'s suffix are kept, with the suffix stripped. A table without
    /// any such column cannot serve this unit.
    pub fn from_suffixed_columns(
        class: FeatureClass,
        unit: IntensityUnit,
        feature_ids: Vec<String>,
        columns: &[String],
        values: &Array2<f64>,
    ) -> std::result::Result<Self, ProviderError> {
        let kept: Vec<(usize, String)> = columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| unit.strip_suffix(c).map(|s| (i, s.to_string())))
            .collect();
        if kept.is_empty() || values.dim() != (feature_ids.len(), columns.len()) {
            return Err(ProviderError::IntensityUnitUnavailable { class, unit });
        }
        let indices: Vec<usize> = kept.iter().map(|(i, _)| *i).collect();
        let sample_ids = kept.into_iter().map(|(_, s)| s).collect();
        let selected = values.select(Axis(1), &indices);
        Self::new(feature_ids, sample_ids, selected)
            .map_err(|_| ProviderError::IntensityUnitUnavailable { class, unit })
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_ids.is_empty() || self.sample_ids.is_empty()
    }

    /// One feature's values across all samples.
    pub fn row_series(&self, index: usize) -> Series {
        Series {
            name: self.feature_ids[index].clone(),
            index: self.sample_ids.clone(),
            values: self.values.row(index).to_owned(),
        }
    }

    pub fn sample_index(&self, sample: &str) -> Option<usize> {
        self.sample_ids.iter().position(|s| s == sample)
    }

    /// Keep only `samples`, in the given order. Unknown samples are skipped.
    pub fn select_samples(&self, samples: &[String]) -> Self {
        let lookup = self.sample_lookup();
        let (indices, ids): (Vec<usize>, Vec<String>) = samples
            .iter()
            .filter_map(|s| lookup.get(s.as_str()).map(|&i| (i, s.clone())))
            .unzip();
        Self {
            feature_ids: self.feature_ids.clone(),
            sample_ids: ids,
            values: self.values.select(Axis(1), &indices),
        }
    }

    /// Keep rows whose identifier is in `features`, preserving matrix order.
    pub fn select_features(&self, features: &[String]) -> Self {
        let wanted: HashSet<&str> = features.iter().map(String::as_str).collect();
        let indices: Vec<usize> = self
            .feature_ids
            .iter()
            .enumerate()
            .filter_map(|(i, f)| wanted.contains(f.as_str()).then_some(i))
            .collect();
        self.select_rows(&indices)
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            feature_ids: indices.iter().map(|&i| self.feature_ids[i].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
            values: self.values.select(Axis(0), indices),
        }
    }

    /// Split protein-group identifiers (`"A;B"`) into one row per member with identical values.
    pub fn unnest_protein_groups(&self) -> Self {
        let mut indices = Vec::with_capacity(self.n_features());
        let mut ids = Vec::with_capacity(self.n_features());
        for (i, group) in self.feature_ids.iter().enumerate() {
            for member in group.split(';').filter(|m| !m.is_empty()) {
                indices.push(i);
                ids.push(member.to_string());
            }
        }
        Self {
            feature_ids: ids,
            sample_ids: self.sample_ids.clone(),
            values: self.values.select(Axis(0), &indices),
        }
    }

    fn sample_lookup(&self) -> HashMap<&str, usize> {
        self.sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect()
    }
}

/// A named vector keyed by identifier: one feature across samples or one sample across features.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub index: Vec<String>,
    pub values: Array1<f64>,
}

impl Series {
    pub fn new(name: impl Into<String>, index: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if index.len() != values.len() {
            return Err(anyhow!(
                "Series has {} keys but {} values",
                index.len(),
                values.len()
            ));
        }
        Ok(Self {
            name: name.into(),
            index,
            values: Array1::from(values),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Values for `keys` in the given order, `NaN` for unknown keys.
    pub fn select(&self, keys: &[String]) -> Array1<f64> {
        let lookup: HashMap<&str, usize> = self
            .index
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i))
            .collect();
        keys.iter()
            .map(|k| lookup.get(k.as_str()).map_or(f64::NAN, |&i| self.values[i]))
            .collect()
    }
}

/// Sorted, de-duplicated intersection of two identifier lists.
pub fn sorted_intersection(a: &[String], b: &[String]) -> Vec<String> {
    let right: BTreeSet<&String> = b.iter().collect();
    a.iter()
        .collect::<BTreeSet<_>>()
        .intersection(&right)
        .map(|s| (*s).clone())
        .collect()
}

/// Sorted, de-duplicated `a \ b`.
pub fn sorted_difference(a: &[String], b: &[String]) -> Vec<String> {
    let right: BTreeSet<&String> = b.iter().collect();
    a.iter()
        .collect::<BTreeSet<_>>()
        .difference(&right)
        .map(|s| (*s).clone())
        .collect()
}

#[cfg(test)]
pub(crate) fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
