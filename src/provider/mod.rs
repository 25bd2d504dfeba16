//! Read contract of the cohort data store.
//!
//! Engines never read storage directly. A [`CohortDataProvider`] hands out immutable snapshots of
//! feature matrices, sample metadata and per-feature annotations, and reports unavailable data as
//! a typed [`ProviderError`].

use crate::config::{FeatureClass, IntensityUnit};
use crate::error::ProviderError;
use crate::matrix::FeatureMatrix;
use anyhow::anyhow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub mod in_memory;

pub use in_memory::{CohortData, Dataset, DatasetBuilder, InMemoryProvider};

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

pub trait CohortDataProvider: Send + Sync {
    fn feature_matrix(&self, cohort: &str, class: FeatureClass, unit: IntensityUnit) -> ProviderResult<Arc<FeatureMatrix>>;

    fn sample_metadata(&self, cohort: &str) -> ProviderResult<Arc<SampleMetadata>>;

    fn annotations(&self, cohort: &str, class: FeatureClass) -> ProviderResult<Arc<AnnotationTable>>;

    /// Rows of one identifier. Empty when the identifier is unknown, several rows when it is
    /// ambiguous.
    fn feature_row(
        &self,
        cohort: &str,
        class: FeatureClass,
        unit: IntensityUnit,
        identifier: &str,
    ) -> ProviderResult<FeatureMatrix> {
        let matrix = self.feature_matrix(cohort, class, unit)?;
        Ok(matrix.select_features(&[identifier.to_string()]))
    }

    /// One sample's column. Has no samples when the sample is unknown.
    fn sample_column(
        &self,
        cohort: &str,
        class: FeatureClass,
        unit: IntensityUnit,
        sample: &str,
    ) -> ProviderResult<FeatureMatrix> {
        let matrix = self.feature_matrix(cohort, class, unit)?;
        Ok(matrix.select_samples(&[sample.to_string()]))
    }
}

/// Sample list of a cohort plus categorical metadata columns (`column -> sample -> category`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleMetadata {
    samples: Vec<String>,
    columns: BTreeMap<String, HashMap<String, String>>,
}

impl SampleMetadata {
    pub fn new(samples: Vec<String>) -> Self {
        Self {
            samples,
            columns: BTreeMap::new(),
        }
    }

    /// Add or replace a metadata column. Samples without a category are simply absent.
    pub fn with_column<S, C>(mut self, name: &str, values: impl IntoIterator<Item = (S, C)>) -> Self
    where
        S: Into<String>,
        C: Into<String>,
    {
        let column = values.into_iter().map(|(s, c)| (s.into(), c.into())).collect();
        self.columns.insert(name.to_string(), column);
        self
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn categories(&self, column: &str) -> ProviderResult<&HashMap<String, String>> {
        self.columns
            .get(column)
            .ok_or_else(|| ProviderError::MetadataColumnMissing(column.to_string()))
    }

    /// Sorted samples labelled `category` in `column`.
    pub fn samples_in(&self, column: &str, category: &str) -> ProviderResult<Vec<String>> {
        let mut samples: Vec<String> = self
            .categories(column)?
            .iter()
            .filter(|(_, c)| c.as_str() == category)
            .map(|(s, _)| s.clone())
            .collect();
        samples.sort();
        Ok(samples)
    }
}

/// String-valued annotation columns keyed by feature identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTable {
    columns: Vec<String>,
    rows: HashMap<String, Vec<Option<String>>>,
}

impl AnnotationTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: HashMap::new(),
        }
    }

    /// Insert one feature's values, `None` for a missing cell. Fails on a width mismatch.
    pub fn insert(&mut self, feature: impl Into<String>, values: Vec<Option<String>>) -> anyhow::Result<()> {
        if values.len() != self.columns.len() {
            return Err(anyhow!(
                "Annotation row has {} values, expected {}",
                values.len(),
                self.columns.len()
            ));
        }
        self.rows.insert(feature.into(), values);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, feature: &str) -> Option<&[Option<String>]> {
        self.rows.get(feature).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ids;

    #[test]
    fn test_metadata_lookup() {
        let meta = SampleMetadata::new(ids(&["p1", "p2", "p3"]))
            .with_column("Entity", [("p3", "LUAD"), ("p1", "LUAD"), ("p2", "SARC")]);
        assert_eq!(meta.samples_in("Entity", "LUAD").unwrap(), ids(&["p1", "p3"]));
        assert!(meta.samples_in("Entity", "CHOR").unwrap().is_empty());
        assert_eq!(
            meta.categories("Batch").unwrap_err(),
            ProviderError::MetadataColumnMissing("Batch".to_string())
        );
    }

    #[test]
    fn test_annotation_width_checked() {
        let mut table = AnnotationTable::new(ids(&["Gene names", "PSP Kinases"]));
        table
            .insert("AAApSK", vec![Some("EGFR".to_string()), None])
            .unwrap();
        assert!(table.insert("BBB", vec![None]).is_err());
        assert_eq!(table.columns().len(), 2);
        assert_eq!(table.get("AAApSK").unwrap()[1], None);
        assert!(table.get("missing").is_none());
    }
}
