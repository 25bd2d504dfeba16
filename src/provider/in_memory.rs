//! In-memory provider with atomic generation swaps.
//!
//! A loader assembles a complete [`Dataset`] with a [`DatasetBuilder`] and hands it to
//! [`InMemoryProvider::publish`]. Readers clone the current `Arc<Dataset>` under a short read
//! lock, so a request keeps working on the generation it started with while the next one is
//! published.

use super::{AnnotationTable, CohortDataProvider, ProviderResult, SampleMetadata};
use crate::config::{FeatureClass, IntensityUnit};
use crate::error::ProviderError;
use crate::matrix::FeatureMatrix;
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// All layers of one cohort.
#[derive(Debug, Clone, Default)]
pub struct CohortData {
    layers: HashMap<(FeatureClass, IntensityUnit), Arc<FeatureMatrix>>,
    annotations: HashMap<FeatureClass, Arc<AnnotationTable>>,
    metadata: Arc<SampleMetadata>,
}

impl CohortData {
    pub fn has_class(&self, class: FeatureClass) -> bool {
        self.layers.keys().any(|(c, _)| *c == class)
    }
}

/// One immutable generation of every cohort.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    generation: u64,
    cohorts: HashMap<String, CohortData>,
}

impl Dataset {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cohort(&self, cohort: &str) -> ProviderResult<&CohortData> {
        self.cohorts
            .get(cohort)
            .ok_or_else(|| ProviderError::UnknownCohort(cohort.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct DatasetBuilder {
    cohorts: HashMap<String, CohortData>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, cohort: &str, class: FeatureClass, unit: IntensityUnit, matrix: FeatureMatrix) -> Self {
        self.entry(cohort).layers.insert((class, unit), Arc::new(matrix));
        self
    }

    /// Ingest a wide table whose column names end in `unit`'s suffix (e.g. `"pat_1 Z-score"`).
    pub fn suffixed_layer(
        mut self,
        cohort: &str,
        class: FeatureClass,
        unit: IntensityUnit,
        feature_ids: Vec<String>,
        columns: &[String],
        values: &Array2<f64>,
    ) -> ProviderResult<Self> {
        let matrix = FeatureMatrix::from_suffixed_columns(class, unit, feature_ids, columns, values)?;
        debug!(cohort, %class, %unit, samples = matrix.n_samples(), "ingested suffixed layer");
        self.entry(cohort).layers.insert((class, unit), Arc::new(matrix));
        Ok(self)
    }

    pub fn metadata(mut self, cohort: &str, metadata: SampleMetadata) -> Self {
        self.entry(cohort).metadata = Arc::new(metadata);
        self
    }

    pub fn annotations(mut self, cohort: &str, class: FeatureClass, table: AnnotationTable) -> Self {
        self.entry(cohort).annotations.insert(class, Arc::new(table));
        self
    }

    fn entry(&mut self, cohort: &str) -> &mut CohortData {
        self.cohorts.entry(cohort.to_string()).or_default()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProvider {
    current: RwLock<Option<Arc<Dataset>>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the served dataset in one swap and return the new generation number.
    pub fn publish(&self, builder: DatasetBuilder) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let generation = guard.as_ref().map_or(1, |d| d.generation + 1);
        let cohorts = builder.cohorts.len();
        *guard = Some(Arc::new(Dataset {
            generation,
            cohorts: builder.cohorts,
        }));
        info!(generation, cohorts, "published cohort dataset");
        generation
    }

    /// The generation currently served.
    pub fn snapshot(&self) -> ProviderResult<Arc<Dataset>> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone().ok_or(ProviderError::CohortDataNotLoaded)
    }
}

impl CohortDataProvider for InMemoryProvider {
    fn feature_matrix(&self, cohort: &str, class: FeatureClass, unit: IntensityUnit) -> ProviderResult<Arc<FeatureMatrix>> {
        let dataset = self.snapshot()?;
        let data = dataset.cohort(cohort)?;
        match data.layers.get(&(class, unit)) {
            Some(matrix) => Ok(Arc::clone(matrix)),
            None if data.has_class(class) => Err(ProviderError::IntensityUnitUnavailable { class, unit }),
            None => Err(ProviderError::DataLayerUnavailable {
                cohort: cohort.to_string(),
                class,
            }),
        }
    }

    fn sample_metadata(&self, cohort: &str) -> ProviderResult<Arc<SampleMetadata>> {
        let dataset = self.snapshot()?;
        Ok(Arc::clone(&dataset.cohort(cohort)?.metadata))
    }

    fn annotations(&self, cohort: &str, class: FeatureClass) -> ProviderResult<Arc<AnnotationTable>> {
        let dataset = self.snapshot()?;
        dataset
            .cohort(cohort)?
            .annotations
            .get(&class)
            .cloned()
            .ok_or_else(|| ProviderError::DataLayerUnavailable {
                cohort: cohort.to_string(),
                class,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ids;
    use ndarray::array;
    use std::thread;
    use tracing_test::traced_test;

    fn protein_layer(value: f64) -> FeatureMatrix {
        FeatureMatrix::new(ids(&["EGFR", "KRAS"]), ids(&["p1", "p2"]), array![[value, value], [1.0, 2.0]]).unwrap()
    }

    #[test]
    fn test_reads_fail_until_first_publish() {
        let provider = InMemoryProvider::new();
        let err = provider
            .feature_matrix("sarcoma", FeatureClass::Protein, IntensityUnit::Intensity)
            .unwrap_err();
        assert_eq!(err, ProviderError::CohortDataNotLoaded);
        assert!(err.is_retryable());
        assert!(provider.sample_metadata("sarcoma").is_err());
    }

    #[traced_test]
    #[test]
    fn test_publish_swaps_generations() {
        let provider = InMemoryProvider::new();
        let first = provider.publish(DatasetBuilder::new().layer(
            "sarcoma",
            FeatureClass::Protein,
            IntensityUnit::Intensity,
            protein_layer(5.0),
        ));
        assert_eq!(first, 1);
        assert!(logs_contain("published cohort dataset"));

        let held = provider
            .feature_matrix("sarcoma", FeatureClass::Protein, IntensityUnit::Intensity)
            .unwrap();
        let second = provider.publish(DatasetBuilder::new().layer(
            "sarcoma",
            FeatureClass::Protein,
            IntensityUnit::Intensity,
            protein_layer(9.0),
        ));
        assert_eq!(second, 2);

        // a reader keeps the generation it already holds
        assert_eq!(held.values()[[0, 0]], 5.0);
        let fresh = provider
            .feature_matrix("sarcoma", FeatureClass::Protein, IntensityUnit::Intensity)
            .unwrap();
        assert_eq!(fresh.values()[[0, 0]], 9.0);
    }

    #[test]
    fn test_missing_layers_are_typed() {
        let provider = InMemoryProvider::new();
        provider.publish(DatasetBuilder::new().layer(
            "sarcoma",
            FeatureClass::Protein,
            IntensityUnit::Intensity,
            protein_layer(1.0),
        ));
        assert!(matches!(
            provider.feature_matrix("lung", FeatureClass::Protein, IntensityUnit::Intensity),
            Err(ProviderError::UnknownCohort(_))
        ));
        assert!(matches!(
            provider.feature_matrix("sarcoma", FeatureClass::Protein, IntensityUnit::ZScore),
            Err(ProviderError::IntensityUnitUnavailable { .. })
        ));
        assert!(matches!(
            provider.feature_matrix("sarcoma", FeatureClass::Kinase, IntensityUnit::Score),
            Err(ProviderError::DataLayerUnavailable { .. })
        ));
        assert!(matches!(
            provider.annotations("sarcoma", FeatureClass::Phosphosite),
            Err(ProviderError::DataLayerUnavailable { .. })
        ));
    }

    #[test]
    fn test_suffixed_ingestion() {
        let columns = ids(&["p1 Intensity", "p1 Z-score", "p2 Intensity"]);
        let values = array![[1.0, 0.5, 2.0]];
        let builder = DatasetBuilder::new()
            .suffixed_layer("sarcoma", FeatureClass::Protein, IntensityUnit::Intensity, ids(&["EGFR"]), &columns, &values)
            .unwrap();
        assert!(
            DatasetBuilder::new()
                .suffixed_layer("sarcoma", FeatureClass::Protein, IntensityUnit::Score, ids(&["EGFR"]), &columns, &values)
                .is_err()
        );

        let provider = InMemoryProvider::new();
        provider.publish(builder);
        let row = provider
            .feature_row("sarcoma", FeatureClass::Protein, IntensityUnit::Intensity, "EGFR")
            .unwrap();
        assert_eq!(row.sample_ids(), ids(&["p1", "p2"]).as_slice());
        let column = provider
            .sample_column("sarcoma", FeatureClass::Protein, IntensityUnit::Intensity, "p2")
            .unwrap();
        assert_eq!(column.values()[[0, 0]], 2.0);
    }

    #[test]
    fn test_concurrent_readers_see_whole_generations() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.publish(DatasetBuilder::new().layer(
            "sarcoma",
            FeatureClass::Protein,
            IntensityUnit::Intensity,
            protein_layer(0.0),
        ));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let provider = Arc::clone(&provider);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let m = provider
                            .feature_matrix("sarcoma", FeatureClass::Protein, IntensityUnit::Intensity)
                            .unwrap();
                        // both cells of a row always come from the same generation
                        assert_eq!(m.values()[[0, 0]], m.values()[[0, 1]]);
                    }
                })
            })
            .collect();
        for value in 1..50 {
            provider.publish(DatasetBuilder::new().layer(
                "sarcoma",
                FeatureClass::Protein,
                IntensityUnit::Intensity,
                protein_layer(value as f64),
            ));
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
