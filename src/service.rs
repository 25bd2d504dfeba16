//! Request-level entry points over a [`CohortDataProvider`].
//!
//! [`CohortAnalysis`] fetches snapshots from the provider, resolves identifiers, runs one engine
//! and applies best-effort annotation. Identifier problems come back as a [`QueryStatus`];
//! provider conditions are raised as [`crate::error::EngineError::Provider`].

use crate::config::{EngineConfig, FeatureClass, ImputationMode, IntensityUnit, ReferenceChannels};
use crate::correlation::{self, CorrelationRow, SampleCorrelationRow};
use crate::differential::{self, DifferentialRow, VolcanoRow};
use crate::enrichment::{Annotated, AnnotationMerge, enrich_rows};
use crate::error::{QueryOutcome, QueryStatus, Result};
use crate::matrix::{FeatureMatrix, Series, sorted_difference};
use crate::provider::CohortDataProvider;
use crate::reduction::silhouette::{self, SilhouetteInput, SilhouetteRow};
use crate::reduction::{self, QcEmbedding, ReductionMethod};
use crate::zscore::{self, SubcohortZScoreRow, ZScoreColumn};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CorrelationRequest<'a> {
    pub cohort: &'a str,
    pub identifier: &'a str,
    /// Layer the reference identifier is looked up in.
    pub reference_class: FeatureClass,
    /// Layer whose features are ranked.
    pub target_class: FeatureClass,
    pub unit: IntensityUnit,
    pub sample_filter: Option<&'a [String]>,
}

#[derive(Debug, Clone)]
pub struct DifferentialRequest<'a> {
    pub cohort: &'a str,
    pub class: FeatureClass,
    pub unit: IntensityUnit,
    pub group1: &'a [String],
    /// `None` compares against every other sample of the cohort.
    pub group2: Option<&'a [String]>,
    pub feature_list: Option<&'a [String]>,
}

#[derive(Debug, Clone)]
pub struct QcRequest<'a> {
    pub cohort: &'a str,
    pub class: FeatureClass,
    pub unit: IntensityUnit,
    pub method: ReductionMethod,
    pub reference_channels: ReferenceChannels,
    /// Restrict the reduction to these samples.
    pub samples: Option<&'a [String]>,
    /// Restrict the reduction to these features, applied before the occurrence filter.
    pub features: Option<&'a [String]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbundanceRow {
    pub sample_id: String,
    pub value: Option<f64>,
}

/// Unit z-scores are computed on for a layer: derived scores keep their own scale.
pub fn zscore_unit(class: FeatureClass) -> IntensityUnit {
    match class {
        FeatureClass::TopasScore => IntensityUnit::Score,
        FeatureClass::Kinase | FeatureClass::PhosphoScore => IntensityUnit::ZScore,
        _ => IntensityUnit::Intensity,
    }
}

pub struct CohortAnalysis<P> {
    provider: P,
    config: EngineConfig,
}

impl<P: CohortDataProvider> CohortAnalysis<P> {
    pub fn new(provider: P, config: EngineConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rank the features of `target_class` by correlation with one identifier.
    pub fn correlate(&self, request: &CorrelationRequest<'_>) -> Result<QueryOutcome<Annotated<CorrelationRow>>> {
        let reference_layer = self
            .provider
            .feature_matrix(request.cohort, request.reference_class, request.unit)?;
        let reference = match resolve_identifier(&reference_layer, request.identifier) {
            Ok(series) => series,
            Err(status) => return Ok(QueryOutcome::empty(status)),
        };
        let matrix = self
            .provider
            .feature_matrix(request.cohort, request.target_class, request.unit)?;

        let outcome = correlation::compute_correlations(
            &reference,
            &matrix,
            request.sample_filter,
            self.config.correlation.min_valid_samples,
        )?;
        debug!(identifier = request.identifier, rows = outcome.rows.len(), status = %outcome.status, "correlation");
        Ok(outcome.map_rows(|rows| {
            enrich_rows(
                rows,
                || Ok(self.provider.annotations(request.cohort, request.target_class)?),
                |row: &CorrelationRow| row.feature_id.as_str(),
                &AnnotationMerge::CORRELATION,
            )
        }))
    }

    /// Per-sample correlation between two layers of the same cohort.
    pub fn correlate_layers(
        &self,
        cohort: &str,
        left: (FeatureClass, IntensityUnit),
        right: (FeatureClass, IntensityUnit),
    ) -> Result<Vec<SampleCorrelationRow>> {
        let left = self.provider.feature_matrix(cohort, left.0, left.1)?;
        let right = self.provider.feature_matrix(cohort, right.0, right.1)?;
        Ok(correlation::correlate_samples_across_layers(&left, &right))
    }

    /// Group comparison. Without an explicit second group, the rest of the cohort's sample list
    /// is used.
    pub fn differential(&self, request: &DifferentialRequest<'_>) -> Result<Vec<Annotated<DifferentialRow>>> {
        let rows = self.differential_rows(request)?;
        let merge = if request.class == FeatureClass::Phosphosite {
            AnnotationMerge::DIFFERENTIAL_PHOSPHO
        } else {
            AnnotationMerge::DIFFERENTIAL
        };
        Ok(enrich_rows(
            rows,
            || Ok(self.provider.annotations(request.cohort, request.class)?),
            |row: &DifferentialRow| row.feature_id.as_str(),
            &merge,
        ))
    }

    /// Group comparison decorated for a volcano plot on the configured axis.
    pub fn volcano(&self, request: &DifferentialRequest<'_>) -> Result<Vec<VolcanoRow>> {
        let rows = self.differential_rows(request)?;
        Ok(differential::volcano(rows, self.config.differential.volcano_axis))
    }

    fn differential_rows(&self, request: &DifferentialRequest<'_>) -> Result<Vec<DifferentialRow>> {
        let matrix = self.provider.feature_matrix(request.cohort, request.class, request.unit)?;
        let rest;
        let group2 = match request.group2 {
            Some(samples) => samples,
            None => {
                let metadata = self.provider.sample_metadata(request.cohort)?;
                rest = sorted_difference(metadata.samples(), request.group1);
                rest.as_slice()
            }
        };
        Ok(differential::one_vs_rest_t_test(
            &matrix,
            request.feature_list,
            request.group1,
            group2,
            self.config.differential.alpha,
        )?)
    }

    /// Leave-one-out z-scores of one identifier across the cohort.
    pub fn zscores(&self, cohort: &str, class: FeatureClass, identifier: &str) -> Result<QueryOutcome<ZScoreColumn>> {
        let layer = self.provider.feature_matrix(cohort, class, zscore_unit(class))?;
        Ok(match resolve_identifier(&layer, identifier) {
            Ok(series) => QueryOutcome::ok(vec![zscore::leave_one_out_zscore(&series)]),
            Err(status) => QueryOutcome::empty(status),
        })
    }

    /// Cohort z-scores followed by z-scores recomputed within the samples whose
    /// `metadata_column` value is one of `categories`.
    pub fn subcohort_zscores(
        &self,
        cohort: &str,
        class: FeatureClass,
        identifier: &str,
        metadata_column: &str,
        categories: &[String],
    ) -> Result<QueryOutcome<SubcohortZScoreRow>> {
        let layer = self.provider.feature_matrix(cohort, class, zscore_unit(class))?;
        let series = match resolve_identifier(&layer, identifier) {
            Ok(series) => series,
            Err(status) => return Ok(QueryOutcome::empty(status)),
        };
        let metadata = self.provider.sample_metadata(cohort)?;
        let labels = metadata.categories(metadata_column)?;
        let mut subset: Vec<String> = labels
            .iter()
            .filter(|(_, c)| categories.contains(*c))
            .map(|(s, _)| s.clone())
            .collect();
        subset.sort();
        Ok(QueryOutcome::ok(zscore::subcohort_zscores(&series, &subset, labels)))
    }

    /// Values of one identifier per sample, optionally filling gaps with the row minimum.
    pub fn abundance(
        &self,
        cohort: &str,
        class: FeatureClass,
        unit: IntensityUnit,
        identifier: &str,
        imputation: ImputationMode,
    ) -> Result<QueryOutcome<AbundanceRow>> {
        let row = self.provider.feature_row(cohort, class, unit, identifier)?;
        let series = match single_row(&row, identifier) {
            Ok(series) => series,
            Err(status) => return Ok(QueryOutcome::empty(status)),
        };
        let minimum = series
            .values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::INFINITY, f64::min);
        let rows = series
            .index
            .iter()
            .zip(series.values.iter())
            .map(|(sample, &value)| {
                let value = match (value.is_nan(), imputation) {
                    (false, _) => Some(value),
                    (true, ImputationMode::ImputeWithMinimum) if minimum.is_finite() => Some(minimum),
                    (true, _) => None,
                };
                AbundanceRow {
                    sample_id: sample.clone(),
                    value,
                }
            })
            .collect();
        Ok(QueryOutcome::ok(rows))
    }

    /// Two-dimensional QC embedding of a layer.
    pub fn qc(&self, request: &QcRequest<'_>) -> Result<QcEmbedding> {
        let layer = self.provider.feature_matrix(request.cohort, request.class, request.unit)?;
        let mut matrix = match request.samples {
            Some(samples) => layer.select_samples(samples),
            None => FeatureMatrix::clone(&layer),
        };
        if let Some(features) = request.features {
            matrix = matrix.select_features(features);
        }
        let qc = reduction::run_qc(&matrix, request.method, request.reference_channels, &self.config.reduction)?;
        info!(
            cohort = request.cohort,
            method = ?request.method,
            samples = qc.rows.len(),
            features = qc.imputed.ncols(),
            "qc embedding computed"
        );
        Ok(qc)
    }

    /// Silhouette scores of a QC embedding against one metadata column.
    pub fn silhouette(
        &self,
        request: &QcRequest<'_>,
        metadata_column: &str,
        input: SilhouetteInput,
    ) -> Result<Vec<SilhouetteRow>> {
        let metadata = self.provider.sample_metadata(request.cohort)?;
        let labels: &HashMap<String, String> = metadata.categories(metadata_column)?;
        let qc = self.qc(request)?;
        silhouette::qc_silhouette(&qc, input, labels, &self.config.silhouette)
    }
}

/// The single row of `identifier`, looking through protein groups.
fn resolve_identifier(layer: &FeatureMatrix, identifier: &str) -> std::result::Result<Series, QueryStatus> {
    let direct = layer.select_features(&[identifier.to_string()]);
    if direct.n_features() > 0 {
        return single_row(&direct, identifier);
    }
    single_row(&layer.unnest_protein_groups().select_features(&[identifier.to_string()]), identifier)
}

fn single_row(rows: &FeatureMatrix, identifier: &str) -> std::result::Result<Series, QueryStatus> {
    match rows.n_features() {
        0 => Err(QueryStatus::IdentifierNotFound(identifier.to_string())),
        1 => Ok(rows.row_series(0)),
        _ => Err(QueryStatus::IdentifierAmbiguous(identifier.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ids;
    use ndarray::array;

    #[test]
    fn test_identifier_resolution() {
        let layer = FeatureMatrix::new(
            ids(&["EGFR;ERBB2", "KRAS", "KRAS", "TP53"]),
            ids(&["p1", "p2"]),
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]],
        )
        .unwrap();
        assert_eq!(resolve_identifier(&layer, "TP53").unwrap().values[1], 8.0);
        assert_eq!(resolve_identifier(&layer, "ERBB2").unwrap().name, "ERBB2");
        assert_eq!(
            resolve_identifier(&layer, "KRAS").unwrap_err(),
            QueryStatus::IdentifierAmbiguous("KRAS".to_string())
        );
        assert_eq!(
            resolve_identifier(&layer, "MYC").unwrap_err(),
            QueryStatus::IdentifierNotFound("MYC".to_string())
        );
    }

    #[test]
    fn test_zscore_units() {
        assert_eq!(zscore_unit(FeatureClass::TopasScore), IntensityUnit::Score);
        assert_eq!(zscore_unit(FeatureClass::Kinase), IntensityUnit::ZScore);
        assert_eq!(zscore_unit(FeatureClass::Protein), IntensityUnit::Intensity);
    }
}
