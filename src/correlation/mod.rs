//! Correlation ranking of a matrix against a reference feature.
//!
//! [`compute_correlations`] scores every feature of a matrix against one reference feature over
//! the samples both have in common, ranks the results and attaches a rank-monotonized FDR.
//! [`correlate_samples_across_layers`] answers the transposed question: for each sample, how well
//! do two molecular layers agree across the features they share.
//!
//! ## Ranking
//!
//! Rows are ordered by p-value ascending, then number of samples descending, then absolute
//! correlation descending. `rank` is the 1-based position in that order and
//! `fdr = p * N / rank`, made non-decreasing with rank.

use crate::error::{QueryOutcome, QueryStatus};
use crate::matrix::{FeatureMatrix, Series, sorted_intersection};
use crate::testing::correction::rank_monotonized_fdr;
use crate::testing::inference::MatrixStatTests;
use crate::testing::inference::parametric::pearson_nan_omit;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Samples must share more than this many features to get a cross-layer correlation.
pub const MIN_SHARED_FEATURES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationRow {
    pub feature_id: String,
    pub correlation: f64,
    pub num_samples: usize,
    pub p_value: f64,
    pub abs_correlation: f64,
    pub rank: usize,
    pub fdr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleCorrelationRow {
    pub sample_id: String,
    /// `None` when the sample shares too few observed features.
    pub correlation: Option<f64>,
    pub num_features: usize,
}

/// Rank all features of `matrix` by their Pearson correlation with `reference`.
///
/// # Arguments
///
/// * `reference` - One feature's values keyed by sample
/// * `matrix` - Features to score, on the same scale as the reference
/// * `sample_filter` - Optional further restriction of the shared samples
/// * `min_valid_samples` - Rows with fewer mutually observed samples are left out
///
/// # Returns
///
/// The ranked rows, or an empty result with [`QueryStatus::NoOverlappingSamples`] when both inputs
/// have samples but none in common.
pub fn compute_correlations(
    reference: &Series,
    matrix: &FeatureMatrix,
    sample_filter: Option<&[String]>,
    min_valid_samples: usize,
) -> anyhow::Result<QueryOutcome<CorrelationRow>> {
    if reference.is_empty() || matrix.n_samples() == 0 {
        return Ok(QueryOutcome::ok(Vec::new()));
    }

    let mut overlap = sorted_intersection(matrix.sample_ids(), &reference.index);
    if let Some(filter) = sample_filter {
        overlap = sorted_intersection(&overlap, filter);
    }
    if overlap.is_empty() {
        return Ok(QueryOutcome::empty(QueryStatus::NoOverlappingSamples));
    }

    let matrix = matrix.select_samples(&overlap);
    let reference_values = reference.select(&overlap);
    let tests = matrix.correlate_rows(reference_values.view())?;

    let mut rows: Vec<CorrelationRow> = tests
        .into_iter()
        .zip(matrix.feature_ids())
        .filter(|(test, _)| {
            test.n_pairs >= min_valid_samples
                && !test.result.statistic.is_nan()
                && !test.result.p_value.is_nan()
        })
        .map(|(test, feature_id)| CorrelationRow {
            feature_id: feature_id.clone(),
            correlation: test.result.statistic,
            num_samples: test.n_pairs,
            p_value: test.result.p_value,
            abs_correlation: test.result.statistic.abs(),
            rank: 0,
            fdr: f64::NAN,
        })
        .collect();

    rows.sort_by(|a, b| {
        a.p_value
            .partial_cmp(&b.p_value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.num_samples.cmp(&a.num_samples))
            .then_with(|| {
                b.abs_correlation
                    .partial_cmp(&a.abs_correlation)
                    .unwrap_or(Ordering::Equal)
            })
    });

    let ranked_p: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    for (i, (row, fdr)) in rows.iter_mut().zip(rank_monotonized_fdr(&ranked_p)).enumerate() {
        row.rank = i + 1;
        row.fdr = fdr;
    }

    debug!(
        reference = %reference.name,
        overlap = overlap.len(),
        retained = rows.len(),
        "computed correlations"
    );
    Ok(QueryOutcome::ok(rows))
}

/// Per-sample correlation between two layers over the features both observe.
///
/// Protein groups in `left` are unnested before features are matched by identifier. Samples are
/// reported in `right`'s column order; a sample needs more than [`MIN_SHARED_FEATURES`]
/// observed pairs to get a correlation.
pub fn correlate_samples_across_layers(left: &FeatureMatrix, right: &FeatureMatrix) -> Vec<SampleCorrelationRow> {
    let left = left.unnest_protein_groups();

    let left_rows: HashMap<&str, usize> = left
        .feature_ids()
        .iter()
        .enumerate()
        .rev()
        .map(|(i, f)| (f.as_str(), i))
        .collect();
    let shared: Vec<(usize, usize)> = right
        .feature_ids()
        .iter()
        .enumerate()
        .filter_map(|(j, f)| left_rows.get(f.as_str()).map(|&i| (i, j)))
        .collect();

    let samples: Vec<(usize, usize, &String)> = right
        .sample_ids()
        .iter()
        .enumerate()
        .filter_map(|(j, s)| left.sample_index(s).map(|i| (i, j, s)))
        .collect();

    samples
        .par_iter()
        .map(|&(left_col, right_col, sample)| {
            let (xs, ys): (Vec<f64>, Vec<f64>) = shared
                .iter()
                .map(|&(li, ri)| (left.values()[[li, left_col]], right.values()[[ri, right_col]]))
                .filter(|(x, y)| !x.is_nan() && !y.is_nan())
                .unzip();
            let num_features = xs.len();
            let correlation = (num_features > MIN_SHARED_FEATURES)
                .then(|| pearson_nan_omit(&xs, &ys).result.statistic)
                .filter(|r| !r.is_nan());
            SampleCorrelationRow {
                sample_id: sample.clone(),
                correlation,
                num_features,
            }
        })
        .collect()
}
