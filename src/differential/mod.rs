//! Differential expression between two groups of samples.
//!
//! [`one_vs_rest_t_test`] runs a Student t-test per feature, skipping samples that were not
//! measured for that feature, and corrects the surviving p-values with Benjamini-Hochberg.
//! [`volcano`] adds the plotting coordinates and colour class used by the volcano view.

use crate::config::VolcanoAxis;
use crate::matrix::{FeatureMatrix, sorted_difference, sorted_intersection};
use crate::testing::correction::{benjamini_hochberg_correction, benjamini_hochberg_rejections};
use crate::testing::inference::MatrixStatTests;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Regulation {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferentialRow {
    pub feature_id: String,
    pub t_statistic: f64,
    pub p_value: f64,
    pub mean_group1: f64,
    pub mean_group2: f64,
    pub n_group1: usize,
    pub n_group2: usize,
    pub fdr: f64,
    pub up_down: Regulation,
    /// Whether `fdr` is at or below the comparison's alpha.
    pub significant: bool,
}

impl DifferentialRow {
    fn numeric_fields(&self) -> [f64; 5] {
        [
            self.t_statistic,
            self.p_value,
            self.mean_group1,
            self.mean_group2,
            self.fdr,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolcanoColor {
    Red,
    Blue,
    Grey,
}

impl VolcanoColor {
    pub fn classify(x: f64, y: f64) -> Self {
        if y >= 2.0 && x >= 1.0 {
            VolcanoColor::Red
        } else if y >= 2.0 && x <= -1.0 {
            VolcanoColor::Blue
        } else {
            VolcanoColor::Grey
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolcanoRow {
    #[serde(flatten)]
    pub row: DifferentialRow,
    /// `mean_group1 - mean_group2`
    pub x: f64,
    /// `-log10` of the selected p-value column
    pub y: f64,
    pub color: VolcanoColor,
}

/// Compare `group1` against `group2` for every feature of `matrix`.
///
/// # Arguments
///
/// * `matrix` - Features by samples
/// * `feature_list` - Restrict the test to these features; `None` tests all of them
/// * `group1` - First group; samples absent from the matrix are ignored
/// * `group2` - Second group; samples absent from the matrix are ignored and `group1` takes
///   precedence on overlap, so passing every sample of the matrix compares against the rest
/// * `alpha` - FDR level that sets [`DifferentialRow::significant`]
///
/// # Returns
///
/// One row per testable feature in matrix order. Features without a computable p-value and
/// features with an empty identifier are left out.
pub fn one_vs_rest_t_test(
    matrix: &FeatureMatrix,
    feature_list: Option<&[String]>,
    group1: &[String],
    group2: &[String],
    alpha: f64,
) -> anyhow::Result<Vec<DifferentialRow>> {
    let matrix = match feature_list {
        Some(features) => matrix.select_features(features),
        None => matrix.clone(),
    };

    let group1 = sorted_intersection(group1, matrix.sample_ids());
    let group2 = sorted_difference(&sorted_intersection(group2, matrix.sample_ids()), &group1);

    let index_of = |samples: &[String]| -> Vec<usize> {
        samples.iter().filter_map(|s| matrix.sample_index(s)).collect()
    };
    let tests = matrix.t_test(&index_of(&group1), &index_of(&group2));

    let mut rows: Vec<DifferentialRow> = tests
        .into_iter()
        .zip(matrix.feature_ids())
        .filter(|(test, feature_id)| test.result.is_computable() && !feature_id.is_empty())
        .map(|(test, feature_id)| DifferentialRow {
            feature_id: feature_id.clone(),
            t_statistic: test.result.statistic,
            p_value: test.result.p_value,
            mean_group1: test.mean1,
            mean_group2: test.mean2,
            n_group1: test.n1,
            n_group2: test.n2,
            fdr: f64::NAN,
            up_down: if test.mean1 < test.mean2 {
                Regulation::Down
            } else {
                Regulation::Up
            },
            significant: false,
        })
        .collect();

    if rows.is_empty() {
        debug!(
            group1 = group1.len(),
            group2 = group2.len(),
            "no feature could be tested"
        );
        return Ok(rows);
    }

    let p_values: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    let adjusted = benjamini_hochberg_correction(&p_values)?;
    let rejected = benjamini_hochberg_rejections(&adjusted, alpha)?;
    for ((row, fdr), rejected) in rows.iter_mut().zip(adjusted).zip(rejected) {
        row.fdr = fdr;
        row.significant = rejected;
    }
    let significant = rows.iter().filter(|r| r.significant).count();

    debug!(
        group1 = group1.len(),
        group2 = group2.len(),
        tested = rows.len(),
        significant,
        alpha,
        "differential expression"
    );
    Ok(rows)
}

/// Decorate differential rows with volcano coordinates.
///
/// Rows are sorted by `(fdr, p_value)`. Rows with any non-finite value are dropped, which
/// includes rows whose selected p-value column is exactly zero.
pub fn volcano(rows: Vec<DifferentialRow>, axis: VolcanoAxis) -> Vec<VolcanoRow> {
    let mut decorated: Vec<VolcanoRow> = rows
        .into_iter()
        .map(|row| {
            let selected = match axis {
                VolcanoAxis::PValue => row.p_value,
                VolcanoAxis::Fdr => row.fdr,
            };
            let x = row.mean_group1 - row.mean_group2;
            let y = -selected.log10();
            VolcanoRow {
                color: VolcanoColor::classify(x, y),
                row,
                x,
                y,
            }
        })
        .collect();

    decorated.sort_by(|a, b| {
        a.row
            .fdr
            .partial_cmp(&b.row.fdr)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.row.p_value.partial_cmp(&b.row.p_value).unwrap_or(Ordering::Equal))
    });
    decorated.retain(|v| v.x.is_finite() && v.y.is_finite() && v.row.numeric_fields().iter().all(|f| f.is_finite()));
    decorated
}
