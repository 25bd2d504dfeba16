//! Two-dimensional embeddings for sample-level quality control.
//!
//! Four interchangeable reducers implement [`DimensionReducer`]:
//!
//! - **[`pca::ExactPca`]**: standardized PCA on a minimum-imputed dense matrix
//! - **[`ppca::ProbabilisticPca`]**: EM-fitted probabilistic PCA that handles missing values
//! - **[`umap::CohortUmap`]**: UMAP on the PPCA-imputed matrix
//! - **[`phate::CohortPhate`]**: diffusion-potential embedding on the PPCA-imputed matrix
//!
//! All reducers take samples as rows and features as columns, with `NaN` for missing values.
//! [`run_qc`] wires the shared steps together: occurrence filtering, reduction and per-axis
//! rescaling to `[-1, 1]`. [`silhouette`] scores how well metadata categories separate.

use crate::config::{ReductionConfig, ReferenceChannels};
use crate::error::{EngineError, Result};
use crate::matrix::FeatureMatrix;
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub mod pca;
pub mod phate;
pub mod ppca;
pub mod silhouette;
pub mod umap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionMethod {
    Pca,
    Ppca,
    Umap,
    Phate,
}

pub trait DimensionReducer: Send {
    fn name(&self) -> &'static str;

    /// Learn the projection from `data` (samples x features).
    fn fit(&mut self, data: &Array2<f64>) -> Result<()>;

    /// Project `data` into two dimensions. Fails with [`EngineError::NotFitted`] before `fit`.
    fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>>;

    fn fit_transform(&mut self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(data)?;
        self.transform(data)
    }

    /// Share of variance explained by each component; `None` for nonlinear methods.
    fn explained_variance(&self) -> Option<[f64; 2]>;

    /// Dense matrix the embedding was computed from, available after `fit`.
    fn imputed_data(&self) -> Option<&Array2<f64>>;
}

pub fn reducer_for(method: ReductionMethod, config: &ReductionConfig) -> Box<dyn DimensionReducer> {
    match method {
        ReductionMethod::Pca => Box::new(pca::ExactPca::new()),
        ReductionMethod::Ppca => Box::new(ppca::ProbabilisticPca::new(config.ppca.clone())),
        ReductionMethod::Umap => Box::new(umap::CohortUmap::new(config.ppca.clone(), config.umap.clone())),
        ReductionMethod::Phate => Box::new(phate::CohortPhate::new(config.ppca.clone(), config.phate.clone())),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRow {
    pub sample_id: String,
    pub component_1: f64,
    pub component_2: f64,
}

/// Output of [`run_qc`].
#[derive(Debug, Clone)]
pub struct QcEmbedding {
    pub rows: Vec<EmbeddingRow>,
    pub explained_variance: Option<[f64; 2]>,
    pub sample_ids: Vec<String>,
    /// Rescaled embedding, samples x 2, aligned with `sample_ids`.
    pub embedding: Array2<f64>,
    /// Dense samples x features matrix the reducer worked on.
    pub imputed: Array2<f64>,
}

/// Reduce a feature matrix to a rescaled 2D embedding of its samples.
///
/// Reference channels are selected with `reference_channels` before features observed in fewer
/// than `min_sample_occurrence_ratio` of the remaining samples are dropped.
pub fn run_qc(
    matrix: &FeatureMatrix,
    method: ReductionMethod,
    reference_channels: ReferenceChannels,
    config: &ReductionConfig,
) -> Result<QcEmbedding> {
    let samples: Vec<String> = reference_channels
        .filter(matrix.sample_ids(), &config.reference_channel_prefix)
        .into_iter()
        .cloned()
        .collect();
    let matrix = matrix.select_samples(&samples);
    let filtered = filter_by_occurrence(&matrix, config.min_sample_occurrence_ratio);
    if filtered.n_samples() < 3 || filtered.n_features() == 0 {
        return Err(EngineError::InvalidInput(format!(
            "{} samples and {} features remain after filtering; need at least 3 samples and 1 feature",
            filtered.n_samples(),
            filtered.n_features()
        )));
    }

    let data = filtered.values().t().to_owned();
    let mut reducer = reducer_for(method, config);
    let mut embedding = reducer.fit_transform(&data)?;
    rescale_to_unit_interval(&mut embedding);

    let rows = filtered
        .sample_ids()
        .iter()
        .zip(embedding.axis_iter(Axis(0)))
        .map(|(sample, point)| EmbeddingRow {
            sample_id: sample.clone(),
            component_1: point[0],
            component_2: point[1],
        })
        .collect();
    let imputed = reducer
        .imputed_data()
        .cloned()
        .ok_or(EngineError::NotFitted(reducer.name()))?;

    debug!(
        method = reducer.name(),
        samples = filtered.n_samples(),
        features = filtered.n_features(),
        "qc embedding"
    );
    Ok(QcEmbedding {
        rows,
        explained_variance: reducer.explained_variance(),
        sample_ids: filtered.sample_ids().to_vec(),
        embedding,
        imputed,
    })
}

/// Keep features observed in at least `ratio` of the samples.
pub fn filter_by_occurrence(matrix: &FeatureMatrix, ratio: f64) -> FeatureMatrix {
    let threshold = matrix.n_samples() as f64 * ratio;
    let keep: Vec<usize> = matrix
        .values()
        .axis_iter(Axis(0))
        .enumerate()
        .filter_map(|(i, row)| {
            let observed = row.iter().filter(|v| !v.is_nan()).count();
            (observed as f64 >= threshold).then_some(i)
        })
        .collect();
    matrix.select_rows(&keep)
}

/// Replace missing values with the global minimum of the observed values.
pub fn impute_with_minimum(data: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
    let missing = data.iter().filter(|v| v.is_nan()).count();
    if missing == 0 {
        return Ok(data.clone());
    }
    let minimum = data
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::INFINITY, f64::min);
    if !minimum.is_finite() {
        return Err(anyhow::anyhow!("Cannot impute a matrix without observed values"));
    }
    warn!(missing, minimum, "imputing missing values with the global minimum");
    Ok(data.mapv(|v| if v.is_nan() { minimum } else { v }))
}

/// Linearly map every column onto `[-1, 1]`. Constant columns are left unchanged.
pub fn rescale_to_unit_interval(embedding: &mut Array2<f64>) {
    for mut column in embedding.axis_iter_mut(Axis(1)) {
        let (lo, hi) = column
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if !(hi > lo) {
            continue;
        }
        column.mapv_inplace(|v| 2.0 * (v - lo) / (hi - lo) - 1.0);
    }
}

/// Per-feature centring and scaling fitted on training data.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl Standardizer {
    /// Fit on the observed values of each column (population standard deviation). Columns with
    /// zero spread get a scale of 1.
    pub fn fit(data: &Array2<f64>) -> Self {
        let (mean, scale): (Vec<f64>, Vec<f64>) = data
            .axis_iter(Axis(1))
            .map(|column| {
                let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                if observed.is_empty() {
                    return (0.0, 1.0);
                }
                let n = observed.len() as f64;
                let mean = observed.iter().sum::<f64>() / n;
                let var = observed.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                let sd = var.sqrt();
                (mean, if sd > 0.0 { sd } else { 1.0 })
            })
            .unzip();
        Self {
            mean: Array1::from(mean),
            scale: Array1::from(scale),
        }
    }

    pub fn apply(&self, data: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        if data.ncols() != self.mean.len() {
            return Err(anyhow::anyhow!(
                "Expected {} features, got {}",
                self.mean.len(),
                data.ncols()
            ));
        }
        Ok((data - &self.mean) / &self.scale)
    }
}

/// Pairwise Euclidean distances between the rows of `data`.
pub fn pairwise_distances(data: &Array2<f64>) -> Array2<f64> {
    let n = data.nrows();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let a = data.row(i);
            (0..n)
                .map(|j| {
                    a.iter()
                        .zip(data.row(j).iter())
                        .map(|(x, y)| (x - y) * (x - y))
                        .sum::<f64>()
                        .sqrt()
                })
                .collect()
        })
        .collect();
    Array2::from_shape_fn((n, n), |(i, j)| rows[i][j])
}

/// Euclidean distances from every row of `queries` to every row of `reference`.
pub fn cross_distances(queries: &Array2<f64>, reference: &Array2<f64>) -> Array2<f64> {
    Array2::from_shape_fn((queries.nrows(), reference.nrows()), |(i, j)| {
        queries
            .row(i)
            .iter()
            .zip(reference.row(j).iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    })
}

pub(crate) fn to_dmatrix(data: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(data.nrows(), data.ncols(), |i, j| data[[i, j]])
}

pub(crate) fn from_dmatrix(matrix: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(i, j)| matrix[(i, j)])
}

pub(crate) fn ensure_two_columns(data: &Array2<f64>, name: &str) -> anyhow::Result<()> {
    if data.ncols() < 2 {
        return Err(anyhow::anyhow!(
            "{} needs at least 2 features to produce 2 components, got {}",
            name,
            data.ncols()
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ids;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_filter_by_occurrence() {
        let m = FeatureMatrix::new(ids(&["dense", "half", "sparse"]), ids(&["a", "b", "c", "d"]), array![
            [1.0, 2.0, 3.0, 4.0],
            [1.0, f64::NAN, 3.0, f64::NAN],
            [f64::NAN, f64::NAN, f64::NAN, 4.0]
        ])
        .unwrap();
        let kept = filter_by_occurrence(&m, 0.5);
        assert_eq!(kept.feature_ids(), ids(&["dense", "half"]).as_slice());
        let strict = filter_by_occurrence(&m, 0.9);
        assert_eq!(strict.feature_ids(), ids(&["dense"]).as_slice());
    }

    #[test]
    fn test_impute_with_minimum() {
        let data = array![[3.0, f64::NAN], [-1.0, 2.0]];
        let imputed = impute_with_minimum(&data).unwrap();
        assert_eq!(imputed, array![[3.0, -1.0], [-1.0, 2.0]]);
        assert!(impute_with_minimum(&array![[f64::NAN]]).is_err());
    }

    #[test]
    fn test_rescale_hits_both_ends() {
        let mut embedding = array![[0.0, 5.0], [10.0, 5.0], [2.5, 5.0]];
        rescale_to_unit_interval(&mut embedding);
        assert_relative_eq!(embedding[[0, 0]], -1.0);
        assert_relative_eq!(embedding[[1, 0]], 1.0);
        assert_relative_eq!(embedding[[2, 0]], -0.5);
        // constant axis untouched
        assert!(embedding.column(1).iter().all(|&v| v == 5.0));
    }

    #[test]
    fn test_standardizer() {
        let data = array![[1.0, 4.0], [3.0, 4.0]];
        let scaler = Standardizer::fit(&data);
        let scaled = scaler.apply(&data).unwrap();
        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
        assert!(scaler.apply(&array![[1.0]]).is_err());
    }

    #[test]
    fn test_pairwise_distances() {
        let d = pairwise_distances(&array![[0.0, 0.0], [3.0, 4.0]]);
        assert_relative_eq!(d[[0, 1]], 5.0);
        assert_relative_eq!(d[[1, 0]], 5.0);
        assert_eq!(d[[0, 0]], 0.0);
    }

    #[test]
    fn test_transform_before_fit_fails_for_every_method() {
        let config = ReductionConfig::default();
        let data = fixtures::two_groups(4);
        for method in [
            ReductionMethod::Pca,
            ReductionMethod::Ppca,
            ReductionMethod::Umap,
            ReductionMethod::Phate,
        ] {
            let reducer = reducer_for(method, &config);
            let err = reducer.transform(&data).unwrap_err();
            assert!(matches!(err, EngineError::NotFitted(_)), "{method:?}: {err}");
            assert!(reducer.explained_variance().is_none());
        }
    }

    #[test]
    fn test_run_qc_rescales_and_excludes_reference_channels() {
        let data = fixtures::with_missing(fixtures::two_groups(5));
        let mut samples: Vec<String> = (0..10).map(|i| format!("pat_{i}")).collect();
        samples[9] = "ref_1".to_string();
        let features: Vec<String> = (0..6).map(|j| format!("P{j}")).collect();
        let matrix = FeatureMatrix::new(features, samples, data.t().to_owned()).unwrap();

        let qc = run_qc(&matrix, ReductionMethod::Pca, ReferenceChannels::Exclude, &ReductionConfig::default())
            .unwrap();
        assert_eq!(qc.rows.len(), 9);
        assert!(qc.rows.iter().all(|r| !r.sample_id.starts_with("ref_")));
        for axis in 0..2 {
            let column = qc.embedding.column(axis);
            assert!(column.iter().all(|v| (-1.0..=1.0).contains(v)));
            assert!(column.iter().any(|&v| v == -1.0));
            assert!(column.iter().any(|&v| v == 1.0));
        }
        assert!(qc.explained_variance.is_some());
        assert_eq!(qc.imputed.nrows(), 9);
    }
}
