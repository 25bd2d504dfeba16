//! PHATE-style embedding: diffusion potentials of an alpha-decay affinity graph, laid out with
//! classical MDS.

use super::ppca::ProbabilisticPca;
use super::{DimensionReducer, cross_distances, pairwise_distances, to_dmatrix};
use crate::config::{PhateConfig, PpcaConfig};
use crate::error::{EngineError, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, Axis};
use std::cmp::Ordering;
use tracing::debug;

const KERNEL_THRESHOLD: f64 = 1e-4;
const POTENTIAL_EPS: f64 = 1e-7;

#[derive(Debug, Clone)]
struct PhateModel {
    training: Array2<f64>,
    embedding: Array2<f64>,
    knn: usize,
    t: usize,
}

#[derive(Debug, Clone)]
pub struct CohortPhate {
    ppca: ProbabilisticPca,
    config: PhateConfig,
    model: Option<PhateModel>,
}

impl CohortPhate {
    pub fn new(ppca: PpcaConfig, config: PhateConfig) -> Self {
        Self {
            ppca: ProbabilisticPca::new(ppca),
            config,
            model: None,
        }
    }

    /// Diffusion time used by the last fit.
    pub fn diffusion_time(&self) -> Option<usize> {
        self.model.as_ref().map(|m| m.t)
    }
}

impl DimensionReducer for CohortPhate {
    fn name(&self) -> &'static str {
        "PHATE"
    }

    fn fit(&mut self, data: &Array2<f64>) -> Result<()> {
        self.ppca.fit(data)?;
        let training = self
            .ppca
            .imputed_data()
            .cloned()
            .ok_or(EngineError::NotFitted("PPCA"))?;
        let n = training.nrows();
        if n < 3 {
            return Err(EngineError::InvalidInput(format!("PHATE needs at least 3 samples, got {n}")));
        }
        let knn = self.config.knn.clamp(1, n - 1);

        let kernel = affinity_kernel(&pairwise_distances(&training), knn, self.config.decay);
        let diffusion = DiffusionOperator::new(&kernel)?;
        let t = match self.config.t {
            Some(t) => t.max(1),
            None => diffusion.optimal_t(self.config.max_t.max(2)),
        };
        let potential = diffusion.powered(t).mapv(|p| -(p.max(0.0) + POTENTIAL_EPS).ln());
        let embedding = classical_mds(&pairwise_distances(&potential));
        debug!(samples = n, knn, t, "PHATE embedding");

        self.model = Some(PhateModel {
            training,
            embedding,
            knn,
            t,
        });
        Ok(())
    }

    /// Places each sample at the affinity-weighted mean of the fitted samples.
    fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let model = self.model.as_ref().ok_or(EngineError::NotFitted("PHATE"))?;
        let prepared = self.ppca.prepare(data)?;
        let distances = cross_distances(&prepared, &model.training);
        let mut placed = Array2::zeros((prepared.nrows(), 2));
        for (i, row) in distances.axis_iter(Axis(0)).enumerate() {
            let bandwidth = kth_smallest(row.iter().copied(), model.knn);
            let mut weights: Vec<f64> = row
                .iter()
                .map(|&d| alpha_decay(d, bandwidth, self.config.decay))
                .collect();
            let mut total: f64 = weights.iter().sum();
            if total <= 0.0 {
                let nearest = argmin(row.iter().copied());
                weights = (0..row.len()).map(|j| if j == nearest { 1.0 } else { 0.0 }).collect();
                total = 1.0;
            }
            for (j, w) in weights.iter().enumerate() {
                placed[[i, 0]] += w / total * model.embedding[[j, 0]];
                placed[[i, 1]] += w / total * model.embedding[[j, 1]];
            }
        }
        Ok(placed)
    }

    /// Returns the MDS layout of the fitted samples.
    fn fit_transform(&mut self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(data)?;
        let model = self.model.as_ref().ok_or(EngineError::NotFitted("PHATE"))?;
        Ok(model.embedding.clone())
    }

    fn explained_variance(&self) -> Option<[f64; 2]> {
        None
    }

    fn imputed_data(&self) -> Option<&Array2<f64>> {
        self.model.as_ref().map(|m| &m.training)
    }
}

fn alpha_decay(distance: f64, bandwidth: f64, decay: f64) -> f64 {
    if bandwidth <= 0.0 {
        return if distance <= 0.0 { 1.0 } else { 0.0 };
    }
    (-(distance / bandwidth).powf(decay)).exp()
}

fn kth_smallest(values: impl Iterator<Item = f64>, k: usize) -> f64 {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted[k.min(sorted.len()) - 1]
}

fn argmin(values: impl Iterator<Item = f64>) -> usize {
    values
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map_or(0, |(i, _)| i)
}

/// Symmetrised alpha-decay affinities; the bandwidth of each sample is its distance to the
/// `knn`-th nearest other sample.
fn affinity_kernel(distances: &Array2<f64>, knn: usize, decay: f64) -> Array2<f64> {
    let n = distances.nrows();
    let bandwidths: Vec<f64> = distances
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, row)| kth_smallest(row.iter().enumerate().filter(|&(j, _)| j != i).map(|(_, &d)| d), knn))
        .collect();
    let directed = Array2::from_shape_fn((n, n), |(i, j)| alpha_decay(distances[[i, j]], bandwidths[i], decay));
    let symmetric = (&directed + &directed.t()) / 2.0;
    symmetric.mapv(|k| if k < KERNEL_THRESHOLD { 0.0 } else { k })
}

/// Row-stochastic diffusion operator, kept in the eigenbasis of its symmetric conjugate.
struct DiffusionOperator {
    eigenvalues: Vec<f64>,
    /// `D^-1/2 V`
    left: DMatrix<f64>,
    /// `V^T D^1/2`
    right: DMatrix<f64>,
}

impl DiffusionOperator {
    fn new(kernel: &Array2<f64>) -> Result<Self> {
        let degrees: Vec<f64> = kernel.sum_axis(Axis(1)).to_vec();
        if degrees.iter().any(|&d| d <= 0.0) {
            return Err(EngineError::Numeric(anyhow::anyhow!("affinity graph has an isolated sample")));
        }
        let n = degrees.len();
        let k = to_dmatrix(kernel);
        let conjugate = DMatrix::from_fn(n, n, |i, j| k[(i, j)] / (degrees[i] * degrees[j]).sqrt());
        let eigen = SymmetricEigen::new(conjugate);
        let left = DMatrix::from_fn(n, n, |i, c| eigen.eigenvectors[(i, c)] / degrees[i].sqrt());
        let right = DMatrix::from_fn(n, n, |r, j| eigen.eigenvectors[(j, r)] * degrees[j].sqrt());
        Ok(Self {
            eigenvalues: eigen.eigenvalues.iter().copied().collect(),
            left,
            right,
        })
    }

    fn powered(&self, t: usize) -> Array2<f64> {
        let n = self.eigenvalues.len();
        let exponent = t as i32;
        let scaled = DMatrix::from_fn(n, n, |i, c| self.left[(i, c)] * self.eigenvalues[c].powi(exponent));
        let product = scaled * &self.right;
        Array2::from_shape_fn((n, n), |(i, j)| product[(i, j)])
    }

    /// Von Neumann entropy of the operator at each `t` in `1..=max_t`.
    fn entropy_curve(&self, max_t: usize) -> Vec<f64> {
        (1..=max_t)
            .map(|t| {
                let powered: Vec<f64> = self.eigenvalues.iter().map(|l| l.abs().powi(t as i32)).collect();
                let total: f64 = powered.iter().sum();
                powered
                    .iter()
                    .map(|p| p / total)
                    .filter(|&p| p > 0.0)
                    .map(|p| -p * p.ln())
                    .sum()
            })
            .collect()
    }

    /// Knee of the entropy curve: the `t` farthest from the chord joining its end points.
    fn optimal_t(&self, max_t: usize) -> usize {
        let curve = self.entropy_curve(max_t);
        let (x0, y0) = (1.0, curve[0]);
        let (x1, y1) = (max_t as f64, curve[max_t - 1]);
        let norm = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        curve
            .iter()
            .enumerate()
            .map(|(i, &y)| {
                let x = (i + 1) as f64;
                ((y1 - y0) * x - (x1 - x0) * y + x1 * y0 - y1 * x0).abs() / norm
            })
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map_or(1, |(i, _)| i + 1)
    }
}

/// Two-dimensional classical MDS of a distance matrix.
fn classical_mds(distances: &Array2<f64>) -> Array2<f64> {
    let n = distances.nrows();
    let squared = distances.mapv(|d| d * d);
    let row_means = squared.mean_axis(Axis(1)).unwrap_or_else(|| ndarray::Array1::zeros(n));
    let grand = row_means.mean().unwrap_or(0.0);
    let gram = DMatrix::from_fn(n, n, |i, j| -0.5 * (squared[[i, j]] - row_means[i] - row_means[j] + grand));
    let eigen = SymmetricEigen::new(gram);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(Ordering::Equal)
    });
    let mut layout = Array2::zeros((n, 2));
    for (k, &c) in order.iter().take(2).enumerate() {
        let scale = eigen.eigenvalues[c].max(0.0).sqrt();
        let mut column: Vec<f64> = (0..n).map(|i| eigen.eigenvectors[(i, c)] * scale).collect();
        let pivot = column.iter().copied().fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        if pivot < 0.0 {
            column.iter_mut().for_each(|v| *v = -*v);
        }
        layout.column_mut(k).assign(&ndarray::Array1::from(column));
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduction::fixtures;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn phate(t: Option<usize>) -> CohortPhate {
        let ppca = PpcaConfig {
            min_observations: 3,
            ..PpcaConfig::default()
        };
        let config = PhateConfig {
            knn: 3,
            t,
            max_t: 30,
            ..PhateConfig::default()
        };
        CohortPhate::new(ppca, config)
    }

    #[test]
    fn test_diffusion_operator_is_row_stochastic() {
        let data = fixtures::two_groups(4);
        let kernel = affinity_kernel(&pairwise_distances(&data), 3, 40.0);
        let operator = DiffusionOperator::new(&kernel).unwrap();
        for t in [1, 3] {
            let powered = operator.powered(t);
            for row in powered.axis_iter(Axis(0)) {
                assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_entropy_decreases_with_time() {
        let data = fixtures::two_groups(4);
        let kernel = affinity_kernel(&pairwise_distances(&data), 3, 40.0);
        let operator = DiffusionOperator::new(&kernel).unwrap();
        let curve = operator.entropy_curve(20);
        assert!(curve.windows(2).all(|w| w[1] <= w[0] + 1e-12));
        let t = operator.optimal_t(20);
        assert!((1..=20).contains(&t));
    }

    #[test]
    fn test_classical_mds_recovers_line() {
        let points = array![[0.0], [1.0], [3.0]];
        let layout = classical_mds(&pairwise_distances(&points));
        let recovered = pairwise_distances(&layout);
        assert_relative_eq!(recovered[[0, 2]], 3.0, epsilon = 1e-9);
        assert_relative_eq!(recovered[[0, 1]], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_groups_separate() {
        let data = fixtures::with_missing(fixtures::two_groups(5));
        let mut model = phate(Some(5));
        let embedding = model.fit_transform(&data).unwrap();
        assert_eq!(embedding.dim(), (10, 2));
        let first = embedding.column(0);
        let left = first[0].signum();
        assert!(first.iter().take(5).all(|v| v.signum() == left));
        assert!(first.iter().skip(5).all(|v| v.signum() == -left));
        assert_eq!(model.diffusion_time(), Some(5));
    }

    #[test]
    fn test_automatic_time_and_transform() {
        let data = fixtures::two_groups(5);
        let mut model = phate(None);
        model.fit(&data).unwrap();
        let t = model.diffusion_time().unwrap();
        assert!((1..=30).contains(&t));
        assert_eq!(model.transform(&data).unwrap().dim(), (10, 2));
        assert!(model.explained_variance().is_none());
    }
}
