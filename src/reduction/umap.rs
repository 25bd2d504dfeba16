//! UMAP on the PPCA-imputed matrix.
//!
//! The fuzzy neighbour graph is held as a sparse CSR matrix. The layout starts from the exact
//! PCA of the imputed data and is optimised with seeded negative sampling, so a fixed seed gives
//! a fixed embedding.

use super::pca::ExactPca;
use super::ppca::ProbabilisticPca;
use super::{DimensionReducer, cross_distances, pairwise_distances};
use crate::config::{PpcaConfig, UmapConfig};
use crate::error::{EngineError, Result};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use tracing::debug;

const GRADIENT_CLIP: f64 = 4.0;
const INIT_SCALE: f64 = 10.0;

#[derive(Debug, Clone)]
struct UmapModel {
    training: Array2<f64>,
    embedding: Array2<f64>,
    n_neighbors: usize,
}

#[derive(Debug, Clone)]
pub struct CohortUmap {
    ppca: ProbabilisticPca,
    config: UmapConfig,
    model: Option<UmapModel>,
}

impl CohortUmap {
    pub fn new(ppca: PpcaConfig, config: UmapConfig) -> Self {
        Self {
            ppca: ProbabilisticPca::new(ppca),
            config,
            model: None,
        }
    }
}

impl DimensionReducer for CohortUmap {
    fn name(&self) -> &'static str {
        "UMAP"
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
            return Err(EngineError::InvalidInput(format!("UMAP needs at least 3 samples, got {n}")));
        }
        let k = self.config.n_neighbors.clamp(2, n - 1);

        let (indices, distances) = nearest_neighbors(&pairwise_distances(&training), k);
        let graph = fuzzy_graph(&indices, &distances);
        let (a, b) = fit_ab_params(self.config.min_dist, self.config.spread);
        let mut embedding = initial_layout(&training, self.config.seed)?;
        optimize_layout(&mut embedding, &graph, a, b, &self.config);
        debug!(samples = n, neighbors = k, edges = graph.nnz(), a, b, "UMAP layout optimised");

        self.model = Some(UmapModel {
            training,
            embedding,
            n_neighbors: k,
        });
        Ok(())
    }

    /// Places each sample at the membership-weighted mean of its nearest fitted samples.
    fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let model = self.model.as_ref().ok_or(EngineError::NotFitted("UMAP"))?;
        let prepared = self.ppca.prepare(data)?;
        let distances = cross_distances(&prepared, &model.training);
        let mut placed = Array2::zeros((prepared.nrows(), 2));
        for (i, row) in distances.axis_iter(Axis(0)).enumerate() {
            let (neighbors, dists) = k_smallest(row.iter().copied().enumerate(), model.n_neighbors);
            let (rho, sigma) = smooth_knn(&dists);
            let weights: Vec<f64> = dists.iter().map(|&d| membership(d, rho, sigma)).collect();
            let total: f64 = weights.iter().sum();
            for (&j, &w) in neighbors.iter().zip(&weights) {
                let share = if total > 0.0 { w / total } else { 1.0 / neighbors.len() as f64 };
                let target = model.embedding.row(j);
                placed[[i, 0]] += share * target[0];
                placed[[i, 1]] += share * target[1];
            }
        }
        Ok(placed)
    }

    /// Returns the optimised layout of the fitted samples.
    fn fit_transform(&mut self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(data)?;
        let model = self.model.as_ref().ok_or(EngineError::NotFitted("UMAP"))?;
        Ok(model.embedding.clone())
    }

    fn explained_variance(&self) -> Option<[f64; 2]> {
        None
    }

    fn imputed_data(&self) -> Option<&Array2<f64>> {
        self.model.as_ref().map(|m| &m.training)
    }
}

fn k_smallest(candidates: impl Iterator<Item = (usize, f64)>, k: usize) -> (Vec<usize>, Vec<f64>) {
    let mut all: Vec<(usize, f64)> = candidates.collect();
    all.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    all.truncate(k);
    all.into_iter().unzip()
}

/// Nearest `k` other samples of every sample, closest first.
fn nearest_neighbors(distances: &Array2<f64>, k: usize) -> (Vec<Vec<usize>>, Vec<Vec<f64>>) {
    distances
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, row)| k_smallest(row.iter().copied().enumerate().filter(|&(j, _)| j != i), k))
        .unzip()
}

/// Local connectivity `rho` and bandwidth `sigma` so that memberships sum to `log2(k)`.
fn smooth_knn(distances: &[f64]) -> (f64, f64) {
    let target = (distances.len() as f64).log2();
    let rho = distances.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

    let (mut lo, mut hi, mut sigma) = (0.0_f64, f64::INFINITY, 1.0_f64);
    for _ in 0..64 {
        let total: f64 = distances.iter().map(|&d| membership(d, rho, sigma)).sum();
        if (total - target).abs() < 1e-5 {
            break;
        }
        if total > target {
            hi = sigma;
            sigma = (lo + hi) / 2.0;
        } else {
            lo = sigma;
            sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    let mean = distances.iter().sum::<f64>() / distances.len().max(1) as f64;
    (rho, sigma.max(1e-3 * mean).max(f64::MIN_POSITIVE))
}

fn membership(distance: f64, rho: f64, sigma: f64) -> f64 {
    (-(distance - rho).max(0.0) / sigma).exp()
}

/// Symmetrised fuzzy union `w + w' - w * w'` of the directed neighbour memberships.
fn fuzzy_graph(indices: &[Vec<usize>], distances: &[Vec<f64>]) -> CsrMatrix<f64> {
    let n = indices.len();
    let mut coo = CooMatrix::new(n, n);
    for (i, (neighbors, dists)) in indices.iter().zip(distances).enumerate() {
        let (rho, sigma) = smooth_knn(dists);
        for (&j, &d) in neighbors.iter().zip(dists) {
            coo.push(i, j, membership(d, rho, sigma));
        }
    }
    let directed = CsrMatrix::from(&coo);
    let transposed = directed.transpose();
    let union = &directed + &transposed;

    let mut symmetric = CooMatrix::new(n, n);
    for (i, j, &sum) in union.triplet_iter() {
        let forward = directed.get_entry(i, j).map_or(0.0, |e| e.into_value());
        let backward = transposed.get_entry(i, j).map_or(0.0, |e| e.into_value());
        let weight = sum - forward * backward;
        if weight > 0.0 {
            symmetric.push(i, j, weight);
        }
    }
    CsrMatrix::from(&symmetric)
}

/// Curve parameters of the low-dimensional similarity `1 / (1 + a d^(2b))`.
fn fit_ab_params(min_dist: f64, spread: f64) -> (f64, f64) {
    if (min_dist - 0.1).abs() < 1e-10 && (spread - 1.0).abs() < 1e-10 {
        return (1.929, 0.7915);
    }

    let n_points = 300;
    let max_d = 3.0 * spread + min_dist;
    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    for _ in 0..100 {
        let (mut jj00, mut jj01, mut jj11, mut jr0, mut jr1) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for k in 0..n_points {
            let d = (k as f64 + 0.5) * max_d / n_points as f64;
            let target = if d <= min_dist { 1.0 } else { (-(d - min_dist) / spread).exp() };
            let d2b = d.powf(2.0 * b);
            let denom = 1.0 + a * d2b;
            let residual = 1.0 / denom - target;
            let df_da = -d2b / (denom * denom);
            let df_db = -a * d2b * 2.0 * d.ln() / (denom * denom);
            jj00 += df_da * df_da;
            jj01 += df_da * df_db;
            jj11 += df_db * df_db;
            jr0 += df_da * residual;
            jr1 += df_db * residual;
        }
        let det = jj00 * jj11 - jj01 * jj01;
        if det.abs() < 1e-20 {
            break;
        }
        let da = -(jj11 * jr0 - jj01 * jr1) / det;
        let db = -(jj00 * jr1 - jj01 * jr0) / det;
        a = (a + da).max(0.001);
        b = (b + db).max(0.001);
        if da.abs() < 1e-8 && db.abs() < 1e-8 {
            break;
        }
    }
    (a, b)
}

/// Exact PCA of the imputed data scaled to `[-10, 10]`, or a seeded random layout when the PCA
/// is degenerate.
fn initial_layout(data: &Array2<f64>, seed: u64) -> Result<Array2<f64>> {
    let mut pca = ExactPca::new();
    let mut layout = pca.fit_transform(data)?;
    let max_abs = layout.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if max_abs > 0.0 && max_abs.is_finite() {
        layout.mapv_inplace(|v| v * INIT_SCALE / max_abs);
    } else {
        let mut rng = StdRng::seed_from_u64(seed);
        layout.mapv_inplace(|_| rng.random_range(-INIT_SCALE..INIT_SCALE));
    }
    Ok(layout)
}

fn optimize_layout(embedding: &mut Array2<f64>, graph: &CsrMatrix<f64>, a: f64, b: f64, config: &UmapConfig) {
    let edges: Vec<(usize, usize, f64)> = graph
        .triplet_iter()
        .filter(|(i, j, _)| i < j)
        .map(|(i, j, &w)| (i, j, w))
        .collect();
    let max_weight = edges.iter().fold(0.0_f64, |acc, e| acc.max(e.2));
    let n_epochs = config.n_epochs;
    if edges.is_empty() || n_epochs == 0 || max_weight <= 0.0 {
        return;
    }

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_weight / e.2).collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let n = embedding.nrows();

    for epoch in 0..n_epochs {
        let lr = config.learning_rate * (1.0 - epoch as f64 / n_epochs as f64);
        for (e, &(i, j, _)) in edges.iter().enumerate() {
            if next_sample[e] > epoch as f64 {
                continue;
            }
            next_sample[e] += epochs_per_sample[e];

            let diff = &embedding.row(i) - &embedding.row(j);
            let dist_sq = diff.dot(&diff).max(1e-10);
            let coeff = -2.0 * a * b * dist_sq.powf(b - 1.0) / (1.0 + a * dist_sq.powf(b));
            let step = diff.mapv(|v| lr * (coeff * v).clamp(-GRADIENT_CLIP, GRADIENT_CLIP));
            apply_step(embedding, i, &step, 1.0);
            apply_step(embedding, j, &step, -1.0);

            for _ in 0..config.negative_sample_rate {
                let other = rng.random_range(0..n);
                if other == i {
                    continue;
                }
                let diff = &embedding.row(i) - &embedding.row(other);
                let dist_sq = diff.dot(&diff).max(1e-10);
                let coeff = 2.0 * b / ((0.001 + dist_sq) * (1.0 + a * dist_sq.powf(b)));
                let step = diff.mapv(|v| lr * (coeff * v).clamp(-GRADIENT_CLIP, GRADIENT_CLIP));
                apply_step(embedding, i, &step, 1.0);
            }
        }
    }
}

fn apply_step(embedding: &mut Array2<f64>, row: usize, step: &Array1<f64>, sign: f64) {
    embedding
        .row_mut(row)
        .zip_mut_with(step, |value, delta| *value += sign * delta);
}
