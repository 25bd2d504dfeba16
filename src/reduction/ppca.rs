//! Probabilistic PCA fitted by expectation maximisation.
//!
//! Missing entries are re-estimated from the current latent projection on every E-step, so the
//! fitted model doubles as an imputation of the standardized input.

use super::{DimensionReducer, ensure_two_columns, from_dmatrix, impute_with_minimum, to_dmatrix};
use crate::config::PpcaConfig;
use crate::error::{EngineError, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::cmp::Ordering;
use tracing::{debug, warn};

const N_COMPONENTS: usize = 2;

#[derive(Debug, Clone)]
struct PpcaModel {
    n_input_features: usize,
    kept: Vec<usize>,
    means: Array1<f64>,
    stds: Array1<f64>,
    /// kept features x 2
    components: Array2<f64>,
    /// Standardized training data with missing entries filled by the EM fit.
    filled: Array2<f64>,
    explained_variance: [f64; 2],
}

#[derive(Debug, Clone)]
pub struct ProbabilisticPca {
    config: PpcaConfig,
    model: Option<PpcaModel>,
}

impl ProbabilisticPca {
    pub fn new(config: PpcaConfig) -> Self {
        Self { config, model: None }
    }

    /// Input columns that passed the observation filter.
    pub fn kept_features(&self) -> Option<&[usize]> {
        self.model.as_ref().map(|m| m.kept.as_slice())
    }

    /// Map new samples into the space of [`DimensionReducer::imputed_data`]: minimum imputation,
    /// the kept features and the training standardization.
    pub fn prepare(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let model = self.model.as_ref().ok_or(EngineError::NotFitted("PPCA"))?;
        if data.ncols() != model.n_input_features {
            return Err(EngineError::InvalidInput(format!(
                "PPCA was fitted on {} features, got {}",
                model.n_input_features,
                data.ncols()
            )));
        }
        let imputed = impute_with_minimum(data)?;
        let selected = imputed.select(Axis(1), &model.kept);
        Ok((&selected - &model.means) / &model.stds)
    }
}

impl DimensionReducer for ProbabilisticPca {
    fn name(&self) -> &'static str {
        "PPCA"
    }

    fn fit(&mut self, data: &Array2<f64>) -> Result<()> {
        self.model = Some(fit_em(data, &self.config)?);
        Ok(())
    }

    /// Projects new samples after minimum imputation and the training standardization.
    fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let model = self.model.as_ref().ok_or(EngineError::NotFitted("PPCA"))?;
        Ok(self.prepare(data)?.dot(&model.components))
    }

    /// Projects the EM-filled training data.
    fn fit_transform(&mut self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(data)?;
        let model = self.model.as_ref().ok_or(EngineError::NotFitted("PPCA"))?;
        Ok(model.filled.dot(&model.components))
    }

    fn explained_variance(&self) -> Option<[f64; 2]> {
        self.model.as_ref().map(|m| m.explained_variance)
    }

    fn imputed_data(&self) -> Option<&Array2<f64>> {
        self.model.as_ref().map(|m| &m.filled)
    }
}

fn fit_em(data: &Array2<f64>, config: &PpcaConfig) -> Result<PpcaModel> {
    let n = data.nrows();
    let kept: Vec<usize> = data
        .axis_iter(Axis(1))
        .enumerate()
        .filter_map(|(j, column)| {
            let observed = column.iter().filter(|v| v.is_finite()).count();
            (observed >= config.min_observations).then_some(j)
        })
        .collect();
    if n < 2 || kept.len() < N_COMPONENTS {
        return Err(EngineError::InvalidInput(format!(
            "PPCA needs at least 2 samples and 2 features observed in {} samples; got {} samples, {} features",
            config.min_observations,
            n,
            kept.len()
        )));
    }

    let selected = data.select(Axis(1), &kept);
    ensure_two_columns(&selected, "PPCA")?;
    let (means, stds) = nan_moments(&selected);
    let standardized = (&selected - &means) / &stds;
    let d = kept.len();

    let missing_cells: Vec<(usize, usize)> = standardized
        .indexed_iter()
        .filter_map(|(idx, v)| (!v.is_finite()).then_some(idx))
        .collect();
    let missing = missing_cells.len() as f64;
    let mut y = to_dmatrix(&standardized.mapv(|v| if v.is_finite() { v } else { 0.0 }));

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut c = DMatrix::from_fn(d, N_COMPONENTS, |_, _| rng.sample::<f64, _>(StandardNormal));
    let mut cc = c.transpose() * &c;
    let mut x = &y * &c * invert(&cc)?;
    let mut recon = &x * c.transpose();
    zero_cells(&mut recon, &missing_cells);
    let (nf, df) = (n as f64, d as f64);
    let mut ss = ((&recon - &y).norm_squared() / (nf * df - missing)).max(f64::EPSILON);

    let identity = DMatrix::<f64>::identity(N_COMPONENTS, N_COMPONENTS);
    let mut v0 = f64::INFINITY;
    let mut converged = false;
    let mut iterations = 0;
    while iterations < config.max_iterations {
        let sx = invert(&(&identity + &cc / ss))?;

        // E-step
        let ss0 = ss;
        if !missing_cells.is_empty() {
            let projection = &x * c.transpose();
            for &(i, j) in &missing_cells {
                y[(i, j)] = projection[(i, j)];
            }
        }
        x = &y * &c * &sx / ss;

        // M-step
        let xx = x.transpose() * &x;
        let inner = (&xx + &sx * nf)
            .pseudo_inverse(1e-12)
            .map_err(|e| anyhow::anyhow!("PPCA M-step: {e}"))?;
        c = y.transpose() * &x * inner;
        cc = c.transpose() * &c;
        recon = &x * c.transpose();
        zero_cells(&mut recon, &missing_cells);
        ss = (((&recon - &y).norm_squared() + nf * cc.component_mul(&sx).sum() + missing * ss0) / (nf * df))
            .max(f64::EPSILON);

        let det = sx.determinant();
        let log_det = if det > 0.0 { det.ln() } else { det.abs().ln().abs() };
        let missing_term = if missing > 0.0 { missing * ss0.ln() } else { 0.0 };
        let v1 = nf * (df * ss.ln() + sx.trace() - log_det) + xx.trace() - missing_term;
        let diff = (v1 / v0 - 1.0).abs();
        iterations += 1;
        if diff < config.tolerance && iterations > 6 {
            converged = true;
            break;
        }
        v0 = v1;
    }
    if converged {
        debug!(iterations, features = d, samples = n, "PPCA converged");
    } else {
        warn!(iterations, "PPCA stopped at the iteration limit without converging");
    }

    let c = match orthonormal_basis(&c)? {
        Some(basis) => basis,
        None => {
            debug!(features = d, "PPCA loadings lost rank, using principal axes of the filled data");
            principal_axes(&y)?
        }
    };
    let latent = &y * &c;
    let (eigenvalues, eigenvectors) = sorted_covariance_eigen(&latent);
    let c = c * eigenvectors;

    let filled = from_dmatrix(&y);
    let total_variance: f64 = filled
        .axis_iter(Axis(1))
        .map(|column| {
            let mean = column.mean().unwrap_or(0.0);
            column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / nf
        })
        .sum();
    let explained_variance = if total_variance > 0.0 {
        [eigenvalues[0] / total_variance, eigenvalues[1] / total_variance]
    } else {
        [0.0, 0.0]
    };

    Ok(PpcaModel {
        n_input_features: data.ncols(),
        kept,
        means,
        stds,
        components: from_dmatrix(&c),
        filled,
        explained_variance,
    })
}

/// Column means and population standard deviations over observed values; zero spread maps to 1.
fn nan_moments(data: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let (means, stds): (Vec<f64>, Vec<f64>) = data
        .axis_iter(Axis(1))
        .map(|column| {
            let observed: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            let n = observed.len() as f64;
            let mean = observed.iter().sum::<f64>() / n;
            let sd = (observed.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt();
            (mean, if sd > 0.0 { sd } else { 1.0 })
        })
        .unzip();
    (Array1::from(means), Array1::from(stds))
}

fn zero_cells(matrix: &mut DMatrix<f64>, cells: &[(usize, usize)]) {
    for &(i, j) in cells {
        matrix[(i, j)] = 0.0;
    }
}

fn invert(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    matrix
        .clone()
        .try_inverse()
        .ok_or_else(|| EngineError::Numeric(anyhow::anyhow!("PPCA encountered a singular matrix")))
}

/// Orthonormal basis of the loading columns, or `None` when EM drove a column to zero.
fn orthonormal_basis(c: &DMatrix<f64>) -> Result<Option<DMatrix<f64>>> {
    let svd = c.clone().svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| anyhow::anyhow!("SVD did not produce left singular vectors"))?;
    let singular = svd.singular_values;
    let largest = singular.iter().copied().fold(0.0_f64, f64::max);
    let cutoff = largest * c.nrows().max(c.ncols()) as f64 * f64::EPSILON;

    let mut order: Vec<usize> = (0..singular.len()).filter(|&i| singular[i] > cutoff).collect();
    order.sort_by(|&a, &b| singular[b].partial_cmp(&singular[a]).unwrap_or(Ordering::Equal));
    if order.len() < N_COMPONENTS {
        return Ok(None);
    }
    Ok(Some(DMatrix::from_fn(c.nrows(), N_COMPONENTS, |i, k| u[(i, order[k])])))
}

/// Leading right singular vectors of the column-centered data, features x 2.
fn principal_axes(y: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let mut centered = y.clone();
    for mut column in centered.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
    let svd = centered.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow::anyhow!("SVD did not produce right singular vectors"))?;
    let singular = svd.singular_values;
    if singular.len() < N_COMPONENTS {
        return Err(EngineError::Numeric(anyhow::anyhow!(
            "PPCA needs a filled matrix of rank 2, got {} singular values",
            singular.len()
        )));
    }
    let mut order: Vec<usize> = (0..singular.len()).collect();
    order.sort_by(|&a, &b| singular[b].partial_cmp(&singular[a]).unwrap_or(Ordering::Equal));
    Ok(DMatrix::from_fn(y.ncols(), N_COMPONENTS, |i, k| v_t[(order[k], i)]))
}

/// Eigen decomposition of the sample covariance (ddof = 1) of `latent`, largest first.
fn sorted_covariance_eigen(latent: &DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let n = latent.nrows() as f64;
    let mut centered = latent.clone();
    for mut column in centered.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
    let covariance = centered.transpose() * &centered / (n - 1.0);
    let eigen = SymmetricEigen::new(covariance);

    let k = eigen.eigenvalues.len();
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(Ordering::Equal)
    });
    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let vectors = DMatrix::from_fn(k, k, |r, c| eigen.eigenvectors[(r, order[c])]);
    (values, vectors)
}
