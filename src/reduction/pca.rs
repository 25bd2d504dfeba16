use super::{DimensionReducer, Standardizer, ensure_two_columns, from_dmatrix, impute_with_minimum, to_dmatrix};
use crate::error::{EngineError, Result};
use ndarray::{Array1, Array2, Axis};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct PcaModel {
    scaler: Standardizer,
    /// Per-feature mean of the scaled training data.
    center: Array1<f64>,
    /// features x 2
    components: Array2<f64>,
    explained_variance: [f64; 2],
    scaled: Array2<f64>,
}

/// Exact PCA on minimum-imputed, standardized data.
#[derive(Debug, Clone, Default)]
pub struct ExactPca {
    model: Option<PcaModel>,
}

impl ExactPca {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feature loadings (features x 2).
    pub fn components(&self) -> Option<&Array2<f64>> {
        self.model.as_ref().map(|m| &m.components)
    }
}

impl DimensionReducer for ExactPca {
    fn name(&self) -> &'static str {
        "PCA"
    }

    fn fit(&mut self, data: &Array2<f64>) -> Result<()> {
        ensure_two_columns(data, self.name())?;
        let imputed = impute_with_minimum(data)?;
        let scaler = Standardizer::fit(&imputed);
        let scaled = scaler.apply(&imputed)?;
        let center = scaled
            .mean_axis(Axis(0))
            .ok_or_else(|| EngineError::InvalidInput("PCA needs at least one sample".to_string()))?;
        let centered = &scaled - &center;

        let svd = to_dmatrix(&centered).svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| anyhow::anyhow!("SVD did not produce right singular vectors"))?;
        let singular = svd.singular_values;
        if singular.len() < 2 {
            return Err(EngineError::InvalidInput(format!(
                "PCA needs at least 2 samples, got {}",
                data.nrows()
            )));
        }

        let mut order: Vec<usize> = (0..singular.len()).collect();
        order.sort_by(|&a, &b| singular[b].partial_cmp(&singular[a]).unwrap_or(Ordering::Equal));

        let total: f64 = singular.iter().map(|s| s * s).sum();
        let v_t = from_dmatrix(&v_t);
        let mut components = Array2::zeros((data.ncols(), 2));
        let mut explained_variance = [0.0; 2];
        for (k, &idx) in order.iter().take(2).enumerate() {
            let mut loading = v_t.row(idx).to_owned();
            // deterministic sign: the largest absolute loading is positive
            let pivot = loading
                .iter()
                .copied()
                .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
            if pivot < 0.0 {
                loading.mapv_inplace(|v| -v);
            }
            components.column_mut(k).assign(&loading);
            explained_variance[k] = if total > 0.0 { singular[idx] * singular[idx] / total } else { 0.0 };
        }

        self.model = Some(PcaModel {
            scaler,
            center,
            components,
            explained_variance,
            scaled,
        });
        Ok(())
    }

    fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let model = self.model.as_ref().ok_or(EngineError::NotFitted("PCA"))?;
        let imputed = impute_with_minimum(data)?;
        let scaled = model.scaler.apply(&imputed)?;
        Ok((&scaled - &model.center).dot(&model.components))
    }

    fn explained_variance(&self) -> Option<[f64; 2]> {
        self.model.as_ref().map(|m| m.explained_variance)
    }

    fn imputed_data(&self) -> Option<&Array2<f64>> {
        self.model.as_ref().map(|m| &m.scaled)
    }
}
