use crate::matrix::FeatureMatrix;
use ndarray::parallel::prelude::*;
use ndarray::{ArrayView1, Axis};

pub mod parametric;

use parametric::{CorrelationTest, GroupComparison};

/// Row-wise statistical tests over a feature matrix.
///
/// Rows are processed in parallel; results come back in row order.
pub trait MatrixStatTests {
    /// Student t-test of every feature between two sets of column indices.
    fn t_test(&self, group1_indices: &[usize], group2_indices: &[usize]) -> Vec<GroupComparison>;

    /// Pearson correlation of every feature against `reference`, aligned by column.
    fn correlate_rows(&self, reference: ArrayView1<'_, f64>) -> anyhow::Result<Vec<CorrelationTest>>;
}

impl MatrixStatTests for FeatureMatrix {
    fn t_test(&self, group1_indices: &[usize], group2_indices: &[usize]) -> Vec<GroupComparison> {
        self.values()
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| {
                let group1: Vec<f64> = group1_indices.iter().map(|&i| row[i]).collect();
                let group2: Vec<f64> = group2_indices.iter().map(|&i| row[i]).collect();
                parametric::student_t_test_nan_omit(&group1, &group2)
            })
            .collect()
    }

    fn correlate_rows(&self, reference: ArrayView1<'_, f64>) -> anyhow::Result<Vec<CorrelationTest>> {
        if reference.len() != self.n_samples() {
            return Err(anyhow::anyhow!(
                "Reference has {} values but the matrix has {} samples",
                reference.len(),
                self.n_samples()
            ));
        }
        let reference = reference.to_vec();
        Ok(self
            .values()
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| {
                let row = row.to_vec();
                parametric::pearson_nan_omit(&row, &reference)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ids;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_row_wise_t_test_keeps_row_order() {
        let m = FeatureMatrix::new(ids(&["up", "flat"]), ids(&["a", "b", "c", "d"]), array![
            [10.0, 11.0, 1.0, 2.0],
            [1.0, 2.0, 1.0, 2.0]
        ])
        .unwrap();
        let results = m.t_test(&[0, 1], &[2, 3]);
        assert_eq!(results.len(), 2);
        assert!(results[0].result.statistic > 0.0);
        assert_relative_eq!(results[1].result.statistic, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_correlate_rows_checks_length() {
        let m = FeatureMatrix::new(ids(&["x"]), ids(&["a", "b"]), array![[1.0, 2.0]]).unwrap();
        assert!(m.correlate_rows(array![1.0].view()).is_err());
        let results = m.correlate_rows(array![2.0, 4.0].view()).unwrap();
        assert_eq!(results[0].n_pairs, 2);
    }
}
