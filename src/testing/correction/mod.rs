//! Multiple testing correction for the per-feature tests run by the engines.

use anyhow::{Result, anyhow};
use std::cmp::Ordering;

/// Apply the Benjamini-Hochberg (BH) procedure to independent p-values.
///
/// Adjusted values are returned in input order, capped at 1.0 and monotone in the sorted
/// p-values.
///
/// # Arguments
/// * `p_values` - A slice of p-values to adjust
///
/// # Returns
/// * `Result<Vec<f64>>` - Vector of adjusted p-values
///
/// # Example
/// ```
/// use cohort_statistics::testing::correction::benjamini_hochberg_correction;
///
/// let adjusted = benjamini_hochberg_correction(&[0.01, 0.03, 0.05]).unwrap();
/// assert!((adjusted[0] - 0.03).abs() < 1e-12);
/// ```
pub fn benjamini_hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    if p_values.is_empty() {
        return Err(anyhow!("Empty p-value array"));
    }
    if let Some((i, p)) = p_values.iter().enumerate().find(|(_, p)| !(0.0..=1.0).contains(*p)) {
        return Err(anyhow!("Invalid p-value at index {}: {}", i, p));
    }

    let mut order: Vec<usize> = (0..p_values.len()).collect();
    order.sort_by(|&a, &b| p_values[a].partial_cmp(&p_values[b]).unwrap_or(Ordering::Equal));
    let ranked: Vec<f64> = order.iter().map(|&i| p_values[i]).collect();

    let mut adjusted = vec![0.0; p_values.len()];
    for (&position, q) in order.iter().zip(rank_monotonized_fdr(&ranked)) {
        adjusted[position] = q.min(1.0);
    }
    Ok(adjusted)
}

/// Features whose BH-adjusted p-value falls at or below `alpha`.
pub fn benjamini_hochberg_rejections(adjusted: &[f64], alpha: f64) -> Result<Vec<bool>> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(anyhow!("alpha must lie in (0, 1), got {}", alpha));
    }
    Ok(adjusted.iter().map(|&q| q <= alpha).collect())
}

/// FDR for p-values already sorted into their final rank order.
///
/// `fdr_i = p_i * N / rank_i`, followed by a running minimum taken from the worst rank towards
/// the best so the result never decreases with rank. The rank order may carry tie-breaks beyond
/// the p-value, so no re-sorting happens here.
pub fn rank_monotonized_fdr(ranked_p_values: &[f64]) -> Vec<f64> {
    let n = ranked_p_values.len() as f64;
    let mut fdrs: Vec<f64> = ranked_p_values
        .iter()
        .enumerate()
        .map(|(i, &p)| p * n / (i + 1) as f64)
        .collect();

    let mut current_min = f64::INFINITY;
    for fdr in fdrs.iter_mut().rev() {
        current_min = current_min.min(*fdr);
        *fdr = current_min;
    }
    fdrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_vec_relative_eq(a: &[f64], b: &[f64], epsilon: f64) {
        assert_eq!(a.len(), b.len(), "Vectors have different lengths");
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            if (x - y).abs() > epsilon {
                panic!("Vectors differ at index {}: {} != {}", i, x, y);
            }
        }
    }

    #[test]
    fn test_benjamini_hochberg_empty_input() {
        assert!(benjamini_hochberg_correction(&[]).is_err());
    }

    #[test]
    fn test_benjamini_hochberg_invalid_pvalues() {
        assert!(benjamini_hochberg_correction(&[-0.1, 0.5, 1.1]).is_err());
        assert!(benjamini_hochberg_correction(&[0.2, f64::NAN]).is_err());
    }

    #[test]
    fn test_benjamini_hochberg_unordered_pvalues() {
        let p_values = vec![0.05, 0.01, 0.1, 0.04, 0.02];
        let expected = vec![0.0625, 0.05, 0.1, 0.0625, 0.05];
        let adjusted = benjamini_hochberg_correction(&p_values).unwrap();
        assert_vec_relative_eq(&adjusted, &expected, 1e-12);
    }

    #[test]
    fn test_benjamini_hochberg_real_example() {
        let pvalues = vec![0.1, 0.2, 0.3, 0.4, 0.1];
        let expected = [0.25, 0.3333333333333333, 0.375, 0.4, 0.25];
        let adjusted = benjamini_hochberg_correction(&pvalues).unwrap();
        assert_vec_relative_eq(&adjusted, &expected, 1e-12);
    }

    #[test]
    fn test_benjamini_hochberg_single_pvalue() {
        let adjusted = benjamini_hochberg_correction(&[0.025]).unwrap();
        assert_relative_eq!(adjusted[0], 0.025, epsilon = 1e-10);
    }

    #[test]
    fn test_benjamini_hochberg_caps_at_one() {
        let adjusted = benjamini_hochberg_correction(&[0.1, 0.2, 1.0]).unwrap();
        assert_relative_eq!(adjusted[2], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_rejections() {
        let rejected = benjamini_hochberg_rejections(&[0.005, 0.01, 0.2], 0.01).unwrap();
        assert_eq!(rejected, vec![true, true, false]);
        assert!(benjamini_hochberg_rejections(&[0.5], 0.0).is_err());
    }

    #[test]
    fn test_rank_monotonized_fdr() {
        // rank 2 would be 0.04 * 3 / 2 = 0.06 but rank 3 caps it at 0.05
        let fdrs = rank_monotonized_fdr(&[0.01, 0.04, 0.05]);
        assert_vec_relative_eq(&fdrs, &[0.03, 0.05, 0.05], 1e-12);
        assert!(fdrs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_rank_monotonized_fdr_keeps_given_order() {
        // tie-broken order is not re-sorted by p-value
        let fdrs = rank_monotonized_fdr(&[0.0, 0.3]);
        assert_vec_relative_eq(&fdrs, &[0.0, 0.3], 1e-12);
        assert!(rank_monotonized_fdr(&[]).is_empty());
    }
}
