//! Parametric tests for cohort feature matrices.
//!
//! Both tests skip missing values (`NaN`) instead of rejecting them: a sample that was not
//! measured for a feature is left out of that feature's test only. The t-test works from
//! per-group means and sums of squared deviations so that a group holding a single observation
//! still contributes to the pooled variance.

use crate::testing::TestResult;
use num_traits::Float;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Largest `f64` strictly below 1.0.
const LARGEST_BELOW_ONE: f64 = 1.0 - f64::EPSILON / 2.0;

/// Per-group summary produced alongside a two-sample test.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupComparison {
    pub result: TestResult<f64>,
    pub mean1: f64,
    pub mean2: f64,
    pub n1: usize,
    pub n2: usize,
}

/// Pearson correlation over the pairs observed in both vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationTest {
    pub result: TestResult<f64>,
    pub n_pairs: usize,
}

/// Mean, sum of squared deviations and count of the observed values.
pub fn observed_moments<T>(values: impl IntoIterator<Item = T> + Clone) -> (f64, f64, usize)
where
    T: Float,
{
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values.clone() {
        if let Some(v) = v.to_f64().filter(|v| !v.is_nan()) {
            sum += v;
            n += 1;
        }
    }
    if n == 0 {
        return (f64::NAN, f64::NAN, 0);
    }
    let mean = sum / n as f64;
    let ss = values
        .into_iter()
        .filter_map(|v| v.to_f64().filter(|v| !v.is_nan()))
        .map(|v| (v - mean) * (v - mean))
        .sum();
    (mean, ss, n)
}

/// Student's (pooled variance) t-test between two samples, ignoring missing values.
///
/// # Arguments
///
/// * `x` - First sample
/// * `y` - Second sample
///
/// # Returns
///
/// `GroupComparison` with the t-statistic, p-value and group summaries. The p-value is `NaN`
/// when a group has no observations or the pooled degrees of freedom are not positive.
pub fn student_t_test_nan_omit<T>(x: &[T], y: &[T]) -> GroupComparison
where
    T: Float,
{
    let (mean1, ss1, n1) = observed_moments(x.iter().copied());
    let (mean2, ss2, n2) = observed_moments(y.iter().copied());
    GroupComparison {
        result: student_t_from_moments(mean1, ss1, n1, mean2, ss2, n2),
        mean1,
        mean2,
        n1,
        n2,
    }
}

/// Perform a pooled-variance t-test from per-group means and sums of squared deviations.
pub fn student_t_from_moments(
    mean1: f64,
    ss1: f64,
    n1: usize,
    mean2: f64,
    ss2: f64,
    n2: usize,
) -> TestResult<f64> {
    if n1 == 0 || n2 == 0 || n1 + n2 <= 2 {
        return TestResult::new(f64::NAN, f64::NAN);
    }

    let (n1, n2) = (n1 as f64, n2 as f64);
    let df = n1 + n2 - 2.0;
    let pooled_var = (ss1 + ss2) / df;
    let std_err = (pooled_var * (1.0 / n1 + 1.0 / n2)).sqrt();
    let t_stat = (mean1 - mean2) / std_err;

    TestResult::new(t_stat, t_test_p_value(t_stat, df)).with_degrees_of_freedom(df)
}

/// Two-sided p-value of `t_stat` under a Student t distribution with `df` degrees of freedom.
pub fn t_test_p_value(t_stat: f64, df: f64) -> f64 {
    if t_stat.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    if t_stat.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t_dist) => (2.0 * t_dist.sf(t_stat.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

/// Pearson correlation between `x` and `y` over the positions observed in both.
///
/// Each vector is centred by its own mean over those shared positions. The coefficient is
/// clamped just below 1.0 so the t transform `r * sqrt(n - 2) / sqrt(1 - r^2)` stays finite for
/// perfectly correlated pairs; its two-sided p-value is `2 * (1 - cdf(|t|))` with `n - 2`
/// degrees of freedom.
pub fn pearson_nan_omit<T>(x: &[T], y: &[T]) -> CorrelationTest
where
    T: Float,
{
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter_map(|(a, b)| {
            let (a, b) = (a.to_f64()?, b.to_f64()?);
            (!a.is_nan() && !b.is_nan()).then_some((a, b))
        })
        .collect();
    let n_pairs = pairs.len();
    if n_pairs == 0 {
        return CorrelationTest {
            result: TestResult::new(f64::NAN, f64::NAN),
            n_pairs,
        };
    }

    let n = n_pairs as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut dot, mut norm_x, mut norm_y) = (0.0, 0.0, 0.0);
    for &(a, b) in &pairs {
        let (dx, dy) = (a - mean_x, b - mean_y);
        dot += dx * dy;
        norm_x += dx * dx;
        norm_y += dy * dy;
    }

    let r = dot / (norm_x.sqrt() * norm_y.sqrt());
    let r = if r.is_nan() { r } else { r.min(LARGEST_BELOW_ONE) };
    let df = n - 2.0;
    let t_stat = r * df.sqrt() / (1.0 - r * r).sqrt();
    let p_value = if r.is_nan() || !(df > 0.0) {
        f64::NAN
    } else if t_stat.is_infinite() {
        0.0
    } else {
        match StudentsT::new(0.0, 1.0, df) {
            Ok(t_dist) => 2.0 * (1.0 - t_dist.cdf(t_stat.abs())),
            Err(_) => f64::NAN,
        }
    };

    CorrelationTest {
        result: TestResult::new(r, p_value).with_degrees_of_freedom(df),
        n_pairs,
    }
}
