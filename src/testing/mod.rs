//! Statistical primitives shared by the engines.
//!
//! - [`correction`]: Benjamini-Hochberg adjustment and rank-monotonized FDR
//! - [`inference`]: missing-value aware Student t-tests and Pearson correlation, exposed
//!   row-wise on a [`FeatureMatrix`](crate::matrix::FeatureMatrix) through [`inference::MatrixStatTests`]

use num_traits::Float;

pub mod correction;
pub mod inference;

#[derive(Debug, Clone, PartialEq)]
pub struct TestResult<T> {
    /// The test statistic value (t-statistic or Pearson r)
    pub statistic: T,
    /// The two-sided p-value of the test
    pub p_value: T,
    /// Degrees of freedom of the reference t distribution
    pub degrees_of_freedom: Option<T>,
}

impl<T> TestResult<T>
where
    T: Float,
{
    /// Create a new test result with minimal information
    pub fn new(statistic: T, p_value: T) -> Self {
        TestResult {
            statistic,
            p_value,
            degrees_of_freedom: None,
        }
    }

    /// Add degrees of freedom to the result
    pub fn with_degrees_of_freedom(mut self, df: T) -> Self {
        self.degrees_of_freedom = Some(df);
        self
    }

    /// Whether a p-value could be computed at all
    pub fn is_computable(&self) -> bool {
        !self.p_value.is_nan()
    }
}
