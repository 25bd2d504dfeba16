use cohort_statistics::matrix::{FeatureMatrix, Series};
use cohort_statistics::testing::correction::{benjamini_hochberg_correction, rank_monotonized_fdr};
use cohort_statistics::testing::inference::MatrixStatTests;
use cohort_statistics::testing::inference::parametric::{pearson_nan_omit, student_t_test_nan_omit};
use cohort_statistics::zscore::{ZScoreValue, leave_one_out_zscore};

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod quick_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn check_if_ttest_works() {
        // Two clearly different groups
        // Group 1: [1, 2, 3] -> mean=2, ss=2
        // Group 2: [7, 8, 9] -> mean=8, ss=2
        // pooled variance = 4 / 4 = 1, std err = sqrt(1/3 + 1/3)
        let cmp = student_t_test_nan_omit(&[1.0, 2.0, 3.0], &[7.0, 8.0, 9.0]);

        println!("T-statistic: {}", cmp.result.statistic);
        println!("P-value: {}", cmp.result.p_value);

        assert_relative_eq!(cmp.result.statistic, -6.0 / (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert!(cmp.result.p_value < 0.01);
        assert_eq!(cmp.result.degrees_of_freedom, Some(4.0));
    }

    #[test]
    fn check_identical_groups() {
        // Identical groups give t = 0 and p = 1
        let cmp = student_t_test_nan_omit(&[4.0, 5.0, 6.0], &[4.0, 5.0, 6.0]);
        assert_relative_eq!(cmp.result.statistic, 0.0, epsilon = 1e-12);
        assert_relative_eq!(cmp.result.p_value, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_high_vs_low_intensity() {
        // High group: [9, 10, 11, 10, 10] -> mean 10
        // Low group:  [1, 2, 3, 2, 2]      -> mean 2
        let cmp = student_t_test_nan_omit(&[9.0, 10.0, 11.0, 10.0, 10.0], &[1.0, 2.0, 3.0, 2.0, 2.0]);
        assert!(cmp.result.p_value < 0.001, "Expected highly significant p-value");
        assert!(cmp.result.statistic > 5.0, "Expected large t-statistic");
        assert_relative_eq!(cmp.mean1 - cmp.mean2, 8.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_values_are_skipped() {
        // The NaN in group 2 leaves [7, 9]; the test must match the explicit version
        let with_gap = student_t_test_nan_omit(&[1.0, 2.0, 3.0], &[7.0, f64::NAN, 9.0]);
        let explicit = student_t_test_nan_omit(&[1.0, 2.0, 3.0], &[7.0, 9.0]);
        assert_eq!(with_gap.n2, 2);
        assert_relative_eq!(with_gap.result.statistic, explicit.result.statistic, epsilon = 1e-12);
        assert_relative_eq!(with_gap.result.p_value, explicit.result.p_value, epsilon = 1e-12);
    }

    #[test]
    fn test_pearson_anticorrelation() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [6.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let test = pearson_nan_omit(&x, &y);
        assert_relative_eq!(test.result.statistic, -1.0, epsilon = 1e-12);
        assert_eq!(test.n_pairs, 6);
        assert_eq!(test.result.degrees_of_freedom, Some(4.0));
    }

    #[test]
    fn test_pearson_known_value() {
        // x = [1, 2, 3, 4], y = [1, 3, 2, 4]
        // dx = [-1.5, -0.5, 0.5, 1.5], dy = [-1.5, 0.5, -0.5, 1.5]
        // dot = 2.25 - 0.25 - 0.25 + 2.25 = 4, |dx|^2 = |dy|^2 = 5 -> r = 0.8
        let test = pearson_nan_omit(&[1.0, 2.0, 3.0, 4.0], &[1.0, 3.0, 2.0, 4.0]);
        assert_relative_eq!(test.result.statistic, 0.8, epsilon = 1e-12);
        assert!(test.result.p_value > 0.05 && test.result.p_value < 0.5);
    }

    #[test]
    fn test_benjamini_hochberg_real_example() {
        // Evenly spaced p-values all collapse to the largest one
        let adjusted = benjamini_hochberg_correction(&[0.01, 0.02, 0.03, 0.04, 0.05]).unwrap();
        for q in adjusted {
            assert_relative_eq!(q, 0.05, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rank_fdr_never_decreases() {
        // 0.04 * 3 / 2 = 0.06 is larger than 0.05 * 3 / 3, so rank 2 takes 0.05
        let fdr = rank_monotonized_fdr(&[0.001, 0.04, 0.05]);
        assert_relative_eq!(fdr[0], 0.003, epsilon = 1e-12);
        assert_relative_eq!(fdr[1], 0.05, epsilon = 1e-12);
        assert_relative_eq!(fdr[2], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_row_tests_follow_row_order() {
        let matrix = FeatureMatrix::from_rows(
            ids(&["up", "flat"]),
            ids(&["s1", "s2", "s3", "s4", "s5", "s6"]),
            vec![
                vec![10.0, 11.0, 12.0, 1.0, 2.0, 3.0],
                vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0],
            ],
        )
        .unwrap();
        let tests = matrix.t_test(&[0, 1, 2], &[3, 4, 5]);
        assert_eq!(tests.len(), 2);
        assert!(tests[0].result.statistic > 0.0);
        assert!(tests[0].result.p_value < 0.001);
        assert_relative_eq!(tests[1].result.p_value, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_leave_one_out_outlier() {
        // For the outlier the others are [1, 2, 3, 4]: median 2.5, sd sqrt(5/3)
        let series = Series::new("EGFR", ids(&["a", "b", "c", "d", "e"]), vec![1.0, 2.0, 3.0, 4.0, 10.0]).unwrap();
        let scores = leave_one_out_zscore(&series);
        let expected = 7.5 / (5.0f64 / 3.0).sqrt();
        match scores.get("e") {
            Some(ZScoreValue::Value(z)) => assert_relative_eq!(z, expected, epsilon = 1e-12),
            other => panic!("expected a score, got {:?}", other),
        }
        assert!(scores.is_computed());
    }

    #[test]
    fn test_leave_one_out_degenerate_column() {
        // Constant others give a zero spread: the whole column is not computed
        let series = Series::new("EGFR", ids(&["a", "b", "c"]), vec![2.0, 2.0, 5.0]).unwrap();
        let scores = leave_one_out_zscore(&series);
        assert!(!scores.is_computed());
        assert!(scores.values.iter().all(|v| *v == ZScoreValue::NotComputed));
    }
}
