//! Leave-one-out z-scores.
//!
//! Each sample is scored against the median and sample standard deviation of all *other*
//! samples of the same column: `z_i = (x_i - median_{-i}) / sd_{-i}`. A sample that was not
//! measured keeps a missing score.
//!
//! When any measured sample cannot be scored (fewer than two other observations, or a zero or
//! non-finite spread among them), the whole column is reported as [`ZScoreValue::NotComputed`].
//! Missing and not-computed serialize differently (`null` vs `"n.d."`).

use crate::matrix::Series;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

pub const NOT_COMPUTED: &str = "n.d.";
pub const ALL_DATA: &str = "all_data";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZScoreValue {
    Value(f64),
    Missing,
    NotComputed,
}

impl ZScoreValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ZScoreValue::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl Serialize for ZScoreValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ZScoreValue::Value(v) => serializer.serialize_f64(*v),
            ZScoreValue::Missing => serializer.serialize_none(),
            ZScoreValue::NotComputed => serializer.serialize_str(NOT_COMPUTED),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZScoreColumn {
    pub name: String,
    pub index: Vec<String>,
    pub values: Vec<ZScoreValue>,
}

impl ZScoreColumn {
    pub fn is_computed(&self) -> bool {
        !self.values.iter().any(|v| matches!(v, ZScoreValue::NotComputed))
    }

    pub fn get(&self, sample: &str) -> Option<ZScoreValue> {
        self.index.iter().position(|s| s == sample).map(|i| self.values[i])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubcohortZScoreRow {
    pub sample_id: String,
    pub zscore: ZScoreValue,
    /// `"all_data"` for the full cohort, otherwise the sample's category.
    pub data_type: String,
}

/// Leave-one-out z-scores for one column.
pub fn leave_one_out_zscore(column: &Series) -> ZScoreColumn {
    let values: Vec<f64> = column.values.to_vec();
    let observed: Vec<(usize, f64)> = values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .collect();

    let mut scores = vec![ZScoreValue::Missing; values.len()];

    for &(i, x) in &observed {
        let others: Vec<f64> = observed.iter().filter(|(j, _)| *j != i).map(|(_, v)| *v).collect();
        match median_and_sd(&others) {
            Some((median, sd)) => scores[i] = ZScoreValue::Value((x - median) / sd),
            None => {
                warn!(column = %column.name, sample = %column.index[i], "leave-one-out spread is degenerate");
                return ZScoreColumn {
                    name: column.name.clone(),
                    index: column.index.clone(),
                    values: vec![ZScoreValue::NotComputed; values.len()],
                };
            }
        }
    }

    ZScoreColumn {
        name: column.name.clone(),
        index: column.index.clone(),
        values: scores,
    }
}

/// Median and sample standard deviation (ddof = 1), `None` when the spread is unusable.
fn median_and_sd(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1) as f64;
    let sd = var.sqrt();
    (sd.is_finite() && sd > 0.0).then_some((median, sd))
}

/// Z-scores for the whole cohort followed by z-scores recomputed within `subset`.
///
/// Cohort rows come first, ordered by score descending (unscored samples last). Subset rows
/// follow in the same order and are labelled with the sample's category, or `"n.d."` when the
/// sample has none.
pub fn subcohort_zscores(
    column: &Series,
    subset: &[String],
    categories: &HashMap<String, String>,
) -> Vec<SubcohortZScoreRow> {
    let full = leave_one_out_zscore(column);

    let mut order: Vec<usize> = (0..full.index.len()).collect();
    order.sort_by(|&a, &b| {
        match (full.values[a].as_f64(), full.values[b].as_f64()) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });

    let sub_index: Vec<String> = order
        .iter()
        .map(|&i| full.index[i].clone())
        .filter(|s| subset.contains(s))
        .collect();
    let sub_series = Series {
        name: column.name.clone(),
        values: column.select(&sub_index),
        index: sub_index,
    };
    let sub = leave_one_out_zscore(&sub_series);

    let mut rows: Vec<SubcohortZScoreRow> = order
        .iter()
        .map(|&i| SubcohortZScoreRow {
            sample_id: full.index[i].clone(),
            zscore: full.values[i],
            data_type: ALL_DATA.to_string(),
        })
        .collect();
    rows.extend(sub.index.iter().zip(&sub.values).map(|(sample, &zscore)| SubcohortZScoreRow {
        sample_id: sample.clone(),
        zscore,
        data_type: categories
            .get(sample)
            .cloned()
            .unwrap_or_else(|| NOT_COMPUTED.to_string()),
    }));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ids;
    use approx::assert_relative_eq;

    fn column(values: Vec<f64>) -> Series {
        let index = (0..values.len()).map(|i| format!("pat_{i}")).collect();
        Series::new("EGFR", index, values).unwrap()
    }

    #[test]
    fn test_each_score_excludes_its_own_sample() {
        let scores = leave_one_out_zscore(&column(vec![1.0, 2.0, 3.0, 10.0]));
        // others of sample 3: [1, 2, 3] -> median 2, sd 1
        assert_relative_eq!(scores.values[3].as_f64().unwrap(), 8.0, epsilon = 1e-12);
        // others of sample 0: [2, 3, 10] -> median 3, sd sqrt(19)
        assert_relative_eq!(
            scores.values[0].as_f64().unwrap(),
            -2.0 / 19.0f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_deterministic() {
        let input = column(vec![0.3, -1.2, 2.5, 0.9, 1.1]);
        assert_eq!(leave_one_out_zscore(&input), leave_one_out_zscore(&input));
    }

    #[test]
    fn test_removing_a_sample_changes_the_others() {
        let full = leave_one_out_zscore(&column(vec![0.3, -1.2, 2.5, 0.9, 1.1]));
        let reduced = leave_one_out_zscore(&column(vec![0.3, -1.2, 2.5, 0.9]));
        let changed = (0..4).any(|i| {
            (full.values[i].as_f64().unwrap() - reduced.values[i].as_f64().unwrap()).abs() > 1e-9
        });
        assert!(changed);
    }

    #[test]
    fn test_missing_stays_missing() {
        let scores = leave_one_out_zscore(&column(vec![1.0, f64::NAN, 2.0, 4.0]));
        assert_eq!(scores.values[1], ZScoreValue::Missing);
        assert!(scores.values[0].as_f64().is_some());
        assert!(scores.is_computed());
    }

    #[test]
    fn test_degenerate_column_is_not_computed_as_a_whole() {
        // the leave-one-out window of the last sample has zero spread
        let scores = leave_one_out_zscore(&column(vec![5.0, 5.0, 5.0, 9.0]));
        assert!(!scores.is_computed());
        assert!(scores.values.iter().all(|v| *v == ZScoreValue::NotComputed));

        let tiny = leave_one_out_zscore(&column(vec![1.0, 2.0]));
        assert!(!tiny.is_computed());
    }

    #[test]
    fn test_missing_and_sentinel_serialize_apart() {
        let json = serde_json::to_string(&[
            ZScoreValue::Value(1.5),
            ZScoreValue::Missing,
            ZScoreValue::NotComputed,
        ])
        .unwrap();
        assert_eq!(json, r#"[1.5,null,"n.d."]"#);
    }

    #[test]
    fn test_subcohort_rows() {
        let input = column(vec![1.0, 4.0, 2.0, 8.0, 3.0]);
        let subset = ids(&["pat_0", "pat_1", "pat_2", "pat_4"]);
        let categories: HashMap<String, String> = [("pat_0", "MASTER"), ("pat_1", "MASTER"), ("pat_2", "CATCH")]
            .iter()
            .map(|(s, c)| (s.to_string(), c.to_string()))
            .collect();

        let rows = subcohort_zscores(&input, &subset, &categories);
        assert_eq!(rows.len(), 9);
        assert!(rows[..5].iter().all(|r| r.data_type == ALL_DATA));
        assert_eq!(rows[0].sample_id, "pat_3");
        let cohort_scores: Vec<f64> = rows[..5].iter().map(|r| r.zscore.as_f64().unwrap()).collect();
        assert!(cohort_scores.windows(2).all(|w| w[0] >= w[1]));

        let sub = &rows[5..];
        assert_eq!(sub.len(), 4);
        assert!(sub.iter().all(|r| r.sample_id != "pat_3"));
        let unlabelled = sub.iter().find(|r| r.sample_id == "pat_4").unwrap();
        assert_eq!(unlabelled.data_type, NOT_COMPUTED);
        let labelled = sub.iter().find(|r| r.sample_id == "pat_2").unwrap();
        assert_eq!(labelled.data_type, "CATCH");
    }
}
