//! Per-sample silhouette coefficients against a categorical metadata column.

use super::{QcEmbedding, pairwise_distances};
use crate::config::SilhouetteConfig;
use crate::error::{EngineError, Result};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Which representation of the samples the distances are measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilhouetteInput {
    /// The dense matrix the reducer worked on.
    #[default]
    Imputed,
    /// The rescaled 2D embedding.
    Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SilhouetteRow {
    pub sample_id: String,
    pub category: String,
    pub silhouette_score: f64,
    pub category_average: f64,
    pub color: String,
}

pub fn qc_silhouette(
    qc: &QcEmbedding,
    input: SilhouetteInput,
    labels: &HashMap<String, String>,
    config: &SilhouetteConfig,
) -> Result<Vec<SilhouetteRow>> {
    let data = match input {
        SilhouetteInput::Imputed => &qc.imputed,
        SilhouetteInput::Embedding => &qc.embedding,
    };
    category_silhouettes(data, &qc.sample_ids, labels, config.min_num_patients)
}

/// Silhouette rows for the samples of `data` (samples x dims) whose category has at least
/// `min_members` samples among `sample_ids`. Labelled samples outside `data` do not count.
///
/// Rows are ordered by category average (descending), category name, then own score
/// (descending).
pub fn category_silhouettes(
    data: &Array2<f64>,
    sample_ids: &[String],
    labels: &HashMap<String, String>,
    min_members: usize,
) -> Result<Vec<SilhouetteRow>> {
    if data.nrows() != sample_ids.len() {
        return Err(EngineError::InvalidInput(format!(
            "{} sample ids for {} rows",
            sample_ids.len(),
            data.nrows()
        )));
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for category in sample_ids.iter().filter_map(|s| labels.get(s)) {
        *counts.entry(category.as_str()).or_default() += 1;
    }
    let mut common: Vec<(usize, &String, &String)> = sample_ids
        .iter()
        .enumerate()
        .filter_map(|(i, sample)| {
            let category = labels.get(sample)?;
            (counts[category.as_str()] >= min_members).then_some((i, sample, category))
        })
        .collect();
    common.sort_by(|a, b| a.1.cmp(b.1));

    let rows: Vec<usize> = common.iter().map(|(i, _, _)| *i).collect();
    let categories: Vec<&str> = common.iter().map(|(_, _, c)| c.as_str()).collect();
    let scores = silhouette_samples(&data.select(Axis(0), &rows), &categories)?;

    let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();
    for (&category, &score) in categories.iter().zip(&scores) {
        let entry = sums.entry(category).or_default();
        entry.0 += score;
        entry.1 += 1;
    }
    let average = |category: &str| sums.get(category).map_or(0.0, |(sum, n)| sum / *n as f64);

    let mut result: Vec<SilhouetteRow> = common
        .iter()
        .zip(&scores)
        .map(|((_, sample, category), &score)| SilhouetteRow {
            sample_id: (*sample).clone(),
            category: (*category).clone(),
            silhouette_score: score,
            category_average: average(category),
            color: String::new(),
        })
        .collect();
    result.sort_by(|a, b| {
        b.category_average
            .partial_cmp(&a.category_average)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| {
                b.silhouette_score
                    .partial_cmp(&a.silhouette_score)
                    .unwrap_or(Ordering::Equal)
            })
    });

    let mut palette: BTreeMap<String, String> = BTreeMap::new();
    for row in &result {
        if !palette.contains_key(&row.category) {
            let color = category_color(palette.len());
            palette.insert(row.category.clone(), color);
        }
    }
    for row in &mut result {
        if let Some(color) = palette.get(&row.category) {
            row.color.clone_from(color);
        }
    }
    debug!(samples = result.len(), categories = palette.len(), "silhouette scores");
    Ok(result)
}

/// Euclidean silhouette coefficient of every row. Samples alone in their cluster score 0.
pub fn silhouette_samples(data: &Array2<f64>, labels: &[&str]) -> Result<Vec<f64>> {
    let n = data.nrows();
    if n != labels.len() {
        return Err(EngineError::InvalidInput("data and labels length mismatch".to_string()));
    }
    let mut distinct: Vec<&str> = labels.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 2 || distinct.len() >= n {
        return Err(EngineError::InvalidInput(format!(
            "silhouette needs between 2 and {} labels, got {}",
            n.saturating_sub(1),
            distinct.len()
        )));
    }

    let distances = pairwise_distances(data);
    let scores = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut per_label: HashMap<&str, (f64, usize)> = HashMap::new();
            for j in (0..n).filter(|&j| j != i) {
                let entry = per_label.entry(labels[j]).or_default();
                entry.0 += distances[[i, j]];
                entry.1 += 1;
            }
            let Some(&(own_sum, own_n)) = per_label.get(labels[i]) else {
                return 0.0;
            };
            let a = own_sum / own_n as f64;
            let b = per_label
                .iter()
                .filter(|(label, _)| **label != labels[i])
                .map(|(_, (sum, count))| sum / *count as f64)
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 { (b - a) / denom } else { 0.0 }
        })
        .collect();
    Ok(scores)
}

/// Display color for the `index`-th category: hues spaced by the golden angle.
pub fn category_color(index: usize) -> String {
    let hue = (index as f64 * 137.507_764) % 360.0;
    let (saturation, lightness) = (0.65, 0.5);
    let chroma = (1.0 - (2.0 * lightness - 1.0_f64).abs()) * saturation;
    let segment = hue / 60.0;
    let x = chroma * (1.0 - (segment % 2.0 - 1.0).abs());
    let (r, g, b) = match segment as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = lightness - chroma / 2.0;
    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    format!("#{:02X}{:02X}{:02X}", channel(r), channel(g), channel(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ids;
    use ndarray::array;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(s, c)| (s.to_string(), c.to_string())).collect()
    }

    #[test]
    fn test_well_separated_clusters_score_high() {
        let data = array![[0.0, 0.0], [0.1, 0.0], [0.0, 0.1], [10.0, 10.0], [10.1, 10.0], [10.0, 10.1]];
        let scores = silhouette_samples(&data, &["a", "a", "a", "b", "b", "b"]).unwrap();
        assert!(scores.iter().all(|&s| s > 0.9));
    }

    #[test]
    fn test_singleton_scores_zero_and_label_bounds() {
        let data = array![[0.0], [0.1], [5.0]];
        let scores = silhouette_samples(&data, &["a", "a", "b"]).unwrap();
        assert_eq!(scores[2], 0.0);
        assert!(silhouette_samples(&data, &["a", "a", "a"]).is_err());
        assert!(silhouette_samples(&data, &["a", "b", "c"]).is_err());
    }

    #[test]
    fn test_small_categories_dropped_and_rows_ordered() {
        let data = array![[0.0], [0.2], [0.1], [5.0], [7.0], [6.5], [100.0]];
        let samples = ids(&["s1", "s2", "s3", "s4", "s5", "s6", "s7"]);
        let meta = labels(&[
            ("s1", "tight"),
            ("s2", "tight"),
            ("s3", "tight"),
            ("s4", "loose"),
            ("s5", "loose"),
            ("s6", "loose"),
            ("s7", "rare"),
        ]);
        let rows = category_silhouettes(&data, &samples, &meta, 2).unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| r.category != "rare"));

        // the tighter category has the higher average and comes first
        assert!(rows[..3].iter().all(|r| r.category == "tight"));
        assert!(rows[0].category_average >= rows[3].category_average);
        assert!(rows[..3].windows(2).all(|w| w[0].silhouette_score >= w[1].silhouette_score));

        assert_eq!(rows[0].color, category_color(0));
        assert_eq!(rows[3].color, category_color(1));
        assert_ne!(rows[0].color, rows[3].color);
    }

    #[test]
    fn test_only_scored_samples_count_towards_category_size() {
        // s5 and s6 are labelled but not part of the embedding
        let data = array![[0.0], [0.1], [0.2], [3.0], [9.0], [9.1]];
        let samples = ids(&["s1", "s2", "s3", "s4", "s7", "s8"]);
        let meta = labels(&[
            ("s1", "A"),
            ("s2", "A"),
            ("s3", "A"),
            ("s4", "B"),
            ("s5", "B"),
            ("s6", "B"),
            ("s7", "C"),
            ("s8", "C"),
        ]);
        let rows = category_silhouettes(&data, &samples, &meta, 2).unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.category != "B"));
        assert!(rows.iter().all(|r| r.sample_id != "s4"));
    }

    #[test]
    fn test_category_color_is_deterministic_hex() {
        let color = category_color(3);
        assert_eq!(color, category_color(3));
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
        assert_eq!(category_color(0), "#D22D2D");
    }
}
