//! Typed parameters and engine configuration.
//!
//! The enumerations in this module replace the string literals used at the data boundary
//! (feature layers, intensity units, imputation and reference-channel modes). Numeric defaults
//! live in [`EngineConfig`], which can be built in code or parsed from TOML:
//!
//! ```rust
//! use cohort_statistics::config::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str("[correlation]\nmin_valid_samples = 10\n").unwrap();
//! assert_eq!(config.correlation.min_valid_samples, 10);
//! assert_eq!(config.silhouette.min_num_patients, 4);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Molecular layer a feature matrix belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureClass {
    Protein,
    Phosphosite,
    Kinase,
    PhosphoScore,
    TopasScore,
    Transcript,
}

impl FeatureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureClass::Protein => "protein",
            FeatureClass::Phosphosite => "phosphosite",
            FeatureClass::Kinase => "kinase",
            FeatureClass::PhosphoScore => "phospho_score",
            FeatureClass::TopasScore => "topas_score",
            FeatureClass::Transcript => "transcript",
        }
    }
}

impl fmt::Display for FeatureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scale of the values in a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityUnit {
    Intensity,
    ZScore,
    Score,
}

impl IntensityUnit {
    /// Column-name suffix used by wide tables at the ingestion boundary.
    pub fn suffix(&self) -> &'static str {
        match self {
            IntensityUnit::Intensity => " Intensity",
            IntensityUnit::ZScore => " Z-score",
            IntensityUnit::Score => " Score",
        }
    }

    /// Strip this unit's suffix from a column name, if present.
    pub fn strip_suffix<'a>(&self, column: &'a str) -> Option<&'a str> {
        column.strip_suffix(self.suffix())
    }
}

impl fmt::Display for IntensityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix().trim_start())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationMode {
    #[default]
    NoImpute,
    ImputeWithMinimum,
}

/// Which samples to keep with respect to reference channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceChannels {
    #[default]
    Exclude,
    Include,
    Only,
}

impl ReferenceChannels {
    /// Filter `samples` by whether they carry the reference-channel `prefix`.
    pub fn filter<'a>(&self, samples: &'a [String], prefix: &str) -> Vec<&'a String> {
        samples
            .iter()
            .filter(|s| {
                let is_ref = s.starts_with(prefix);
                match self {
                    ReferenceChannels::Exclude => !is_ref,
                    ReferenceChannels::Include => true,
                    ReferenceChannels::Only => is_ref,
                }
            })
            .collect()
    }
}

/// Column transformed into the volcano `y` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolcanoAxis {
    PValue,
    #[default]
    Fdr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub min_valid_samples: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { min_valid_samples: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialConfig {
    pub alpha: f64,
    pub volcano_axis: VolcanoAxis,
}

impl Default for DifferentialConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            volcano_axis: VolcanoAxis::Fdr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpcaConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Features observed in fewer samples than this are left out of the EM fit.
    pub min_observations: usize,
    pub seed: u64,
}

impl Default for PpcaConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-4,
            min_observations: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapConfig {
    pub n_neighbors: usize,
    pub n_epochs: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub learning_rate: f64,
    pub negative_sample_rate: usize,
    pub seed: u64,
}

impl Default for UmapConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 10,
            n_epochs: 1000,
            min_dist: 0.1,
            spread: 1.0,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhateConfig {
    pub knn: usize,
    pub decay: f64,
    /// Diffusion time; `None` selects it from the von Neumann entropy knee.
    pub t: Option<usize>,
    pub max_t: usize,
}

impl Default for PhateConfig {
    fn default() -> Self {
        Self {
            knn: 5,
            decay: 40.0,
            t: None,
            max_t: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub min_sample_occurrence_ratio: f64,
    pub reference_channel_prefix: String,
    pub ppca: PpcaConfig,
    pub umap: UmapConfig,
    pub phate: PhateConfig,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            min_sample_occurrence_ratio: 0.5,
            reference_channel_prefix: "ref_".to_string(),
            ppca: PpcaConfig::default(),
            umap: UmapConfig::default(),
            phate: PhateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilhouetteConfig {
    pub min_num_patients: usize,
}

impl Default for SilhouetteConfig {
    fn default() -> Self {
        Self { min_num_patients: 4 }
    }
}

/// Numeric defaults for every engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub correlation: CorrelationConfig,
    pub differential: DifferentialConfig,
    pub reduction: ReductionConfig,
    pub silhouette: SilhouetteConfig,
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(source)?;
        if !(0.0..=1.0).contains(&config.reduction.min_sample_occurrence_ratio) {
            return Err(anyhow::anyhow!(
                "min_sample_occurrence_ratio must lie in [0, 1], got {}",
                config.reduction.min_sample_occurrence_ratio
            ));
        }
        Ok(config)
    }
}
