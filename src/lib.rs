//! # cohort-statistics
//!
//! Statistical analysis engine for cohort-level proteomics and phosphoproteomics matrices.
//!
//! Each data layer (proteins, phosphosites, kinase and pathway scores) is a feature-by-sample
//! matrix with missing values. The engines in this crate rank features by correlation with a
//! reference identifier, compare sample groups, score samples against the rest of the cohort and
//! reduce whole layers to two dimensions for quality control.
//!
//! ## Core Features
//!
//! - **Correlation ranking**: Pearson correlation with p-values, rank and monotonized FDR
//! - **Differential expression**: missing-value aware Student t-tests with Benjamini-Hochberg FDR
//!   and volcano coordinates
//! - **Leave-one-out z-scores**: per sample, against the median and spread of all other samples
//! - **QC embeddings**: PCA, probabilistic PCA, UMAP and PHATE, plus silhouette scores per
//!   metadata category
//! - **Snapshot provider**: immutable dataset generations swapped atomically under concurrent reads
//!
//! ## Quick Start
//!
//! Publish a dataset into an [`provider::InMemoryProvider`] and query it through
//! [`service::CohortAnalysis`]. Engines can also be called directly on a [`matrix::FeatureMatrix`].
//!
//! ## Module Organization
//!
//! - **[`testing`]**: t-tests, Pearson correlation and multiple testing correction
//! - **[`correlation`]**, **[`differential`]**, **[`zscore`]**, **[`reduction`]**: the engines
//! - **[`provider`]**: read contract of the cohort data store and the in-memory implementation
//! - **[`enrichment`]**: best-effort annotation of result rows
//! - **[`service`]**: request-level entry points tying provider, engines and enrichment together

pub mod config;
pub mod correlation;
pub mod differential;
pub mod enrichment;
pub mod error;
pub mod matrix;
pub mod provider;
pub mod reduction;
pub mod service;
pub mod testing;
pub mod zscore;

pub use config::{EngineConfig, FeatureClass, IntensityUnit};
pub use error::{EngineError, ProviderError, QueryOutcome, QueryStatus};
pub use matrix::{FeatureMatrix, Series};
