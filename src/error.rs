//! Error types.
//!
//! Two tiers are kept apart. Problems the caller can fix in the query (unknown identifier,
//! ambiguous identifier, disjoint sample sets) are returned as a [`QueryStatus`] next to an empty
//! result. Conditions of the data source are raised as [`ProviderError`] so the caller can decide
//! between retrying after a reload and reporting the layer as unsupported.

use crate::config::{FeatureClass, IntensityUnit};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("cohort data not yet loaded")]
    CohortDataNotLoaded,

    #[error("unknown cohort: {0}")]
    UnknownCohort(String),

    #[error("{class} layer is unavailable for cohort {cohort}")]
    DataLayerUnavailable { cohort: String, class: FeatureClass },

    #[error("no {unit} columns found for the {class} layer")]
    IntensityUnitUnavailable { class: FeatureClass, unit: IntensityUnit },

    #[error("sample metadata has no column {0}")]
    MetadataColumnMissing(String),
}

impl ProviderError {
    /// Whether the same request may succeed once the loader publishes data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::CohortDataNotLoaded)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{0} must be fitted before calling transform")]
    NotFitted(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Numeric(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Outcome of a query that did not raise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    IdentifierNotFound(String),
    IdentifierAmbiguous(String),
    NoOverlappingSamples,
}

impl QueryStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, QueryStatus::Ok)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Ok => f.write_str("ok"),
            QueryStatus::IdentifierNotFound(id) => write!(f, "identifier not found: {id}"),
            QueryStatus::IdentifierAmbiguous(id) => {
                write!(f, "identifier matches more than one row: {id}")
            }
            QueryStatus::NoOverlappingSamples => f.write_str("no overlapping samples found"),
        }
    }
}

/// Result rows plus the tier-1 status that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome<T> {
    pub rows: Vec<T>,
    pub status: QueryStatus,
}

impl<T> QueryOutcome<T> {
    pub fn ok(rows: Vec<T>) -> Self {
        Self {
            rows,
            status: QueryStatus::Ok,
        }
    }

    pub fn empty(status: QueryStatus) -> Self {
        Self { rows: Vec::new(), status }
    }

    pub fn map_rows<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> QueryOutcome<U> {
        QueryOutcome {
            rows: f(self.rows),
            status: self.status,
        }
    }
}
