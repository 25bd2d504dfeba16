//! Best-effort annotation merge for result rows.
//!
//! Enrichment is optional decoration: if the annotation table cannot be fetched or does not
//! carry the requested columns, the failure is logged and the rows come back with empty
//! annotations. The primary result is never lost to an enrichment error.
//!
//! ```rust
//! use cohort_statistics::enrichment::{Annotated, AnnotationMerge, enrich_rows};
//!
//! let rows = vec!["EGFR".to_string(), "KRAS".to_string()];
//! let merged: Vec<Annotated<String>> = enrich_rows(
//!     rows,
//!     || Err(anyhow::anyhow!("annotation store offline")),
//!     |row: &String| row.as_str(),
//!     &AnnotationMerge::DIFFERENTIAL,
//! );
//! assert_eq!(merged.len(), 2);
//! assert!(merged[0].annotations.is_empty());
//! ```

use crate::provider::AnnotationTable;
use anyhow::anyhow;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Columns kept from the phosphosite annotation table when decorating differential rows.
pub const PHOSPHO_ANNOTATION_COLUMNS: [&str; 4] = [
    "Gene names",
    "Proteins",
    "PSP Kinases",
    "Site positions identified (MQ)",
];

/// Which columns to merge and how to fill cells without a value.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationMerge<'a> {
    /// `None` keeps every column of the table.
    pub columns: Option<&'a [&'a str]>,
    pub fill: &'a str,
}

impl AnnotationMerge<'static> {
    pub const DIFFERENTIAL: Self = Self {
        columns: None,
        fill: "n.d.",
    };

    pub const DIFFERENTIAL_PHOSPHO: Self = Self {
        columns: Some(&PHOSPHO_ANNOTATION_COLUMNS),
        fill: "n.d.",
    };

    pub const CORRELATION: Self = Self {
        columns: None,
        fill: "",
    };
}

/// Ordered `column -> value` pairs that serialize as map entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationValues(pub Vec<(String, String)>);

impl AnnotationValues {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v.as_str())
    }
}

impl Serialize for AnnotationValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, value) in &self.0 {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// A result row followed by its annotation columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotated<R> {
    #[serde(flatten)]
    pub row: R,
    #[serde(flatten)]
    pub annotations: AnnotationValues,
}

impl<R> Annotated<R> {
    pub fn bare(row: R) -> Self {
        Self {
            row,
            annotations: AnnotationValues::default(),
        }
    }
}

/// Left-join `rows` with the table returned by `fetch`, matching on `key`.
///
/// Any failure yields the rows without annotations.
pub fn enrich_rows<R, F, K>(rows: Vec<R>, fetch: F, key: K, merge: &AnnotationMerge<'_>) -> Vec<Annotated<R>>
where
    F: FnOnce() -> anyhow::Result<Arc<AnnotationTable>>,
    K: Fn(&R) -> &str,
{
    match fetch().and_then(|table| column_positions(&table, merge).map(|positions| (table, positions))) {
        Ok((table, positions)) => {
            debug!(rows = rows.len(), columns = positions.len(), "merging annotations");
            rows.into_iter()
                .map(|row| {
                    let values = table.get(key(&row));
                    let annotations = positions
                        .iter()
                        .map(|(column, i)| {
                            let value = values
                                .and_then(|v| v[*i].clone())
                                .unwrap_or_else(|| merge.fill.to_string());
                            (column.clone(), value)
                        })
                        .collect();
                    Annotated {
                        row,
                        annotations: AnnotationValues(annotations),
                    }
                })
                .collect()
        }
        Err(err) => {
            warn!(error = %err, "annotation merge failed; returning rows without annotations");
            rows.into_iter().map(Annotated::bare).collect()
        }
    }
}

fn column_positions(table: &AnnotationTable, merge: &AnnotationMerge<'_>) -> anyhow::Result<Vec<(String, usize)>> {
    match merge.columns {
        None => Ok(table.columns().iter().cloned().enumerate().map(|(i, c)| (c, i)).collect()),
        Some(wanted) => wanted
            .iter()
            .map(|&column| {
                table
                    .columns()
                    .iter()
                    .position(|c| c == column)
                    .map(|i| (column.to_string(), i))
                    .ok_or_else(|| anyhow!("Annotation table has no column {}", column))
            })
            .collect(),
    }
}
