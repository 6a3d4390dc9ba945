//! Dataset Module
//!
//! CSV discovery and loading, and the per-column category distributions
//! reported for each dataset.

pub mod distribution;
pub mod table;

use std::path::PathBuf;
use thiserror::Error;

pub use distribution::{analyze, column_distribution, select_columns, ColumnDistribution, DatasetReport, Share};
pub use table::{dataset_name, discover, Table};

/// Dataset errors
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid dataset pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Column {0} has no values")]
    NoValues(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
