//! Column Distributions
//!
//! Percentage breakdown of categorical columns, the data behind the
//! per-column pie charts of a dataset report.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::table::Table;
use super::DatasetError;
use crate::tasks::{CancelHandle, WorkError};

/// Label of the bucket that absorbs the long tail
pub const OTHER_LABEL: &str = "Other";

/// Name fragments marking identifier and timestamp columns
const SKIPPED_NAME_FRAGMENTS: [&str; 2] = ["id", "date"];

/// One slice of a column distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub label: String,
    pub count: usize,
    pub percentage: f64,
}

/// Distribution of the non-empty values of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDistribution {
    pub column: String,
    /// Number of non-empty cells
    pub total_count: usize,
    pub shares: Vec<Share>,
}

/// Column that could not be summarised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnError {
    pub column: String,
    pub error: String,
}

/// Report for one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub rows: usize,
    pub columns: Vec<ColumnDistribution>,
    pub errors: Vec<ColumnError>,
    pub generated_at: DateTime<Utc>,
}

impl DatasetReport {
    /// Write the report as `<dataset>.json` inside `dir`
    pub fn save(&self, dir: &Path) -> Result<PathBuf, DatasetError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.dataset));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        info!("Saved report for {} to {}", self.dataset, path.display());
        Ok(path)
    }
}

/// Columns worth charting.
///
/// Identifier and date columns are dropped by name. Text columns are
/// kept; numeric columns only when they have few distinct values.
pub fn select_columns(table: &Table, max_categories: usize) -> Vec<String> {
    table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, name)| {
            let lower = name.to_lowercase();
            !SKIPPED_NAME_FRAGMENTS.iter().any(|f| lower.contains(f))
        })
        .filter(|(index, _)| {
            let values: Vec<&str> = table.column(*index).filter(|v| !v.is_empty()).collect();
            let numeric = !values.is_empty() && values.iter().all(|v| is_number(v));
            if !numeric {
                return true;
            }
            let mut distinct = values.clone();
            distinct.sort_unstable();
            distinct.dedup();
            distinct.len() <= max_categories
        })
        .map(|(_, name)| name.clone())
        .collect()
}

/// Finite decimal number; `NaN` and `inf` spellings count as text
fn is_number(value: &str) -> bool {
    value.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Percentage of each value in a column.
///
/// Empty cells count as missing. Slices are ordered by count (ties by
/// label); past `max_categories` slices the tail is merged into
/// [`OTHER_LABEL`].
pub fn column_distribution(
    table: &Table,
    column: &str,
    max_categories: usize,
) -> Result<ColumnDistribution, DatasetError> {
    let index = table
        .column_index(column)
        .ok_or_else(|| DatasetError::UnknownColumn(column.to_string()))?;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in table.column(index).filter(|v| !v.is_empty()) {
        *counts.entry(value).or_insert(0) += 1;
    }
    let total_count: usize = counts.values().sum();
    if total_count == 0 {
        return Err(DatasetError::NoValues(column.to_string()));
    }

    let mut ordered: Vec<(&str, usize)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    if ordered.len() > max_categories {
        let keep = max_categories.saturating_sub(1);
        let other: usize = ordered[keep..].iter().map(|(_, count)| count).sum();
        ordered.truncate(keep);
        ordered.push((OTHER_LABEL, other));
    }

    let shares = ordered
        .into_iter()
        .map(|(label, count)| Share {
            label: label.to_string(),
            count,
            percentage: count as f64 * 100.0 / total_count as f64,
        })
        .collect();

    Ok(ColumnDistribution {
        column: column.to_string(),
        total_count,
        shares,
    })
}

/// Summarise every selected column, checking for cancellation between columns
pub fn analyze(
    table: &Table,
    dataset: &str,
    max_categories: usize,
    cancel: &CancelHandle,
) -> Result<DatasetReport, WorkError> {
    let columns = select_columns(table, max_categories);
    debug!("{}: analysing {} columns", dataset, columns.len());

    let mut report = DatasetReport {
        dataset: dataset.to_string(),
        rows: table.rows.len(),
        columns: Vec::new(),
        errors: Vec::new(),
        generated_at: Utc::now(),
    };

    for column in columns {
        cancel.check()?;
        match column_distribution(table, &column, max_categories) {
            Ok(distribution) => report.columns.push(distribution),
            Err(e) => report.errors.push(ColumnError {
                column,
                error: e.to_string(),
            }),
        }
    }

    info!(
        "{}: {} columns summarised, {} errors",
        dataset,
        report.columns.len(),
        report.errors.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> Table {
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_select_columns() {
        let t = table(
            "CustomerID,Product,Rating,Amount,Date received\n\
             1,loan,1,10.5,2020-01-01\n\
             2,card,2,11.25,2020-01-02\n\
             3,loan,1,12.75,2020-01-03\n",
        );
        // Amount has 3 distinct numeric values, above the limit of 2
        assert_eq!(select_columns(&t, 2), vec!["Product", "Rating"]);
        assert_eq!(select_columns(&t, 10), vec!["Product", "Rating", "Amount"]);
    }

    #[test]
    fn test_non_finite_tokens_are_text() {
        let t = table("flag,score\nNaN,1\ninf,2\ninfinity,3\n-inf,4\n");
        // four distinct values, above the limit, would drop a numeric column
        assert_eq!(select_columns(&t, 2), vec!["flag"]);
        assert!(is_number("1e3"));
        assert!(!is_number("NaN"));
        assert!(!is_number("-Infinity"));
    }

    #[test]
    fn test_distribution_percentages() {
        let t = table("color\nred\nblue\nred\n\nred\n");
        let dist = column_distribution(&t, "color", 10).unwrap();

        assert_eq!(dist.total_count, 4);
        assert_eq!(dist.shares.len(), 2);
        assert_eq!(dist.shares[0].label, "red");
        assert_eq!(dist.shares[0].count, 3);
        assert!((dist.shares[0].percentage - 75.0).abs() < 1e-9);
        assert!((dist.shares[1].percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_tail_merged_into_other() {
        let t = table("v\na\na\na\nb\nb\nc\nd\ne\n");
        let dist = column_distribution(&t, "v", 3).unwrap();

        let labels: Vec<&str> = dist.shares.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", OTHER_LABEL]);
        assert_eq!(dist.shares[2].count, 3);
        let total: f64 = dist.shares.iter().map(|s| s.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_ordered_by_label() {
        let t = table("v\nz\ny\nx\n");
        let dist = column_distribution(&t, "v", 10).unwrap();
        let labels: Vec<&str> = dist.shares.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_empty_column_is_error() {
        let t = table("a,b\n1,\n2,\n");
        assert!(matches!(
            column_distribution(&t, "b", 10),
            Err(DatasetError::NoValues(_))
        ));
        assert!(matches!(
            column_distribution(&t, "missing", 10),
            Err(DatasetError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_analyze_collects_column_errors() {
        let t = table("kind,note\nx,\ny,\n");
        let report = analyze(&t, "sample", 10, &CancelHandle::new()).unwrap();

        assert_eq!(report.rows, 2);
        assert_eq!(report.columns.len(), 1);
        assert_eq!(report.columns[0].column, "kind");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].column, "note");
    }

    #[test]
    fn test_analyze_stops_when_cancelled() {
        let t = table("kind\nx\n");
        let cancel = CancelHandle::new();
        cancel.request();
        assert!(matches!(
            analyze(&t, "sample", 10, &cancel),
            Err(WorkError::Cancelled)
        ));
    }

    #[test]
    fn test_report_save() {
        let dir = tempfile::tempdir().unwrap();
        let t = table("kind\nx\ny\n");
        let report = analyze(&t, "complaints", 10, &CancelHandle::new()).unwrap();

        let path = report.save(&dir.path().join("reports")).unwrap();
        assert!(path.ends_with("complaints.json"));
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved["dataset"], "complaints");
        assert_eq!(saved["columns"][0]["shares"][0]["percentage"], 50.0);
    }
}
