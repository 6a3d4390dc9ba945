//! CSV Tables
//!
//! Loads dataset files into string tables for column statistics.

use log::{debug, info};
use std::io::Read;
use std::path::{Path, PathBuf};

use super::DatasetError;

/// In-memory CSV table, every cell kept as text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Load a CSV file with a header row
    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let file = std::fs::File::open(path).map_err(|source| DatasetError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_reader(file)?;
        info!(
            "Loaded {} ({} rows, {} columns)",
            path.display(),
            table.rows.len(),
            table.headers.len()
        );
        Ok(table)
    }

    /// Parse CSV data with a header row; short rows are padded with empty cells
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Index of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cells of one column
    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str).unwrap_or(""))
    }
}

/// All `*.csv` files directly inside `dir`, sorted by path
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let pattern = dir.join("*.csv");
    let pattern = pattern.to_string_lossy();

    let mut paths: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Dataset name derived from a file path
pub fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_reader_pads_short_rows() {
        let data = "name, city ,age\nalice,paris,30\nbob,berlin\n";
        let table = Table::from_reader(data.as_bytes()).unwrap();

        assert_eq!(table.headers, vec!["name", "city", "age"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["bob", "berlin", ""]);
        assert_eq!(table.column_index("age"), Some(2));
        assert_eq!(table.column(1).collect::<Vec<_>>(), vec!["paris", "berlin"]);
    }

    #[test]
    fn test_discover_sorted_csv_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "x\n1\n").unwrap();
        std::fs::write(dir.path().join("a.csv"), "x\n1\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let found = discover(dir.path()).unwrap();
        let names: Vec<String> = found.iter().map(|p| dataset_name(p)).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Table::from_path(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, DatasetError::Open { .. }));
    }
}
