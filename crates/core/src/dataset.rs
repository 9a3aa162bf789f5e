use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single spreadsheet cell. `None` is a null cell, as opposed to an
/// explicitly empty string.
pub type Cell = Option<String>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("Row {row} has {found} cells, expected {expected}")]
    RowWidth {
        row: usize,
        found: usize,
        expected: usize,
    },
}

/// An in-memory table keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, DatasetError> {
        let mut dataset = Self::new(columns);
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    /// Builds a dataset from plain text; empty strings become null cells.
    pub fn from_text_rows(columns: &[&str], rows: &[&[&str]]) -> Result<Self, DatasetError> {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| (!v.is_empty()).then(|| v.to_string()))
                    .collect()
            })
            .collect();
        Self::from_rows(columns, rows)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), DatasetError> {
        if row.len() != self.columns.len() {
            return Err(DatasetError::RowWidth {
                row: self.rows.len(),
                found: row.len(),
                expected: self.columns.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Exact header match first, then a trimmed case-insensitive match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name).or_else(|| {
            let name = name.trim();
            self.columns
                .iter()
                .position(|c| c.trim().eq_ignore_ascii_case(name))
        })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Returns the index of `name`, appending an all-null column if absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        self.columns.len() - 1
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
    }

    pub fn raw_cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn set_cell(&mut self, row: usize, col: usize, value: String) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = Some(value);
        }
    }

    /// True when the cell is null or the empty string. Whitespace is content.
    pub fn is_cell_empty(&self, row: usize, col: usize) -> bool {
        self.cell(row, col).map_or(true, str::is_empty)
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        (0..self.rows.len()).map(move |index| Record {
            dataset: self,
            index,
        })
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Share of non-empty cells, as a percentage in `[0, 100]`.
    pub fn completion_percentage(&self) -> f64 {
        let total = self.rows.len() * self.columns.len();
        if total == 0 {
            return 0.0;
        }
        let filled = self
            .rows
            .iter()
            .flatten()
            .filter(|c| c.as_deref().is_some_and(|v| !v.is_empty()))
            .count();
        filled as f64 / total as f64 * 100.0
    }
}

/// Borrowed view of one dataset row.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> Record<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.dataset
            .column_index(column)
            .and_then(|col| self.dataset.cell(self.index, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::from_text_rows(
            &["Description", "Service", "Amount USD"],
            &[
                &["ADVICEPRO monthly fee", "", "1800.00"],
                &["Office supplies", "Admin", "250.00"],
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_text_rows_maps_empty_to_null() {
        let ds = sample();
        assert_eq!(ds.raw_cell(0, 1), Some(&None));
        assert_eq!(ds.cell(1, 1), Some("Admin"));
    }

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut ds = sample();
        let err = ds.push_row(vec![None]).unwrap_err();
        assert_eq!(
            err,
            DatasetError::RowWidth {
                row: 2,
                found: 1,
                expected: 3
            }
        );
    }

    #[test]
    fn column_index_falls_back_to_case_insensitive() {
        let ds = sample();
        assert_eq!(ds.column_index("Service"), Some(1));
        assert_eq!(ds.column_index(" service "), Some(1));
        assert_eq!(ds.column_index("Vessel"), None);
    }

    #[test]
    fn ensure_column_appends_null_column_once() {
        let mut ds = sample();
        let idx = ds.ensure_column("Vessel");
        assert_eq!(idx, 3);
        assert_eq!(ds.ensure_column("vessel"), 3);
        assert!(ds.is_cell_empty(0, idx));
        assert_eq!(ds.width(), 4);
    }

    #[test]
    fn only_null_and_empty_string_cells_are_empty() {
        let mut ds = sample();
        assert!(ds.is_cell_empty(0, 1));
        ds.set_cell(0, 1, String::new());
        assert!(ds.is_cell_empty(0, 1));
        ds.set_cell(0, 1, "   ".to_string());
        assert!(!ds.is_cell_empty(0, 1));
    }

    #[test]
    fn completion_percentage_counts_non_empty_cells() {
        let ds = sample();
        // 5 of 6 cells are filled.
        let pct = ds.completion_percentage();
        assert!((pct - 83.333).abs() < 0.01, "pct was {pct}");
        assert_eq!(Dataset::default().completion_percentage(), 0.0);
    }

    #[test]
    fn record_get_reads_by_column_name() {
        let ds = sample();
        let rec = ds.records().nth(1).unwrap();
        assert_eq!(rec.index(), 1);
        assert_eq!(rec.get("Description"), Some("Office supplies"));
        assert_eq!(rec.get("Missing"), None);
    }
}
