use ledgerfill_core::{Cell, Dataset, DatasetError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvImportProfile {
    pub has_header: bool,
    pub delimiter: String,
    /// Leading metadata rows to discard before the header.
    pub skip_rows: usize,
    pub drop_blank_rows: bool,
}

impl Default for CsvImportProfile {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: ",".to_string(),
            skip_rows: 0,
            drop_blank_rows: true,
        }
    }
}

impl CsvImportProfile {
    fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b',')
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("No header row")]
    NoHeader,
    #[error("No data rows")]
    NoDataRows,
}

/// Reads a delimited file into a [`Dataset`]. Every cell is kept as text;
/// empty cells become nulls.
pub fn read_dataset<R: Read>(data: R, profile: &CsvImportProfile) -> Result<Dataset, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(profile.delimiter_byte())
        .from_reader(data);

    let mut records = reader.records().skip(profile.skip_rows);

    let columns: Vec<String> = if profile.has_header {
        let header = records.next().ok_or(CsvError::NoHeader)??;
        header
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let name = name.trim();
                if name.is_empty() {
                    format!("Unnamed_{i}")
                } else {
                    name.to_string()
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut width = columns.len();
    let mut truncated = 0usize;

    for result in records {
        let record = result?;
        let mut row: Vec<Cell> = record
            .iter()
            .map(|s| (!s.trim().is_empty()).then(|| s.to_string()))
            .collect();

        if profile.drop_blank_rows && row.iter().all(Option::is_none) {
            continue;
        }

        if profile.has_header {
            if row.len() > width {
                truncated += 1;
                row.truncate(width);
            }
        } else {
            width = width.max(row.len());
        }
        rows.push(row);
    }

    if truncated > 0 {
        tracing::warn!("{truncated} row(s) had more cells than the header and were truncated");
    }

    if rows.is_empty() {
        return Err(CsvError::NoDataRows);
    }

    let columns = if profile.has_header {
        columns
    } else {
        (1..=width).map(|i| format!("Column{i}")).collect()
    };

    for row in &mut rows {
        row.resize(width, None);
    }

    let dataset = Dataset::from_rows(columns, rows)?;
    tracing::debug!(
        rows = dataset.len(),
        columns = dataset.width(),
        "CSV dataset loaded"
    );
    Ok(dataset)
}

/// Writes a dataset back out with a header row. Null cells are written empty.
pub fn write_dataset<W: Write>(
    dataset: &Dataset,
    out: W,
    delimiter: u8,
) -> Result<(), CsvError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(out);
    writer.write_record(dataset.columns())?;
    for row in dataset.rows() {
        writer.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}
