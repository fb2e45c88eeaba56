//! Tabular batches: CSV in, scored CSV and JSON summary out.

pub mod scored;
pub mod summary;

pub use scored::{ChannelScores, ScoredBatch};
pub use summary::Summary;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch has no header row")]
    Empty,

    #[error("unreadable CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("i/o error while rendering batch: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch contains none of the configured channels {expected:?}")]
    MissingChannels { expected: Vec<String> },

    #[error("column '{column}' row {row}: '{value}' is not numeric")]
    NonNumeric {
        column: String,
        row: usize,
        value: String,
    },

    #[error("column '{column}' has {found} values, expected {expected}")]
    RaggedColumns {
        column: String,
        expected: usize,
        found: usize,
    },
}

/// Cell spellings read as "no value".
const NULL_TOKENS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

/// An ordered set of rows with named columns. Cells are kept as read so
/// non-channel columns pass through to the output untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Batch {
    /// Parse a CSV document with a header row.
    pub fn from_csv(bytes: &[u8]) -> Result<Self, BatchError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(BatchError::Empty);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Build a batch from numeric columns of equal length.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<Option<f64>>)>) -> Result<Self, BatchError> {
        let columns: Vec<(String, Vec<Option<f64>>)> =
            columns.into_iter().map(|(name, values)| (name.into(), values)).collect();
        if columns.is_empty() {
            return Err(BatchError::Empty);
        }

        let len = columns[0].1.len();
        if let Some((name, values)) = columns.iter().find(|(_, v)| v.len() != len) {
            return Err(BatchError::RaggedColumns {
                column: name.clone(),
                expected: len,
                found: values.len(),
            });
        }

        let rows = (0..len)
            .map(|i| {
                columns
                    .iter()
                    .map(|(_, values)| values[i].map(|v| v.to_string()).unwrap_or_default())
                    .collect()
            })
            .collect();
        let headers = columns.into_iter().map(|(name, _)| name).collect();

        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Configured channels that appear among this batch's columns, in
    /// configuration order.
    pub fn present_channels<'c>(&self, channels: &'c [String]) -> Vec<&'c str> {
        channels
            .iter()
            .filter(|c| self.has_column(c))
            .map(String::as_str)
            .collect()
    }

    /// Values of a numeric column, `None` per absent cell. Returns `Ok(None)`
    /// when the column does not exist.
    pub fn numeric_column(&self, name: &str) -> Result<Option<Vec<Option<f64>>>, BatchError> {
        let Some(idx) = self.column_index(name) else {
            return Ok(None);
        };

        self.rows
            .iter()
            .enumerate()
            .map(|(row, cells)| {
                let raw = cells.get(idx).map(String::as_str).unwrap_or("");
                parse_cell(raw).ok_or_else(|| BatchError::NonNumeric {
                    column: name.to_string(),
                    row,
                    value: raw.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Reject a batch that cannot be scored: it must carry at least one
    /// configured channel and every configured channel present must be
    /// numeric.
    pub fn validate(&self, channels: &[String]) -> Result<(), BatchError> {
        let present = self.present_channels(channels);
        if present.is_empty() {
            return Err(BatchError::MissingChannels {
                expected: channels.to_vec(),
            });
        }
        for channel in present {
            self.numeric_column(channel)?;
        }
        Ok(())
    }
}

/// `Some(None)` for an absent cell, `Some(Some(v))` for a number, `None` for
/// anything else.
fn parse_cell(raw: &str) -> Option<Option<f64>> {
    let trimmed = raw.trim();
    if NULL_TOKENS.contains(&trimmed) {
        return Some(None);
    }
    trimmed.parse::<f64>().ok().map(Some)
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
