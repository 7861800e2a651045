//! Tabular data owned by molecules and metadata records
//!
//! `DataTable` is a column-major table of named `f64` columns that all share
//! one row count. The archive treats its contents as opaque; it only needs
//! to enumerate, copy and serialize tables.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One named column of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column header
    pub header: String,
    /// Cell values, one per row
    #[serde(default, with = "crate::numbers::values")]
    pub values: Vec<f64>,
}

/// Ordered collection of equally long named columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct DataTable {
    columns: Vec<Column>,
}

#[derive(Deserialize)]
struct RawTable {
    #[serde(default)]
    columns: Vec<Column>,
}

impl TryFrom<RawTable> for DataTable {
    type Error = Error;

    fn try_from(raw: RawTable) -> Result<Self> {
        let table = Self {
            columns: raw.columns,
        };
        table.validate()?;
        Ok(table)
    }
}

/// Contiguous row range sharing one value in a grouping column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupRange {
    /// Group value
    pub key: f64,
    /// First row (inclusive)
    pub start: usize,
    /// Last row (inclusive)
    pub end: usize,
}

impl DataTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with empty columns named by `headers`
    pub fn with_columns<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: headers
                .into_iter()
                .map(|h| Column {
                    header: h.into(),
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    /// Column headers in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.header.as_str()).collect()
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    /// Check whether a column exists
    pub fn has_column(&self, header: &str) -> bool {
        self.position(header).is_some()
    }

    /// Values of one column
    pub fn column(&self, header: &str) -> Option<&[f64]> {
        self.position(header).map(|i| self.columns[i].values.as_slice())
    }

    /// Add a column; existing rows are filled with NaN
    pub fn add_column(&mut self, header: impl Into<String>) -> Result<()> {
        let header = header.into();
        if self.has_column(&header) {
            return Err(Error::table(format!("column '{}' already exists", header)));
        }
        let rows = self.row_count();
        self.columns.push(Column {
            header,
            values: vec![f64::NAN; rows],
        });
        Ok(())
    }

    /// Append one row; `values` must have one entry per column
    pub fn append_row(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::table(format!(
                "row has {} values but table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.values.push(*value);
        }
        Ok(())
    }

    /// Read a cell
    pub fn get(&self, header: &str, row: usize) -> Option<f64> {
        self.column(header).and_then(|values| values.get(row).copied())
    }

    /// Overwrite a cell
    pub fn set(&mut self, header: &str, row: usize, value: f64) -> Result<()> {
        let rows = self.row_count();
        let index = self
            .position(header)
            .ok_or_else(|| Error::table(format!("no column '{}'", header)))?;
        let cell = self.columns[index]
            .values
            .get_mut(row)
            .ok_or(Error::IndexOutOfRange { index: row, len: rows })?;
        *cell = value;
        Ok(())
    }

    /// Contiguous runs of equal values in `header`, in row order
    ///
    /// Runs are not merged: a value that reappears after a different one
    /// starts a new group.
    pub fn group_indices(&self, header: &str) -> Result<Vec<GroupRange>> {
        let values = self
            .column(header)
            .ok_or_else(|| Error::table(format!("no column '{}'", header)))?;
        let mut groups: Vec<GroupRange> = Vec::new();
        for (row, &value) in values.iter().enumerate() {
            match groups.last_mut() {
                Some(group) if group.key == value => group.end = row,
                _ => groups.push(GroupRange {
                    key: value,
                    start: row,
                    end: row,
                }),
            }
        }
        Ok(groups)
    }

    /// Copy rows `start..=end` of the named columns into a new table
    pub fn slice_rows(&self, headers: &[&str], start: usize, end: usize) -> Result<Self> {
        let mut out = Self::default();
        for header in headers {
            let values = self
                .column(header)
                .ok_or_else(|| Error::table(format!("no column '{}'", header)))?;
            let rows = values.get(start..=end).ok_or(Error::IndexOutOfRange {
                index: end,
                len: values.len(),
            })?;
            out.columns.push(Column {
                header: (*header).to_string(),
                values: rows.to_vec(),
            });
        }
        Ok(out)
    }

    fn position(&self, header: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.header == header)
    }

    fn validate(&self) -> Result<()> {
        let rows = self.row_count();
        for column in &self.columns {
            if column.values.len() != rows {
                return Err(Error::table(format!(
                    "column '{}' has {} rows, expected {}",
                    column.header,
                    column.values.len(),
                    rows
                )));
            }
        }
        Ok(())
    }
}
