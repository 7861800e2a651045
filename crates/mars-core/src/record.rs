//! Archive record types
//!
//! Two record kinds live in an archive:
//! - `Molecule`: one tracked object with its data table, parameters and tags
//! - `Metadata`: one acquisition, shared by every molecule recorded in it
//!
//! Fields are serialized in declaration order. Every field has a default,
//! so records written by older or newer builds decode with missing fields
//! defaulted and unknown fields skipped.

use crate::table::DataTable;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Derived table computed from a pair of data-table columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentTable {
    /// Column used as the x axis
    pub x_column: String,
    /// Column used as the y axis
    pub y_column: String,
    /// Segment rows
    pub table: DataTable,
}

/// A tracked molecule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Molecule {
    /// Unique identifier
    pub uid: String,
    /// UID of the metadata record this molecule was recorded in
    pub metadata_uid: Option<String>,
    /// Free-text notes
    pub notes: String,
    /// Named scalar parameters
    #[serde(with = "crate::numbers::parameters")]
    pub parameters: IndexMap<String, f64>,
    /// Tags, in insertion order
    pub tags: IndexSet<String>,
    /// Per-molecule data table
    pub data_table: DataTable,
    /// Segment tables keyed by their column pair
    pub segment_tables: Vec<SegmentTable>,
}

impl Molecule {
    /// Create a molecule with an empty data table
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    /// Create a molecule owning `data_table`
    pub fn with_table(uid: impl Into<String>, data_table: DataTable) -> Self {
        Self {
            uid: uid.into(),
            data_table,
            ..Self::default()
        }
    }

    /// Add a tag; returns false if it was already present
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    /// Remove a tag, keeping the order of the remaining ones
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.shift_remove(tag)
    }

    /// Check for a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Set a parameter, replacing any previous value
    pub fn set_parameter(&mut self, name: impl Into<String>, value: f64) {
        self.parameters.insert(name.into(), value);
    }

    /// Read a parameter
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }

    /// Look up a segment table by its column pair
    pub fn segment_table(&self, x_column: &str, y_column: &str) -> Option<&DataTable> {
        self.segment_tables
            .iter()
            .find(|s| s.x_column == x_column && s.y_column == y_column)
            .map(|s| &s.table)
    }

    /// Insert or replace the segment table for a column pair
    pub fn put_segment_table(
        &mut self,
        x_column: impl Into<String>,
        y_column: impl Into<String>,
        table: DataTable,
    ) {
        let x_column = x_column.into();
        let y_column = y_column.into();
        match self
            .segment_tables
            .iter_mut()
            .find(|s| s.x_column == x_column && s.y_column == y_column)
        {
            Some(existing) => existing.table = table,
            None => self.segment_tables.push(SegmentTable {
                x_column,
                y_column,
                table,
            }),
        }
    }

    /// Remove the segment table for a column pair
    pub fn remove_segment_table(&mut self, x_column: &str, y_column: &str) -> bool {
        let before = self.segment_tables.len();
        self.segment_tables
            .retain(|s| !(s.x_column == x_column && s.y_column == y_column));
        before != self.segment_tables.len()
    }

    /// Column pairs of all segment tables
    pub fn segment_table_names(&self) -> Vec<(String, String)> {
        self.segment_tables
            .iter()
            .map(|s| (s.x_column.clone(), s.y_column.clone()))
            .collect()
    }
}

/// Image source descriptor attached to a metadata record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSource {
    /// Source name
    pub name: String,
    /// Path to the image data
    pub path: String,
    /// Row-major 2D affine transform `[m00, m01, m02, m10, m11, m12]`
    #[serde(with = "crate::numbers::affine")]
    pub affine: [f64; 6],
    /// Column holding the x drift correction
    pub drift_x_column: Option<String>,
    /// Column holding the y drift correction
    pub drift_y_column: Option<String>,
}

impl ViewSource {
    /// Identity transform
    pub const IDENTITY: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    /// Create a source with the identity transform
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            affine: Self::IDENTITY,
            drift_x_column: None,
            drift_y_column: None,
        }
    }

    /// Whether drift correction columns are configured
    pub fn is_drift_corrected(&self) -> bool {
        self.drift_x_column.is_some() && self.drift_y_column.is_some()
    }
}

/// Per-acquisition metadata record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Unique identifier
    pub uid: String,
    /// Acquisition data table
    pub data_table: DataTable,
    /// Processing log, one message per line
    pub log: String,
    /// Free-text notes
    pub notes: String,
    /// Named scalar parameters
    #[serde(with = "crate::numbers::parameters")]
    pub parameters: IndexMap<String, f64>,
    /// Tags, in insertion order
    pub tags: IndexSet<String>,
    /// Image sources
    pub view_sources: Vec<ViewSource>,
}

impl Metadata {
    /// Create an empty metadata record
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    /// Append a line to the log
    pub fn add_log_message(&mut self, message: &str) {
        self.log.push_str(message);
        if !message.ends_with('\n') {
            self.log.push('\n');
        }
    }

    /// Add a tag; returns false if it was already present
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    /// Check for a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Set a parameter, replacing any previous value
    pub fn set_parameter(&mut self, name: impl Into<String>, value: f64) {
        self.parameters.insert(name.into(), value);
    }

    /// Look up an image source by name
    pub fn view_source(&self, name: &str) -> Option<&ViewSource> {
        self.view_sources.iter().find(|s| s.name == name)
    }
}
