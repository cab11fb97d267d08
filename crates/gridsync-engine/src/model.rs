//! Core table data structures.
//!
//! - [`Cell`] / [`CellValue`] - a single cell as clients see it
//! - [`TableRow`] / [`TableSnapshot`] - sparse row-major table keyed by row id
//! - [`ChangeCell`] / [`ChangeOverlay`] - pending edits layered over a snapshot

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::number::{format_number, parse_float_or_zero};

pub type TableId = u64;
pub type RowId = String;
pub type ColId = String;
pub type UserId = String;
pub type ConnectionId = String;

/// A cell value: clients send either text or a number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Text(String::new())
    }
}

impl CellValue {
    /// True only for the empty string.
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.is_empty())
    }

    /// True for the values clients treat as blank: the empty string, zero
    /// and NaN.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Number(n) => *n == 0.0 || n.is_nan(),
            CellValue::Text(s) => s.is_empty(),
        }
    }

    /// Text of a value, with blank values reading as `""`.
    pub fn text_or_blank(&self) -> String {
        if self.is_blank() {
            String::new()
        } else {
            self.to_string()
        }
    }

    /// Numeric reading of the value; text without a numeric prefix is zero.
    pub fn as_number(&self) -> f64 {
        match self {
            CellValue::Number(n) if n.is_nan() => 0.0,
            CellValue::Number(n) => *n,
            CellValue::Text(s) => parse_float_or_zero(s),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// Option picked in a select-type cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectedOption {
    pub label: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<SelectedOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Cell {
    pub fn new(value: impl Into<CellValue>) -> Cell {
        Cell {
            value: value.into(),
            ..Cell::default()
        }
    }

    pub fn empty() -> Cell {
        Cell::default()
    }
}

/// One table row: its cells plus the display position.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(rename = "rowIndex", default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    #[serde(flatten)]
    pub cells: BTreeMap<ColId, Cell>,
}

impl TableRow {
    pub fn new(row_index: usize) -> TableRow {
        TableRow {
            row_index: Some(row_index),
            cells: BTreeMap::new(),
        }
    }

    pub fn with_cell(mut self, col: impl Into<ColId>, cell: Cell) -> TableRow {
        self.cells.insert(col.into(), cell);
        self
    }
}

/// Sparse row-major table keyed by row id.
pub type TableSnapshot = BTreeMap<RowId, TableRow>;

/// Look up a cell in a snapshot.
pub fn snapshot_cell<'a>(snapshot: &'a TableSnapshot, row: &str, col: &str) -> Option<&'a Cell> {
    snapshot.get(row).and_then(|r| r.cells.get(col))
}

/// Display index of a row, if the row exists and has one.
pub fn row_index_of(snapshot: &TableSnapshot, row: &str) -> Option<usize> {
    snapshot.get(row).and_then(|r| r.row_index)
}

/// A pending edit for one cell, with the annotations the engine attaches.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCell {
    #[serde(default)]
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<SelectedOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_valid_message: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub row_index: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<UserId>,
}

impl ChangeCell {
    pub fn new(value: impl Into<CellValue>) -> ChangeCell {
        ChangeCell {
            value: value.into(),
            ..ChangeCell::default()
        }
    }

    /// The plain cell, without change annotations.
    pub fn to_cell(&self) -> Cell {
        Cell {
            value: self.value.clone(),
            selected: self.selected.clone(),
            label: self.label.clone(),
            id: self.id.clone(),
        }
    }
}

impl From<Cell> for ChangeCell {
    fn from(cell: Cell) -> Self {
        ChangeCell {
            value: cell.value,
            selected: cell.selected,
            label: cell.label,
            id: cell.id,
            ..ChangeCell::default()
        }
    }
}

/// Pending, not yet committed edits: row id -> column id -> change.
pub type ChangeOverlay = BTreeMap<RowId, BTreeMap<ColId, ChangeCell>>;

pub fn overlay_cell<'a>(overlay: &'a ChangeOverlay, row: &str, col: &str) -> Option<&'a ChangeCell> {
    overlay.get(row).and_then(|r| r.get(col))
}

pub fn set_overlay_cell(overlay: &mut ChangeOverlay, row: &str, col: &str, change: ChangeCell) {
    overlay
        .entry(row.to_string())
        .or_default()
        .insert(col.to_string(), change);
}

/// Total number of cells in an overlay.
pub fn overlay_len(overlay: &ChangeOverlay) -> usize {
    overlay.values().map(BTreeMap::len).sum()
}

/// Accept both `"3"` and `3` for fields the protocol types as strings.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}
