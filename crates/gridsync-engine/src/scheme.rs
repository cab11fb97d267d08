//! Table scheme: column options, header rows, validation rules and triggers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{ColId, RowId};
use crate::trigger::Trigger;

/// Column aggregate shown under the table.
///
/// Operators the engine does not know are kept verbatim in `Other`, so a
/// scheme written back to the store is unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SummaryKind {
    Sum,
    Max,
    Min,
    Avg,
    Other(String),
}

impl From<String> for SummaryKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "SUM" => SummaryKind::Sum,
            "MAX" => SummaryKind::Max,
            "MIN" => SummaryKind::Min,
            "AVG" => SummaryKind::Avg,
            _ => SummaryKind::Other(raw),
        }
    }
}

impl From<SummaryKind> for String {
    fn from(kind: SummaryKind) -> Self {
        match kind {
            SummaryKind::Sum => "SUM".to_string(),
            SummaryKind::Max => "MAX".to_string(),
            SummaryKind::Min => "MIN".to_string(),
            SummaryKind::Avg => "AVG".to_string(),
            SummaryKind::Other(raw) => raw,
        }
    }
}

/// Options for a column, or for a single cell when used as a custom cell.
///
/// Only the fields the engine reads are typed; everything else the client
/// stores here round-trips through `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg_exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Per-cell option overrides: row id -> column id -> options.
pub type CustomCells = BTreeMap<RowId, BTreeMap<ColId, CellOptions>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns_list: Option<Vec<ColId>>,
    #[serde(default)]
    pub cols: BTreeMap<ColId, CellOptions>,
    #[serde(default)]
    pub custom_cells: CustomCells,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TableOptions {
    /// Column ids in display order: the explicit list, else the configured columns.
    pub fn columns(&self) -> Vec<ColId> {
        match &self.columns_list {
            Some(list) => list.clone(),
            None => self.cols.keys().cloned().collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_span: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderRow {
    #[serde(rename = "rowIndex", default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    #[serde(flatten)]
    pub columns: BTreeMap<ColId, HeaderCell>,
}

pub type HeaderData = BTreeMap<RowId, HeaderRow>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationKind {
    #[serde(rename = "regExp")]
    RegExp,
    #[serde(rename = "inn")]
    Inn,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValidationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg_exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ValidationRule {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.reg_exp.is_none() && self.error_message.is_none()
    }
}

/// Column-wide rules plus per-cell overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default)]
    pub cols: BTreeMap<ColId, ValidationRule>,
    #[serde(default)]
    pub custom_cells: BTreeMap<RowId, BTreeMap<ColId, ValidationRule>>,
}

/// Everything a table needs besides its data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeData {
    #[serde(default)]
    pub header_data: HeaderData,
    #[serde(default)]
    pub options: TableOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_rules: Option<ValidationRules>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_filters: Option<bool>,
}
