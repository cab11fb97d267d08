//! Trigger definitions.
//!
//! A trigger watches its `targets` and acts on its `slaves`. Triggers are
//! addressed by their position in the scheme's trigger list; the index built
//! by [`crate::index`] stores those positions.

use serde::de::{self, IntoDeserializer};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::model::{ColId, RowId, TableId};
use crate::number::format_number;

/// How a trigger's cells are keyed relative to the edited cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Same column, the slave's (or target's) row.
    Vertical,
    /// Same row, the slave's (or target's) column.
    Horizontal,
    /// The exact cell named by the slave or target.
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    IsGreater,
    IsLess,
    NotMore,
    NotLess,
    Equal,
    NotEqual,
    Includes,
    NotIncludes,
    Empty,
    NotEmpty,
    /// A name this engine does not know. It never matches and never
    /// flags a value.
    #[serde(other)]
    Unknown,
}

impl Condition {
    /// Message for a slave value that violates this numeric bound, or `None`
    /// when the value satisfies it (or the condition is not numeric).
    ///
    /// NaN slave values never violate anything.
    pub fn violation(self, slave: f64, target: f64) -> Option<String> {
        let (violated, relation) = match self {
            Condition::IsLess => (slave >= target, "меньше"),
            Condition::IsGreater => (slave <= target, "больше"),
            Condition::NotMore => (slave > target, "не больше"),
            Condition::NotLess => (slave < target, "не меньше"),
            Condition::NotEqual => (slave == target, "не равно"),
            _ => return None,
        };
        violated.then(|| format!("Значение должно быть {} {}", relation, format_number(target)))
    }
}

/// Cell a formula parameter reads; missing ids fall back to the slave's cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<RowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_id: Option<ColId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerAction {
    Formula {
        formula: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<BTreeMap<String, ParamRef>>,
    },
    Invalidate,
    Block,
    Unblock,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<RowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_id: Option<ColId>,
    #[serde(
        default,
        deserialize_with = "optional_condition",
        skip_serializing_if = "Option::is_none"
    )]
    pub condition: Option<Condition>,
}

/// Scheme editors send `""` for "no condition".
fn optional_condition<'de, D>(deserializer: D) -> Result<Option<Condition>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(name) => Condition::deserialize(name.into_deserializer())
            .map(Some)
            .map_err(|e: de::value::Error| de::Error::custom(e)),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSlave {
    pub action: TriggerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<RowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_id: Option<ColId>,
}

impl TriggerSlave {
    pub fn is_invalidate(&self) -> bool {
        matches!(self.action, TriggerAction::Invalidate)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<TableId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<Vec<String>>,
    pub direction: Direction,
    #[serde(default)]
    pub targets: Vec<TriggerTarget>,
    #[serde(default)]
    pub slaves: Vec<TriggerSlave>,
}

impl Trigger {
    /// True when the row or the column is listed in `exceptions`.
    pub fn excepts(&self, row: &str, col: &str) -> bool {
        self.exceptions
            .as_ref()
            .is_some_and(|ex| ex.iter().any(|e| e == row || e == col))
    }

    /// The other table this trigger also writes to, if any.
    pub fn foreign_table(&self, current: TableId) -> Option<TableId> {
        self.table_id.filter(|&id| id != 0 && id != current)
    }

    pub fn has_condition(&self) -> bool {
        self.targets.iter().any(|t| t.condition.is_some())
    }
}
