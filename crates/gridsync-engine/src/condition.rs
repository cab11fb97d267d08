//! Condition triggers: block or unblock cells depending on other cells.
//!
//! Runs the same level-synchronous cascade as [`crate::propagate`], but over
//! triggers whose targets carry a condition. Each activated trigger computes
//! one `match` over all its targets and sets `editable` on its block/unblock
//! slaves in the row that fired it.

use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::index::{lookup, TriggerCellIndex};
use crate::model::{
    overlay_cell, overlay_len, set_overlay_cell, snapshot_cell, ChangeCell, ChangeOverlay, TableSnapshot,
};
use crate::scheme::{CellOptions, CustomCells};
use crate::trigger::{Condition, Trigger, TriggerAction, TriggerTarget};

/// Left-hand side of a comparison: plain text or a multi-select list.
#[derive(Clone, Debug, PartialEq)]
pub enum CompareValue {
    Text(String),
    List(Vec<String>),
}

/// Compare `value` against `check`.
///
/// `includes`/`not_includes` test list items as substrings of `check`; on
/// plain text they never match. Numeric conditions never match here.
pub fn compare(condition: Condition, value: &CompareValue, check: &str) -> bool {
    match (condition, value) {
        (Condition::Equal, CompareValue::Text(v)) => v == check,
        (Condition::Equal, CompareValue::List(items)) => items.iter().any(|i| i == check),
        (Condition::NotEqual, CompareValue::Text(v)) => v != check,
        (Condition::NotEqual, CompareValue::List(items)) => !items.iter().any(|i| i == check),
        (Condition::Empty, CompareValue::Text(v)) => v.is_empty(),
        (Condition::Empty, CompareValue::List(items)) => items.is_empty(),
        (Condition::NotEmpty, CompareValue::Text(v)) => !v.is_empty(),
        (Condition::NotEmpty, CompareValue::List(items)) => !items.is_empty(),
        (Condition::Includes, CompareValue::List(items)) => {
            !items.is_empty() && items.iter().all(|i| check.contains(i.as_str()))
        }
        (Condition::NotIncludes, CompareValue::List(items)) => {
            items.is_empty() || !items.iter().any(|i| check.contains(i.as_str()))
        }
        _ => false,
    }
}

/// Does the target's cell in `row` satisfy its condition? Changes win over
/// the snapshot; a cell in neither reads as `"0"`.
fn target_matches(snapshot: &TableSnapshot, changes: &ChangeOverlay, row: &str, target: &TriggerTarget) -> bool {
    let Some(condition) = target.condition else {
        return false;
    };
    let col = target.col_id.as_deref().unwrap_or_default();
    let text = match overlay_cell(changes, row, col) {
        Some(change) => change.value.text_or_blank(),
        None => match snapshot_cell(snapshot, row, col) {
            Some(cell) => cell.value.text_or_blank(),
            None => "0".to_string(),
        },
    };
    // The reference is always the empty string.
    compare(condition, &CompareValue::Text(text), "")
}

/// Resolve condition triggers fired by `changes` into per-cell `editable` flags.
pub fn resolve_conditions(
    snapshot: &TableSnapshot,
    changes: &ChangeOverlay,
    index: &TriggerCellIndex,
    triggers: &[Trigger],
    max_rounds: usize,
) -> Result<CustomCells> {
    let mut fresh = CustomCells::new();
    let mut frontier = changes.clone();
    let mut rounds = 0;

    while overlay_len(&frontier) > 0 {
        if rounds == max_rounds {
            return Err(EngineError::CascadeLimit { rounds });
        }
        rounds += 1;

        let mut next = ChangeOverlay::new();
        for (row_key, cols) in &frontier {
            for col_key in cols.keys() {
                for &position in lookup(index, row_key, col_key) {
                    let Some(trigger) = triggers.get(position) else {
                        continue;
                    };
                    if !trigger.has_condition() {
                        continue;
                    }
                    let matched = trigger
                        .targets
                        .iter()
                        .all(|t| target_matches(snapshot, changes, row_key, t));

                    for slave in &trigger.slaves {
                        let editable = match slave.action {
                            TriggerAction::Block => !matched,
                            TriggerAction::Unblock => matched,
                            _ => continue,
                        };
                        let Some(col) = slave.col_id.as_deref() else {
                            continue;
                        };
                        fresh.entry(row_key.clone()).or_default().insert(
                            col.to_string(),
                            CellOptions {
                                editable: Some(editable),
                                ..CellOptions::default()
                            },
                        );
                        let touch = ChangeCell {
                            row_index: Some(row_key.clone()),
                            user_id: Some("1".to_string()),
                            ..ChangeCell::default()
                        };
                        set_overlay_cell(&mut next, row_key, col, touch);
                    }
                }
            }
        }
        frontier = next;
    }

    Ok(fresh)
}

/// Every snapshot cell as a change, so a freshly loaded table can establish
/// its condition-derived state before anyone edits it.
pub fn start_overlay(snapshot: &TableSnapshot) -> ChangeOverlay {
    let mut overlay = ChangeOverlay::new();
    for (row_id, row) in snapshot {
        let row_index = row.row_index.map(|i| i.to_string());
        let cols: BTreeMap<_, _> = row
            .cells
            .iter()
            .map(|(col, cell)| {
                let change = ChangeCell {
                    value: cell.value.clone(),
                    row_index: row_index.clone(),
                    user_id: Some("0".to_string()),
                    ..ChangeCell::default()
                };
                (col.clone(), change)
            })
            .collect();
        overlay.insert(row_id.clone(), cols);
    }
    overlay
}

pub fn resolve_conditions_on_start(
    snapshot: &TableSnapshot,
    index: &TriggerCellIndex,
    triggers: &[Trigger],
    max_rounds: usize,
) -> Result<CustomCells> {
    resolve_conditions(snapshot, &start_overlay(snapshot), index, triggers, max_rounds)
}

/// Merge freshly resolved `editable` flags into the persisted custom cells.
/// Returns only the entries whose flag actually changed.
pub fn apply_custom_cells(existing: &mut CustomCells, fresh: CustomCells) -> CustomCells {
    let mut diff = CustomCells::new();
    for (row, cols) in fresh {
        for (col, options) in cols {
            let current = existing.get(&row).and_then(|c| c.get(&col)).and_then(|o| o.editable);
            if current == options.editable {
                continue;
            }
            existing
                .entry(row.clone())
                .or_default()
                .entry(col.clone())
                .or_default()
                .editable = options.editable;
            diff.entry(row.clone()).or_default().insert(col, options);
        }
    }
    diff
}
