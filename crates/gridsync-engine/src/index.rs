//! Reverse dependency index: which triggers fire when a cell changes.
//!
//! For every cell in the snapshot and every trigger that does not except the
//! cell's row or column, the trigger is registered against the positions of
//! its targets and its invalidate slaves. `direction` decides the key:
//!
//! - `vertical`: `(item.rowId, changed column)`
//! - `horizontal`: `(changed row, item.colId)`
//! - `both`: `(item.rowId, item.colId)`
//!
//! Vertical and horizontal registrations are prepended, `both` registrations
//! are appended. The order is the order triggers fire within one cell.

use std::collections::BTreeMap;

use crate::model::{ColId, RowId, TableSnapshot};
use crate::trigger::{Direction, Trigger};

/// row id -> column id -> trigger positions.
pub type TriggerCellIndex = BTreeMap<RowId, BTreeMap<ColId, Vec<usize>>>;

/// Triggers registered at `(row, col)`.
pub fn lookup<'a>(index: &'a TriggerCellIndex, row: &str, col: &str) -> &'a [usize] {
    index
        .get(row)
        .and_then(|cols| cols.get(col))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn register(index: &mut TriggerCellIndex, row: &str, col: &str, trigger: usize, prepend: bool) {
    let list = index
        .entry(row.to_string())
        .or_default()
        .entry(col.to_string())
        .or_default();
    if list.contains(&trigger) {
        return;
    }
    if prepend {
        list.insert(0, trigger);
    } else {
        list.push(trigger);
    }
}

/// Key a target or slave position relative to the cell `(row, col)`.
/// `None` when the item lacks an id its direction needs.
fn keyed<'a>(
    direction: Direction,
    row: &'a str,
    col: &'a str,
    item_row: Option<&'a str>,
    item_col: Option<&'a str>,
) -> Option<(&'a str, &'a str, bool)> {
    match direction {
        Direction::Vertical => Some((item_row?, col, true)),
        Direction::Horizontal => Some((row, item_col?, true)),
        Direction::Both => Some((item_row?, item_col?, false)),
    }
}

/// Build the index for `triggers` over every cell of `snapshot`.
pub fn build_trigger_index(snapshot: &TableSnapshot, triggers: &[Trigger]) -> TriggerCellIndex {
    let mut index = TriggerCellIndex::new();
    for (row_id, row) in snapshot {
        for col in row.cells.keys() {
            for (position, trigger) in triggers.iter().enumerate() {
                if trigger.excepts(row_id, col) {
                    continue;
                }
                let slaves = trigger
                    .slaves
                    .iter()
                    .filter(|s| s.is_invalidate())
                    .map(|s| (s.row_id.as_deref(), s.col_id.as_deref()));
                let targets = trigger
                    .targets
                    .iter()
                    .map(|t| (t.row_id.as_deref(), t.col_id.as_deref()));
                for (item_row, item_col) in slaves.chain(targets) {
                    if let Some((r, c, prepend)) =
                        keyed(trigger.direction, row_id, col, item_row, item_col)
                    {
                        register(&mut index, r, c, position, prepend);
                    }
                }
            }
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cell, TableRow};
    use crate::trigger::{TriggerAction, TriggerSlave, TriggerTarget};

    fn table() -> TableSnapshot {
        let mut t = TableSnapshot::new();
        for (i, id) in ["r0", "r1"].iter().enumerate() {
            t.insert(
                id.to_string(),
                TableRow::new(i).with_cell("a", Cell::new("")).with_cell("b", Cell::new("")),
            );
        }
        t
    }

    fn target(row: Option<&str>, col: Option<&str>) -> TriggerTarget {
        TriggerTarget {
            row_id: row.map(String::from),
            col_id: col.map(String::from),
            condition: None,
        }
    }

    fn slave(row: Option<&str>, col: Option<&str>, action: TriggerAction) -> TriggerSlave {
        TriggerSlave {
            action,
            row_id: row.map(String::from),
            col_id: col.map(String::from),
        }
    }

    fn trigger(direction: Direction, targets: Vec<TriggerTarget>, slaves: Vec<TriggerSlave>) -> Trigger {
        Trigger {
            table_id: None,
            exceptions: None,
            direction,
            targets,
            slaves,
        }
    }

    #[test]
    fn test_vertical_registers_target_row_in_every_column() {
        let t = trigger(Direction::Vertical, vec![target(Some("r0"), None)], vec![]);
        let index = build_trigger_index(&table(), &[t]);
        assert_eq!(lookup(&index, "r0", "a"), &[0]);
        assert_eq!(lookup(&index, "r0", "b"), &[0]);
        assert!(lookup(&index, "r1", "a").is_empty());
    }

    #[test]
    fn test_horizontal_registers_target_column_in_every_row() {
        let t = trigger(Direction::Horizontal, vec![target(None, Some("a"))], vec![]);
        let index = build_trigger_index(&table(), &[t]);
        assert_eq!(lookup(&index, "r0", "a"), &[0]);
        assert_eq!(lookup(&index, "r1", "a"), &[0]);
        assert!(lookup(&index, "r0", "b").is_empty());
    }

    #[test]
    fn test_registration_is_deduplicated() {
        let t = trigger(
            Direction::Both,
            vec![target(Some("r1"), Some("b")), target(Some("r1"), Some("b"))],
            vec![slave(Some("r1"), Some("b"), TriggerAction::Invalidate)],
        );
        let index = build_trigger_index(&table(), &[t]);
        assert_eq!(lookup(&index, "r1", "b"), &[0]);
    }

    #[test]
    fn test_prepend_and_append_order() {
        let both = trigger(Direction::Both, vec![target(Some("r0"), Some("a"))], vec![]);
        let vertical = trigger(Direction::Vertical, vec![target(Some("r0"), None)], vec![]);
        let both_again = trigger(Direction::Both, vec![target(Some("r0"), Some("a"))], vec![]);
        let horizontal = trigger(Direction::Horizontal, vec![target(None, Some("a"))], vec![]);

        let index = build_trigger_index(&table(), &[both, vertical, both_again, horizontal]);
        // Vertical and horizontal jump to the front, both-direction triggers queue up.
        assert_eq!(lookup(&index, "r0", "a"), &[3, 1, 0, 2]);
    }

    #[test]
    fn test_only_invalidate_slaves_are_indexed() {
        let t = trigger(
            Direction::Both,
            vec![],
            vec![
                slave(
                    Some("r0"),
                    Some("b"),
                    TriggerAction::Formula {
                        formula: "1".into(),
                        params: None,
                    },
                ),
                slave(Some("r1"), Some("a"), TriggerAction::Invalidate),
            ],
        );
        let index = build_trigger_index(&table(), &[t]);
        assert!(lookup(&index, "r0", "b").is_empty());
        assert_eq!(lookup(&index, "r1", "a"), &[0]);
    }

    #[test]
    fn test_exceptions_skip_rows_and_columns() {
        let mut t = trigger(Direction::Vertical, vec![target(Some("r0"), None)], vec![]);
        t.exceptions = Some(vec!["b".into()]);
        let index = build_trigger_index(&table(), &[t]);
        assert_eq!(lookup(&index, "r0", "a"), &[0]);
        assert!(lookup(&index, "r0", "b").is_empty());
    }

    #[test]
    fn test_missing_ids_register_nothing() {
        let t = trigger(Direction::Both, vec![target(None, Some("a"))], vec![]);
        let index = build_trigger_index(&table(), &[t]);
        assert!(index.is_empty());
    }
}
