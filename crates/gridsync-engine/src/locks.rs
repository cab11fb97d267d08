//! Soft edit locks.
//!
//! Each connection holds a set of cells it is editing. Locks are advisory:
//! they only tell other clients which cells to render as busy.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::model::{ColId, ConnectionId, RowId, TableSnapshot};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFlag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    /// Display index the client saw when it claimed the cell.
    #[serde(
        default,
        deserialize_with = "lenient_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub row_index: Option<usize>,
}

/// Cells one connection holds: row id -> column id -> flag.
pub type LockedCells = BTreeMap<RowId, BTreeMap<ColId, LockFlag>>;

/// Locked columns per display row index.
pub type BlockView = BTreeMap<String, Vec<ColId>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockMap {
    connections: BTreeMap<ConnectionId, LockedCells>,
}

impl LockMap {
    pub fn new() -> LockMap {
        LockMap::default()
    }

    /// Replace everything `conn` holds with `cells`.
    pub fn claim(&mut self, conn: &str, cells: LockedCells) {
        self.connections.insert(conn.to_string(), cells);
    }

    /// Drop every lock `conn` holds. Returns false if it held none.
    pub fn release(&mut self, conn: &str) -> bool {
        self.connections.remove(conn).is_some()
    }

    /// Drop the whole entry of the first connection holding `(row, col)`.
    /// Returns that connection.
    pub fn release_cell(&mut self, row: &str, col: &str) -> Option<ConnectionId> {
        let holder = self
            .connections
            .iter()
            .find(|(_, cells)| cells.get(row).is_some_and(|cols| cols.contains_key(col)))
            .map(|(conn, _)| conn.clone())?;
        self.connections.remove(&holder);
        Some(holder)
    }

    pub fn holds(&self, conn: &str) -> bool {
        self.connections.contains_key(conn)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// All locks keyed by display row index. The snapshot's index wins over
    /// the one recorded at claim time; cells with neither are left out.
    pub fn block_view(&self, snapshot: &TableSnapshot) -> BlockView {
        let mut view = BlockView::new();
        for cells in self.connections.values() {
            for (row_id, cols) in cells {
                let current = snapshot.get(row_id).and_then(|r| r.row_index);
                for (col, flag) in cols {
                    let Some(index) = current.or(flag.row_index) else {
                        continue;
                    };
                    view.entry(index.to_string()).or_default().push(col.clone());
                }
            }
        }
        view
    }
}

fn lenient_index<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(usize),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cell, TableRow};

    fn cells(pairs: &[(&str, &str)]) -> LockedCells {
        let mut out = LockedCells::new();
        for (row, col) in pairs {
            out.entry(row.to_string()).or_default().insert(
                col.to_string(),
                LockFlag {
                    blocked: Some(true),
                    row_index: None,
                },
            );
        }
        out
    }

    fn table() -> TableSnapshot {
        let mut t = TableSnapshot::new();
        t.insert("r0".into(), TableRow::new(0).with_cell("a", Cell::new("")));
        t.insert("r1".into(), TableRow::new(1).with_cell("a", Cell::new("")));
        t
    }

    #[test]
    fn test_claim_replaces_previous_set() {
        let mut locks = LockMap::new();
        locks.claim("c1", cells(&[("r0", "a")]));
        locks.claim("c1", cells(&[("r1", "b")]));

        let view = locks.block_view(&table());
        assert_eq!(view.get("0"), None);
        assert_eq!(view["1"], vec!["b"]);
    }

    #[test]
    fn test_block_view_unions_connections() {
        let mut locks = LockMap::new();
        locks.claim("c1", cells(&[("r0", "a")]));
        locks.claim("c2", cells(&[("r0", "b"), ("r1", "a")]));

        let view = locks.block_view(&table());
        assert_eq!(view["0"], vec!["a", "b"]);
        assert_eq!(view["1"], vec!["a"]);
    }

    #[test]
    fn test_release_cell_drops_whole_entry() {
        let mut locks = LockMap::new();
        locks.claim("c1", cells(&[("r0", "a"), ("r1", "a")]));
        locks.claim("c2", cells(&[("r1", "b")]));

        assert_eq!(locks.release_cell("r0", "a").as_deref(), Some("c1"));
        assert!(!locks.holds("c1"));
        assert!(locks.holds("c2"));
        assert_eq!(locks.release_cell("r0", "a"), None);
    }

    #[test]
    fn test_block_view_falls_back_to_claimed_index() {
        let locks: LockMap =
            serde_json::from_str(r#"{"c1": {"gone": {"a": {"blocked": true, "rowIndex": "4"}}, "ghost": {"b": {}}}}"#)
                .unwrap();
        let view = locks.block_view(&table());
        assert_eq!(view["4"], vec!["a"]);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_release_connection() {
        let mut locks = LockMap::new();
        locks.claim("c1", cells(&[("r0", "a")]));
        assert!(locks.release("c1"));
        assert!(!locks.release("c1"));
        assert!(locks.is_empty());
    }
}
