//! Conversions between the sparse snapshot and ordered views, plus
//! structural row edits.
//!
//! Row edits keep `rowIndex` a dense permutation of `0..rows`. Edits that
//! name an unknown row, or a row without a display index, leave the table
//! untouched.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Cell, CellValue, ChangeCell, ChangeOverlay, ColId, RowId, TableRow, TableSnapshot};
use crate::scheme::{HeaderCell, HeaderData};

/// A cell annotated with the row it came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaggedCell<T> {
    #[serde(flatten)]
    pub cell: T,
    #[serde(rename = "rowId")]
    pub row_id: RowId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortedRow {
    #[serde(rename = "rowId")]
    pub row_id: RowId,
    #[serde(flatten)]
    pub cells: BTreeMap<ColId, TaggedCell<Cell>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowListEntry {
    #[serde(rename = "rowId")]
    pub row_id: RowId,
    pub data: BTreeMap<ColId, Cell>,
}

/// A stored cell: either a full cell object or a bare value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SavedCell {
    Full(Cell),
    Value(CellValue),
}

/// One row of the canonical row-array form the table service stores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedRow {
    #[serde(rename = "_id")]
    pub id: RowId,
    #[serde(flatten)]
    pub cells: BTreeMap<ColId, SavedCell>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeaderRowEntry {
    #[serde(rename = "rowId")]
    pub row_id: RowId,
    pub columns: BTreeMap<ColId, HeaderCell>,
}

/// Changes re-keyed by display row index, as clients render them.
pub type IndexedChanges = BTreeMap<String, BTreeMap<ColId, TaggedCell<ChangeCell>>>;

/// Row ids ordered by display index; rows without an index come last.
fn ordered_row_ids(snapshot: &TableSnapshot) -> Vec<&RowId> {
    let mut ids: Vec<&RowId> = snapshot.keys().collect();
    // Stable sort keeps encounter order among rows without an index.
    ids.sort_by_key(|id| snapshot[*id].row_index.unwrap_or(usize::MAX));
    ids
}

/// Ordered view of the rows that have a display index.
pub fn sorted_rows(snapshot: &TableSnapshot) -> Vec<SortedRow> {
    ordered_row_ids(snapshot)
        .into_iter()
        .filter(|id| snapshot[*id].row_index.is_some())
        .map(|id| SortedRow {
            row_id: id.clone(),
            cells: snapshot[id]
                .cells
                .iter()
                .map(|(col, cell)| {
                    let tagged = TaggedCell {
                        cell: cell.clone(),
                        row_id: id.clone(),
                    };
                    (col.clone(), tagged)
                })
                .collect(),
        })
        .collect()
}

/// Rows in display order restricted to `columns`; missing cells read as empty.
pub fn row_list(snapshot: &TableSnapshot, columns: &[ColId]) -> Vec<RowListEntry> {
    if columns.is_empty() {
        return Vec::new();
    }
    ordered_row_ids(snapshot)
        .into_iter()
        .map(|id| {
            let row = &snapshot[id];
            let data = columns
                .iter()
                .filter(|col| col.as_str() != "rowIndex")
                .map(|col| (col.clone(), row.cells.get(col).cloned().unwrap_or_default()))
                .collect();
            RowListEntry {
                row_id: id.clone(),
                data,
            }
        })
        .collect()
}

/// Canonical row-array form, ordered by display index.
pub fn prepare_for_save(snapshot: &TableSnapshot) -> Vec<SavedRow> {
    sorted_rows(snapshot)
        .into_iter()
        .map(|row| SavedRow {
            id: row.row_id,
            cells: row
                .cells
                .into_iter()
                .map(|(col, tagged)| (col, SavedCell::Full(tagged.cell)))
                .collect(),
        })
        .collect()
}

/// Build a snapshot from the canonical row-array form. Every listed column
/// gets a cell; row position becomes the display index.
pub fn from_saved(rows: &[SavedRow], columns: &[ColId]) -> TableSnapshot {
    rows.iter()
        .enumerate()
        .map(|(i, saved)| {
            let mut row = TableRow::new(i);
            for col in columns {
                let cell = match saved.cells.get(col) {
                    Some(SavedCell::Full(cell)) => cell.clone(),
                    Some(SavedCell::Value(value)) if !value.is_empty() => Cell::new(value.clone()),
                    _ => Cell::empty(),
                };
                row.cells.insert(col.clone(), cell);
            }
            (saved.id.clone(), row)
        })
        .collect()
}

/// Re-key an overlay by display row index, tagging each cell with its row id.
/// Rows the snapshot does not know are dropped.
pub fn by_row_index(overlay: &ChangeOverlay, snapshot: &TableSnapshot) -> IndexedChanges {
    let mut out = IndexedChanges::new();
    for (row_id, cols) in overlay {
        let Some(index) = snapshot.get(row_id).and_then(|r| r.row_index) else {
            continue;
        };
        let entry = out.entry(index.to_string()).or_default();
        for (col, change) in cols {
            entry.insert(
                col.clone(),
                TaggedCell {
                    cell: change.clone(),
                    row_id: row_id.clone(),
                },
            );
        }
    }
    out
}

/// Header rows ordered by display index.
pub fn transform_header(header: &HeaderData) -> Vec<HeaderRowEntry> {
    let mut ids: Vec<&RowId> = header.keys().collect();
    ids.sort_by_key(|id| header[*id].row_index.unwrap_or(usize::MAX));
    ids.into_iter()
        .map(|id| HeaderRowEntry {
            row_id: id.clone(),
            columns: header[id].columns.clone(),
        })
        .collect()
}

/// Unique-enough id: hex seconds since the epoch followed by 16 random hex digits.
pub fn object_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = format!("{:x}", Utc::now().timestamp());
    for _ in 0..16 {
        id.push_str(&format!("{:x}", rng.gen_range(0..16u8)));
    }
    id
}

fn new_row_id(snapshot: &TableSnapshot) -> RowId {
    format!("row_{}{}", snapshot.len(), object_id())
}

/// Insert an empty row after (or before) `row_id`. Returns the new row id.
pub fn add_row(snapshot: &mut TableSnapshot, row_id: &str, before: bool) -> Option<RowId> {
    let source = snapshot.get(row_id)?;
    let mut index = source.row_index?;
    if !before {
        index += 1;
    }
    let cols: Vec<ColId> = source.cells.keys().cloned().collect();

    for row in snapshot.values_mut() {
        match row.row_index.as_mut() {
            Some(i) if *i >= index => *i += 1,
            _ => {}
        }
    }

    let new_id = new_row_id(snapshot);
    let mut row = TableRow::new(index);
    for col in cols {
        row.cells.insert(col, Cell::empty());
    }
    snapshot.insert(new_id.clone(), row);
    Some(new_id)
}

/// Remove `row_id` and close the gap it leaves. Returns false on a no-op.
pub fn delete_row(snapshot: &mut TableSnapshot, row_id: &str) -> bool {
    let Some(index) = snapshot.get(row_id).and_then(|r| r.row_index) else {
        return false;
    };
    snapshot.remove(row_id);
    for row in snapshot.values_mut() {
        match row.row_index.as_mut() {
            Some(i) if *i > index => *i -= 1,
            _ => {}
        }
    }
    true
}

/// Copy `row_id` into a new row directly below it. Returns the new row id.
pub fn duplicate_row(snapshot: &mut TableSnapshot, row_id: &str) -> Option<RowId> {
    let source = snapshot.get(row_id)?;
    let index = source.row_index?;
    let mut copy = source.clone();

    for row in snapshot.values_mut() {
        match row.row_index.as_mut() {
            Some(i) if *i > index => *i += 1,
            _ => {}
        }
    }

    let new_id = new_row_id(snapshot);
    copy.row_index = Some(index + 1);
    snapshot.insert(new_id.clone(), copy);
    Some(new_id)
}

/// Apply an overlay to a snapshot. Only cells that already exist are
/// overwritten; everything else in the overlay is ignored.
pub fn changed_data(snapshot: &mut TableSnapshot, overlay: &ChangeOverlay) {
    for (row_id, cols) in overlay {
        let Some(row) = snapshot.get_mut(row_id) else {
            continue;
        };
        for (col, change) in cols {
            if let Some(cell) = row.cells.get_mut(col) {
                *cell = change.to_cell();
            }
        }
    }
}

/// True when applying `overlay` would change something, or when it names a
/// cell the snapshot lacks.
pub fn has_effective_changes(overlay: &ChangeOverlay, snapshot: &TableSnapshot) -> bool {
    overlay.iter().any(|(row_id, cols)| {
        cols.iter().any(|(col, change)| {
            match snapshot.get(row_id).and_then(|r| r.cells.get(col)) {
                Some(cell) => *cell != change.to_cell(),
                None => true,
            }
        })
    })
}
