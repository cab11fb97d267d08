//! Change overlay merge.

use crate::model::ChangeOverlay;

/// Right-biased merge: every cell in `incoming` overwrites the one in `base`.
pub fn merge_changes(base: &mut ChangeOverlay, incoming: &ChangeOverlay) {
    for (row_id, cols) in incoming {
        let row = base.entry(row_id.clone()).or_default();
        for (col, change) in cols {
            row.insert(col.clone(), change.clone());
        }
    }
}

/// Merge into a copy of `base`.
pub fn merged(base: &ChangeOverlay, incoming: &ChangeOverlay) -> ChangeOverlay {
    let mut out = base.clone();
    merge_changes(&mut out, incoming);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{overlay_cell, overlay_len, set_overlay_cell, CellValue, ChangeCell};

    fn overlay(cells: &[(&str, &str, &str)]) -> ChangeOverlay {
        let mut o = ChangeOverlay::new();
        for (row, col, value) in cells {
            set_overlay_cell(&mut o, row, col, ChangeCell::new(*value));
        }
        o
    }

    #[test]
    fn test_merge_is_right_biased() {
        let a = overlay(&[("r1", "a", "old"), ("r1", "b", "keep")]);
        let b = overlay(&[("r1", "a", "new"), ("r2", "a", "added")]);

        let m = merged(&a, &b);
        assert_eq!(overlay_cell(&m, "r1", "a").unwrap().value, CellValue::from("new"));
        assert_eq!(overlay_cell(&m, "r1", "b").unwrap().value, CellValue::from("keep"));
        assert_eq!(overlay_cell(&m, "r2", "a").unwrap().value, CellValue::from("added"));
        assert_eq!(overlay_len(&m), 3);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = overlay(&[("r1", "a", "1"), ("r3", "c", "3")]);
        let b = overlay(&[("r1", "a", "2"), ("r2", "b", "x")]);

        let once = merged(&a, &b);
        let twice = merged(&once, &b);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_is_not_commutative() {
        let a = overlay(&[("r1", "a", "1")]);
        let b = overlay(&[("r1", "a", "2")]);
        assert_ne!(merged(&a, &b), merged(&b, &a));
    }
}
