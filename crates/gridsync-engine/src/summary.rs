//! Column summaries shown under the table.

use std::collections::BTreeMap;

use crate::model::{overlay_cell, snapshot_cell, ChangeOverlay, ColId, TableSnapshot};
use crate::number::format_number;
use crate::scheme::{SummaryKind, TableOptions};

pub type SummaryValues = BTreeMap<ColId, String>;

pub fn default_label(kind: &SummaryKind) -> &'static str {
    match kind {
        SummaryKind::Sum => "Сумма:",
        SummaryKind::Max => "Макс:",
        SummaryKind::Min => "Мин:",
        SummaryKind::Avg => "Сред:",
        SummaryKind::Other(_) => "",
    }
}

/// Aggregate `values`. Empty input gives `"0"` for a sum and `""` otherwise.
pub fn aggregate(kind: &SummaryKind, values: &[f64]) -> String {
    if values.is_empty() {
        return match kind {
            SummaryKind::Sum => "0".to_string(),
            _ => String::new(),
        };
    }
    let result = match kind {
        SummaryKind::Sum => values.iter().sum(),
        SummaryKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        SummaryKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        SummaryKind::Avg => values.iter().sum::<f64>() / values.len() as f64,
        SummaryKind::Other(_) => return String::new(),
    };
    format_number(result)
}

/// Every row's value in `col`, preferring pending changes over the snapshot.
fn column_values(col: &str, overlay: &ChangeOverlay, snapshot: &TableSnapshot) -> Vec<f64> {
    snapshot
        .keys()
        .map(|row| match overlay_cell(overlay, row, col) {
            Some(change) => change.value.as_number(),
            None => snapshot_cell(snapshot, row, col).map_or(0.0, |c| c.value.as_number()),
        })
        .collect()
}

/// `"{label} {aggregate}"` for every column that declares a summary.
pub fn compute_summaries(options: &TableOptions, overlay: &ChangeOverlay, snapshot: &TableSnapshot) -> SummaryValues {
    options
        .cols
        .iter()
        .filter_map(|(col, opts)| {
            let kind = opts.summary.as_ref()?;
            let label = opts.label.as_deref().unwrap_or(default_label(kind));
            let result = aggregate(kind, &column_values(col, overlay, snapshot));
            Some((col.clone(), format!("{} {}", label, result)))
        })
        .collect()
}
