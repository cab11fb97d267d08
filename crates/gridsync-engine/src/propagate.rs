//! Trigger propagation: turn an edit into the full set of derived changes.
//!
//! The cascade is breadth-first and level-synchronous. Round `k` processes
//! every cell written in round `k - 1`; only formula results feed the next
//! round. Invalidate slaves are re-written into the result (to force a
//! client refresh and re-check their bounds) but do not cascade further.
//!
//! Cell values are read through a fixed precedence chain:
//! previous round -> the edit being resolved -> session overlay -> snapshot -> `""`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{EngineError, FormulaError, Result};
use crate::index::{lookup, TriggerCellIndex};
use crate::model::{
    overlay_cell, overlay_len, row_index_of, set_overlay_cell, snapshot_cell, CellValue, ChangeCell,
    ChangeOverlay, TableId, TableSnapshot,
};
use crate::number::parse_float;
use crate::trigger::{ParamRef, Trigger, TriggerAction};

/// Named numeric parameters passed to a formula.
pub type FormulaParams = BTreeMap<String, f64>;

/// Evaluates trigger formulas. Implementations may call out over the network.
#[async_trait]
pub trait FormulaEvaluator: Send + Sync {
    async fn evaluate(&self, formula: &str, params: &FormulaParams) -> std::result::Result<f64, FormulaError>;
}

/// Everything a cascade reads besides the edit itself.
#[derive(Clone, Copy, Debug)]
pub struct Cascade<'a> {
    pub table_id: TableId,
    pub snapshot: &'a TableSnapshot,
    pub index: &'a TriggerCellIndex,
    pub triggers: &'a [Trigger],
    /// Changes accumulated earlier in the session.
    pub old_changes: &'a ChangeOverlay,
    pub user_id: &'a str,
    pub max_rounds: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Propagation {
    /// The edit plus every derived change.
    pub resolved: ChangeOverlay,
    /// Writes destined for other tables, keyed by table id.
    pub other_tables: BTreeMap<TableId, ChangeOverlay>,
    /// Rounds the cascade ran.
    pub rounds: usize,
}

/// An explicit id, or the current cell's when the id is absent or empty.
fn or_here<'a>(id: Option<&'a str>, here: &'a str) -> &'a str {
    id.filter(|s| !s.is_empty()).unwrap_or(here)
}

fn numeric_value(value: &CellValue) -> f64 {
    if value.is_blank() {
        return 0.0;
    }
    match value {
        CellValue::Number(n) => *n,
        CellValue::Text(s) => parse_float(s).unwrap_or(f64::NAN),
    }
}

impl Cascade<'_> {
    fn resolve(
        &self,
        frontier: &ChangeOverlay,
        edit: &ChangeOverlay,
        row: &str,
        col: &str,
    ) -> ChangeCell {
        overlay_cell(frontier, row, col)
            .or_else(|| overlay_cell(edit, row, col))
            .or_else(|| overlay_cell(self.old_changes, row, col))
            .cloned()
            .or_else(|| snapshot_cell(self.snapshot, row, col).cloned().map(ChangeCell::from))
            .unwrap_or_default()
    }

    /// Gather formula parameters. The flag is true when every parameter is blank.
    fn formula_params(
        &self,
        frontier: &ChangeOverlay,
        edit: &ChangeOverlay,
        trigger: &Trigger,
        params: Option<&BTreeMap<String, ParamRef>>,
        row: &str,
        col: &str,
    ) -> (FormulaParams, bool) {
        let refs: Vec<(String, Option<&str>, Option<&str>)> = match params {
            Some(params) => params
                .iter()
                .map(|(name, p)| (name.clone(), p.row_id.as_deref(), p.col_id.as_deref()))
                .collect(),
            None => trigger
                .targets
                .iter()
                .enumerate()
                .map(|(i, t)| (format!("r{}", i), t.row_id.as_deref(), t.col_id.as_deref()))
                .collect(),
        };

        let mut out = FormulaParams::new();
        let mut all_blank = true;
        for (name, p_row, p_col) in refs {
            let cell = self.resolve(frontier, edit, or_here(p_row, row), or_here(p_col, col));
            if !cell.value.is_blank() {
                all_blank = false;
            }
            out.insert(name, cell.value.as_number());
        }
        (out, all_blank)
    }

    /// The invalidate slave's current value, stamped with its row index and
    /// the acting user.
    fn touch(&self, frontier: &ChangeOverlay, edit: &ChangeOverlay, row: &str, col: &str) -> ChangeCell {
        let mut touched = self.resolve(frontier, edit, row, col);
        touched.row_index = row_index_of(self.snapshot, row).map(|i| i.to_string());
        touched.user_id = Some(self.user_id.to_string());
        touched
    }

    /// Re-check the trigger's bounds against a touched slave. Only the last
    /// target's verdict survives.
    fn check_bounds(
        &self,
        frontier: &ChangeOverlay,
        edit: &ChangeOverlay,
        trigger: &Trigger,
        touched: &mut ChangeCell,
        row: &str,
        col: &str,
    ) {
        let slave_value = numeric_value(&touched.value);
        for target in &trigger.targets {
            let reference = self
                .resolve(
                    frontier,
                    edit,
                    or_here(target.row_id.as_deref(), row),
                    or_here(target.col_id.as_deref(), col),
                )
                .value
                .as_number();
            touched.in_valid_message = target
                .condition
                .and_then(|c| c.violation(slave_value, reference));
        }
    }

    /// Resolve `edit` to a fixed point.
    ///
    /// Formula failures are not errors: the branch simply produces nothing.
    /// The only error is a cascade that is still producing changes after
    /// `max_rounds` rounds, which means the trigger graph has a cycle.
    pub async fn propagate(
        &self,
        edit: &ChangeOverlay,
        evaluator: &dyn FormulaEvaluator,
    ) -> Result<Propagation> {
        let mut resolved = edit.clone();
        let mut other_tables: BTreeMap<TableId, ChangeOverlay> = BTreeMap::new();
        let mut frontier = edit.clone();
        let mut rounds = 0;

        while overlay_len(&frontier) > 0 {
            if rounds == self.max_rounds {
                return Err(EngineError::CascadeLimit { rounds });
            }
            rounds += 1;
            debug!(table_id = self.table_id, round = rounds, cells = overlay_len(&frontier), "cascade round");

            let mut next = ChangeOverlay::new();
            for (row_key, cols) in &frontier {
                for col_key in cols.keys() {
                    for &position in lookup(self.index, row_key, col_key) {
                        let Some(trigger) = self.triggers.get(position) else {
                            debug!(table_id = self.table_id, trigger = position, "index names a missing trigger");
                            continue;
                        };
                        let foreign = trigger.foreign_table(self.table_id);

                        for slave in &trigger.slaves {
                            let row = slave.row_id.as_deref().unwrap_or(row_key);
                            let col = slave.col_id.as_deref().unwrap_or(col_key);

                            match &slave.action {
                                TriggerAction::Formula { formula, params } => {
                                    let (values, all_blank) = self.formula_params(
                                        &frontier,
                                        edit,
                                        trigger,
                                        params.as_ref(),
                                        row,
                                        col,
                                    );
                                    let result = match evaluator.evaluate(formula, &values).await {
                                        Ok(n) if n.is_finite() => n,
                                        Ok(n) => {
                                            debug!(trigger = position, result = n, "formula produced a non-finite value");
                                            continue;
                                        }
                                        Err(e) => {
                                            debug!(trigger = position, error = %e, "formula produced no value");
                                            continue;
                                        }
                                    };
                                    let value = if all_blank {
                                        CellValue::default()
                                    } else {
                                        CellValue::Number(result)
                                    };
                                    let change = ChangeCell::new(value);
                                    if let Some(other) = foreign {
                                        set_overlay_cell(other_tables.entry(other).or_default(), row, col, change.clone());
                                    }
                                    set_overlay_cell(&mut next, row, col, change.clone());
                                    set_overlay_cell(&mut resolved, row, col, change);
                                }
                                TriggerAction::Invalidate => {
                                    let mut touched = self.touch(&frontier, edit, row, col);
                                    if let Some(other) = foreign {
                                        set_overlay_cell(other_tables.entry(other).or_default(), row, col, touched.clone());
                                    }
                                    self.check_bounds(&frontier, edit, trigger, &mut touched, row, col);
                                    set_overlay_cell(&mut resolved, row, col, touched);
                                }
                                TriggerAction::Block | TriggerAction::Unblock => {}
                            }
                        }
                    }
                }
            }
            frontier = next;
        }

        Ok(Propagation {
            resolved,
            other_tables,
            rounds,
        })
    }
}
