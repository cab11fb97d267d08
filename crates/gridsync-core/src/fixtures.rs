//! Shared test tables.

use std::sync::Arc;

use gridsync_engine::model::set_overlay_cell;
use gridsync_engine::scheme::{CellOptions, SummaryKind, ValidationKind, ValidationRule, ValidationRules};
use gridsync_engine::transform::{SavedCell, SavedRow};
use gridsync_engine::trigger::{Condition, Direction, TriggerAction, TriggerSlave, TriggerTarget};
use gridsync_engine::{ChangeCell, ChangeOverlay, RhaiEvaluator, SchemeData, TableId, Trigger};

use crate::broadcast::Rooms;
use crate::service::{MemoryService, TableData};
use crate::session::Collaborators;
use crate::store::MemoryStore;

pub const ORDERS: TableId = 1;
pub const TOTALS: TableId = 2;

pub fn edit(row: &str, col: &str, value: &str) -> ChangeOverlay {
    let mut overlay = ChangeOverlay::new();
    set_overlay_cell(&mut overlay, row, col, ChangeCell::new(value));
    overlay
}

fn saved_row(id: &str, cells: &[(&str, &str)]) -> SavedRow {
    SavedRow {
        id: id.to_string(),
        cells: cells
            .iter()
            .map(|(col, value)| (col.to_string(), SavedCell::Value((*value).into())))
            .collect(),
    }
}

fn column(id: &str) -> TriggerTarget {
    TriggerTarget {
        col_id: Some(id.to_string()),
        ..TriggerTarget::default()
    }
}

fn at(row: &str, col: &str) -> TriggerTarget {
    TriggerTarget {
        row_id: Some(row.to_string()),
        col_id: Some(col.to_string()),
        condition: None,
    }
}

fn formula(row: Option<&str>, col: &str, expr: &str) -> TriggerSlave {
    TriggerSlave {
        action: TriggerAction::Formula {
            formula: expr.to_string(),
            params: None,
        },
        row_id: row.map(String::from),
        col_id: Some(col.to_string()),
    }
}

/// Orders: `total = qty * price` per row, a SUM under `total`, digits-only
/// `price`, `price` blocked while `qty` is empty, and `qty` of the first row
/// mirrored into the totals table.
pub fn orders_scheme() -> SchemeData {
    let mut scheme = SchemeData::default();
    scheme.options.columns_list = Some(vec!["qty".into(), "price".into(), "total".into()]);
    scheme.options.cols.insert(
        "total".into(),
        CellOptions {
            summary: Some(SummaryKind::Sum),
            ..CellOptions::default()
        },
    );

    let mut rules = ValidationRules::default();
    rules.cols.insert(
        "price".into(),
        ValidationRule {
            kind: Some(ValidationKind::RegExp),
            reg_exp: Some("^\\d+$".into()),
            error_message: Some("Только цифры".into()),
        },
    );
    scheme.validation_rules = Some(rules);

    scheme.triggers = vec![
        Trigger {
            table_id: None,
            exceptions: None,
            direction: Direction::Horizontal,
            targets: vec![column("qty"), column("price")],
            slaves: vec![formula(None, "total", "r0 * r1")],
        },
        Trigger {
            table_id: None,
            exceptions: None,
            direction: Direction::Horizontal,
            targets: vec![TriggerTarget {
                condition: Some(Condition::Empty),
                ..column("qty")
            }],
            slaves: vec![TriggerSlave {
                action: TriggerAction::Block,
                row_id: None,
                col_id: Some("price".into()),
            }],
        },
        Trigger {
            table_id: Some(TOTALS),
            exceptions: None,
            direction: Direction::Both,
            targets: vec![at("r0", "qty")],
            slaves: vec![formula(Some("s0"), "sum", "r0 * 100")],
        },
    ];
    scheme
}

pub fn orders_rows() -> TableData {
    TableData::Rows(vec![
        saved_row("r0", &[("qty", "2"), ("price", "10")]),
        saved_row("r1", &[("qty", "1"), ("price", "5")]),
    ])
}

/// Totals: a single cell, optionally echoing back into orders.
pub fn totals_scheme(echo_back: bool) -> SchemeData {
    let mut scheme = SchemeData::default();
    scheme.options.columns_list = Some(vec!["sum".into()]);
    if echo_back {
        scheme.triggers.push(Trigger {
            table_id: Some(ORDERS),
            exceptions: None,
            direction: Direction::Both,
            targets: vec![at("s0", "sum")],
            slaves: vec![formula(Some("r0"), "price", "r0 / 100")],
        });
    }
    scheme
}

pub fn totals_rows() -> TableData {
    TableData::Rows(vec![saved_row("s0", &[("sum", "")])])
}

pub struct World {
    pub store: Arc<MemoryStore>,
    pub service: Arc<MemoryService>,
    pub rooms: Arc<Rooms>,
}

impl World {
    pub fn new(echo_back: bool) -> World {
        let service = MemoryService::new();
        service.insert_table(ORDERS, orders_rows(), orders_scheme());
        service.insert_table(TOTALS, totals_rows(), totals_scheme(echo_back));
        World {
            store: Arc::new(MemoryStore::new()),
            service: Arc::new(service),
            rooms: Arc::new(Rooms::new(64)),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            service: self.service.clone(),
            evaluator: Arc::new(RhaiEvaluator::new()),
            broadcaster: self.rooms.clone(),
        }
    }
}
