//! Reactive table engine for gridsync.
//!
//! This crate provides the transport-agnostic algorithms behind a shared,
//! multi-user table:
//!
//! - [`model`] - cells, rows, snapshots and change overlays
//! - [`scheme`] - column options, header rows and validation rules
//! - [`trigger`] - trigger definitions
//! - [`transform`] - ordered views and structural row edits
//! - [`overlay`] - right-biased overlay merge
//! - [`validation`] - per-cell rule checks
//! - [`index`] - reverse dependency index from cells to triggers
//! - [`propagate`] - breadth-first cascade resolution
//! - [`condition`] - block/unblock resolution from conditional triggers
//! - [`summary`] - column aggregates
//! - [`locks`] - soft edit locks and their per-row view
//! - [`formula`] - local Rhai formula evaluator

pub mod condition;
pub mod error;
pub mod formula;
pub mod index;
pub mod locks;
pub mod model;
pub mod number;
pub mod overlay;
pub mod propagate;
pub mod scheme;
pub mod summary;
pub mod transform;
pub mod trigger;
pub mod validation;

pub use error::{EngineError, FormulaError, Result};
pub use formula::RhaiEvaluator;
pub use index::{build_trigger_index, TriggerCellIndex};
pub use locks::{BlockView, LockMap, LockedCells};
pub use model::{Cell, CellValue, ChangeCell, ChangeOverlay, ColId, ConnectionId, RowId, TableId, TableRow, TableSnapshot, UserId};
pub use overlay::merge_changes;
pub use propagate::{Cascade, FormulaEvaluator, FormulaParams, Propagation};
pub use scheme::{CustomCells, SchemeData, TableOptions};
pub use trigger::Trigger;
