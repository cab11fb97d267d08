use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gridsync_engine::condition::{apply_custom_cells, resolve_conditions};
use gridsync_engine::model::overlay_len;
use gridsync_engine::overlay::merged;
use gridsync_engine::summary::compute_summaries;
use gridsync_engine::transform::{
    add_row, by_row_index, changed_data, delete_row, duplicate_row, has_effective_changes, prepare_for_save, row_list,
    transform_header, RowListEntry,
};
use gridsync_engine::validation::check_validators;
use gridsync_engine::{
    build_trigger_index, Cascade, ChangeOverlay, ConnectionId, LockedCells, TableId, TableSnapshot, Trigger, UserId,
};

use crate::broadcast::{GridData, RoomUpdate, ServerMessage};
use crate::error::Result;
use crate::store::keys;

use super::state::TableSession;

/// Structural row edit requested by a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowEdit {
    Add,
    AddBefore,
    Delete,
    Duplicate,
}

/// What an edit produced besides the room broadcast.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Changes to deliver to other tables.
    pub other_tables: BTreeMap<TableId, ChangeOverlay>,
    pub rounds: usize,
}

impl TableSession {
    /// The snapshot with every pending change applied.
    pub fn current_data(&self) -> TableSnapshot {
        let mut data = self.snapshot.clone();
        changed_data(&mut data, &self.overlay);
        data
    }

    pub fn grid_data(&self) -> GridData {
        let summaries = compute_summaries(&self.scheme.options, &self.overlay, &self.snapshot);
        GridData {
            options: self.scheme.options.clone(),
            use_filters: self.scheme.use_filters,
            triggers: self.scheme.triggers.clone(),
            header: transform_header(&self.scheme.header_data),
            body_data: row_list(&self.current_data(), &self.scheme.options.columns()),
            blocks: self.locks.block_view(&self.snapshot),
            summary_values: (!summaries.is_empty()).then_some(summaries),
        }
    }

    /// Resolve an edit and broadcast the result to the room.
    ///
    /// A cascade that hits the round ceiling rejects the whole edit: nothing
    /// is merged, broadcast or cached.
    pub async fn update(&mut self, changes: ChangeOverlay, user_id: UserId) -> Result<UpdateOutcome> {
        let validated = check_validators(
            self.scheme.validation_rules.as_ref(),
            &self.locks,
            &changes,
            &user_id,
        );

        let cascade = Cascade {
            table_id: self.table_id,
            snapshot: &self.snapshot,
            index: &self.index,
            triggers: &self.scheme.triggers,
            old_changes: &self.overlay,
            user_id: &user_id,
            max_rounds: self.config.max_cascade_rounds,
        };
        let propagation = cascade
            .propagate(&validated.changes, self.deps.evaluator.as_ref())
            .await?;

        let updated = merged(&self.overlay, &propagation.resolved);
        let fresh = resolve_conditions(
            &self.snapshot,
            &updated,
            &self.index,
            &self.scheme.triggers,
            self.config.max_cascade_rounds,
        )?;

        // Nothing below can fail.
        self.locks = validated.locks;
        self.overlay = updated;
        debug!(
            table_id = self.table_id,
            rounds = propagation.rounds,
            changed = overlay_len(&propagation.resolved),
            "edit resolved"
        );

        let summaries = compute_summaries(&self.scheme.options, &self.overlay, &self.snapshot);
        let mut message = RoomUpdate {
            blocks: Some(self.locks.block_view(&self.snapshot)),
            summary_values: (!summaries.is_empty()).then_some(summaries),
            ..RoomUpdate::default()
        };
        if !propagation.resolved.is_empty() {
            message.changes = Some(by_row_index(&propagation.resolved, &self.snapshot));
        }

        let diff = apply_custom_cells(&mut self.scheme.options.custom_cells, fresh);
        if !diff.is_empty() {
            self.cache(keys::options(self.table_id), &self.scheme.options).await;
            message.new_custom_cells = Some(diff);
        }

        self.deps
            .broadcaster
            .emit(self.table_id, ServerMessage::MsgToClient(message));

        self.cache(keys::changes(self.table_id), &self.overlay).await;
        self.cache(keys::blocks(self.table_id), &self.locks).await;

        Ok(UpdateOutcome {
            other_tables: propagation.other_tables,
            rounds: propagation.rounds,
        })
    }

    /// Replace a connection's soft locks with `cells`.
    pub async fn claim(&mut self, conn: &ConnectionId, cells: LockedCells) {
        self.locks.claim(conn, cells);
        self.publish_blocks().await;
    }

    pub async fn release(&mut self, conn: &ConnectionId) {
        self.locks.release(conn);
        self.publish_blocks().await;
    }

    /// Drop a departing connection's locks. Returns whether it held any.
    pub async fn disconnect(&mut self, conn: &ConnectionId) -> bool {
        let held = self.locks.release(conn);
        if held {
            self.publish_blocks().await;
        }
        held
    }

    async fn publish_blocks(&self) {
        let message = RoomUpdate {
            blocks: Some(self.locks.block_view(&self.snapshot)),
            ..RoomUpdate::default()
        };
        self.deps
            .broadcaster
            .emit(self.table_id, ServerMessage::MsgToClient(message));
        self.cache(keys::blocks(self.table_id), &self.locks).await;
    }

    /// Insert, delete or duplicate a row. Pending changes are applied to the
    /// snapshot first so the edit sees current values. When neither step
    /// changes the table, nothing is rebuilt or cached.
    pub async fn edit_rows(&mut self, edit: RowEdit, row_id: &str) -> Vec<RowListEntry> {
        let folded = has_effective_changes(&self.overlay, &self.snapshot);
        if folded {
            changed_data(&mut self.snapshot, &self.overlay);
        }
        let applied = match edit {
            RowEdit::Add => add_row(&mut self.snapshot, row_id, false).is_some(),
            RowEdit::AddBefore => add_row(&mut self.snapshot, row_id, true).is_some(),
            RowEdit::Delete => delete_row(&mut self.snapshot, row_id),
            RowEdit::Duplicate => duplicate_row(&mut self.snapshot, row_id).is_some(),
        };
        if !applied {
            debug!(table_id = self.table_id, row_id, ?edit, "row edit ignored");
        }

        if applied || folded {
            self.index = build_trigger_index(&self.snapshot, &self.scheme.triggers);
            self.cache(keys::data(self.table_id), &self.snapshot).await;
            self.cache(keys::trigger_cells(self.table_id), &self.index).await;
        }

        let rows = row_list(&self.snapshot, &self.scheme.options.columns());
        self.deps.broadcaster.emit(
            self.table_id,
            ServerMessage::UpdatedTable {
                new_data: rows.clone(),
            },
        );
        rows
    }

    /// Swap the trigger list. The index is rebuilt in the same step so it
    /// never refers to positions of the old list.
    pub async fn replace_triggers(&mut self, triggers: Vec<Trigger>) {
        self.scheme.triggers = triggers;
        self.index = build_trigger_index(&self.snapshot, &self.scheme.triggers);
        self.cache(keys::scheme(self.table_id), &self.scheme).await;
        self.cache(keys::trigger_cells(self.table_id), &self.index).await;
    }

    /// Submit the current data as a new version. Failures are logged and
    /// swallowed. Returns whether a version was saved.
    pub async fn persist(&self) -> bool {
        if overlay_len(&self.overlay) == 0 {
            return false;
        }
        let rows = prepare_for_save(&self.current_data());
        match self.deps.service.save_table(self.table_id, rows).await {
            Ok(()) => true,
            Err(e) => {
                warn!(table_id = self.table_id, error = %e, "failed to save table");
                false
            }
        }
    }
}
