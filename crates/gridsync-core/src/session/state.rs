use std::sync::Arc;

use tracing::{info, warn};

use gridsync_engine::condition::{apply_custom_cells, resolve_conditions_on_start};
use gridsync_engine::transform::{changed_data, from_saved, object_id};
use gridsync_engine::{
    build_trigger_index, Cell, ChangeOverlay, FormulaEvaluator, LockMap, SchemeData, TableId, TableOptions,
    TableRow, TableSnapshot, TriggerCellIndex,
};

use crate::broadcast::Broadcaster;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::service::{ProjectId, TableData, TableService};
use crate::store::{get_json, keys, set_json, KeyValueStore};

/// The outside world a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub service: Arc<dyn TableService>,
    pub evaluator: Arc<dyn FormulaEvaluator>,
    pub broadcaster: Arc<dyn Broadcaster>,
}

/// Working state of one loaded table. Owned by exactly one session task.
pub struct TableSession {
    pub table_id: TableId,
    pub project_id: ProjectId,
    /// Base data: the loaded table with the pending changes of the time applied.
    pub snapshot: TableSnapshot,
    pub scheme: SchemeData,
    /// Changes since load that have not been saved to the table service.
    pub overlay: ChangeOverlay,
    pub index: TriggerCellIndex,
    pub locks: LockMap,
    pub config: SyncConfig,
    pub(crate) deps: Collaborators,
}

impl TableSession {
    /// Load a table's working set.
    ///
    /// Cached copies in the store win over the table service. Any failure is
    /// reported as [`SyncError::TableLoad`] and leaves the store untouched.
    pub async fn load(
        project_id: ProjectId,
        table_id: TableId,
        config: SyncConfig,
        deps: Collaborators,
    ) -> Result<TableSession> {
        let loaded = Self::read_working_set(project_id, table_id, &config, &deps).await;
        let session = loaded.map_err(|e| match e {
            SyncError::TableLoad { .. } => e,
            other => SyncError::TableLoad {
                table_id,
                reason: other.to_string(),
            },
        })?;

        session.write_working_set().await;
        info!(
            table_id,
            project_id,
            rows = session.snapshot.len(),
            triggers = session.scheme.triggers.len(),
            "table loaded"
        );
        Ok(session)
    }

    async fn read_working_set(
        project_id: ProjectId,
        table_id: TableId,
        config: &SyncConfig,
        deps: &Collaborators,
    ) -> Result<TableSession> {
        let store = deps.store.as_ref();
        let overlay: ChangeOverlay = get_json(store, &keys::changes(table_id)).await?.unwrap_or_default();

        let cached_data: Option<TableSnapshot> = get_json(store, &keys::data(table_id)).await?;
        let cached_scheme: Option<SchemeData> = get_json(store, &keys::scheme(table_id)).await?;

        let (mut snapshot, mut scheme) = match (cached_data, cached_scheme) {
            (Some(data), Some(scheme)) => (data, scheme),
            _ => {
                let payload = deps.service.fetch_table(project_id, table_id).await?;
                let scheme = deps.service.fetch_scheme(table_id).await?;
                let snapshot = match payload.data {
                    TableData::Rows(rows) => from_saved(&rows, &scheme.options.columns()),
                    TableData::Snapshot(snapshot) => snapshot,
                };
                (snapshot, scheme)
            }
        };

        if let Some(options) = get_json::<TableOptions>(store, &keys::options(table_id)).await? {
            scheme.options = options;
        }

        changed_data(&mut snapshot, &overlay);
        if snapshot.is_empty() {
            seed_row(&mut snapshot, &scheme.options.columns());
        }

        let index = build_trigger_index(&snapshot, &scheme.triggers);
        if !scheme.triggers.is_empty() {
            let fresh = resolve_conditions_on_start(&snapshot, &index, &scheme.triggers, config.max_cascade_rounds)?;
            apply_custom_cells(&mut scheme.options.custom_cells, fresh);
        }

        let locks: LockMap = get_json(store, &keys::blocks(table_id)).await?.unwrap_or_default();

        Ok(TableSession {
            table_id,
            project_id,
            snapshot,
            scheme,
            overlay,
            index,
            locks,
            config: config.clone(),
            deps: deps.clone(),
        })
    }

    async fn write_working_set(&self) {
        let store = self.deps.store.as_ref();
        let id = self.table_id;
        let writes = [
            set_json(store, &keys::data(id), &self.snapshot).await,
            set_json(store, &keys::scheme(id), &self.scheme).await,
            set_json(store, &keys::changes(id), &self.overlay).await,
            set_json(store, &keys::trigger_cells(id), &self.index).await,
        ];
        for result in writes {
            if let Err(e) = result {
                warn!(table_id = id, error = %e, "failed to cache working set");
            }
        }
    }

    /// Write one working-set key, logging instead of failing.
    pub(crate) async fn cache<T: serde::Serialize + ?Sized>(&self, key: String, value: &T) {
        if let Err(e) = set_json(self.deps.store.as_ref(), &key, value).await {
            warn!(table_id = self.table_id, key = %key, error = %e, "store write failed");
        }
    }
}

/// A table with no rows gets one empty row so clients have something to edit.
fn seed_row(snapshot: &mut TableSnapshot, columns: &[String]) {
    let mut row = TableRow::new(0);
    for col in columns {
        row.cells.insert(col.clone(), Cell::empty());
    }
    snapshot.insert(format!("row_{}", object_id()), row);
}
