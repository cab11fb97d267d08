//! Per-table sessions.
//!
//! A [`TableSession`] owns one table's snapshot, overlay, trigger index and
//! lock map. It runs on its own task behind an mpsc mailbox, which makes the
//! mailbox the single place a table's state is mutated.

mod actor;
mod ops;
mod state;

pub use actor::{spawn, SessionHandle};
pub use ops::{RowEdit, UpdateOutcome};
pub use state::{Collaborators, TableSession};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ServerMessage;
    use crate::config::SyncConfig;
    use crate::error::SyncError;
    use crate::fixtures::{edit, World, ORDERS, TOTALS};
    use crate::store::{get_json, keys};
    use gridsync_engine::model::overlay_cell;
    use gridsync_engine::locks::LockFlag;
    use gridsync_engine::{CellValue, ChangeOverlay, LockMap, LockedCells, SchemeData, TableSnapshot};
    use std::collections::BTreeMap;

    async fn load(world: &World) -> TableSession {
        TableSession::load(7, ORDERS, SyncConfig::default(), world.collaborators())
            .await
            .unwrap()
    }

    fn lock(row: &str, col: &str) -> LockedCells {
        let flag = LockFlag {
            blocked: Some(true),
            row_index: Some(0),
        };
        let mut cells = LockedCells::new();
        cells.entry(row.to_string()).or_default().insert(col.to_string(), flag);
        cells
    }

    #[tokio::test]
    async fn test_load_converts_rows_and_caches_working_set() {
        let world = World::new(false);
        let session = load(&world).await;

        assert_eq!(session.snapshot.len(), 2);
        assert_eq!(session.snapshot["r1"].row_index, Some(1));
        assert_eq!(session.snapshot["r0"].cells["total"].value, CellValue::from(""));
        assert!(!session.index.is_empty());

        for key in [keys::data(ORDERS), keys::scheme(ORDERS), keys::changes(ORDERS), keys::trigger_cells(ORDERS)] {
            assert!(world.store.contains(&key), "missing {}", key);
        }

        // qty is filled in on both rows, so price starts out editable.
        let custom = &session.scheme.options.custom_cells;
        assert_eq!(custom["r0"]["price"].editable, Some(true));
        assert_eq!(custom["r1"]["price"].editable, Some(true));
    }

    #[tokio::test]
    async fn test_cached_copies_win_over_the_service() {
        let world = World::new(false);
        let mut cached = TableSnapshot::new();
        cached.insert(
            "x".into(),
            gridsync_engine::TableRow::new(0).with_cell("qty", gridsync_engine::Cell::new("9")),
        );
        crate::store::set_json(world.store.as_ref(), &keys::data(ORDERS), &cached).await.unwrap();
        crate::store::set_json(world.store.as_ref(), &keys::scheme(ORDERS), &SchemeData::default())
            .await
            .unwrap();
        crate::store::set_json(world.store.as_ref(), &keys::changes(ORDERS), &edit("x", "qty", "4"))
            .await
            .unwrap();

        let session = load(&world).await;
        assert_eq!(session.snapshot.len(), 1);
        assert_eq!(session.snapshot["x"].cells["qty"].value, CellValue::from("4"));
    }

    #[tokio::test]
    async fn test_load_failure_writes_nothing() {
        let world = World::new(false);
        let result = TableSession::load(7, 99, SyncConfig::default(), world.collaborators()).await;

        let Err(e) = result else {
            panic!("expected a load failure");
        };
        assert!(matches!(e, SyncError::TableLoad { table_id: 99, .. }));
        assert_eq!(e.user_message(), "Не удалось загрузить проект");
        assert!(world.store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_table_gets_a_seed_row() {
        let world = World::new(false);
        world
            .service
            .insert_table(5, crate::service::TableData::Rows(Vec::new()), crate::fixtures::totals_scheme(false));
        let session = TableSession::load(7, 5, SyncConfig::default(), world.collaborators())
            .await
            .unwrap();

        assert_eq!(session.snapshot.len(), 1);
        let (id, row) = session.snapshot.iter().next().unwrap();
        assert!(id.starts_with("row_"));
        assert_eq!(row.row_index, Some(0));
        assert!(row.cells.contains_key("sum"));
    }

    #[tokio::test]
    async fn test_update_runs_the_whole_pipeline() {
        let world = World::new(false);
        let mut rx = world.rooms.subscribe(ORDERS);
        let mut session = load(&world).await;
        session.locks.claim(&"c1".to_string(), lock("r1", "qty"));

        let outcome = session.update(edit("r1", "qty", "3"), "u1".into()).await.unwrap();
        assert!(outcome.other_tables.is_empty());

        let total = overlay_cell(&session.overlay, "r1", "total").unwrap();
        assert_eq!(total.value, CellValue::Number(15.0));
        assert_eq!(total.user_id.as_deref(), None);
        assert_eq!(overlay_cell(&session.overlay, "r1", "qty").unwrap().user_id.as_deref(), Some("u1"));
        // Editing a cell releases the lock on it.
        assert!(session.locks.is_empty());

        let Ok(ServerMessage::MsgToClient(update)) = rx.recv().await else {
            panic!("expected a room update");
        };
        let changes = update.changes.unwrap();
        assert_eq!(changes["1"]["total"].row_id, "r1");
        assert_eq!(changes["1"]["total"].cell.value, CellValue::Number(15.0));
        assert_eq!(update.summary_values.unwrap()["total"], "Сумма: 15");
        assert!(update.blocks.unwrap().is_empty());

        let cached: ChangeOverlay = get_json(world.store.as_ref(), &keys::changes(ORDERS)).await.unwrap().unwrap();
        assert_eq!(cached, session.overlay);
    }

    #[tokio::test]
    async fn test_invalid_value_is_flagged_not_rejected() {
        let world = World::new(false);
        let mut session = load(&world).await;

        session.update(edit("r0", "price", "12a"), "u1".into()).await.unwrap();
        let price = overlay_cell(&session.overlay, "r0", "price").unwrap();
        assert_eq!(price.value, CellValue::from("12a"));
        assert_eq!(price.in_valid_message.as_deref(), Some("Только цифры"));
        // parseFloat("12a") is 12.
        assert_eq!(
            overlay_cell(&session.overlay, "r0", "total").unwrap().value,
            CellValue::Number(24.0)
        );
    }

    #[tokio::test]
    async fn test_condition_flip_is_broadcast_and_cached() {
        let world = World::new(false);
        let mut rx = world.rooms.subscribe(ORDERS);
        let mut session = load(&world).await;

        session.update(edit("r1", "qty", ""), "u1".into()).await.unwrap();

        let Ok(ServerMessage::MsgToClient(update)) = rx.recv().await else {
            panic!("expected a room update");
        };
        let diff = update.new_custom_cells.unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["r1"]["price"].editable, Some(false));
        assert_eq!(session.scheme.options.custom_cells["r1"]["price"].editable, Some(false));
        assert!(world.store.contains(&keys::options(ORDERS)));
    }

    #[tokio::test]
    async fn test_foreign_trigger_is_returned_for_routing() {
        let world = World::new(false);
        let mut session = load(&world).await;

        let outcome = session.update(edit("r0", "qty", "4"), "u1".into()).await.unwrap();
        let totals = &outcome.other_tables[&TOTALS];
        assert_eq!(overlay_cell(totals, "s0", "sum").unwrap().value, CellValue::Number(400.0));
    }

    #[tokio::test]
    async fn test_cascade_limit_rejects_the_edit() {
        let world = World::new(false);
        let mut session = load(&world).await;
        session.config.max_cascade_rounds = 1;
        let mut rx = world.rooms.subscribe(ORDERS);

        let result = session.update(edit("r0", "qty", "4"), "u1".into()).await;
        assert!(matches!(result, Err(SyncError::Engine(_))));
        assert!(session.overlay.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_locks_claim_release_disconnect() {
        let world = World::new(false);
        let mut rx = world.rooms.subscribe(ORDERS);
        let mut session = load(&world).await;
        let conn = "c1".to_string();

        session.claim(&conn, lock("r1", "price")).await;
        let Ok(ServerMessage::MsgToClient(update)) = rx.recv().await else {
            panic!("expected blocks");
        };
        assert_eq!(update.blocks.unwrap()["1"], vec!["price".to_string()]);

        let cached: LockMap = get_json(world.store.as_ref(), &keys::blocks(ORDERS)).await.unwrap().unwrap();
        assert!(cached.holds("c1"));

        assert!(session.disconnect(&conn).await);
        assert!(!session.disconnect(&conn).await);

        session.claim(&conn, lock("r0", "qty")).await;
        session.release(&conn).await;
        assert!(session.locks.is_empty());
    }

    #[tokio::test]
    async fn test_edit_rows_applies_changes_and_reindexes() {
        let world = World::new(false);
        let mut rx = world.rooms.subscribe(ORDERS);
        let mut session = load(&world).await;
        session.update(edit("r0", "qty", "5"), "u1".into()).await.unwrap();
        let _ = rx.recv().await;

        let rows = session.edit_rows(RowEdit::AddBefore, "r0").await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].row_id, "r0");
        assert_eq!(rows[1].data["qty"].value, CellValue::from("5"));
        assert_eq!(session.snapshot["r1"].row_index, Some(2));

        // The new row is indexed, so its formula fires.
        let new_id = rows[0].row_id.clone();
        assert!(!gridsync_engine::index::lookup(&session.index, &new_id, "qty").is_empty());

        let Ok(ServerMessage::UpdatedTable { new_data }) = rx.recv().await else {
            panic!("expected updatedTable");
        };
        assert_eq!(new_data, rows);

        let unchanged = session.edit_rows(RowEdit::Delete, "nope").await;
        assert_eq!(unchanged.len(), 3);
    }

    #[tokio::test]
    async fn test_edit_rows_skips_writes_when_nothing_changes() {
        use crate::store::KeyValueStore;

        let world = World::new(false);
        let mut session = load(&world).await;
        world.store.del(&keys::data(ORDERS)).await.unwrap();

        let rows = session.edit_rows(RowEdit::Duplicate, "nope").await;
        assert_eq!(rows.len(), 2);
        assert!(!world.store.contains(&keys::data(ORDERS)));

        // Changes that only repeat the snapshot do not count either.
        session.overlay = edit("r0", "qty", "2");
        session.edit_rows(RowEdit::Delete, "nope").await;
        assert!(!world.store.contains(&keys::data(ORDERS)));

        session.overlay = edit("r0", "qty", "6");
        session.edit_rows(RowEdit::Delete, "nope").await;
        let cached: TableSnapshot = get_json(world.store.as_ref(), &keys::data(ORDERS)).await.unwrap().unwrap();
        assert_eq!(cached["r0"].cells["qty"].value, CellValue::from("6"));
    }

    #[tokio::test]
    async fn test_replace_triggers_rebuilds_index() {
        let world = World::new(false);
        let mut session = load(&world).await;
        session.replace_triggers(Vec::new()).await;
        assert!(session.index.is_empty());

        let outcome = session.update(edit("r0", "qty", "4"), "u1".into()).await.unwrap();
        assert!(outcome.other_tables.is_empty());
        assert!(overlay_cell(&session.overlay, "r0", "total").is_none());

        let cached: SchemeData = get_json(world.store.as_ref(), &keys::scheme(ORDERS)).await.unwrap().unwrap();
        assert!(cached.triggers.is_empty());
    }

    #[tokio::test]
    async fn test_persist_saves_current_data_and_swallows_failures() {
        let world = World::new(false);
        let mut session = load(&world).await;
        assert!(!session.persist().await);

        session.update(edit("r1", "price", "7"), "u1".into()).await.unwrap();
        assert!(session.persist().await);
        let versions = world.service.saved_versions(ORDERS);
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0][1].id, "r1");
        let price = serde_json::to_value(&versions[0][1].cells["price"]).unwrap();
        assert_eq!(price["value"], "7");

        world.service.set_fail_saves(true);
        assert!(!session.persist().await);
    }

    #[tokio::test]
    async fn test_grid_data_reflects_pending_changes() {
        let world = World::new(false);
        let mut session = load(&world).await;
        session.update(edit("r0", "qty", "3"), "u1".into()).await.unwrap();

        let grid = session.grid_data();
        assert_eq!(grid.body_data.len(), 2);
        assert_eq!(grid.body_data[0].data["qty"].value, CellValue::from("3"));
        assert_eq!(grid.body_data[0].data["total"].value, CellValue::Number(30.0));
        assert_eq!(grid.triggers.len(), 3);
        assert_eq!(grid.summary_values.unwrap()["total"], "Сумма: 30");
    }

    #[tokio::test]
    async fn test_actor_serializes_commands() {
        let world = World::new(false);
        let handle = spawn(load(&world).await);

        let mut tasks = Vec::new();
        for (i, row) in ["r0", "r1"].iter().enumerate() {
            let handle = handle.clone();
            let overlay = edit(row, "qty", &(i + 2).to_string());
            tasks.push(tokio::spawn(async move { handle.update(overlay, "u1".into()).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let grid = handle.grid_data().await.unwrap();
        let totals: BTreeMap<_, _> = grid
            .body_data
            .iter()
            .map(|r| (r.row_id.clone(), r.data["total"].value.clone()))
            .collect();
        assert_eq!(totals["r0"], CellValue::Number(20.0));
        assert_eq!(totals["r1"], CellValue::Number(15.0));

        handle.shutdown().await.unwrap();
        assert!(matches!(handle.grid_data().await, Err(SyncError::SessionClosed)));
    }
}
