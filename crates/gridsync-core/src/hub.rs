//! Session registry and room membership.
//!
//! The hub loads a table's session on first use, keeps track of which
//! connections sit in which table room, evicts sessions whose rooms stay
//! empty for the grace period and routes cross-table changes between
//! sessions.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use gridsync_engine::transform::RowListEntry;
use gridsync_engine::{ChangeOverlay, ConnectionId, FormulaEvaluator, LockedCells, RowId, TableId, Trigger, UserId};

use crate::broadcast::{GridData, Rooms, ServerMessage};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::service::{ProjectId, TableService};
use crate::session::{spawn, Collaborators, RowEdit, SessionHandle, TableSession, UpdateOutcome};
use crate::store::{keys, KeyValueStore};

/// Where a connection currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Seat {
    project_id: ProjectId,
    table_id: TableId,
}

struct LiveTable {
    handle: SessionHandle,
    project_id: ProjectId,
}

/// One pending cross-table delivery.
#[derive(Debug)]
struct Delivery {
    /// Tables the change has passed through, origin first.
    path: Vec<TableId>,
    target: TableId,
    changes: ChangeOverlay,
}

pub struct SessionHub {
    config: SyncConfig,
    deps: Collaborators,
    rooms: Arc<Rooms>,
    sessions: DashMap<TableId, LiveTable>,
    members: DashMap<TableId, HashSet<ConnectionId>>,
    seats: DashMap<ConnectionId, Seat>,
    /// Held while a session is loaded or evicted, so neither races a join.
    lifecycle: Mutex<()>,
}

impl SessionHub {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn KeyValueStore>,
        service: Arc<dyn TableService>,
        evaluator: Arc<dyn FormulaEvaluator>,
    ) -> Arc<SessionHub> {
        let rooms = Arc::new(Rooms::new(config.broadcast_capacity));
        let deps = Collaborators {
            store,
            service,
            evaluator,
            broadcaster: rooms.clone(),
        };
        Arc::new(SessionHub {
            config,
            deps,
            rooms,
            sessions: DashMap::new(),
            members: DashMap::new(),
            seats: DashMap::new(),
            lifecycle: Mutex::new(()),
        })
    }

    /// Receive everything broadcast to a table's room.
    pub fn subscribe(&self, table_id: TableId) -> broadcast::Receiver<ServerMessage> {
        self.rooms.subscribe(table_id)
    }

    pub fn is_loaded(&self, table_id: TableId) -> bool {
        self.sessions.contains_key(&table_id)
    }

    pub fn room_size(&self, table_id: TableId) -> usize {
        self.members.get(&table_id).map_or(0, |m| m.len())
    }

    fn handle(&self, table_id: TableId) -> Result<SessionHandle> {
        self.sessions
            .get(&table_id)
            .map(|live| live.handle.clone())
            .ok_or(SyncError::UnknownTable(table_id))
    }

    /// The live session for `table_id`, loading it if needed. Must be called
    /// with the lifecycle lock held.
    async fn ensure_loaded(&self, project_id: ProjectId, table_id: TableId) -> Result<SessionHandle> {
        if let Some(live) = self.sessions.get(&table_id) {
            return Ok(live.handle.clone());
        }
        let session = TableSession::load(project_id, table_id, self.config.clone(), self.deps.clone()).await?;
        let handle = spawn(session);
        self.sessions.insert(
            table_id,
            LiveTable {
                handle: handle.clone(),
                project_id,
            },
        );
        Ok(handle)
    }

    /// Put `conn` in the room of `table_id` and return the table's initial
    /// payload. A connection sits in one table room at a time.
    pub async fn join(self: &Arc<Self>, conn: &str, project_id: ProjectId, table_id: TableId) -> Result<GridData> {
        if let Some(previous) = self.seats.get(conn).map(|s| *s) {
            if previous.table_id != table_id {
                self.leave(conn, previous.table_id).await;
            }
        }

        let handle = {
            let _guard = self.lifecycle.lock().await;
            let handle = match self.ensure_loaded(project_id, table_id).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(table_id, project_id, error = %e, "table load failed");
                    self.seats.remove(conn);
                    return Err(e);
                }
            };
            self.members.entry(table_id).or_default().insert(conn.to_string());
            self.seats.insert(conn.to_string(), Seat { project_id, table_id });
            handle
        };
        debug!(conn, table_id, "joined room");
        handle.grid_data().await
    }

    /// Take `conn` out of a room, dropping its locks there.
    async fn leave(self: &Arc<Self>, conn: &str, table_id: TableId) {
        let emptied = match self.members.get_mut(&table_id) {
            Some(mut members) => {
                members.remove(conn);
                members.is_empty()
            }
            None => false,
        };
        if let Ok(handle) = self.handle(table_id) {
            if let Err(e) = handle.disconnect(conn.to_string()).await {
                debug!(table_id, error = %e, "session gone while leaving");
            }
        }
        if emptied {
            self.schedule_eviction(table_id);
        }
    }

    /// The connection is gone: drop its locks and room seat. The table is
    /// evicted once its room stays empty for the grace period.
    pub async fn disconnect(self: &Arc<Self>, conn: &str) {
        let Some((_, seat)) = self.seats.remove(conn) else {
            return;
        };
        self.leave(conn, seat.table_id).await;
    }

    pub async fn claim(&self, conn: &str, table_id: TableId, cells: LockedCells) -> Result<()> {
        self.handle(table_id)?.claim(conn.to_string(), cells).await
    }

    pub async fn release(&self, conn: &str, table_id: TableId) -> Result<()> {
        self.handle(table_id)?.release(conn.to_string()).await
    }

    pub async fn edit_rows(&self, table_id: TableId, edit: RowEdit, row_id: RowId) -> Result<Vec<RowListEntry>> {
        self.handle(table_id)?.edit_rows(edit, row_id).await
    }

    pub async fn replace_triggers(&self, table_id: TableId, triggers: Vec<Trigger>) -> Result<()> {
        self.handle(table_id)?.replace_triggers(triggers).await
    }

    /// Apply a client edit to a loaded table, then deliver every change it
    /// caused in other tables.
    ///
    /// Each delivery is a separate message to the target table's mailbox,
    /// so no session ever waits on another. Delivery failures are logged and
    /// do not fail the original edit.
    pub async fn update(self: &Arc<Self>, table_id: TableId, changes: ChangeOverlay, user_id: UserId) -> Result<UpdateOutcome> {
        let handle = self.handle(table_id)?;
        let outcome = handle.update(changes, user_id.clone()).await?;

        let project_id = self.sessions.get(&table_id).map_or(0, |live| live.project_id);
        let mut queue: VecDeque<Delivery> = outgoing(vec![table_id], &outcome);
        while let Some(delivery) = queue.pop_front() {
            match self.deliver(project_id, &delivery, &user_id).await {
                Ok(next) => queue.extend(outgoing(path_to(&delivery), &next)),
                Err(e) => warn!(
                    target_table = delivery.target,
                    path = ?delivery.path,
                    error = %e,
                    "cross-table delivery dropped"
                ),
            }
        }
        Ok(outcome)
    }

    async fn deliver(self: &Arc<Self>, project_id: ProjectId, delivery: &Delivery, user_id: &UserId) -> Result<UpdateOutcome> {
        if delivery.path.contains(&delivery.target) || delivery.path.len() > self.config.max_cross_table_hops {
            return Err(SyncError::CrossTableCycle { path: path_to(delivery) });
        }

        let handle = {
            let _guard = self.lifecycle.lock().await;
            let project_id = self.sessions.get(&delivery.target).map_or(project_id, |l| l.project_id);
            self.ensure_loaded(project_id, delivery.target).await?
        };
        let outcome = handle.update(delivery.changes.clone(), user_id.clone()).await?;
        if self.room_size(delivery.target) == 0 {
            self.schedule_eviction(delivery.target);
        }
        Ok(outcome)
    }

    fn schedule_eviction(self: &Arc<Self>, table_id: TableId) {
        let hub = Arc::clone(self);
        let grace = self.config.grace_period();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            hub.evict_if_empty(table_id).await;
        });
    }

    /// Save and drop a table whose room is empty. Returns whether it was evicted.
    pub async fn evict_if_empty(&self, table_id: TableId) -> bool {
        let _guard = self.lifecycle.lock().await;
        if self.room_size(table_id) > 0 {
            return false;
        }
        let Some((_, live)) = self.sessions.remove(&table_id) else {
            return false;
        };
        self.members.remove(&table_id);

        if let Err(e) = live.handle.persist().await {
            warn!(table_id, error = %e, "could not save evicted table");
        }
        if let Err(e) = live.handle.shutdown().await {
            warn!(table_id, error = %e, "evicted session did not shut down cleanly");
        }
        for key in keys::all(table_id) {
            if let Err(e) = self.deps.store.del(&key).await {
                warn!(table_id, key = %key, error = %e, "failed to clear cached key");
            }
        }
        self.rooms.close(table_id);
        info!(table_id, "table evicted");
        true
    }
}

fn path_to(delivery: &Delivery) -> Vec<TableId> {
    let mut path = delivery.path.clone();
    path.push(delivery.target);
    path
}

fn outgoing(path: Vec<TableId>, outcome: &UpdateOutcome) -> VecDeque<Delivery> {
    outcome
        .other_tables
        .iter()
        .map(|(target, changes)| Delivery {
            path: path.clone(),
            target: *target,
            changes: changes.clone(),
        })
        .collect()
}
