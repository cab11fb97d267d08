//! Scenario replay: drive a live hub from a JSON script and record every
//! message a client in any room would have seen.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use gridsync_core::{MemoryService, MemoryStore, ProjectId, RowEdit, ServerMessage, SessionHub, SyncConfig, SyncError, TableData};
use gridsync_engine::{ChangeOverlay, ConnectionId, LockedCells, RhaiEvaluator, RowId, SchemeData, TableId, Trigger, UserId};

/// A table as the service holds it before anyone joins.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioTable {
    pub table_id: TableId,
    pub data: TableData,
    #[serde(default)]
    pub scheme: SchemeData,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Step {
    Join {
        conn: ConnectionId,
        #[serde(default)]
        project_id: ProjectId,
        table_id: TableId,
    },
    Update {
        table_id: TableId,
        changes: ChangeOverlay,
        user_id: UserId,
    },
    Claim {
        conn: ConnectionId,
        table_id: TableId,
        cells: LockedCells,
    },
    Release {
        conn: ConnectionId,
        table_id: TableId,
    },
    EditRows {
        table_id: TableId,
        edit: RowEdit,
        row_id: RowId,
    },
    ReplaceTriggers {
        table_id: TableId,
        triggers: Vec<Trigger>,
    },
    Disconnect {
        conn: ConnectionId,
    },
    /// Let time pass, e.g. for a grace period to run out.
    Wait {
        ms: u64,
    },
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub tables: Vec<ScenarioTable>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

pub fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

struct Replay {
    hub: Arc<SessionHub>,
    tables: Vec<TableId>,
    rooms: BTreeMap<TableId, broadcast::Receiver<ServerMessage>>,
    output: Vec<Value>,
}

impl Replay {
    /// Listen on every scenario table, again after a room was closed by eviction.
    fn listen(&mut self) {
        for &table_id in &self.tables {
            if !self.rooms.contains_key(&table_id) {
                self.rooms.insert(table_id, self.hub.subscribe(table_id));
            }
        }
    }

    fn record(&mut self, table_id: Option<TableId>, conn: Option<&str>, message: &ServerMessage) -> anyhow::Result<()> {
        let mut line = Map::new();
        if let Some(table_id) = table_id {
            line.insert("tableId".to_string(), json!(table_id));
        }
        if let Some(conn) = conn {
            line.insert("conn".to_string(), json!(conn));
        }
        if let Value::Object(fields) = serde_json::to_value(message)? {
            line.extend(fields);
        }
        self.output.push(Value::Object(line));
        Ok(())
    }

    fn record_error(&mut self, table_id: Option<TableId>, conn: Option<&str>, err: &SyncError) -> anyhow::Result<()> {
        debug!(?table_id, error = %err, "step failed");
        let message = ServerMessage::Error {
            error_message: err.user_message(),
        };
        self.record(table_id, conn, &message)
    }

    fn drain(&mut self) -> anyhow::Result<()> {
        let mut closed = Vec::new();
        let mut received = Vec::new();
        for (&table_id, rx) in self.rooms.iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(message) => received.push((table_id, message)),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(table_id, skipped, "replay fell behind a room");
                    }
                    Err(TryRecvError::Closed) => {
                        closed.push(table_id);
                        break;
                    }
                }
            }
        }
        for table_id in closed {
            self.rooms.remove(&table_id);
        }
        for (table_id, message) in received {
            self.record(Some(table_id), None, &message)?;
        }
        Ok(())
    }

    async fn apply(&mut self, step: Step) -> anyhow::Result<()> {
        match step {
            Step::Join { conn, project_id, table_id } => match self.hub.join(&conn, project_id, table_id).await {
                Ok(grid) => self.record(Some(table_id), Some(&conn), &ServerMessage::GenerateGridData(Box::new(grid)))?,
                Err(e) => self.record_error(Some(table_id), Some(&conn), &e)?,
            },
            Step::Update { table_id, changes, user_id } => {
                if let Err(e) = self.hub.update(table_id, changes, user_id).await {
                    self.record_error(Some(table_id), None, &e)?;
                }
            }
            Step::Claim { conn, table_id, cells } => {
                if let Err(e) = self.hub.claim(&conn, table_id, cells).await {
                    self.record_error(Some(table_id), Some(&conn), &e)?;
                }
            }
            Step::Release { conn, table_id } => {
                if let Err(e) = self.hub.release(&conn, table_id).await {
                    self.record_error(Some(table_id), Some(&conn), &e)?;
                }
            }
            Step::EditRows { table_id, edit, row_id } => {
                if let Err(e) = self.hub.edit_rows(table_id, edit, row_id).await {
                    self.record_error(Some(table_id), None, &e)?;
                }
            }
            Step::ReplaceTriggers { table_id, triggers } => {
                if let Err(e) = self.hub.replace_triggers(table_id, triggers).await {
                    self.record_error(Some(table_id), None, &e)?;
                }
            }
            Step::Disconnect { conn } => self.hub.disconnect(&conn).await,
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
        Ok(())
    }
}

/// Run `scenario` against a fresh in-memory hub and return the recorded
/// messages, one JSON object per message.
pub async fn run(scenario: Scenario, config: SyncConfig) -> anyhow::Result<Vec<Value>> {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(MemoryService::new());
    let mut tables = Vec::with_capacity(scenario.tables.len());
    for table in scenario.tables {
        tables.push(table.table_id);
        service.insert_table(table.table_id, table.data, table.scheme);
    }
    let hub = SessionHub::new(config, store, service, Arc::new(RhaiEvaluator::new()));

    let mut replay = Replay {
        hub,
        tables,
        rooms: BTreeMap::new(),
        output: Vec::new(),
    };
    for (index, step) in scenario.steps.into_iter().enumerate() {
        replay.listen();
        debug!(step = index, ?step, "replaying");
        replay.apply(step).await?;
        replay.drain()?;
    }
    Ok(replay.output)
}
