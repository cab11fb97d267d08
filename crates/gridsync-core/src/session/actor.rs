use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use gridsync_engine::transform::RowListEntry;
use gridsync_engine::{ChangeOverlay, ConnectionId, LockedCells, RowId, TableId, Trigger, UserId};

use crate::broadcast::GridData;
use crate::error::{Result, SyncError};

use super::ops::{RowEdit, UpdateOutcome};
use super::state::TableSession;

pub(crate) enum Command {
    GridData {
        reply: oneshot::Sender<GridData>,
    },
    Update {
        changes: ChangeOverlay,
        user_id: UserId,
        reply: oneshot::Sender<Result<UpdateOutcome>>,
    },
    Claim {
        conn: ConnectionId,
        cells: LockedCells,
        reply: oneshot::Sender<()>,
    },
    Release {
        conn: ConnectionId,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        conn: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    EditRows {
        edit: RowEdit,
        row_id: RowId,
        reply: oneshot::Sender<Vec<RowListEntry>>,
    },
    ReplaceTriggers {
        triggers: Vec<Trigger>,
        reply: oneshot::Sender<()>,
    },
    Persist {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Mailbox address of a running table session. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    table_id: TableId,
    tx: mpsc::Sender<Command>,
}

/// Move `session` onto its own task. Every command is handled to completion
/// before the next one is taken from the mailbox.
pub fn spawn(session: TableSession) -> SessionHandle {
    let table_id = session.table_id;
    let (tx, rx) = mpsc::channel(session.config.mailbox_capacity.max(1));
    tokio::spawn(run(session, rx));
    SessionHandle { table_id, tx }
}

async fn run(mut session: TableSession, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::GridData { reply } => {
                let _ = reply.send(session.grid_data());
            }
            Command::Update {
                changes,
                user_id,
                reply,
            } => {
                let _ = reply.send(session.update(changes, user_id).await);
            }
            Command::Claim { conn, cells, reply } => {
                session.claim(&conn, cells).await;
                let _ = reply.send(());
            }
            Command::Release { conn, reply } => {
                session.release(&conn).await;
                let _ = reply.send(());
            }
            Command::Disconnect { conn, reply } => {
                let _ = reply.send(session.disconnect(&conn).await);
            }
            Command::EditRows { edit, row_id, reply } => {
                let _ = reply.send(session.edit_rows(edit, &row_id).await);
            }
            Command::ReplaceTriggers { triggers, reply } => {
                session.replace_triggers(triggers).await;
                let _ = reply.send(());
            }
            Command::Persist { reply } => {
                let _ = reply.send(session.persist().await);
            }
            Command::Shutdown { reply } => {
                info!(table_id = session.table_id, "session stopped");
                let _ = reply.send(());
                return;
            }
        }
    }
    debug!(table_id = session.table_id, "mailbox closed");
}

impl SessionHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).await.is_err() {
            debug!(table_id = self.table_id, "request to a stopped session");
            return Err(SyncError::SessionClosed);
        }
        rx.await.map_err(|_| {
            debug!(table_id = self.table_id, "session stopped before replying");
            SyncError::SessionClosed
        })
    }

    pub async fn grid_data(&self) -> Result<GridData> {
        self.request(|reply| Command::GridData { reply }).await
    }

    pub async fn update(&self, changes: ChangeOverlay, user_id: UserId) -> Result<UpdateOutcome> {
        self.request(|reply| Command::Update {
            changes,
            user_id,
            reply,
        })
        .await?
    }

    pub async fn claim(&self, conn: ConnectionId, cells: LockedCells) -> Result<()> {
        self.request(|reply| Command::Claim { conn, cells, reply }).await
    }

    pub async fn release(&self, conn: ConnectionId) -> Result<()> {
        self.request(|reply| Command::Release { conn, reply }).await
    }

    pub async fn disconnect(&self, conn: ConnectionId) -> Result<bool> {
        self.request(|reply| Command::Disconnect { conn, reply }).await
    }

    pub async fn edit_rows(&self, edit: RowEdit, row_id: RowId) -> Result<Vec<RowListEntry>> {
        self.request(|reply| Command::EditRows { edit, row_id, reply }).await
    }

    pub async fn replace_triggers(&self, triggers: Vec<Trigger>) -> Result<()> {
        self.request(|reply| Command::ReplaceTriggers { triggers, reply }).await
    }

    pub async fn persist(&self) -> Result<bool> {
        self.request(|reply| Command::Persist { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
