//! Room fan-out: every connection watching a table receives the same stream
//! of server messages.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use gridsync_engine::summary::SummaryValues;
use gridsync_engine::transform::{HeaderRowEntry, IndexedChanges, RowListEntry};
use gridsync_engine::{BlockView, CustomCells, TableId, TableOptions, Trigger};

/// Delta sent to a room after an edit or a lock change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<IndexedChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<BlockView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_values: Option<SummaryValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_custom_cells: Option<CustomCells>,
}

/// Everything a client needs to render a table it just joined.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridData {
    pub options: TableOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_filters: Option<bool>,
    pub triggers: Vec<Trigger>,
    pub header: Vec<HeaderRowEntry>,
    pub body_data: Vec<RowListEntry>,
    pub blocks: BlockView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_values: Option<SummaryValues>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "msgToClient")]
    MsgToClient(RoomUpdate),
    #[serde(rename = "generateGridData")]
    GenerateGridData(Box<GridData>),
    #[serde(rename = "updatedTable")]
    UpdatedTable {
        #[serde(rename = "newData")]
        new_data: Vec<RowListEntry>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

/// Fan-out to everyone subscribed to a table. No acknowledgement.
pub trait Broadcaster: Send + Sync {
    fn emit(&self, table_id: TableId, message: ServerMessage);
}

/// One `tokio::sync::broadcast` channel per table room.
#[derive(Debug)]
pub struct Rooms {
    channels: DashMap<TableId, broadcast::Sender<ServerMessage>>,
    capacity: usize,
}

impl Rooms {
    pub fn new(capacity: usize) -> Rooms {
        Rooms {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, table_id: TableId) -> broadcast::Sender<ServerMessage> {
        self.channels
            .entry(table_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, table_id: TableId) -> broadcast::Receiver<ServerMessage> {
        self.sender(table_id).subscribe()
    }

    /// Drop the room's channel once nobody should be listening.
    pub fn close(&self, table_id: TableId) {
        self.channels.remove(&table_id);
    }
}

impl Broadcaster for Rooms {
    fn emit(&self, table_id: TableId, message: ServerMessage) {
        let Some(tx) = self.channels.get(&table_id).map(|t| t.value().clone()) else {
            trace!(table_id, "no room to emit to");
            return;
        };
        // A send error only means there are no receivers right now.
        let _ = tx.send(message);
    }
}
