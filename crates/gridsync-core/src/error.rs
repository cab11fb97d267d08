//! Error types for gridsync sessions.

use thiserror::Error;

use gridsync_engine::{EngineError, TableId};

/// Message shown to a client whose table could not be loaded.
pub const LOAD_FAILED_MESSAGE: &str = "Не удалось загрузить проект";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to load table {table_id}: {reason}")]
    TableLoad { table_id: TableId, reason: String },

    #[error("Table {0} is not loaded")]
    UnknownTable(TableId),

    #[error("Table session closed")]
    SessionClosed,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Table service error: {0}")]
    Service(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Cross-table cycle rejected: {path:?}")]
    CrossTableCycle { path: Vec<TableId> },
}

impl SyncError {
    /// The text a client should see for this error.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::TableLoad { .. } => LOAD_FAILED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
