//! Canonical table and scheme service.
//!
//! The service owns the persisted version of every table. Sessions fetch a
//! table and its scheme on load and submit a new version when they save.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use gridsync_engine::transform::SavedRow;
use gridsync_engine::{SchemeData, TableId, TableSnapshot};

use crate::error::{Result, SyncError};

pub type ProjectId = u64;

/// Table data as the service returns it: either the canonical row array or
/// an already keyed snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableData {
    Rows(Vec<SavedRow>),
    Snapshot(TableSnapshot),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePayload {
    pub data: TableData,
    #[serde(default)]
    pub readonly: bool,
}

#[async_trait]
pub trait TableService: Send + Sync {
    async fn fetch_table(&self, project_id: ProjectId, table_id: TableId) -> Result<TablePayload>;
    async fn fetch_scheme(&self, table_id: TableId) -> Result<SchemeData>;
    /// Submit `rows` as the table's new version.
    async fn save_table(&self, table_id: TableId, rows: Vec<SavedRow>) -> Result<()>;
}

/// In-process service holding tables, schemes and every saved version.
#[derive(Debug, Default)]
pub struct MemoryService {
    tables: DashMap<TableId, TablePayload>,
    schemes: DashMap<TableId, SchemeData>,
    saved: DashMap<TableId, Vec<Vec<SavedRow>>>,
    fail_saves: AtomicBool,
}

impl MemoryService {
    pub fn new() -> MemoryService {
        MemoryService::default()
    }

    pub fn insert_table(&self, table_id: TableId, data: TableData, scheme: SchemeData) {
        self.tables.insert(table_id, TablePayload { data, readonly: false });
        self.schemes.insert(table_id, scheme);
    }

    /// Saved versions of a table, oldest first.
    pub fn saved_versions(&self, table_id: TableId) -> Vec<Vec<SavedRow>> {
        self.saved.get(&table_id).map(|v| v.value().clone()).unwrap_or_default()
    }

    /// Make every following save fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TableService for MemoryService {
    async fn fetch_table(&self, _project_id: ProjectId, table_id: TableId) -> Result<TablePayload> {
        self.tables
            .get(&table_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| SyncError::Service(format!("table {} not found", table_id)))
    }

    async fn fetch_scheme(&self, table_id: TableId) -> Result<SchemeData> {
        self.schemes
            .get(&table_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| SyncError::Service(format!("scheme for table {} not found", table_id)))
    }

    async fn save_table(&self, table_id: TableId, rows: Vec<SavedRow>) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SyncError::Service("save rejected".to_string()));
        }
        self.saved.entry(table_id).or_default().push(rows);
        Ok(())
    }
}
