//! Key-value working-set store.
//!
//! The store holds JSON documents under string keys with no transactional
//! guarantees. Keys are per table: `dataTable<id>`, `changes<id>` and so on.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use gridsync_engine::TableId;

use crate::error::Result;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// Working-set keys for one table.
pub mod keys {
    use super::TableId;

    pub fn data(table_id: TableId) -> String {
        format!("dataTable{}", table_id)
    }

    pub fn scheme(table_id: TableId) -> String {
        format!("scheme{}", table_id)
    }

    pub fn changes(table_id: TableId) -> String {
        format!("changes{}", table_id)
    }

    pub fn blocks(table_id: TableId) -> String {
        format!("blocks{}", table_id)
    }

    pub fn options(table_id: TableId) -> String {
        format!("options{}", table_id)
    }

    pub fn trigger_cells(table_id: TableId) -> String {
        format!("triggerCells{}", table_id)
    }

    /// Every key a loaded table may own.
    pub fn all(table_id: TableId) -> [String; 6] {
        [
            data(table_id),
            scheme(table_id),
            changes(table_id),
            blocks(table_id),
            options(table_id),
            trigger_cells(table_id),
        ]
    }
}

/// Read and decode a key. A missing key is `Ok(None)`.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?).await
}

/// In-process store backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, serde_json::Value>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
