//! gridsync-core - per-table sessions around the gridsync engine.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod hub;
pub mod service;
pub mod session;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use broadcast::{Broadcaster, GridData, RoomUpdate, Rooms, ServerMessage};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use hub::SessionHub;
pub use service::{MemoryService, ProjectId, TableData, TablePayload, TableService};
pub use session::{RowEdit, SessionHandle, TableSession, UpdateOutcome};
pub use store::{KeyValueStore, MemoryStore};
