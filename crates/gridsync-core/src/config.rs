//! Session tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long an empty room waits before its table is saved and evicted.
    pub grace_period_ms: u64,
    /// Round ceiling for trigger and condition cascades.
    pub max_cascade_rounds: usize,
    /// Longest chain of tables a cross-table change may travel.
    pub max_cross_table_hops: usize,
    pub mailbox_capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            grace_period_ms: 2000,
            max_cascade_rounds: 64,
            max_cross_table_hops: 8,
            mailbox_capacity: 256,
            broadcast_capacity: 1024,
        }
    }
}

impl SyncConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
