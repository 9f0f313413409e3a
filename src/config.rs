//! Runtime configuration for a [`StateManager`](crate::StateManager).

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default capacity of the debug snapshot ring.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 10;

/// Default capacity of the async change feed channel.
pub const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// Configuration for a state manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateConfig {
    /// Maximum number of debug snapshots retained (oldest evicted first).
    pub max_snapshots: usize,
    /// Buffer size of the broadcast channel behind `watch`.
    pub watch_capacity: usize,
    /// Capture debug snapshots from the start.
    pub debugging: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            watch_capacity: DEFAULT_WATCH_CAPACITY,
            debugging: false,
        }
    }
}

impl StateConfig {
    /// Parse a configuration from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_debugging(mut self, enabled: bool) -> Self {
        self.debugging = enabled;
        self
    }

    pub fn with_max_snapshots(mut self, max_snapshots: usize) -> Self {
        self.max_snapshots = max_snapshots;
        self
    }
}
