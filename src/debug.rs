//! Diagnostic snapshots of the state tree.
//!
//! While debugging is enabled every direct write records the action, its
//! details and a full copy of the tree in a bounded ring. Capturing never
//! influences control flow or notification order.

use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// One captured state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// e.g. `SET app.debugLogs` or `BATCHED SET app.editMode`.
    pub action: String,
    pub details: Value,
    /// Full copy of the tree after the action.
    pub state: Value,
}

/// Debug view returned by `StateManager::debug_info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub current_state: Value,
    pub snapshots: Vec<DebugSnapshot>,
    pub listener_count: usize,
}

/// Bounded ring of snapshots.
#[derive(Debug)]
pub(crate) struct DebugLog {
    enabled: bool,
    capacity: usize,
    snapshots: VecDeque<DebugSnapshot>,
}

impl DebugLog {
    pub(crate) fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            enabled,
            capacity,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn push(&mut self, action: String, details: Value, state: Value) {
        if !self.enabled || self.capacity == 0 {
            return;
        }
        self.snapshots.push_back(DebugSnapshot {
            timestamp: now_millis(),
            action,
            details,
            state,
        });
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    pub(crate) fn snapshots(&self) -> Vec<DebugSnapshot> {
        self.snapshots.iter().cloned().collect()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
