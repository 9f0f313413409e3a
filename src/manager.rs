//! The state manager: a path-addressed reactive store.
//!
//! All mutation of the tree goes through [`StateManager`]. A direct write
//! runs in this order:
//!
//! 1. read the old value
//! 2. write the new value
//! 3. capture a debug snapshot (if enabled)
//! 4. invalidate intersecting selector caches
//! 5. recompute computed paths depending on the written path, notifying
//!    their subscribers
//! 6. notify subscribers of the written path
//!
//! Inside a batch, steps 5 and 6 are deferred to the commit of the
//! outermost batch (see [`batch`](crate::batch)).
//!
//! The manager is single-threaded. Callbacks may re-enter any method; no
//! internal borrow is held while user code runs.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

use crate::batch::BatchState;
use crate::computed::ComputedRegistry;
use crate::config::StateConfig;
use crate::debug::{DebugInfo, DebugLog};
use crate::defaults;
use crate::error::Result;
use crate::path::{self, IntoPaths, WILDCARD};
use crate::selector::SelectorRegistry;
use crate::watch::{self, Listeners, StateChange, Subscription, UpdateOptions, WatchSender, WatchStream};

pub(crate) struct Inner {
    pub(crate) state: RefCell<Value>,
    pub(crate) generation: Cell<u64>,
    pub(crate) restoring: Cell<bool>,
    pub(crate) listeners: Rc<RefCell<Listeners>>,
    pub(crate) batch: RefCell<BatchState>,
    pub(crate) computed: RefCell<ComputedRegistry>,
    pub(crate) selectors: RefCell<SelectorRegistry>,
    pub(crate) debug: RefCell<DebugLog>,
    pub(crate) watcher: WatchSender,
    pub(crate) config: StateConfig,
}

impl Inner {
    pub(crate) fn read(&self, path: &str) -> Option<Value> {
        path::get_in(&self.state.borrow(), path).cloned()
    }

    /// Identity of the current top-level tree. Bumped whenever the whole
    /// tree is replaced (rollback, full reset).
    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }
}

/// Centralized reactive state container.
///
/// Cloning yields another handle to the same store, so the application
/// bootstrap can create one manager and hand clones to each collaborator.
#[derive(Clone)]
pub struct StateManager {
    pub(crate) inner: Rc<Inner>,
}

impl StateManager {
    /// Create a manager with the default tree and configuration.
    pub fn new() -> Self {
        Self::with_config(StateConfig::default())
    }

    pub fn with_config(config: StateConfig) -> Self {
        Self::with_state(defaults::initial_state(), config)
    }

    /// Create a manager around an existing tree.
    pub fn with_state(state: Value, config: StateConfig) -> Self {
        let inner = Inner {
            state: RefCell::new(state),
            generation: Cell::new(0),
            restoring: Cell::new(false),
            listeners: Rc::new(RefCell::new(Listeners::default())),
            batch: RefCell::new(BatchState::default()),
            computed: RefCell::new(ComputedRegistry::default()),
            selectors: RefCell::new(SelectorRegistry::default()),
            debug: RefCell::new(DebugLog::new(config.max_snapshots, config.debugging)),
            watcher: WatchSender::new(config.watch_capacity),
            config,
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.inner.config
    }

    /// Read the value at `path`. `*` returns the whole tree.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.inner.read(path)
    }

    /// Read the value at `path` and deserialize it.
    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get(path) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Deep copy of the whole tree.
    pub fn get_state(&self) -> Value {
        self.inner.state.borrow().clone()
    }

    pub fn set(&self, path: &str, value: impl Into<Value>) {
        self.set_with(path, value, UpdateOptions::default());
    }

    pub fn set_with(&self, path: &str, value: impl Into<Value>, options: UpdateOptions) {
        self.assign(path, Some(value.into()), options);
    }

    /// Serialize `value` and write it at `path`.
    pub fn set_json<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(path, value);
        Ok(())
    }

    /// Write (or, with `None`, remove) the value at `path` and run the
    /// notification pipeline.
    pub(crate) fn assign(&self, path: &str, value: Option<Value>, options: UpdateOptions) {
        if self.inner.restoring.get() && !options.allow_during_restore {
            trace!(path, "write suppressed during restore");
            return;
        }

        let old_value = self.get(path);
        if !self.write_raw(path, value.clone()) {
            return;
        }

        if self.is_batching() {
            self.capture_snapshot(
                format!("BATCHED SET {}", path),
                json!({ "path": path, "oldValue": old_value, "newValue": value }),
            );
            self.invalidate_selectors_for_path(path);
            self.inner
                .batch
                .borrow_mut()
                .record(path, old_value, value, &options);
            return;
        }

        self.capture_snapshot(
            format!("SET {}", path),
            json!({ "path": path, "oldValue": old_value, "newValue": value }),
        );
        self.invalidate_selectors_for_path(path);
        self.update_computed_for_paths(&[path.to_string()]);

        trace!(path, old = ?old_value, new = ?value, "state updated");
        self.notify(path, value, old_value, options);
    }

    /// Mutate the tree without any bookkeeping. Returns false if `path`
    /// cannot be written (an array segment that is not a usable index).
    pub(crate) fn write_raw(&self, path: &str, value: Option<Value>) -> bool {
        let mut state = self.inner.state.borrow_mut();
        match value {
            Some(value) => {
                let written = path::set_in(&mut state, path, value);
                if !written {
                    warn!(path, "write skipped, path does not address an array element");
                }
                written
            }
            None => {
                path::remove_in(&mut state, path);
                true
            }
        }
    }

    /// Replace the whole tree and bump the generation.
    pub(crate) fn replace_state(&self, state: Value) {
        *self.inner.state.borrow_mut() = state;
        self.inner.generation.set(self.inner.generation.get() + 1);
    }

    pub(crate) fn notify(
        &self,
        path: &str,
        new_value: Option<Value>,
        old_value: Option<Value>,
        options: UpdateOptions,
    ) {
        let change = StateChange {
            path: path.to_string(),
            new_value,
            old_value,
            options,
        };
        watch::dispatch(&self.inner.listeners, &change);
        self.inner.watcher.send(&change);
    }

    /// Register `callback` for changes intersecting `paths`.
    pub fn subscribe<P, F>(&self, paths: P, callback: F) -> Subscription
    where
        P: IntoPaths,
        F: Fn(&StateChange) + 'static,
    {
        let id = self
            .inner
            .listeners
            .borrow_mut()
            .insert(paths.into_paths(), Rc::new(callback));
        Subscription::new(id, &self.inner.listeners)
    }

    /// Follow changes intersecting `paths` as an async stream.
    pub fn watch<P: IntoPaths>(&self, paths: P) -> WatchStream {
        self.inner.watcher.subscribe(paths.into_paths())
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Restore `paths` to their defaults inside one batch.
    pub fn reset_paths<P: IntoPaths>(&self, paths: P) {
        let defaults = defaults::initial_state();
        let updates: Vec<(String, Option<Value>)> = paths
            .into_paths()
            .into_iter()
            .map(|p| {
                let value = path::get_in(&defaults, &p).cloned();
                (p, value)
            })
            .collect();

        let options = UpdateOptions::with_reason("reset");
        let outcome = self.batch_with(options.clone(), || {
            for (path, value) in updates {
                self.assign(&path, value, options.clone());
            }
            Ok::<(), Infallible>(())
        });
        match outcome {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }

    /// Replace the whole tree with the defaults.
    ///
    /// Computed paths are recomputed against the fresh tree before the single
    /// `*` notification fires.
    pub fn reset(&self) {
        self.replace_state(defaults::initial_state());
        self.recompute_all_computed();
        self.capture_snapshot("RESET".to_string(), json!({ "reason": "fullReset" }));
        debug!("Full reset to initial state");

        let state = self.get_state();
        self.notify(WILDCARD, Some(state), None, UpdateOptions::with_reason("fullReset"));
    }

    /// While restoring, writes without `allow_during_restore` are ignored.
    pub fn set_restoring(&self, restoring: bool) {
        self.inner.restoring.set(restoring);
    }

    pub fn is_restoring(&self) -> bool {
        self.inner.restoring.get()
    }

    pub fn set_debugging(&self, enabled: bool) {
        self.inner.debug.borrow_mut().set_enabled(enabled);
        if enabled {
            info!("Debugging enabled - state changes will be captured");
        }
    }

    pub fn is_debugging(&self) -> bool {
        self.inner.debug.borrow().is_enabled()
    }

    pub fn debug_info(&self) -> DebugInfo {
        DebugInfo {
            current_state: self.get_state(),
            snapshots: self.inner.debug.borrow().snapshots(),
            listener_count: self.listener_count(),
        }
    }

    pub(crate) fn capture_snapshot(&self, action: String, details: Value) {
        if !self.inner.debug.borrow().is_enabled() {
            return;
        }
        let state = self.get_state();
        self.inner.debug.borrow_mut().push(action, details, state);
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateManager")
            .field("generation", &self.inner.generation.get())
            .field("listeners", &self.listener_count())
            .field("batching", &self.is_batching())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn recorder(manager: &StateManager, paths: &[&str]) -> Rc<RefCell<Vec<StateChange>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        manager.subscribe(paths, move |change: &StateChange| {
            sink.borrow_mut().push(change.clone())
        });
        log
    }

    #[test]
    fn test_set_then_get() {
        let manager = StateManager::new();
        manager.set("printer.currentModel", "P800");
        assert_eq!(manager.get("printer.currentModel"), Some(json!("P800")));
    }

    #[test]
    fn test_unknown_path_reads_none() {
        let manager = StateManager::new();
        assert_eq!(manager.get("nope.not.here"), None);
    }

    #[test]
    fn test_wildcard_get_returns_tree() {
        let manager = StateManager::new();
        assert_eq!(manager.get("*"), Some(manager.get_state()));
    }

    #[test]
    fn test_set_materializes_unknown_path() {
        let manager = StateManager::new();
        manager.set("custom.deep.value", 5);
        assert_eq!(manager.get("custom.deep"), Some(json!({"value": 5})));
    }

    #[test]
    fn test_set_array_element_keeps_array() {
        let manager = StateManager::new();
        let before = manager.get("printer.channels").unwrap();
        let log = recorder(&manager, &["printer.channels"]);

        manager.set("printer.channels.0", "X");

        let channels = manager.get("printer.channels").unwrap();
        let channels = channels.as_array().unwrap();
        assert_eq!(channels.len(), before.as_array().unwrap().len());
        assert_eq!(channels[0], json!("X"));
        assert_eq!(channels[1..], before.as_array().unwrap()[1..]);
        assert_eq!(log.borrow()[0].old_value, Some(json!("K")));
    }

    #[test]
    fn test_unaddressable_array_write_is_dropped() {
        let manager = StateManager::new();
        let before = manager.get_state();
        let log = recorder(&manager, &["*"]);

        manager.set("printer.channels.name", "X");

        assert_eq!(manager.get_state(), before);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_notification_payload() {
        let manager = StateManager::new();
        let log = recorder(&manager, &["app.debugLogs"]);
        manager.set_with("app.debugLogs", true, UpdateOptions::with_reason("toggle"));

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].path, "app.debugLogs");
        assert_eq!(log[0].new_value, Some(json!(true)));
        assert_eq!(log[0].old_value, Some(json!(false)));
        assert_eq!(log[0].options.reason.as_deref(), Some("toggle"));
    }

    #[test]
    fn test_parent_subscriber_sees_leaf_write() {
        let manager = StateManager::new();
        let log = recorder(&manager, &["a.b"]);
        manager.set("a.b.c", 1);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_leaf_subscriber_sees_parent_replacement() {
        let manager = StateManager::new();
        let log = recorder(&manager, &["a.b.c"]);
        manager.set("a.b", json!({"c": 2}));
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].path, "a.b");
    }

    #[test]
    fn test_sibling_subscriber_not_notified() {
        let manager = StateManager::new();
        let log = recorder(&manager, &["app.edit"]);
        manager.set("app.editMode", true);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_wildcard_subscriber_sees_everything() {
        let manager = StateManager::new();
        let log = recorder(&manager, &["*"]);
        manager.set("ui.statusMessage", "hi");
        manager.set("printer.currentModel", "P400");
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let manager = StateManager::new();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let sub = manager.subscribe("ui", move |_: &StateChange| counter.set(counter.get() + 1));

        manager.set("ui.statusMessage", "one");
        assert!(sub.unsubscribe());
        manager.set("ui.statusMessage", "two");
        assert_eq!(hits.get(), 1);
        assert_eq!(manager.listener_count(), 0);
    }

    #[test]
    fn test_identical_subscriptions_are_independent() {
        let manager = StateManager::new();
        let first = manager.subscribe("ui", |_: &StateChange| {});
        let _second = manager.subscribe("ui", |_: &StateChange| {});
        assert_eq!(manager.listener_count(), 2);
        first.unsubscribe();
        assert_eq!(manager.listener_count(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_abort_write() {
        let manager = StateManager::new();
        manager.subscribe("ui", |_: &StateChange| panic!("listener failure"));
        let log = recorder(&manager, &["ui"]);

        manager.set("ui.statusMessage", "still applied");
        assert_eq!(manager.get("ui.statusMessage"), Some(json!("still applied")));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_reentrant_set_from_listener() {
        let manager = StateManager::new();
        let handle = manager.clone();
        manager.subscribe("app.editMode", move |change: &StateChange| {
            if change.new_value == Some(json!(true)) {
                handle.set("ui.statusMessage", "editing");
            }
        });

        manager.set("app.editMode", true);
        assert_eq!(manager.get("ui.statusMessage"), Some(json!("editing")));
    }

    #[test]
    fn test_restoring_suppresses_writes() {
        let manager = StateManager::new();
        let log = recorder(&manager, &["app"]);
        manager.set_restoring(true);

        manager.set("app.editMode", true);
        assert_eq!(manager.get("app.editMode"), Some(json!(false)));

        manager.set_with("app.darkMode", false, UpdateOptions::new().allow_during_restore());
        assert_eq!(manager.get("app.darkMode"), Some(json!(false)));

        manager.set_restoring(false);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_full_reset_notifies_once_with_wildcard() {
        let manager = StateManager::new();
        manager.set("app.editMode", true);
        let log = recorder(&manager, &["app.editMode"]);

        manager.reset();

        assert_eq!(manager.get("app.editMode"), Some(json!(false)));
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].path, "*");
        assert_eq!(log[0].old_value, None);
        assert_eq!(log[0].options.reason.as_deref(), Some("fullReset"));
    }

    #[test]
    fn test_reset_paths_batches_defaults() {
        let manager = StateManager::new();
        manager.set("app.editMode", true);
        manager.set("ui.activeTab", "edit");
        manager.set("extra.flag", true);
        let log = recorder(&manager, &["*"]);

        manager.reset_paths(["app.editMode", "ui.activeTab", "extra.flag"]);

        assert_eq!(manager.get("app.editMode"), Some(json!(false)));
        assert_eq!(manager.get("ui.activeTab"), Some(json!("main")));
        assert_eq!(manager.get("extra.flag"), None);
        let log = log.borrow();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|c| c.options.batched && c.options.batch_size == Some(3)));
        assert!(log.iter().all(|c| c.options.reason.as_deref() == Some("reset")));
    }

    #[test]
    fn test_debug_snapshots() {
        let manager = StateManager::with_config(StateConfig::default().with_max_snapshots(2));
        manager.set("ui.statusMessage", "ignored");
        manager.set_debugging(true);
        manager.set("ui.statusMessage", "a");
        manager.set("ui.statusMessage", "b");
        manager.set("ui.statusMessage", "c");

        let info = manager.debug_info();
        let actions: Vec<_> = info.snapshots.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(actions, vec!["SET ui.statusMessage", "SET ui.statusMessage"]);
        assert_eq!(info.snapshots[1].details["newValue"], json!("c"));
        assert_eq!(info.snapshots[1].state["ui"]["statusMessage"], json!("c"));
    }

    #[test]
    fn test_debug_info_counts_listeners() {
        let manager = StateManager::new();
        manager.subscribe("a", |_: &StateChange| {});
        assert_eq!(manager.debug_info().listener_count, 1);
    }

    #[test]
    fn test_json_roundtrip_through_paths() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Selection {
            channel: Option<String>,
            ordinal: u32,
        }

        let manager = StateManager::new();
        manager
            .set_json(
                "app.editSelection",
                &Selection {
                    channel: Some("K".to_string()),
                    ordinal: 3,
                },
            )
            .unwrap();
        let loaded: Selection = manager.get_json("app.editSelection").unwrap().unwrap();
        assert_eq!(loaded.channel.as_deref(), Some("K"));
        assert!(manager.get_json::<u32>("app.editSelection").is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let manager = StateManager::new();
        let other = manager.clone();
        other.set("ui.statusMessage", "shared");
        assert_eq!(manager.get("ui.statusMessage"), Some(json!("shared")));
    }
}
