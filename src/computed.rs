//! Computed properties: paths derived from other paths.
//!
//! A computed path is backed by a [`Selector`] over its dependencies. When a
//! write touches a dependency the value is recomputed; if it equals the
//! stored value nothing is written and nobody is notified. Changed computed
//! paths count as writes themselves, so computed values may depend on other
//! computed values.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::Result;
use crate::manager::StateManager;
use crate::path::{self, IntoPaths};
use crate::selector::Selector;
use crate::watch::UpdateOptions;

pub(crate) struct ComputedEntry {
    selector: Selector,
}

/// Computed registrations keyed by output path, in registration order.
#[derive(Default)]
pub(crate) struct ComputedRegistry {
    entries: IndexMap<String, ComputedEntry>,
}

impl ComputedRegistry {
    fn insert(&mut self, path: String, selector: Selector) {
        self.entries.insert(path, ComputedEntry { selector });
    }

    fn remove(&mut self, path: &str) -> bool {
        self.entries.shift_remove(path).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries with a dependency intersecting any of `changed`.
    fn dependents_of(&self, changed: &[String]) -> Vec<(String, Selector)> {
        self.entries
            .iter()
            .filter(|(_, entry)| {
                changed
                    .iter()
                    .any(|c| path::any_intersects(entry.selector.paths(), c))
            })
            .map(|(path, entry)| (path.clone(), entry.selector.clone()))
            .collect()
    }

    fn all(&self) -> Vec<(String, Selector)> {
        self.entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.selector.clone()))
            .collect()
    }
}

impl StateManager {
    /// Register `path` as derived from `dependencies`.
    ///
    /// The initial value is computed and written immediately without
    /// notifying anyone. Registering an existing path replaces it.
    pub fn add_computed<P, F>(&self, path: &str, dependencies: P, compute: F) -> Result<()>
    where
        P: IntoPaths,
        F: Fn(&[Option<Value>]) -> Value + 'static,
    {
        let selector = self.create_selector(dependencies, move |values| Some(compute(values)))?;
        let value = selector.get();
        self.write_raw(path, value);
        self.invalidate_selectors_for_path(path);
        self.inner
            .computed
            .borrow_mut()
            .insert(path.to_string(), selector);
        trace!(path, "computed property registered");
        Ok(())
    }

    /// Stop maintaining `path`. Its last value stays in the tree.
    pub fn remove_computed(&self, path: &str) -> bool {
        self.inner.computed.borrow_mut().remove(path)
    }

    pub fn computed_count(&self) -> usize {
        self.inner.computed.borrow().len()
    }

    /// Recompute every computed path depending on `changed_paths`.
    ///
    /// Outside a batch each changed computed path is notified right away
    /// with `computed: true`. Inside one the change is merged into the
    /// pending batch buffer, keeping any earlier old value, and goes out
    /// with the commit.
    pub fn update_computed_for_paths(&self, changed_paths: &[String]) {
        let limit = self.computed_count() + 1;
        let mut frontier = changed_paths.to_vec();

        for _ in 0..limit {
            let dependents = self.inner.computed.borrow().dependents_of(&frontier);
            if dependents.is_empty() {
                return;
            }

            let mut next = Vec::new();
            for (path, selector) in dependents {
                if let Some(changed) = self.refresh_computed(&path, &selector) {
                    next.push(changed);
                }
            }
            if next.is_empty() {
                return;
            }
            frontier = next;
        }

        warn!(
            paths = ?frontier,
            "computed propagation did not settle, check for dependency cycles"
        );
    }

    /// Recompute one entry. Returns the path if its value changed.
    fn refresh_computed(&self, path: &str, selector: &Selector) -> Option<String> {
        let next = selector.get();
        let current = self.get(path);
        if next == current {
            return None;
        }

        if !self.write_raw(path, next.clone()) {
            return None;
        }
        self.invalidate_selectors_for_path(path);

        let options = UpdateOptions::computed();
        if self.is_batching() {
            self.inner
                .batch
                .borrow_mut()
                .record(path, current, next, &options);
        } else {
            self.notify(path, next, current, options);
        }
        Some(path.to_string())
    }

    /// Silently bring every computed path in line with a replaced tree.
    pub(crate) fn recompute_all_computed(&self) {
        let entries = self.inner.computed.borrow().all();
        for _ in 0..=entries.len() {
            let mut changed = false;
            for (path, selector) in &entries {
                let next = selector.get();
                if next != self.get(path) {
                    self.write_raw(path, next);
                    self.invalidate_selectors_for_path(path);
                    changed = true;
                }
            }
            if !changed {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::StateChange;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn truthy(value: &Option<Value>) -> bool {
        match value {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    fn recorder(manager: &StateManager, paths: &[&str]) -> Rc<RefCell<Vec<StateChange>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        manager.subscribe(paths, move |change: &StateChange| {
            sink.borrow_mut().push(change.clone())
        });
        log
    }

    #[test]
    fn test_initial_value_written_without_notification() {
        let manager = StateManager::new();
        let log = recorder(&manager, &["computed"]);
        manager
            .add_computed("computed.flags.hasLogs", "app.debugLogs", |v| json!(truthy(&v[0])))
            .unwrap();

        assert_eq!(manager.get("computed.flags.hasLogs"), Some(json!(false)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_updates_when_dependency_changes() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.flags.hasLogs", "app.debugLogs", |v| json!(truthy(&v[0])))
            .unwrap();
        let log = recorder(&manager, &["computed.flags.hasLogs"]);

        manager.set("app.debugLogs", true);

        assert_eq!(manager.get("computed.flags.hasLogs"), Some(json!(true)));
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].new_value, Some(json!(true)));
        assert_eq!(log[0].old_value, Some(json!(false)));
        assert!(log[0].options.computed);
    }

    #[test]
    fn test_computed_notified_before_trigger() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.flags.hasLogs", "app.debugLogs", |v| json!(truthy(&v[0])))
            .unwrap();
        let log = recorder(&manager, &["*"]);

        manager.set("app.debugLogs", true);

        let paths: Vec<_> = log.borrow().iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec!["computed.flags.hasLogs", "app.debugLogs"]);
    }

    #[test]
    fn test_unchanged_result_is_not_notified() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.zoomed", "app.chartZoomIndex", |v| {
                json!(v[0].as_ref().and_then(Value::as_u64).unwrap_or(0) > 5)
            })
            .unwrap();
        let log = recorder(&manager, &["computed.zoomed"]);

        manager.set("app.chartZoomIndex", 8);
        assert!(log.borrow().is_empty());
        assert_eq!(manager.get("computed.zoomed"), Some(json!(true)));
    }

    #[test]
    fn test_batched_dependencies_update_once() {
        let manager = StateManager::new();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        manager
            .add_computed(
                "computed.flags.bothEnabled",
                ["app.debugLogs", "app.editMode"],
                move |v| {
                    counter.set(counter.get() + 1);
                    json!(truthy(&v[0]) && truthy(&v[1]))
                },
            )
            .unwrap();
        let log = recorder(&manager, &["computed.flags.bothEnabled"]);

        manager
            .batch(|| {
                manager.set("app.debugLogs", true);
                manager.set("app.editMode", true);
                Ok::<_, ()>(())
            })
            .unwrap();

        assert_eq!(manager.get("computed.flags.bothEnabled"), Some(json!(true)));
        assert_eq!(calls.get(), 2);
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].old_value, Some(json!(false)));
        assert!(log[0].options.computed);
        assert!(log[0].options.batched);
        assert_eq!(log[0].options.batch_size, Some(3));
    }

    #[test]
    fn test_remove_computed_stops_updates() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.flags.hasLogs", "app.debugLogs", |v| json!(truthy(&v[0])))
            .unwrap();
        assert!(manager.remove_computed("computed.flags.hasLogs"));
        let log = recorder(&manager, &["computed.flags.hasLogs"]);

        manager.set("app.debugLogs", true);

        assert!(log.borrow().is_empty());
        assert_eq!(manager.get("computed.flags.hasLogs"), Some(json!(false)));
        assert!(!manager.remove_computed("computed.flags.hasLogs"));
    }

    #[test]
    fn test_chained_computed_values() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.percent", "scaling.globalPercent", |v| {
                json!(v[0].as_ref().and_then(Value::as_f64).unwrap_or(0.0) / 100.0)
            })
            .unwrap();
        manager
            .add_computed("computed.isScaled", "computed.percent", |v| {
                json!(v[0].as_ref().and_then(Value::as_f64) != Some(1.0))
            })
            .unwrap();
        assert_eq!(manager.get("computed.isScaled"), Some(json!(false)));

        manager.set("scaling.globalPercent", 80);
        assert_eq!(manager.get("computed.percent"), Some(json!(0.8)));
        assert_eq!(manager.get("computed.isScaled"), Some(json!(true)));
    }

    #[test]
    fn test_cycle_terminates() {
        let manager = StateManager::new();
        manager
            .add_computed("loop.a", "loop.b", |v| {
                json!(v[0].as_ref().and_then(Value::as_i64).unwrap_or(0) + 1)
            })
            .unwrap();
        manager
            .add_computed("loop.b", "loop.a", |v| {
                json!(v[0].as_ref().and_then(Value::as_i64).unwrap_or(0) + 1)
            })
            .unwrap();

        manager.set("loop.seed", 1);
        manager.set("loop.a", 10);
        assert!(manager.get("loop.b").is_some());
    }

    #[test]
    fn test_rollback_discards_computed_updates() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.flags.hasLogs", "app.debugLogs", |v| json!(truthy(&v[0])))
            .unwrap();

        let result = manager.batch(|| {
            manager.set("app.debugLogs", true);
            Err::<(), _>("abort")
        });

        assert_eq!(result, Err("abort"));
        assert_eq!(manager.get("computed.flags.hasLogs"), Some(json!(false)));
    }

    #[test]
    fn test_full_reset_recomputes() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.flags.hasLogs", "app.debugLogs", |v| json!(truthy(&v[0])))
            .unwrap();
        manager.set("app.debugLogs", true);
        assert_eq!(manager.get("computed.flags.hasLogs"), Some(json!(true)));

        manager.reset();

        assert_eq!(manager.get("app.debugLogs"), Some(json!(false)));
        assert_eq!(manager.get("computed.flags.hasLogs"), Some(json!(false)));
    }

    #[test]
    fn test_reset_paths_updates_computed() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.flags.hasLogs", "app.debugLogs", |v| json!(truthy(&v[0])))
            .unwrap();
        manager.set("app.debugLogs", true);
        let log = recorder(&manager, &["computed.flags.hasLogs"]);

        manager.reset_paths(["app.debugLogs"]);

        assert_eq!(manager.get("computed.flags.hasLogs"), Some(json!(false)));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_manual_propagation_outside_batch_notifies() {
        let manager = StateManager::new();
        manager
            .add_computed("computed.flags.hasLogs", "app.debugLogs", |v| json!(truthy(&v[0])))
            .unwrap();
        let log = recorder(&manager, &["computed.flags.hasLogs"]);

        manager.write_raw("app.debugLogs", Some(json!(true)));
        manager.update_computed_for_paths(&["app.debugLogs".to_string()]);
        assert_eq!(log.borrow().len(), 1);

        // A later, empty batch has nothing left over to flush.
        manager.batch(|| Ok::<_, ()>(())).unwrap();
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].new_value, Some(json!(true)));
        assert!(log[0].options.computed);
        assert!(!log[0].options.batched);
    }

    #[test]
    fn test_empty_dependencies_rejected() {
        let manager = StateManager::new();
        let result = manager.add_computed("computed.x", Vec::<String>::new(), |_| Value::Null);
        assert!(result.is_err());
        assert_eq!(manager.get("computed.x"), None);
    }
}
