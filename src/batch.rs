//! Transactional batches.
//!
//! Writes inside a batch mutate the tree immediately, so reads in the same
//! batch observe them, but notifications are buffered per path. Only the
//! outermost batch commits: computed paths are brought up to date once for
//! the whole change set, then every buffered path is notified exactly once,
//! in the order each path was first written.
//!
//! If the batch body fails (returns `Err` or panics) the tree is restored
//! from the snapshot taken when the outermost batch began. Nested batches
//! share that snapshot, so an inner failure discards the outer writes too.

use indexmap::map::Entry;
use indexmap::IndexMap;
use serde_json::Value;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

use crate::error::{Result, StateError};
use crate::manager::StateManager;
use crate::watch::UpdateOptions;

/// A buffered change awaiting flush.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingChange {
    /// Value before the batch first touched the path.
    pub(crate) old_value: Option<Value>,
    /// Last value written.
    pub(crate) new_value: Option<Value>,
    pub(crate) options: UpdateOptions,
}

#[derive(Debug, Default)]
pub(crate) struct BatchState {
    depth: usize,
    snapshot: Option<Value>,
    pending: IndexMap<String, PendingChange>,
    options: UpdateOptions,
}

impl BatchState {
    pub(crate) fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Buffer a write. The first old value is kept, the newest value wins,
    /// options accumulate.
    pub(crate) fn record(
        &mut self,
        path: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
        options: &UpdateOptions,
    ) {
        match self.pending.entry(path.to_string()) {
            Entry::Occupied(mut entry) => {
                let pending = entry.get_mut();
                pending.new_value = new_value;
                pending.options.merge(options);
            }
            Entry::Vacant(entry) => {
                entry.insert(PendingChange {
                    old_value,
                    new_value,
                    options: options.clone(),
                });
            }
        }
    }

    pub(crate) fn changed_paths(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }
}

impl StateManager {
    /// Run `body` as a transaction.
    ///
    /// Returns the body's result. On `Err` the whole outermost transaction is
    /// rolled back and the error returned unchanged; on panic it is rolled
    /// back and the panic resumed.
    pub fn batch<T, E, F>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.batch_with(UpdateOptions::default(), body)
    }

    /// Like [`batch`](Self::batch), with options merged into every flushed
    /// notification.
    pub fn batch_with<T, E, F>(&self, options: UpdateOptions, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.begin_batch(&options);
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => {
                self.end_batch();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.rollback();
                Err(err)
            }
            Err(payload) => {
                self.rollback();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Apply a path -> value map as one batch, each write carrying `options`.
    pub fn batch_updates<I, K, V>(&self, updates: I, options: UpdateOptions) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.batch_with(options.clone(), || {
            for (path, value) in updates {
                self.set_with(path.as_ref(), value, options.clone());
            }
            Ok(())
        })
    }

    /// Apply an update map received as JSON. Anything but an object is
    /// rejected before the tree is touched.
    pub fn apply_json(&self, updates: &Value, options: UpdateOptions) -> Result<()> {
        match updates {
            Value::Object(map) => {
                self.batch_updates(map.iter().map(|(k, v)| (k, v.clone())), options)
            }
            _ => Err(StateError::InvalidBatch(
                "stateManager.batch expects a function or an object map".to_string(),
            )),
        }
    }

    pub fn is_batching(&self) -> bool {
        self.inner.batch.borrow().is_active()
    }

    fn begin_batch(&self, options: &UpdateOptions) {
        let outermost = !self.is_batching();
        let snapshot = outermost.then(|| self.get_state());

        let mut batch = self.inner.batch.borrow_mut();
        if let Some(snapshot) = snapshot {
            batch.snapshot = Some(snapshot);
            batch.pending.clear();
            batch.options = UpdateOptions::default();
        }
        batch.options.merge(options);
        batch.depth += 1;
    }

    fn end_batch(&self) {
        {
            let mut batch = self.inner.batch.borrow_mut();
            match batch.depth {
                0 => {
                    debug!("batch ended after its transaction was rolled back");
                    return;
                }
                1 => {}
                _ => {
                    batch.depth -= 1;
                    return;
                }
            }
        }

        // Still marked as batching so computed updates land in the buffer.
        let changed = self.inner.batch.borrow().changed_paths();
        self.update_computed_for_paths(&changed);

        let (pending, batch_options) = {
            let mut batch = self.inner.batch.borrow_mut();
            batch.depth = 0;
            batch.snapshot = None;
            (mem::take(&mut batch.pending), mem::take(&mut batch.options))
        };

        let batch_size = pending.len();
        if batch_size == 0 {
            return;
        }
        debug!(batch_size, paths = ?pending.keys().collect::<Vec<_>>(), "batch flushed");

        let flush = UpdateOptions {
            batched: true,
            batch_size: Some(batch_size),
            ..UpdateOptions::default()
        };
        for (path, change) in pending {
            let options = batch_options.clone().merged(&change.options).merged(&flush);
            self.notify(&path, change.new_value, change.old_value, options);
        }
    }

    fn rollback(&self) {
        let snapshot = {
            let mut batch = self.inner.batch.borrow_mut();
            batch.depth = 0;
            batch.pending.clear();
            batch.options = UpdateOptions::default();
            batch.snapshot.take()
        };
        if let Some(snapshot) = snapshot {
            self.replace_state(snapshot);
            debug!("batch rolled back");
        }
    }
}
