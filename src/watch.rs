//! Subscriptions, change notifications, and the async change feed.
//!
//! Synchronous subscribers register a callback against one or more watched
//! paths and are invoked in registration order whenever an intersecting
//! path changes. The same changes are also published on a broadcast
//! channel so async consumers can follow them as a [`WatchStream`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{ready, Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{error, warn};

use crate::path;

/// Options attached to a write and forwarded to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateOptions {
    /// Apply the write even while a restore is in progress.
    pub allow_during_restore: bool,
    /// Free-form reason, e.g. `reset` or `fullReset`.
    pub reason: Option<String>,
    /// Ask history consumers not to record this change.
    pub skip_history: bool,
    /// Human readable description for history consumers.
    pub description: Option<String>,
    /// Set on notifications flushed at the end of a batch.
    pub batched: bool,
    /// Number of distinct paths flushed by the batch.
    pub batch_size: Option<usize>,
    /// Set on notifications for computed paths.
    pub computed: bool,
    /// Caller-defined options passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn allow_during_restore(mut self) -> Self {
        self.allow_during_restore = true;
        self
    }

    pub fn skip_history(mut self) -> Self {
        self.skip_history = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub(crate) fn computed() -> Self {
        Self {
            computed: true,
            ..Self::default()
        }
    }

    /// Overlay `other` on top of `self`. Flags accumulate, set fields in
    /// `other` win.
    pub fn merge(&mut self, other: &UpdateOptions) {
        self.allow_during_restore |= other.allow_during_restore;
        self.skip_history |= other.skip_history;
        self.batched |= other.batched;
        self.computed |= other.computed;
        if other.reason.is_some() {
            self.reason.clone_from(&other.reason);
        }
        if other.description.is_some() {
            self.description.clone_from(&other.description);
        }
        if other.batch_size.is_some() {
            self.batch_size = other.batch_size;
        }
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    pub fn merged(mut self, other: &UpdateOptions) -> Self {
        self.merge(other);
        self
    }
}

/// A change delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    /// The path that was written, or `*` for a full reset.
    pub path: String,
    /// Value after the write (`None` if the path no longer resolves).
    pub new_value: Option<Value>,
    /// Value before the write, or before the batch began.
    pub old_value: Option<Value>,
    pub options: UpdateOptions,
}

/// Callback invoked for intersecting changes.
pub type Listener = Rc<dyn Fn(&StateChange)>;

/// Opaque subscription identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct ListenerEntry {
    paths: Vec<String>,
    callback: Listener,
}

/// Registry of synchronous subscribers, in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: IndexMap<SubscriptionId, ListenerEntry>,
}

impl Listeners {
    pub(crate) fn insert(&mut self, paths: Vec<String>, callback: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.insert(id, ListenerEntry { paths, callback });
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        self.entries.shift_remove(&id).is_some()
    }

    pub(crate) fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Subscribers with a watched path intersecting `changed` (`*` matches
    /// everything).
    pub(crate) fn matching(&self, changed: &str) -> Vec<(SubscriptionId, Listener)> {
        self.entries
            .iter()
            .filter(|(_, entry)| path::any_intersects(&entry.paths, changed))
            .map(|(id, entry)| (*id, Rc::clone(&entry.callback)))
            .collect()
    }
}

/// Deliver `change` to every matching subscriber.
///
/// The matching set is captured up front; a subscriber removed by an earlier
/// callback in the same cycle is skipped. Callback panics are logged and do
/// not interrupt delivery.
pub(crate) fn dispatch(listeners: &RefCell<Listeners>, change: &StateChange) {
    let targets = listeners.borrow().matching(&change.path);
    for (id, callback) in targets {
        if !listeners.borrow().contains(id) {
            continue;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(change)));
        if let Err(payload) = outcome {
            error!(
                path = %change.path,
                "State listener error: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by `subscribe`.
///
/// The subscription stays active until [`Subscription::unsubscribe`] is
/// called; dropping the handle leaves it registered.
pub struct Subscription {
    id: SubscriptionId,
    listeners: Weak<RefCell<Listeners>>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, listeners: &Rc<RefCell<Listeners>>) -> Self {
        Self {
            id,
            listeners: Rc::downgrade(listeners),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the subscription. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.listeners.upgrade() {
            Some(listeners) => listeners.borrow_mut().remove(self.id),
            None => false,
        }
    }
}

/// A stream of state changes intersecting a set of watched paths.
pub struct WatchStream {
    receiver: BroadcastStream<StateChange>,
    paths: Vec<String>,
}

impl WatchStream {
    /// Create a new watch stream for the given paths.
    pub fn new(receiver: broadcast::Receiver<StateChange>, paths: Vec<String>) -> Self {
        Self {
            receiver: BroadcastStream::new(receiver),
            paths,
        }
    }

    /// The paths this stream is watching.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    fn matches(&self, changed: &str) -> bool {
        path::any_intersects(&self.paths, changed)
    }
}

impl Stream for WatchStream {
    type Item = StateChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.receiver).poll_next(cx)) {
                Some(Ok(change)) => {
                    if self.matches(&change.path) {
                        return Poll::Ready(Some(change));
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "watch stream lagged, skipping missed changes");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Handle for publishing changes to async watchers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<StateChange>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a change. A no-op when nobody is watching.
    pub fn send(&self, change: &StateChange) {
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(change.clone());
        }
    }

    pub fn subscribe(&self, paths: Vec<String>) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), paths)
    }

    /// Get the number of current watchers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(1024)
    }
}
