//! # quadgen-state
//!
//! Centralized reactive state for the quadGEN ink-curve editor.
//!
//! A single [`StateManager`] owns the application tree (printer setup,
//! curves, linearization, UI, files, scaling and derived values) and is the
//! only way to mutate it. On top of plain path reads and writes it provides:
//!
//! - **Path addressing**: dot-notation paths (`printer.channelValues.K.percentage`)
//! - **Subscriptions**: callbacks for a path and everything above or below it
//! - **Batches**: buffered, all-or-nothing transactions with one notification per path
//! - **Computed properties**: paths kept equal to a function of other paths
//! - **Selectors**: memoized read projections
//! - **Debug snapshots**: a bounded history of changes for diagnostics
//!
//! ## Quick Start
//!
//! ```rust
//! use quadgen_state::{StateChange, StateManager};
//!
//! let store = StateManager::new();
//!
//! let sub = store.subscribe("printer.channelValues", |change: &StateChange| {
//!     println!("{} changed to {:?}", change.path, change.new_value);
//! });
//!
//! store.set("printer.channelValues.K.percentage", 80);
//! assert_eq!(
//!     store.get("printer.channelValues.K.percentage"),
//!     Some(serde_json::json!(80))
//! );
//!
//! sub.unsubscribe();
//! ```
//!
//! ## Batches
//!
//! ```rust
//! use quadgen_state::StateManager;
//!
//! let store = StateManager::new();
//!
//! let result = store.batch(|| {
//!     store.set("app.editMode", true);
//!     store.set("ui.statusMessage", "editing");
//!     Err::<(), _>("abort")
//! });
//!
//! // Both writes were rolled back.
//! assert!(result.is_err());
//! assert_eq!(store.get("app.editMode"), Some(serde_json::json!(false)));
//! ```
//!
//! ## Computed Properties
//!
//! ```rust
//! use quadgen_state::StateManager;
//! use serde_json::{json, Value};
//!
//! # fn main() -> quadgen_state::Result<()> {
//! let store = StateManager::new();
//!
//! store.add_computed("computed.flags.hasLogs", "app.debugLogs", |deps| {
//!     json!(deps[0].as_ref().and_then(Value::as_bool).unwrap_or(false))
//! })?;
//!
//! store.set("app.debugLogs", true);
//! assert_eq!(store.get("computed.flags.hasLogs"), Some(json!(true)));
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod computed;
pub mod config;
pub mod debug;
pub mod defaults;
pub mod error;
pub mod manager;
pub mod path;
pub mod selector;
pub mod store;
pub mod watch;

// Re-export main types
pub use config::StateConfig;
pub use debug::{DebugInfo, DebugSnapshot};
pub use defaults::{initial_state, Printer, PRINTERS};
pub use error::{Result, StateError};
pub use manager::StateManager;
pub use path::{keys, IntoPaths, StatePath, WILDCARD};
pub use selector::Selector;
pub use store::{EditSelection, StateStore};
pub use watch::{StateChange, Subscription, SubscriptionId, UpdateOptions, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::StateConfig;
    pub use crate::error::{Result, StateError};
    pub use crate::manager::StateManager;
    pub use crate::path::{keys, StatePath};
    pub use crate::selector::Selector;
    pub use crate::store::StateStore;
    pub use crate::watch::{StateChange, Subscription, UpdateOptions, WatchStream};
}
