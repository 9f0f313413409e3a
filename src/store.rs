//! StateStore trait - the seam collaborators program against.
//!
//! Chart rendering, channel rows, curve editors and history all read and
//! write application state through this trait rather than a concrete
//! manager, so they can be handed the application's single store at
//! startup. The provided methods are the typed accessors for the quadGEN
//! namespaces.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::defaults::{self, Printer};
use crate::error::{Result, StateError};
use crate::manager::StateManager;
use crate::path::keys;
use crate::watch::UpdateOptions;

/// The current edit selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSelection {
    pub channel: Option<String>,
    pub ordinal: u32,
}

impl Default for EditSelection {
    fn default() -> Self {
        Self {
            channel: None,
            ordinal: 1,
        }
    }
}

/// The core state access trait.
pub trait StateStore {
    /// Get the value at a path. Returns `None` if it does not resolve.
    fn get(&self, path: &str) -> Option<Value>;

    /// Set a path to a value with options.
    fn set_with(&self, path: &str, value: Value, options: UpdateOptions);

    /// Apply several path/value pairs as one batch.
    fn batch_updates(&self, updates: Vec<(String, Value)>, options: UpdateOptions) -> Result<()>;

    fn set(&self, path: &str, value: Value) {
        self.set_with(path, value, UpdateOptions::default());
    }

    /// Get a value and deserialize it.
    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>>
    where
        Self: Sized,
    {
        match self.get(path) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Check if a path resolves.
    fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// The configured printer, falling back to the default model.
    fn current_printer(&self) -> &'static Printer {
        self.get(keys::PRINTER_CURRENT_MODEL)
            .and_then(|v| v.as_str().and_then(defaults::printer))
            .unwrap_or_else(defaults::default_printer)
    }

    /// Switch printer model and its channel list together.
    fn set_printer(&self, model: &str) -> Result<()> {
        let printer =
            defaults::printer(model).ok_or_else(|| StateError::UnknownPrinter(model.to_string()))?;
        self.batch_updates(
            vec![
                (keys::PRINTER_CURRENT_MODEL.to_string(), json!(printer.model)),
                (keys::PRINTER_CHANNELS.to_string(), json!(printer.channels)),
            ],
            UpdateOptions::default(),
        )
    }

    fn channel_value(&self, channel: &str, field: &str) -> Option<Value> {
        self.get(&keys::channel_value(channel, field))
    }

    fn set_channel_value(&self, channel: &str, field: &str, value: Value) {
        self.set(&keys::channel_value(channel, field), value);
    }

    fn is_channel_enabled(&self, channel: &str) -> bool {
        self.get(&keys::channel_enabled(channel))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn set_channel_enabled(&self, channel: &str, enabled: bool) {
        self.set(&keys::channel_enabled(channel), json!(enabled));
    }

    fn global_linearization(&self) -> Option<Value> {
        self.get(keys::LINEARIZATION_GLOBAL)
    }

    fn set_global_linearization(&self, data: Value, applied: bool) -> Result<()> {
        self.batch_updates(
            vec![
                (keys::LINEARIZATION_GLOBAL_DATA.to_string(), data),
                (keys::LINEARIZATION_GLOBAL_APPLIED.to_string(), json!(applied)),
            ],
            UpdateOptions::default(),
        )
    }

    fn per_channel_linearization(&self, channel: &str) -> Option<Value> {
        self.get(&keys::per_channel_linearization(channel))
    }

    fn set_per_channel_linearization(&self, channel: &str, data: Value, enabled: bool) -> Result<()> {
        self.batch_updates(
            vec![
                (keys::per_channel_linearization(channel), data),
                (keys::per_channel_linearization_enabled(channel), json!(enabled)),
            ],
            UpdateOptions::default(),
        )
    }

    fn loaded_quad_data(&self) -> Option<Value> {
        self.get(keys::CURVES_LOADED_QUAD_DATA)
            .filter(|v| !v.is_null())
    }

    fn set_loaded_quad_data(&self, data: Value) {
        self.set(keys::CURVES_LOADED_QUAD_DATA, data);
    }

    fn smart_curve(&self, channel: &str) -> Option<Value> {
        self.get(&keys::smart_curve(channel))
    }

    fn set_smart_curve(&self, channel: &str, curve: Value) {
        self.set(&keys::smart_curve(channel), curve);
    }

    fn is_edit_mode(&self) -> bool {
        self.get(keys::APP_EDIT_MODE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn set_edit_mode(&self, enabled: bool) {
        self.set(keys::APP_EDIT_MODE, json!(enabled));
    }

    /// Current edit selection; malformed fields read as their defaults.
    fn edit_selection(&self) -> EditSelection {
        let channel = self
            .get(keys::APP_EDIT_SELECTION_CHANNEL)
            .and_then(|v| v.as_str().map(str::to_string));
        let ordinal = self
            .get(keys::APP_EDIT_SELECTION_ORDINAL)
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1);
        EditSelection { channel, ordinal }
    }

    /// Select a channel and key point. Unless `options.skip_history` is set,
    /// a `__meta` description is stored for history consumers.
    fn set_edit_selection(
        &self,
        channel: Option<&str>,
        ordinal: u32,
        options: UpdateOptions,
    ) -> Result<()> {
        let description = match (&options.description, channel) {
            (Some(description), _) => description.clone(),
            (None, Some(channel)) => format!("Select channel {} (point {})", channel, ordinal),
            (None, None) => "Clear edit selection".to_string(),
        };
        let meta = if options.skip_history {
            Value::Null
        } else {
            json!({ "description": description })
        };
        self.batch_updates(
            vec![
                (keys::APP_EDIT_SELECTION_CHANNEL.to_string(), json!(channel)),
                (keys::APP_EDIT_SELECTION_ORDINAL.to_string(), json!(ordinal)),
                (keys::APP_EDIT_SELECTION_META.to_string(), meta),
            ],
            options,
        )
    }

    fn status(&self) -> String {
        self.get(keys::UI_STATUS_MESSAGE)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn set_status(&self, message: &str) {
        self.set(keys::UI_STATUS_MESSAGE, json!(message));
    }
}

impl StateStore for StateManager {
    fn get(&self, path: &str) -> Option<Value> {
        StateManager::get(self, path)
    }

    fn set_with(&self, path: &str, value: Value, options: UpdateOptions) {
        StateManager::set_with(self, path, value, options);
    }

    fn batch_updates(&self, updates: Vec<(String, Value)>, options: UpdateOptions) -> Result<()> {
        StateManager::batch_updates(self, updates, options)
    }
}
