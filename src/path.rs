//! Dot-notation path addressing over the state tree.
//!
//! Paths like `printer.channelValues.K.percentage` address nodes inside a
//! `serde_json::Value` tree. `*` is the whole-tree sentinel. Two paths are
//! related when they are equal or one extends the other at a `.` boundary,
//! so `printer.channelValues` and `printer.channelValues.K` intersect while
//! `app.edit` and `app.editMode` do not.

use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, StateError};

/// Sentinel path addressing the entire tree.
pub const WILDCARD: &str = "*";

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// Split a path into its segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR)
}

/// Returns true if `prefix` equals `path` or is a dot-boundary ancestor of it.
fn is_ancestor_or_self(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with(SEPARATOR),
        None => false,
    }
}

/// Path intersection: exact match, dot-prefix relation in either direction,
/// or a wildcard on either side.
pub fn intersects(a: &str, b: &str) -> bool {
    a == WILDCARD || b == WILDCARD || is_ancestor_or_self(a, b) || is_ancestor_or_self(b, a)
}

/// Returns true if any path in `watched` intersects `changed`.
pub fn any_intersects<S: AsRef<str>>(watched: &[S], changed: &str) -> bool {
    watched.iter().any(|w| intersects(w.as_ref(), changed))
}

/// Resolve `path` against `root`. Returns `None` for unresolved paths.
pub fn get_in<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path == WILDCARD {
        return Some(root);
    }
    let mut current = root;
    for key in segments(path) {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// Arrays are addressed by index: an existing element is written in place
/// and the index one past the end appends. Any other intermediate that is
/// not a container (including `null`) is replaced with a fresh empty
/// object. Returns false, leaving the tree untouched, when a segment
/// cannot address an array.
pub fn set_in(root: &mut Value, path: &str, value: Value) -> bool {
    let keys: Vec<&str> = segments(path).collect();
    if !addressable(root, &keys) {
        return false;
    }
    let Some((last, parents)) = keys.split_last() else {
        return false;
    };
    let mut current = root;
    for key in parents {
        current = match child_mut(current, key) {
            Some(child) => child,
            None => return false,
        };
    }
    match current {
        Value::Array(items) => match slot_mut(items, last) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        },
        other => {
            ensure_object(other).insert((*last).to_string(), value);
            true
        }
    }
}

/// Remove the leaf at `path`. Intermediates are left untouched and nothing
/// happens if the path does not resolve. Array elements are nulled rather
/// than removed so sibling indices stay stable.
pub fn remove_in(root: &mut Value, path: &str) -> Option<Value> {
    let mut keys: Vec<&str> = segments(path).collect();
    let last = keys.pop()?;
    let mut current = root;
    for key in keys {
        current = match current {
            Value::Object(map) => map.get_mut(key)?,
            Value::Array(items) => items.get_mut(array_index(key)?)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => map.shift_remove(last),
        Value::Array(items) => {
            let slot = items.get_mut(array_index(last)?)?;
            Some(std::mem::replace(slot, Value::Null))
        }
        _ => None,
    }
}

fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Checks, before anything is mutated, that every array met along `keys`
/// is addressed by an index no further than one past its end.
fn addressable(root: &Value, keys: &[&str]) -> bool {
    let mut current = root;
    for key in keys {
        current = match current {
            Value::Array(items) => match array_index(key) {
                Some(index) if index < items.len() => &items[index],
                Some(index) if index == items.len() => return true,
                _ => return false,
            },
            Value::Object(map) => match map.get(*key) {
                Some(child) => child,
                None => return true,
            },
            _ => return true,
        };
    }
    true
}

/// Element `key` of `items`, appending a `null` when `key` is one past the end.
fn slot_mut<'a>(items: &'a mut Vec<Value>, key: &str) -> Option<&'a mut Value> {
    let index = array_index(key)?;
    if index == items.len() {
        items.push(Value::Null);
    }
    items.get_mut(index)
}

/// Step into `key`, turning a non-container child into an empty object.
fn child_mut<'a>(node: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    let child = match node {
        Value::Array(items) => slot_mut(items, key)?,
        other => ensure_object(other)
            .entry(key.to_string())
            .or_insert(Value::Null),
    };
    if !(child.is_object() || child.is_array()) {
        *child = Value::Object(Map::new());
    }
    Some(child)
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// A validated dot path.
///
/// The runtime API takes plain `&str`; `StatePath` is for callers that build
/// paths from data and want malformed input rejected up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatePath(String);

impl StatePath {
    /// Parse and validate a path.
    pub fn parse(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self(path))
    }

    /// Append a segment.
    pub fn join(&self, segment: &str) -> Result<Self> {
        Self::parse(format!("{}{}{}", self.0, SEPARATOR, segment))
    }

    /// The parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(SEPARATOR)
            .map(|(parent, _)| Self(parent.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StatePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate that a path is well-formed.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(StateError::InvalidPath("path cannot be empty".to_string()));
    }
    if path == WILDCARD {
        return Ok(());
    }
    if segments(path).any(str::is_empty) {
        return Err(StateError::InvalidPath(format!(
            "path '{}' contains an empty segment",
            path
        )));
    }
    Ok(())
}

/// Conversion into a list of watched paths.
pub trait IntoPaths {
    fn into_paths(self) -> Vec<String>;
}

impl IntoPaths for &str {
    fn into_paths(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoPaths for String {
    fn into_paths(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoPaths for &String {
    fn into_paths(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl IntoPaths for &StatePath {
    fn into_paths(self) -> Vec<String> {
        vec![self.0.clone()]
    }
}

impl IntoPaths for &[&str] {
    fn into_paths(self) -> Vec<String> {
        self.iter().map(|p| (*p).to_string()).collect()
    }
}

impl<const N: usize> IntoPaths for [&str; N] {
    fn into_paths(self) -> Vec<String> {
        self.iter().map(|p| (*p).to_string()).collect()
    }
}

impl IntoPaths for Vec<&str> {
    fn into_paths(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IntoPaths for Vec<String> {
    fn into_paths(self) -> Vec<String> {
        self
    }
}

impl IntoPaths for &[String] {
    fn into_paths(self) -> Vec<String> {
        self.to_vec()
    }
}

impl IntoPaths for &Vec<String> {
    fn into_paths(self) -> Vec<String> {
        self.clone()
    }
}

impl IntoPaths for &[StatePath] {
    fn into_paths(self) -> Vec<String> {
        self.iter().map(|p| p.0.clone()).collect()
    }
}

impl IntoPaths for Vec<StatePath> {
    fn into_paths(self) -> Vec<String> {
        self.into_iter().map(|p| p.0).collect()
    }
}

/// Well-known paths of the quadGEN state tree.
pub mod keys {
    pub const APP_VERSION: &str = "app.version";
    pub const APP_DEBUG_LOGS: &str = "app.debugLogs";
    pub const APP_DEBUG_AI: &str = "app.debugAI";
    pub const APP_CHART_ZOOM_INDEX: &str = "app.chartZoomIndex";
    pub const APP_EDIT_MODE: &str = "app.editMode";
    pub const APP_EDIT_SELECTION: &str = "app.editSelection";
    pub const APP_EDIT_SELECTION_CHANNEL: &str = "app.editSelection.channel";
    pub const APP_EDIT_SELECTION_ORDINAL: &str = "app.editSelection.ordinal";
    pub const APP_EDIT_SELECTION_META: &str = "app.editSelection.__meta";
    pub const APP_DARK_MODE: &str = "app.darkMode";

    pub const PRINTER_CURRENT_MODEL: &str = "printer.currentModel";
    pub const PRINTER_CHANNELS: &str = "printer.channels";
    pub const PRINTER_CHANNEL_VALUES: &str = "printer.channelValues";
    pub const PRINTER_CHANNEL_STATES: &str = "printer.channelStates";

    pub const CURVES_LOADED_QUAD_DATA: &str = "curves.loadedQuadData";
    pub const CURVES_SMART_CURVES: &str = "curves.smartCurves";
    pub const CURVES_KEY_POINTS: &str = "curves.keyPoints";

    pub const LINEARIZATION_GLOBAL: &str = "linearization.global";
    pub const LINEARIZATION_GLOBAL_DATA: &str = "linearization.global.data";
    pub const LINEARIZATION_GLOBAL_APPLIED: &str = "linearization.global.applied";
    pub const LINEARIZATION_PER_CHANNEL_DATA: &str = "linearization.perChannel.data";
    pub const LINEARIZATION_PER_CHANNEL_ENABLED: &str = "linearization.perChannel.enabled";

    pub const UI_STATUS_MESSAGE: &str = "ui.statusMessage";
    pub const UI_ACTIVE_TAB: &str = "ui.activeTab";

    pub const SCALING_GLOBAL_PERCENT: &str = "scaling.globalPercent";

    pub const COMPUTED: &str = "computed";

    /// `printer.channelValues.<channel>.<field>`
    pub fn channel_value(channel: &str, field: &str) -> String {
        format!("{}.{}.{}", PRINTER_CHANNEL_VALUES, channel, field)
    }

    /// `printer.channelStates.<channel>.enabled`
    pub fn channel_enabled(channel: &str) -> String {
        format!("{}.{}.enabled", PRINTER_CHANNEL_STATES, channel)
    }

    /// `curves.smartCurves.<channel>`
    pub fn smart_curve(channel: &str) -> String {
        format!("{}.{}", CURVES_SMART_CURVES, channel)
    }

    /// `linearization.perChannel.data.<channel>`
    pub fn per_channel_linearization(channel: &str) -> String {
        format!("{}.{}", LINEARIZATION_PER_CHANNEL_DATA, channel)
    }

    /// `linearization.perChannel.enabled.<channel>`
    pub fn per_channel_linearization_enabled(channel: &str) -> String {
        format!("{}.{}", LINEARIZATION_PER_CHANNEL_ENABLED, channel)
    }
}
