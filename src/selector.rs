//! Memoized read selectors.
//!
//! A [`Selector`] projects one or more paths through a compute function and
//! caches the result. The cache is valid for the manager generation it was
//! computed against and for the exact dependency values it saw. Every
//! selector is also tracked by the manager so writes can drop intersecting
//! caches eagerly.

use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Result, StateError};
use crate::manager::{Inner, StateManager};
use crate::path::{self, IntoPaths};

/// Compute function over the dependency values, in declaration order.
pub type SelectFn = dyn Fn(&[Option<Value>]) -> Option<Value>;

struct Memo {
    generation: u64,
    dependencies: Vec<Option<Value>>,
    result: Option<Value>,
}

pub(crate) struct SelectorCell {
    paths: Vec<String>,
    compute: Box<SelectFn>,
    cache: RefCell<Option<Memo>>,
}

impl SelectorCell {
    fn invalidate(&self) {
        self.cache.borrow_mut().take();
    }
}

/// A memoized projection of state paths.
#[derive(Clone)]
pub struct Selector {
    cell: Rc<SelectorCell>,
    source: Weak<Inner>,
}

impl Selector {
    /// Evaluate the selector, reusing the cached result when every
    /// dependency is unchanged. Returns `None` once the manager is gone.
    pub fn get(&self) -> Option<Value> {
        let source = self.source.upgrade()?;
        let generation = source.generation();
        let dependencies: Vec<Option<Value>> =
            self.cell.paths.iter().map(|p| source.read(p)).collect();
        drop(source);

        if let Some(memo) = self.cell.cache.borrow().as_ref() {
            if memo.generation == generation && memo.dependencies == dependencies {
                return memo.result.clone();
            }
        }

        let result = (self.cell.compute)(&dependencies);
        *self.cell.cache.borrow_mut() = Some(Memo {
            generation,
            dependencies,
            result: result.clone(),
        });
        result
    }

    /// Drop the cached result so the next `get` recomputes.
    pub fn invalidate(&self) {
        self.cell.invalidate();
    }

    /// Dependency paths, in declaration order.
    pub fn paths(&self) -> &[String] {
        &self.cell.paths
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("paths", &self.cell.paths)
            .field("cached", &self.cell.cache.borrow().is_some())
            .finish()
    }
}

/// Weak registry of every selector created by a manager.
#[derive(Default)]
pub(crate) struct SelectorRegistry {
    cells: Vec<Weak<SelectorCell>>,
}

impl SelectorRegistry {
    fn register(&mut self, cell: &Rc<SelectorCell>) {
        self.cells.push(Rc::downgrade(cell));
    }

    /// Drop caches of live selectors watching a path that intersects
    /// `changed`, pruning selectors that no longer exist.
    pub(crate) fn invalidate_for_path(&mut self, changed: &str) -> usize {
        let mut invalidated = 0;
        self.cells.retain(|weak| match weak.upgrade() {
            Some(cell) => {
                if path::any_intersects(&cell.paths, changed) {
                    cell.invalidate();
                    invalidated += 1;
                }
                true
            }
            None => false,
        });
        invalidated
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.iter().filter(|w| w.strong_count() > 0).count()
    }
}

/// Default projection: one dependency yields its raw value, several yield
/// an array (`null` for unresolved paths).
fn passthrough(values: &[Option<Value>]) -> Option<Value> {
    match values {
        [single] => single.clone(),
        many => Some(Value::Array(
            many.iter().map(|v| v.clone().unwrap_or(Value::Null)).collect(),
        )),
    }
}

impl StateManager {
    /// Create a memoized selector over `paths`.
    pub fn create_selector<P, F>(&self, paths: P, compute: F) -> Result<Selector>
    where
        P: IntoPaths,
        F: Fn(&[Option<Value>]) -> Option<Value> + 'static,
    {
        let paths = paths.into_paths();
        if paths.is_empty() {
            return Err(StateError::EmptySelector);
        }
        let cell = Rc::new(SelectorCell {
            paths,
            compute: Box::new(compute),
            cache: RefCell::new(None),
        });
        self.inner.selectors.borrow_mut().register(&cell);
        Ok(Selector {
            cell,
            source: Rc::downgrade(&self.inner),
        })
    }

    /// Create a selector that returns the raw dependency value(s).
    pub fn create_path_selector<P: IntoPaths>(&self, paths: P) -> Result<Selector> {
        self.create_selector(paths, passthrough)
    }

    /// Eagerly drop the caches of selectors affected by a write to `path`.
    pub fn invalidate_selectors_for_path(&self, path: &str) -> usize {
        self.inner.selectors.borrow_mut().invalidate_for_path(path)
    }

    /// Number of live selectors, including those backing computed paths.
    pub fn selector_count(&self) -> usize {
        self.inner.selectors.borrow().len()
    }
}
