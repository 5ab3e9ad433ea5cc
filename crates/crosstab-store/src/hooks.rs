//! Value transforms applied at the persistence boundary.

use std::fmt;
use std::sync::Arc;

use crosstab_core::StateValue;

type Transform = Arc<dyn Fn(StateValue) -> StateValue + Send + Sync>;

/// Optional `on_read` / `on_save` transforms.
///
/// `on_save` runs on the value before it is written; `on_read` runs on the
/// stored data before it is adopted. Unset hooks are the identity.
#[derive(Clone, Default)]
pub struct StorageHooks {
    on_read: Option<Transform>,
    on_save: Option<Transform>,
}

impl StorageHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform applied to stored data after it is read.
    pub fn on_read<F>(mut self, f: F) -> Self
    where
        F: Fn(StateValue) -> StateValue + Send + Sync + 'static,
    {
        self.on_read = Some(Arc::new(f));
        self
    }

    /// Transform applied to a value before it is written.
    pub fn on_save<F>(mut self, f: F) -> Self
    where
        F: Fn(StateValue) -> StateValue + Send + Sync + 'static,
    {
        self.on_save = Some(Arc::new(f));
        self
    }

    pub fn apply_read(&self, data: StateValue) -> StateValue {
        match &self.on_read {
            Some(f) => f(data),
            None => data,
        }
    }

    pub fn apply_save(&self, value: StateValue) -> StateValue {
        match &self.on_save {
            Some(f) => f(value),
            None => value,
        }
    }
}

impl fmt::Debug for StorageHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHooks")
            .field("on_read", &self.on_read.is_some())
            .field("on_save", &self.on_save.is_some())
            .finish()
    }
}
