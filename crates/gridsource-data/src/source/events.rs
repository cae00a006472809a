use gridsource_common::GridError;
use parking_lot::RwLock;

/// Why `changed` fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// A load cycle replaced the page.
    Refresh,
    /// A group was expanded or collapsed.
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
}

type ChangedHandler = Box<dyn Fn(&ChangeEvent) + Send + Sync>;
type LoadingChangedHandler = Box<dyn Fn(bool) + Send + Sync>;
type LoadErrorHandler = Box<dyn Fn(&GridError) + Send + Sync>;

#[derive(Default)]
pub struct DataSourceEvents {
    changed: RwLock<Vec<ChangedHandler>>,
    loading_changed: RwLock<Vec<LoadingChangedHandler>>,
    load_error: RwLock<Vec<LoadErrorHandler>>,
}

impl DataSourceEvents {
    pub fn on_changed(&self, handler: impl Fn(&ChangeEvent) + Send + Sync + 'static) {
        self.changed.write().push(Box::new(handler));
    }

    pub fn on_loading_changed(&self, handler: impl Fn(bool) + Send + Sync + 'static) {
        self.loading_changed.write().push(Box::new(handler));
    }

    pub fn on_load_error(&self, handler: impl Fn(&GridError) + Send + Sync + 'static) {
        self.load_error.write().push(Box::new(handler));
    }

    pub(crate) fn emit_changed(&self, change_type: ChangeType) {
        let event = ChangeEvent { change_type };
        for handler in self.changed.read().iter() {
            handler(&event);
        }
    }

    pub(crate) fn emit_loading_changed(&self, loading: bool) {
        for handler in self.loading_changed.read().iter() {
            handler(loading);
        }
    }

    pub(crate) fn emit_load_error(&self, error: &GridError) {
        for handler in self.load_error.read().iter() {
            handler(error);
        }
    }
}

impl std::fmt::Debug for DataSourceEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceEvents")
            .field("changed", &self.changed.read().len())
            .field("loading_changed", &self.loading_changed.read().len())
            .field("load_error", &self.load_error.read().len())
            .finish()
    }
}
