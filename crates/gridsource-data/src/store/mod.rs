//! Store abstraction
//!
//! Bridges the data source to whatever holds the rows. Stores either evaluate the whole
//! query in memory (`ArrayStore`) or hand it to a callback (`CustomStore`).

mod array_store;
mod custom_store;

use async_trait::async_trait;
use gridsource_common::{Result, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::item::Item;
use crate::query::LoadOptions;

pub use array_store::ArrayStore;
pub use custom_store::{CustomStore, LoadCallback};

// Results

/// Counts and summaries returned alongside the data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadExtra {
    pub total_count: Option<usize>,
    pub group_count: Option<usize>,
    pub summary: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadResult {
    pub data: Vec<Item>,
    pub extra: LoadExtra,
}

impl LoadResult {
    pub fn new(data: Vec<Item>) -> Self {
        Self {
            data,
            extra: LoadExtra::default(),
        }
    }
}

// Capabilities

/// Which query stages a store evaluates itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteOperations {
    pub filtering: bool,
    pub sorting: bool,
    pub paging: bool,
    pub grouping: bool,
    pub summary: bool,
}

impl RemoteOperations {
    pub fn all() -> Self {
        Self {
            filtering: true,
            sorting: true,
            paging: true,
            grouping: true,
            summary: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        *self == Self::all()
    }

    /// Drop combinations a store cannot honour.
    ///
    /// Remote grouping implies remote filtering, sorting and summaries. Remote paging needs
    /// the store to filter and sort first.
    pub fn normalized(mut self) -> Self {
        if self.grouping {
            self.filtering = true;
            self.sorting = true;
            self.summary = true;
        }
        if self.paging && !(self.filtering && self.sorting) {
            self.paging = false;
        }
        self
    }
}

// Events

type LoadingHandler = Box<dyn Fn(&LoadOptions) + Send + Sync>;
type LoadedHandler = Box<dyn Fn(&LoadResult, &LoadOptions) + Send + Sync>;

/// `loading` fires with the final options right before dispatch, `loaded` after resolution.
#[derive(Default)]
pub struct StoreEvents {
    loading: RwLock<Vec<LoadingHandler>>,
    loaded: RwLock<Vec<LoadedHandler>>,
}

impl StoreEvents {
    pub fn on_loading(&self, handler: impl Fn(&LoadOptions) + Send + Sync + 'static) {
        self.loading.write().push(Box::new(handler));
    }

    pub fn on_loaded(&self, handler: impl Fn(&LoadResult, &LoadOptions) + Send + Sync + 'static) {
        self.loaded.write().push(Box::new(handler));
    }

    pub(crate) fn emit_loading(&self, options: &LoadOptions) {
        for handler in self.loading.read().iter() {
            handler(options);
        }
    }

    pub(crate) fn emit_loaded(&self, result: &LoadResult, options: &LoadOptions) {
        for handler in self.loaded.read().iter() {
            handler(result, options);
        }
    }
}

impl std::fmt::Debug for StoreEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEvents")
            .field("loading", &self.loading.read().len())
            .field("loaded", &self.loaded.read().len())
            .finish()
    }
}

// Store trait

/// A sorted, filterable collection.
#[async_trait]
pub trait Store: Send + Sync {
    /// Evaluate `options` and return the matching items.
    async fn load(&self, options: &LoadOptions) -> Result<LoadResult>;

    /// Number of rows matching the filter of `options`, ignoring its paging.
    ///
    /// `None` when the store can only report counts alongside `load` results.
    async fn total_count(&self, options: &LoadOptions) -> Result<Option<usize>>;

    /// Query stages this store evaluates itself.
    fn remote_capabilities(&self) -> RemoteOperations;

    fn events(&self) -> &StoreEvents;
}

/// Load through `store`, firing its events around the call.
pub async fn dispatch_load(store: &dyn Store, options: &LoadOptions) -> Result<LoadResult> {
    store.events().emit_loading(options);
    debug!(options = %options.to_json(), "Dispatching store load");
    let result = store.load(options).await?;
    store.events().emit_loaded(&result, options);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_implies_filtering_and_sorting() {
        let ops = RemoteOperations {
            grouping: true,
            ..Default::default()
        }
        .normalized();
        assert!(ops.filtering && ops.sorting && ops.summary);
        assert!(!ops.paging);
    }

    #[test]
    fn paging_alone_is_not_remote() {
        let ops = RemoteOperations {
            paging: true,
            filtering: true,
            ..Default::default()
        }
        .normalized();
        assert!(!ops.paging);
        assert!(RemoteOperations::all().normalized().is_all());
    }
}
