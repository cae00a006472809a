use async_trait::async_trait;
use gridsource_common::{Result, Value};
use parking_lot::RwLock;

use super::{LoadResult, RemoteOperations, Store, StoreEvents};
use crate::query::{LoadOptions, array};

/// Store over an in-memory collection.
///
/// It evaluates every request completely, but declares no remote capabilities, so a data
/// source in `auto` mode performs filtering, grouping and paging itself and caches the
/// raw rows.
#[derive(Debug, Default)]
pub struct ArrayStore {
    rows: RwLock<Vec<Value>>,
    events: StoreEvents,
}

impl ArrayStore {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows: RwLock::new(rows),
            events: StoreEvents::default(),
        }
    }

    pub fn from_json(rows: Vec<serde_json::Value>) -> Self {
        Self::new(rows.into_iter().map(Value::from_json).collect())
    }

    pub fn insert(&self, row: Value) {
        self.rows.write().push(row);
    }

    /// Remove every row matching `predicate`, returning how many were removed.
    pub fn remove_where(&self, predicate: impl Fn(&Value) -> bool) -> usize {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|row| !predicate(row));
        before - rows.len()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl Store for ArrayStore {
    async fn load(&self, options: &LoadOptions) -> Result<LoadResult> {
        let rows = self.rows.read();
        Ok(array::execute(&rows, options))
    }

    async fn total_count(&self, options: &LoadOptions) -> Result<Option<usize>> {
        let rows = self.rows.read();
        Ok(Some(match options.effective_filter() {
            Some(filter) => rows.iter().filter(|row| filter.matches(row)).count(),
            None => rows.len(),
        }))
    }

    fn remote_capabilities(&self) -> RemoteOperations {
        RemoteOperations::none()
    }

    fn events(&self) -> &StoreEvents {
        &self.events
    }
}
