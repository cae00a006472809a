use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use gridsource_common::{Result, Value};
use tracing::warn;

use super::{LoadExtra, LoadResult, RemoteOperations, Store, StoreEvents};
use crate::item::Item;
use crate::query::LoadOptions;

/// Callback answering a load request with the JSON a remote endpoint would return.
pub type LoadCallback =
    Arc<dyn Fn(LoadOptions) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

type TotalCountCallback =
    Arc<dyn Fn(LoadOptions) -> BoxFuture<'static, Result<usize>> + Send + Sync>;

/// Store backed by user callbacks.
///
/// The load callback may answer with a bare array or with
/// `{"data": [...], "totalCount": n, "groupCount": n, "summary": [...]}`.
/// Groups are `{"key", "items", "count", "summary"}` objects.
pub struct CustomStore {
    load: LoadCallback,
    total_count: Option<TotalCountCallback>,
    remote: RemoteOperations,
    events: StoreEvents,
}

impl CustomStore {
    pub fn new<F>(load: F) -> Self
    where
        F: Fn(LoadOptions) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync + 'static,
    {
        Self {
            load: Arc::new(load),
            total_count: None,
            remote: RemoteOperations::none(),
            events: StoreEvents::default(),
        }
    }

    /// Count callback, consulted when a required `totalCount` is missing from a load response.
    pub fn with_total_count<F>(mut self, total_count: F) -> Self
    where
        F: Fn(LoadOptions) -> BoxFuture<'static, Result<usize>> + Send + Sync + 'static,
    {
        self.total_count = Some(Arc::new(total_count));
        self
    }

    pub fn with_remote_operations(mut self, remote: RemoteOperations) -> Self {
        self.remote = remote;
        self
    }
}

impl std::fmt::Debug for CustomStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomStore")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Parse a callback response leniently. Malformed data yields an empty result.
pub(crate) fn parse_response(json: serde_json::Value, options: &LoadOptions) -> LoadResult {
    let (data, extra) = match json {
        serde_json::Value::Array(items) => (items, LoadExtra::default()),
        serde_json::Value::Object(mut obj) => {
            let extra = LoadExtra {
                total_count: obj
                    .get("totalCount")
                    .and_then(|c| c.as_u64())
                    .map(|c| c as usize),
                group_count: obj
                    .get("groupCount")
                    .and_then(|c| c.as_u64())
                    .map(|c| c as usize),
                summary: obj.get("summary").and_then(|s| s.as_array()).map(|values| {
                    values.iter().cloned().map(Value::from_json).collect()
                }),
            };
            let data = match obj.remove("data") {
                Some(serde_json::Value::Array(items)) => items,
                Some(other) => {
                    warn!(data = %other, "Store returned non-array data, treating as empty");
                    Vec::new()
                }
                None => Vec::new(),
            };
            (data, extra)
        }
        other => {
            warn!(response = %other, "Store returned an unrecognized response, treating as empty");
            (Vec::new(), LoadExtra::default())
        }
    };

    let levels = options.group.len();
    let data = match data
        .into_iter()
        .map(|item| Item::from_store_json(item, levels))
        .collect::<Result<Vec<_>>>()
    {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "Store returned malformed groups, treating as empty");
            Vec::new()
        }
    };

    LoadResult { data, extra }
}

#[async_trait]
impl Store for CustomStore {
    async fn load(&self, options: &LoadOptions) -> Result<LoadResult> {
        let json = (self.load)(options.clone()).await?;
        Ok(parse_response(json, options))
    }

    async fn total_count(&self, options: &LoadOptions) -> Result<Option<usize>> {
        match &self.total_count {
            Some(total_count) => total_count(options.clone()).await.map(Some),
            None => Ok(None),
        }
    }

    fn remote_capabilities(&self) -> RemoteOperations {
        self.remote
    }

    fn events(&self) -> &StoreEvents {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::GroupDescriptor;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn accepts_bare_arrays_and_envelopes() {
        let options = LoadOptions::default();
        let result = parse_response(json!([1, 2]), &options);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.extra, LoadExtra::default());

        let result = parse_response(
            json!({"data": [1], "totalCount": 7, "summary": [3]}),
            &options,
        );
        assert_eq!(result.data, vec![Item::Row(Value::from(1))]);
        assert_eq!(result.extra.total_count, Some(7));
        assert_eq!(result.extra.summary, Some(vec![Value::from(3)]));
    }

    #[test]
    fn malformed_data_is_empty() {
        let options = LoadOptions::default();
        assert!(parse_response(json!({"data": "nope"}), &options).data.is_empty());
        assert!(parse_response(json!(42), &options).data.is_empty());

        let grouped = LoadOptions {
            group: vec![GroupDescriptor::new("a")],
            ..Default::default()
        };
        assert!(parse_response(json!([1, 2]), &grouped).data.is_empty());
    }

    #[tokio::test]
    async fn total_count_goes_through_the_callback() {
        let store = CustomStore::new(|_options: LoadOptions| async { Ok(json!([])) }.boxed());
        assert_eq!(store.total_count(&LoadOptions::default()).await.unwrap(), None);

        let store = store.with_total_count(|options: LoadOptions| {
            async move {
                assert!(options.filter.is_some());
                Ok(12)
            }
            .boxed()
        });
        let options = LoadOptions {
            filter: Some(crate::query::Filter::eq("a", 1)),
            ..Default::default()
        };
        assert_eq!(store.total_count(&options).await.unwrap(), Some(12));
    }
}
