//! Query runner
//!
//! Splits a request into the part the store evaluates and the part evaluated in memory,
//! consults the cache for the store-bound part and dispatches it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use gridsource_common::{ErrorCode, GridError, Result, Value};
use tracing::debug;

use crate::cache::{CacheStats, LoadCache, QueryFingerprint};
use crate::item::Item;
use crate::query::{LoadOptions, array};
use crate::store::{LoadExtra, LoadResult, RemoteOperations, Store, dispatch_load};

/// Hook deciding when a store request is dispatched. It may delay or batch requests but
/// must eventually resolve `dispatch`.
#[async_trait]
pub trait LoadScheduler: Send + Sync {
    async fn execute(
        &self,
        options: &LoadOptions,
        dispatch: BoxFuture<'static, Result<LoadResult>>,
    ) -> Result<LoadResult>;
}

// Execution plan

/// Which stages of one request run in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPlan {
    pub filtering: bool,
    pub sorting: bool,
    pub grouping: bool,
    pub paging: bool,
    pub summary: bool,
}

impl QueryPlan {
    pub fn new(remote: RemoteOperations, options: &LoadOptions) -> Self {
        let grouped = options.is_grouped();
        let grouping = grouped && remote.grouping;
        Self {
            filtering: remote.filtering,
            sorting: remote.sorting,
            grouping,
            paging: remote.paging && (!grouped || grouping),
            summary: remote.summary && remote.filtering && (!grouped || grouping),
        }
    }

    /// The subset of `options` sent to the store.
    pub fn store_options(&self, options: &LoadOptions) -> LoadOptions {
        let mut request = LoadOptions {
            user_data: options.user_data.clone(),
            ..Default::default()
        };

        if self.filtering {
            request.filter = options.filter.clone();
            request.search_value = options.search_value.clone();
            request.search_operation = options.search_operation;
            request.search_expr = options.search_expr.clone();
        }
        if self.sorting {
            request.sort = options.sort.clone();
        }
        if self.grouping {
            request.group = options.group.clone();
            request.group_summary = options.group_summary.clone();
        }
        if self.paging {
            request.skip = options.skip;
            request.take = options.take;
            request.require_total_count = options.require_total_count;
            request.require_group_count = options.require_group_count && self.grouping;
        }
        if self.summary {
            request.total_summary = options.total_summary.clone();
        }
        request
    }

    /// Apply the stages the store did not evaluate.
    pub fn finish(&self, options: &LoadOptions, raw: &LoadResult) -> LoadResult {
        if self.grouping {
            return self.finish_grouped(options, raw);
        }

        let rows: Vec<Value> = raw
            .data
            .iter()
            .filter_map(|item| item.as_row().cloned())
            .collect();

        if self.paging {
            let mut result = LoadResult {
                data: rows.into_iter().map(Item::Row).collect(),
                extra: raw.extra.clone(),
            };
            if !self.summary && !options.total_summary.is_empty() {
                debug!("Summaries computed over the loaded page only");
                let refs: Vec<&Value> = result.data.iter().filter_map(Item::as_row).collect();
                result.extra.summary = Some(array::summarize(&options.total_summary, &refs));
            }
            return result;
        }

        let local = LoadOptions {
            filter: if self.filtering { None } else { options.filter.clone() },
            search_value: if self.filtering { None } else { options.search_value.clone() },
            search_operation: options.search_operation,
            search_expr: options.search_expr.clone(),
            sort: if self.sorting && !options.is_grouped() {
                Vec::new()
            } else {
                options.sort.clone()
            },
            group: options.group.clone(),
            group_summary: options.group_summary.clone(),
            total_summary: if self.summary {
                Vec::new()
            } else {
                options.total_summary.clone()
            },
            ..options.clone()
        };

        let mut result = array::execute(&rows, &local);
        if self.summary {
            result.extra.summary = raw.extra.summary.clone();
        }
        result
    }

    fn finish_grouped(&self, options: &LoadOptions, raw: &LoadResult) -> LoadResult {
        let mut extra = raw.extra.clone();
        if self.paging {
            return LoadResult {
                data: raw.data.clone(),
                extra,
            };
        }

        if options.require_group_count {
            extra.group_count = Some(raw.data.len());
        }
        if options.require_total_count && extra.total_count.is_none() {
            extra.total_count = Some(raw.data.iter().map(Item::leaf_count).sum());
        }
        let skip = options.skip.unwrap_or(0);
        let data = raw
            .data
            .iter()
            .skip(skip)
            .take(options.take.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        LoadResult { data, extra }
    }
}

fn validate(request: &LoadOptions, result: &LoadResult) -> Result<()> {
    if request.require_total_count && result.extra.total_count.is_none() {
        return Err(GridError::missing_total_count());
    }
    if request.require_group_count && result.extra.group_count.is_none() {
        return Err(GridError::missing_group_count());
    }
    Ok(())
}

// Runner

pub struct QueryRunner {
    store: Arc<dyn Store>,
    remote: RemoteOperations,
    cache: Option<LoadCache>,
    scheduler: Option<Arc<dyn LoadScheduler>>,
}

impl QueryRunner {
    pub fn new(store: Arc<dyn Store>, remote: RemoteOperations, cache: Option<LoadCache>) -> Self {
        Self {
            store,
            remote: remote.normalized(),
            cache,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn LoadScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn remote(&self) -> RemoteOperations {
        self.remote
    }

    pub fn plan(&self, options: &LoadOptions) -> QueryPlan {
        QueryPlan::new(self.remote, options)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(LoadCache::stats)
    }

    /// Run one request: store-bound part (possibly cached), then the local remainder.
    pub async fn load(&self, options: &LoadOptions, use_cache: bool) -> Result<LoadResult> {
        let plan = self.plan(options);
        let request = plan.store_options(options);
        let raw = self.fetch(&request, use_cache).await?;
        Ok(plan.finish(options, &raw))
    }

    async fn fetch(&self, request: &LoadOptions, use_cache: bool) -> Result<Arc<LoadResult>> {
        let cache = if use_cache { self.cache.as_ref() } else { None };
        let key = QueryFingerprint::from_options(request);

        if let Some(cache) = cache
            && let Some(hit) = cache.get(key)
        {
            debug!(fingerprint = key.value(), "Load served from cache");
            return Ok(hit);
        }

        let store = self.store.clone();
        let owned = request.clone();
        let dispatch = async move { dispatch_load(store.as_ref(), &owned).await }.boxed();
        let mut result = self.schedule(request, dispatch).await?;
        if request.require_total_count && result.extra.total_count.is_none() {
            debug!("Load response carried no total count, asking the store");
            result.extra.total_count = self.store_count(request).await?;
        }
        validate(request, &result)?;

        Ok(match cache {
            Some(cache) => cache.insert(key, result),
            None => Arc::new(result),
        })
    }

    /// Rows matching the filter of `options`, regardless of its paging.
    ///
    /// A store paging remotely is asked through its count operation first. Otherwise a
    /// one-row load requiring the total is issued. `None` when neither yields a count.
    pub async fn count(&self, options: &LoadOptions) -> Result<Option<usize>> {
        let counted = LoadOptions {
            skip: Some(0),
            take: Some(1),
            require_total_count: true,
            ..options.clone()
        };

        let plan = self.plan(&counted);
        if plan.paging
            && let Some(total) = self.store_count(&plan.store_options(&counted)).await?
        {
            return Ok(Some(total));
        }

        match self.load(&counted, true).await {
            Ok(result) => Ok(result.extra.total_count),
            Err(e) if e.code() == Some(ErrorCode::MissingTotalCount) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn schedule(
        &self,
        request: &LoadOptions,
        dispatch: BoxFuture<'static, Result<LoadResult>>,
    ) -> Result<LoadResult> {
        match &self.scheduler {
            Some(scheduler) => scheduler.execute(request, dispatch).await,
            None => dispatch.await,
        }
    }

    /// The store's own count operation, dispatched like a load.
    async fn store_count(&self, request: &LoadOptions) -> Result<Option<usize>> {
        let store = self.store.clone();
        let owned = request.clone();
        let dispatch = async move {
            let total_count = store.total_count(&owned).await?;
            Ok(LoadResult {
                data: Vec::new(),
                extra: LoadExtra {
                    total_count,
                    ..Default::default()
                },
            })
        }
        .boxed();
        Ok(self.schedule(request, dispatch).await?.extra.total_count)
    }
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("remote", &self.remote)
            .field("cache", &self.cache)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}
