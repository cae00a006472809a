//! Data source controller
//!
//! `DataSource` owns the paging, filtering, sorting and grouping state of one grid view,
//! turns it into store requests through the query runner and a grouping helper, and
//! publishes the resulting page.

mod events;


use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use gridsource_common::{GridError, Result, Value};
use parking_lot::Mutex;
use tracing::{debug, info};

pub use events::{ChangeEvent, ChangeType, DataSourceEvents};

use crate::cache::{CacheStats, LoadCache};
use crate::config::DataSourceOptions;
use crate::grouping::{
    CollapsedGroupingHelper, ExpandedGroupingHelper, GroupingHelper, GroupsInfo, LoadContext,
};
use crate::item::{GroupPath, Item, node_count};
use crate::query::{
    Filter, FilterOp, GroupDescriptor, LoadOptions, Selector, SortDescriptor, SummaryDescriptor,
};
use crate::runner::{LoadScheduler, QueryRunner};
use crate::store::{ArrayStore, LoadResult, Store};

#[derive(Debug)]
struct State {
    page_index: usize,
    page_size: usize,
    paginate: bool,
    require_total_count: bool,
    filter: Option<Filter>,
    sort: Vec<SortDescriptor>,
    group: Vec<GroupDescriptor>,
    search_value: Option<Value>,
    search_operation: Option<FilterOp>,
    search_expr: Vec<Selector>,
    total_summary_items: Vec<SummaryDescriptor>,
    group_summary_items: Vec<SummaryDescriptor>,
    user_data: std::collections::BTreeMap<String, serde_json::Value>,

    items: Vec<Item>,
    total_count: Option<usize>,
    total_items_count: Option<usize>,
    total_summary: Option<Vec<Value>>,
    is_loaded: bool,
    helper: Option<Box<dyn GroupingHelper>>,
}

impl State {
    fn is_paged(&self) -> bool {
        self.paginate && self.page_size > 0
    }

    fn request(&self) -> LoadOptions {
        let paged = self.is_paged();
        LoadOptions {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            group: self.group.clone(),
            skip: paged.then(|| self.page_index * self.page_size),
            take: paged.then_some(self.page_size),
            require_total_count: self.require_total_count,
            require_group_count: false,
            search_value: self.search_value.clone(),
            search_operation: self.search_operation,
            search_expr: self.search_expr.clone(),
            total_summary: self.total_summary_items.clone(),
            group_summary: self.group_summary_items.clone(),
            user_data: self.user_data.clone(),
        }
    }

    /// Index of the last page, once the row count is known.
    fn last_page_index(&self) -> Option<usize> {
        if !self.is_paged() {
            return Some(0);
        }
        let total = self.total_items_count?;
        Some(total.div_ceil(self.page_size).max(1) - 1)
    }

    fn invalidate(&mut self) {
        self.total_count = None;
        self.total_items_count = None;
        if let Some(helper) = self.helper.as_mut() {
            helper.mark_stale();
        }
    }
}

/// A page as fetched, before it is committed.
struct FetchedPage {
    items: Vec<Item>,
    total_items_count: Option<usize>,
    total_count: Option<usize>,
    summary: Option<Vec<Value>>,
    helper: Option<Box<dyn GroupingHelper>>,
}

#[derive(Debug)]
pub struct DataSource {
    runner: QueryRunner,
    state: Mutex<State>,
    events: DataSourceEvents,
    /// Bumped by every load and state change; only the latest load commits.
    generation: AtomicU64,
    pending_loads: AtomicUsize,
}

impl DataSource {
    pub fn new(store: Arc<dyn Store>, options: DataSourceOptions) -> Self {
        let remote = options.remote_operations.resolve(store.as_ref());
        let cache = (options.cache_enabled && !remote.is_all())
            .then(|| LoadCache::new(options.cache_max_entries));
        debug!(?remote, cached = cache.is_some(), "Creating data source");

        let runner = QueryRunner::new(store, remote, cache);
        let helper = (!options.group.is_empty()).then(|| helper_for(&runner));

        Self {
            runner,
            state: Mutex::new(State {
                page_index: options.page_index,
                page_size: options.page_size,
                paginate: options.paginate,
                require_total_count: options.require_total_count,
                filter: options.filter,
                sort: options.sort,
                group: options.group,
                search_value: options.search_value,
                search_operation: options.search_operation,
                search_expr: options.search_expr,
                total_summary_items: options.total_summary,
                group_summary_items: options.group_summary,
                user_data: options.user_data,
                items: Vec::new(),
                total_count: None,
                total_items_count: None,
                total_summary: None,
                is_loaded: false,
                helper,
            }),
            events: DataSourceEvents::default(),
            generation: AtomicU64::new(0),
            pending_loads: AtomicUsize::new(0),
        }
    }

    /// In-memory data source over JSON rows.
    pub fn from_rows(rows: Vec<serde_json::Value>, options: DataSourceOptions) -> Self {
        Self::new(Arc::new(ArrayStore::from_json(rows)), options)
    }

    /// Route every store dispatch through `scheduler`.
    pub fn with_scheduler(self, scheduler: Arc<dyn LoadScheduler>) -> Self {
        Self {
            runner: self.runner.with_scheduler(scheduler),
            ..self
        }
    }

    pub fn events(&self) -> &DataSourceEvents {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.runner.store()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.runner.cache_stats()
    }

    // Loading

    /// Load the page described by the current state.
    ///
    /// A load overtaken by a newer one or by a state change commits nothing and resolves
    /// with the page committed at that moment instead of the one it fetched.
    pub async fn load(&self) -> Result<Vec<Item>> {
        self.tracked(self.load_cycle(ChangeType::Refresh)).await
    }

    /// One-off query straight through the runner. Paging state and the cache are left alone.
    pub async fn load_custom(&self, options: LoadOptions) -> Result<LoadResult> {
        self.runner.load(&options, false).await
    }

    /// Drop cached responses and load again. `full` also forgets every known count and
    /// re-derives group offsets.
    pub async fn reload(&self, full: bool) -> Result<Vec<Item>> {
        self.runner.clear_cache();
        if full {
            let mut state = self.state.lock();
            state.is_loaded = false;
            state.invalidate();
            self.bump();
        }
        info!(full, "Reloading data source");
        self.load().await
    }

    /// Expand or collapse the group at `path`, then reload the current page.
    pub async fn change_row_expand(&self, path: &GroupPath) -> Result<bool> {
        self.tracked(async {
            let (request, helper) = {
                let state = self.state.lock();
                (state.request(), state.helper.as_ref().map(|h| h.clone_box()))
            };
            let Some(mut helper) = helper else {
                return Err(GridError::InvalidOperation(
                    "cannot expand rows of an ungrouped data source".into(),
                ));
            };

            let ctx = LoadContext {
                runner: &self.runner,
                request: &request,
            };
            let expanded = helper.change_row_expand(&ctx, path).await?;
            debug!(?path, expanded, "Toggled group");

            self.state.lock().helper = Some(helper);
            self.bump();
            self.load_cycle(ChangeType::Update).await?;
            Ok(expanded)
        })
        .await
    }

    async fn tracked<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        if self.pending_loads.fetch_add(1, Ordering::SeqCst) == 0 {
            self.events.emit_loading_changed(true);
        }
        let result = op.await;
        if self.pending_loads.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.events.emit_loading_changed(false);
        }
        if let Err(e) = &result {
            self.events.emit_load_error(e);
        }
        result
    }

    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn load_cycle(&self, change_type: ChangeType) -> Result<Vec<Item>> {
        loop {
            let generation = self.bump();
            let (request, helper) = {
                let state = self.state.lock();
                (state.request(), state.helper.as_ref().map(|h| h.clone_box()))
            };

            let page = self.fetch_page(&request, helper).await?;

            let mut state = self.state.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "Discarding superseded load");
                return Ok(state.items.clone());
            }
            if page.helper.is_some() {
                state.helper = page.helper;
            }
            state.items = page.items;
            state.total_items_count = page.total_items_count;
            state.total_summary = page.summary;
            if page.total_count.is_some() {
                state.total_count = page.total_count;
            }
            state.is_loaded = true;

            if let Some(last) = state.last_page_index()
                && state.page_index > last
            {
                debug!(from = state.page_index, to = last, "Clamping page index");
                state.page_index = last;
                continue;
            }

            let items = state.items.clone();
            drop(state);
            self.events.emit_changed(change_type);
            return Ok(items);
        }
    }

    async fn fetch_page(
        &self,
        request: &LoadOptions,
        helper: Option<Box<dyn GroupingHelper>>,
    ) -> Result<FetchedPage> {
        if let Some(mut helper) = helper
            && request.is_grouped()
        {
            let ctx = LoadContext {
                runner: &self.runner,
                request,
            };
            let page = helper.load_page(&ctx).await?;
            return Ok(FetchedPage {
                items: page.items,
                total_items_count: Some(page.total_items_count),
                total_count: page.total_count,
                summary: page.summary,
                helper: Some(helper),
            });
        }

        let result = self.runner.load(request, true).await?;
        let rows = result.data.len();
        let skip = request.skip.unwrap_or(0);
        let mut total_count = result.extra.total_count;
        let total_items_count = match request.take {
            None => Some(rows),
            Some(_) if total_count.is_some() => total_count,
            // An empty page past the start does not tell where the data ends.
            Some(_) if rows == 0 && skip > 0 => {
                total_count = self.runner.count(request).await?;
                debug!(skip, ?total_count, "Counted rows behind an empty page");
                total_count.or(Some(skip))
            }
            // A short page is the last one.
            Some(take) if rows < take => Some(skip + rows),
            Some(_) => None,
        };
        Ok(FetchedPage {
            items: result.data,
            total_items_count,
            total_count,
            summary: result.extra.summary,
            helper: None,
        })
    }

    // State

    pub fn page_index(&self) -> usize {
        self.state.lock().page_index
    }

    pub fn set_page_index(&self, page_index: usize) {
        self.state.lock().page_index = page_index;
        self.bump();
    }

    pub fn page_size(&self) -> usize {
        self.state.lock().page_size
    }

    /// A page size of 0 turns paging off.
    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().page_size = page_size;
        self.bump();
    }

    pub fn paginate(&self) -> bool {
        self.state.lock().paginate
    }

    pub fn set_paginate(&self, paginate: bool) {
        self.state.lock().paginate = paginate;
        self.bump();
    }

    pub fn require_total_count(&self) -> bool {
        self.state.lock().require_total_count
    }

    pub fn set_require_total_count(&self, require: bool) {
        self.state.lock().require_total_count = require;
        self.bump();
    }

    pub fn filter(&self) -> Option<Filter> {
        self.state.lock().filter.clone()
    }

    pub fn set_filter(&self, filter: Option<Filter>) {
        let mut state = self.state.lock();
        state.filter = filter;
        state.page_index = 0;
        state.invalidate();
        self.bump();
    }

    pub fn sort(&self) -> Vec<SortDescriptor> {
        self.state.lock().sort.clone()
    }

    pub fn set_sort(&self, sort: Vec<SortDescriptor>) {
        self.state.lock().sort = sort;
        self.bump();
    }

    pub fn group(&self) -> Vec<GroupDescriptor> {
        self.state.lock().group.clone()
    }

    /// Replace the grouping. Bookkeeping is reset from the first level whose shape changed.
    pub fn set_group(&self, group: Vec<GroupDescriptor>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let old = std::mem::replace(&mut state.group, group);
        if state.group.is_empty() {
            state.helper = None;
        } else {
            match state.helper.as_mut() {
                Some(helper) => helper.on_group_changed(&old, &state.group),
                None => state.helper = Some(helper_for(&self.runner)),
            }
        }
        state.page_index = 0;
        state.invalidate();
        self.bump();
    }

    pub fn search(&self) -> (Option<Value>, Option<FilterOp>, Vec<Selector>) {
        let state = self.state.lock();
        (
            state.search_value.clone(),
            state.search_operation,
            state.search_expr.clone(),
        )
    }

    pub fn set_search(
        &self,
        value: Option<Value>,
        operation: Option<FilterOp>,
        expr: Vec<Selector>,
    ) {
        let mut state = self.state.lock();
        state.search_value = value;
        state.search_operation = operation;
        state.search_expr = expr;
        state.page_index = 0;
        state.invalidate();
        self.bump();
    }

    /// Collapse one level, or every level for `None`.
    pub fn collapse_all(&self, level: Option<usize>) {
        self.set_level_expanded(level, false);
    }

    /// Expand one level, or every level for `None`.
    pub fn expand_all(&self, level: Option<usize>) {
        self.set_level_expanded(level, true);
    }

    fn set_level_expanded(&self, level: Option<usize>, expanded: bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match level {
            Some(level) => {
                if let Some(group) = state.group.get_mut(level) {
                    group.is_expanded = expanded;
                }
            }
            None => {
                for group in &mut state.group {
                    group.is_expanded = expanded;
                }
                state.page_index = 0;
            }
        }
        if let Some(helper) = state.helper.as_mut() {
            helper.reset_expanded(level);
        }
        state.total_items_count = None;
        self.bump();
    }

    // Page

    pub fn items(&self) -> Vec<Item> {
        self.state.lock().items.clone()
    }

    /// Leaf count matching the filter, or -1 while unknown.
    pub fn total_count(&self) -> i64 {
        self.state
            .lock()
            .total_count
            .map_or(-1, |total| total as i64)
    }

    /// Rows of the whole view. While unknown, the rows seen up to the end of this page.
    pub fn total_items_count(&self) -> usize {
        let state = self.state.lock();
        state.total_items_count.unwrap_or_else(|| {
            let seen: usize = state.items.iter().map(Item::leaf_count).sum();
            state.page_index * state.page_size + seen
        })
    }

    /// Nodes materialized on the current page, headers included.
    pub fn items_count(&self) -> usize {
        node_count(&self.state.lock().items)
    }

    pub fn page_count(&self) -> usize {
        let state = self.state.lock();
        if !state.is_paged() {
            return 1;
        }
        match state.total_items_count {
            Some(total) => total.div_ceil(state.page_size).max(1),
            None => state.page_index + 2,
        }
    }

    pub fn has_known_last_page(&self) -> bool {
        self.state.lock().last_page_index().is_some()
    }

    pub fn is_last_page(&self) -> bool {
        let state = self.state.lock();
        state
            .last_page_index()
            .is_some_and(|last| state.page_index >= last)
    }

    pub fn is_loading(&self) -> bool {
        self.pending_loads.load(Ordering::SeqCst) > 0
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().is_loaded
    }

    pub fn total_summary(&self) -> Option<Vec<Value>> {
        self.state.lock().total_summary.clone()
    }

    /// Snapshot of the group bookkeeping, when grouped.
    pub fn groups_info(&self) -> Option<GroupsInfo> {
        self.state
            .lock()
            .helper
            .as_ref()
            .map(|helper| helper.groups_info().clone())
    }
}

fn helper_for(runner: &QueryRunner) -> Box<dyn GroupingHelper> {
    if runner.remote().grouping {
        Box::new(ExpandedGroupingHelper::new())
    } else {
        Box::new(CollapsedGroupingHelper::new())
    }
}
