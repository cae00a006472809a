use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use gridsource_common::{GridError, Result};
use tracing::{debug, trace};

use super::{
    ExpandState, GroupInfoEntry, GroupingHelper, GroupsInfo, LoadContext, PageResult, header_take,
    locate,
};
use crate::item::{GroupItem, GroupPath, Item};
use crate::query::{LoadOptions, combine_filters, create_offset_filter, group_filter};
use crate::store::LoadResult;

/// Where the current page starts among the top-level groups.
#[derive(Debug, Clone, Copy, Default)]
struct Window {
    start_index: usize,
    inner_skip: usize,
    take: Option<usize>,
    asked_group_count: bool,
    asked_total_count: bool,
}

/// Grouping evaluated by the store.
///
/// The full leaf set is never requested. A page is built top-down: the headers of the first
/// level that cover the page window, then for every expanded header its child headers or
/// leaves, each request filtered to the header's key and limited to the remaining budget.
#[derive(Debug, Clone, Default)]
pub struct ExpandedGroupingHelper {
    expand: ExpandState,
    info: GroupsInfo,
    total_count: Option<usize>,
    /// Absolute sibling index of every header seen on the last page.
    visible: BTreeMap<GroupPath, usize>,
    window: Window,
}

impl ExpandedGroupingHelper {
    pub fn new() -> Self {
        Self::default()
    }

    fn needs_refresh(&self) -> bool {
        self.info.is_stale() || self.info.root_count().is_none()
    }

    /// Learn the whole header tree in one request. Used when some level expands by default.
    async fn survey(&mut self, ctx: &LoadContext<'_>) -> Result<()> {
        let groups = ctx.groups();
        let Some(last) = groups.len().checked_sub(1) else {
            return Ok(());
        };
        let options = LoadOptions {
            group: groups
                .iter()
                .enumerate()
                .map(|(level, g)| g.clone().expanded(level < last))
                .collect(),
            ..ctx.base_options()
        };
        let result = ctx.runner.load(&options, true).await?;

        self.info.clear();
        self.info.set_root_count(result.data.len());
        self.total_count = Some(result.data.iter().map(Item::leaf_count).sum());
        self.add_surveyed(ctx, &result.data, &GroupPath::new());
        debug!(groups = self.info.len(), "Surveyed group headers");
        Ok(())
    }

    fn add_surveyed(&mut self, ctx: &LoadContext<'_>, items: &[Item], parent: &GroupPath) {
        let last = ctx.groups().len();
        for (index, item) in items.iter().enumerate() {
            let Some(group) = item.as_group() else {
                continue;
            };
            let path = parent.child(group.key.clone());
            let child_count = if path.len() == last {
                group.count.unwrap_or(0)
            } else {
                group.children().len()
            };
            self.info.add_group_info(GroupInfoEntry {
                path: path.clone(),
                index,
                child_count,
                is_expanded: self.expand.is_expanded(&path, ctx.groups()),
            });
            self.add_surveyed(ctx, group.children(), &path);
        }
    }

    /// Re-derive count and position of every explicitly expanded group.
    async fn revalidate(&mut self, ctx: &LoadContext<'_>) -> Result<()> {
        let paths = self.expand.expanded_paths();
        self.info.clear();
        self.total_count = None;

        for path in paths {
            if path.len() > ctx.groups().len() {
                continue;
            }
            let count = self.query_child_count(ctx, &path, None).await?;
            if count == 0 {
                trace!(path = ?path, "Expanded group vanished");
                self.expand.remove(&path);
                continue;
            }
            let index = self.query_index(ctx, &path).await?;
            self.info.add_group_info(GroupInfoEntry {
                path,
                index,
                child_count: count,
                is_expanded: true,
            });
        }
        debug!(groups = self.info.len(), "Revalidated expanded groups");
        Ok(())
    }

    /// Child groups of `path`, or its leaves on the last level.
    ///
    /// Count queries ask for a single item; a zero `take` reads as "no limit" to many
    /// backends. The returned data is ignored.
    async fn query_child_count(
        &self,
        ctx: &LoadContext<'_>,
        path: &GroupPath,
        header: Option<&GroupItem>,
    ) -> Result<usize> {
        let groups = ctx.groups();
        let base = ctx.base_options();
        let filter = combine_filters(base.filter.clone(), group_filter(path.keys(), groups));

        if path.len() == groups.len() {
            if let Some(count) = header.and_then(|h| h.count) {
                return Ok(count);
            }
            let options = LoadOptions {
                filter,
                sort: Vec::new(),
                require_total_count: true,
                skip: Some(0),
                take: Some(1),
                ..base
            };
            let result = ctx.runner.load(&options, true).await?;
            return result
                .extra
                .total_count
                .ok_or_else(GridError::missing_total_count);
        }

        let options = LoadOptions {
            filter,
            group: vec![groups[path.len()].clone().expanded(false)],
            require_group_count: true,
            skip: Some(0),
            take: Some(1),
            ..base
        };
        let result = ctx.runner.load(&options, true).await?;
        result
            .extra
            .group_count
            .ok_or_else(GridError::missing_group_count)
    }

    /// Position of `path` among its siblings, via the offset filter.
    async fn query_index(&self, ctx: &LoadContext<'_>, path: &GroupPath) -> Result<usize> {
        let groups = ctx.groups();
        let base = ctx.base_options();
        let options = LoadOptions {
            filter: create_offset_filter(path.keys(), groups, base.filter.clone(), true),
            group: vec![groups[path.level()].clone().expanded(false)],
            require_group_count: true,
            skip: Some(0),
            take: Some(1),
            ..base
        };
        let result = ctx.runner.load(&options, true).await?;
        result
            .extra
            .group_count
            .ok_or_else(GridError::missing_group_count)
    }

    /// Build the page subtree below `parent` from the headers starting at `first_index`.
    fn assemble<'a>(
        &'a mut self,
        ctx: &'a LoadContext<'a>,
        parent: GroupPath,
        headers: Vec<Item>,
        first_index: usize,
        skip: &'a mut usize,
        take: &'a mut Option<usize>,
    ) -> BoxFuture<'a, Result<Vec<Item>>> {
        async move {
            let groups = ctx.groups();
            let mut out = Vec::new();

            for (k, header) in headers.into_iter().enumerate() {
                if *take == Some(0) {
                    break;
                }
                let Item::Group(mut group) = header else {
                    continue;
                };
                let index = first_index + k;
                let path = parent.child(group.key.clone());
                self.visible.insert(path.clone(), index);

                if !self.expand.is_expanded(&path, groups) {
                    self.info.set_expanded(&path, false);
                    group.items = None;
                    if *skip > 0 {
                        *skip -= 1;
                        continue;
                    }
                    out.push(Item::Group(group));
                    if let Some(t) = take.as_mut() {
                        *t -= 1;
                    }
                    continue;
                }

                let known = self.info.find(&path).map(|n| n.is_expanded);
                match known {
                    Some(true) => {}
                    Some(false) => {
                        self.info.set_expanded(&path, true);
                    }
                    None => {
                        let child_count = self.query_child_count(ctx, &path, Some(&group)).await?;
                        self.info.add_group_info(GroupInfoEntry {
                            path: path.clone(),
                            index,
                            child_count,
                            is_expanded: true,
                        });
                    }
                }

                let span = self.info.find(&path).map_or(1, |n| n.count);
                if *skip >= span {
                    *skip -= span;
                    continue;
                }
                let started_inside = *skip > 0;
                let cut = matches!(*take, Some(t) if t < span - *skip);

                let base = ctx.base_options();
                let filter =
                    combine_filters(base.filter.clone(), group_filter(path.keys(), groups));

                let children = if path.len() == groups.len() {
                    let options = LoadOptions {
                        filter,
                        skip: take.map(|_| *skip),
                        take: *take,
                        ..base
                    };
                    let rows = ctx.runner.load(&options, true).await?.data;
                    *skip = 0;
                    if let Some(t) = take.as_mut() {
                        *t = t.saturating_sub(rows.len());
                    }
                    rows
                } else {
                    let expanded = self.info.expanded_children(Some(&path));
                    let (start, inner_skip) = locate(&expanded, *skip);
                    let options = LoadOptions {
                        filter,
                        group: vec![groups[path.len()].clone().expanded(false)],
                        group_summary: ctx.request.group_summary.clone(),
                        skip: take.map(|_| start),
                        take: take.map(|t| header_take(&expanded, start, inner_skip, t)),
                        ..base
                    };
                    let headers = ctx.runner.load(&options, true).await?.data;
                    *skip = inner_skip;
                    self.assemble(ctx, path.clone(), headers, start, skip, take)
                        .await?
                };

                trace!(path = ?path, children = children.len(), "Assembled group");
                group.items = Some(children);
                group.is_continuation = started_inside;
                group.is_continuation_on_next_page = cut;
                out.push(Item::Group(group));
            }
            Ok(out)
        }
        .boxed()
    }
}

#[async_trait]
impl GroupingHelper for ExpandedGroupingHelper {
    fn clone_box(&self) -> Box<dyn GroupingHelper> {
        Box::new(self.clone())
    }

    fn groups_info(&self) -> &GroupsInfo {
        &self.info
    }

    fn groups_info_mut(&mut self) -> &mut GroupsInfo {
        &mut self.info
    }

    fn expand_state(&self) -> &ExpandState {
        &self.expand
    }

    fn expand_state_mut(&mut self) -> &mut ExpandState {
        &mut self.expand
    }

    fn mark_stale(&mut self) {
        self.info.mark_stale();
        self.total_count = None;
    }

    async fn handle_data_loading(
        &mut self,
        ctx: &LoadContext<'_>,
        options: &mut LoadOptions,
    ) -> Result<()> {
        let groups = ctx.groups();
        if groups.is_empty() {
            return Err(GridError::InvalidOperation(
                "remote grouping helper used without group levels".into(),
            ));
        }
        if self.needs_refresh() {
            if groups.iter().any(|g| g.is_expanded) {
                self.survey(ctx).await?;
            } else {
                self.revalidate(ctx).await?;
            }
        }

        let expanded = self.info.expanded_children(None);
        let skip = ctx.request.skip.unwrap_or(0);
        let (start_index, inner_skip) = locate(&expanded, skip);
        let take = ctx.request.take;

        self.window = Window {
            start_index,
            inner_skip,
            take,
            asked_group_count: take.is_some() && self.info.root_count().is_none(),
            asked_total_count: ctx.request.require_total_count && self.total_count.is_none(),
        };

        options.group = vec![groups[0].clone().expanded(false)];
        options.skip = take.map(|_| start_index);
        options.take = take.map(|t| header_take(&expanded, start_index, inner_skip, t));
        options.require_group_count = self.window.asked_group_count;
        options.require_total_count = self.window.asked_total_count;
        trace!(start_index, inner_skip, headers = ?options.take, "Top-level header window");
        Ok(())
    }

    async fn handle_data_loaded(
        &mut self,
        ctx: &LoadContext<'_>,
        result: LoadResult,
    ) -> Result<PageResult> {
        let window = self.window;
        if window.asked_group_count {
            let count = result
                .extra
                .group_count
                .ok_or_else(GridError::missing_group_count)?;
            self.info.set_root_count(count);
        } else if window.take.is_none() {
            self.info.set_root_count(result.data.len());
        }
        if window.asked_total_count {
            let total = result
                .extra
                .total_count
                .ok_or_else(GridError::missing_total_count)?;
            self.total_count = Some(total);
        }

        self.visible.clear();
        let mut skip = window.inner_skip;
        let mut take = window.take;
        let items = self
            .assemble(
                ctx,
                GroupPath::new(),
                result.data,
                window.start_index,
                &mut skip,
                &mut take,
            )
            .await?;

        let total_rows = self.update_total_items_count();
        let total_items_count = if window.take.is_some() {
            total_rows
        } else {
            items.len()
        };

        Ok(PageResult {
            items: items.into_iter().map(Item::stripped).collect(),
            total_items_count,
            total_count: if ctx.request.require_total_count {
                self.total_count
            } else {
                None
            },
            summary: result.extra.summary,
        })
    }

    async fn change_row_expand(
        &mut self,
        ctx: &LoadContext<'_>,
        path: &GroupPath,
    ) -> Result<bool> {
        let groups = ctx.groups();
        if path.is_empty() || path.len() > groups.len() {
            return Err(GridError::InvalidOperation(format!(
                "no group level for path of length {}",
                path.len()
            )));
        }

        if self.expand.is_expanded(path, groups) {
            self.expand.set(path.clone(), false);
            self.info.set_expanded(path, false);
            return Ok(false);
        }

        self.expand.set(path.clone(), true);
        if self.info.set_expanded(path, true) {
            return Ok(true);
        }

        let count = self.query_child_count(ctx, path, None).await?;
        let index = match self.visible.get(path) {
            Some(&index) => index,
            None => self.query_index(ctx, path).await?,
        };
        if count > 0 {
            self.info.add_group_info(GroupInfoEntry {
                path: path.clone(),
                index,
                child_count: count,
                is_expanded: true,
            });
        }
        Ok(true)
    }
}
