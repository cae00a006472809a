//! Grouping helpers
//!
//! Two strategies share the `GroupingHelper` contract. `CollapsedGroupingHelper` groups
//! locally from the complete leaf set; `ExpandedGroupingHelper` lets the store group and
//! pages through the header tree one level at a time.

mod collapsed;
mod expanded;
mod groups_info;

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use gridsource_common::{Result, Value};

use crate::item::{GroupPath, Item};
use crate::query::{GroupDescriptor, LoadOptions};
use crate::runner::QueryRunner;
use crate::store::LoadResult;

pub use collapsed::CollapsedGroupingHelper;
pub use expanded::ExpandedGroupingHelper;
pub use groups_info::{GroupInfo, GroupInfoEntry, GroupsInfo, NodeId};

/// What a helper needs from the data source during one operation.
pub struct LoadContext<'a> {
    pub runner: &'a QueryRunner,
    /// The page request built from the data source state.
    pub request: &'a LoadOptions,
}

impl LoadContext<'_> {
    pub fn groups(&self) -> &[GroupDescriptor] {
        &self.request.group
    }

    pub fn is_paged(&self) -> bool {
        self.request.take.is_some()
    }

    /// The request stripped down to filtering and sorting, the base of every sub-request.
    pub fn base_options(&self) -> LoadOptions {
        LoadOptions {
            filter: self.request.filter.clone(),
            sort: self.request.sort.clone(),
            search_value: self.request.search_value.clone(),
            search_operation: self.request.search_operation,
            search_expr: self.request.search_expr.clone(),
            user_data: self.request.user_data.clone(),
            ..Default::default()
        }
    }
}

/// One assembled page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub items: Vec<Item>,
    /// Rows of the whole view; top-level items when paging is off.
    pub total_items_count: usize,
    pub total_count: Option<usize>,
    pub summary: Option<Vec<Value>>,
}

// Expansion state

/// Per-group overrides on top of the per-level `is_expanded` defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandState {
    overrides: BTreeMap<GroupPath, bool>,
}

impl ExpandState {
    pub fn is_expanded(&self, path: &GroupPath, groups: &[GroupDescriptor]) -> bool {
        if path.is_empty() || path.len() > groups.len() {
            return false;
        }
        self.overrides
            .get(path)
            .copied()
            .unwrap_or(groups[path.level()].is_expanded)
    }

    pub fn set(&mut self, path: GroupPath, expanded: bool) {
        self.overrides.insert(path, expanded);
    }

    pub fn remove(&mut self, path: &GroupPath) {
        self.overrides.remove(path);
    }

    /// Forget overrides on `level` (all levels for `None`).
    pub fn clear_level(&mut self, level: Option<usize>) {
        match level {
            Some(level) => self.overrides.retain(|path, _| path.len() != level + 1),
            None => self.overrides.clear(),
        }
    }

    /// Forget overrides on `level` and every deeper level.
    pub fn clear_from_level(&mut self, level: usize) {
        self.overrides.retain(|path, _| path.len() <= level);
    }

    /// Paths explicitly expanded, parents before children.
    pub fn expanded_paths(&self) -> Vec<GroupPath> {
        self.overrides
            .iter()
            .filter(|(_, expanded)| **expanded)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Reconcile expansion state and bookkeeping after the group descriptors changed.
///
/// A selector or interval change (or a different level count) forgets everything from the
/// first changed level. Direction changes keep the groups but invalidate their offsets.
/// Changing a level's `is_expanded` default drops that level's overrides and entries.
pub(crate) fn reconcile_group_change(
    expand: &mut ExpandState,
    info: &mut GroupsInfo,
    old: &[GroupDescriptor],
    new: &[GroupDescriptor],
) {
    let shape_changed_at = old
        .iter()
        .zip(new)
        .position(|(a, b)| !a.same_shape(b))
        .or_else(|| (old.len() != new.len()).then(|| old.len().min(new.len())));

    let limit = shape_changed_at.unwrap_or(new.len());
    if let Some(level) = shape_changed_at {
        expand.clear_from_level(level);
        if level == 0 {
            info.clear();
        } else {
            info.prune_level(level);
        }
        info.mark_stale();
    }

    for (level, (a, b)) in old.iter().zip(new).enumerate().take(limit) {
        if a.is_expanded != b.is_expanded {
            expand.clear_level(Some(level));
            info.prune_level(level);
            info.mark_stale();
        }
        if a.desc != b.desc {
            info.mark_stale();
        }
    }
}

// Page window arithmetic

/// Find where a row window starts among sibling groups.
///
/// `expanded` lists `(index, span)` of the expanded siblings ordered by index; every other
/// sibling is one row. Returns the index of the sibling holding row `skip` and how many of
/// that sibling's rows come before it.
pub fn locate(expanded: &[(usize, usize)], skip: usize) -> (usize, usize) {
    let mut extra = 0;
    for &(index, span) in expanded {
        let start = index + extra;
        if start > skip {
            break;
        }
        if start + span <= skip {
            extra += span.saturating_sub(1);
            continue;
        }
        return (index, skip - start);
    }
    (skip - extra, 0)
}

/// Number of siblings, starting at `start_index`, needed to fill `take` rows.
pub fn header_take(
    expanded: &[(usize, usize)],
    start_index: usize,
    inner_skip: usize,
    take: usize,
) -> usize {
    let spans: BTreeMap<usize, usize> = expanded.iter().copied().collect();
    let mut remaining = take;
    let mut index = start_index;
    while remaining > 0 {
        let rows = match spans.get(&index) {
            Some(&span) if index == start_index => span.saturating_sub(inner_skip),
            Some(&span) => span,
            None => 1,
        };
        remaining = remaining.saturating_sub(rows);
        index += 1;
    }
    index - start_index
}

/// Number of continuation header rows a group produces when its header is repeated at the
/// top of every page it spills onto.
///
/// `group_offset` is the row where the group starts relative to the page boundary (negative
/// when it started on an earlier page), `group_size` its rows and `group_index` its depth.
pub fn get_continuation_group_count(
    group_offset: i64,
    page_size: i64,
    group_size: i64,
    group_index: i64,
) -> i64 {
    if page_size <= 1 || group_size <= 0 {
        return 0;
    }
    let rows_per_page = page_size - group_index - 1;
    if rows_per_page <= 0 {
        return 0;
    }

    let mut page_offset = group_offset.rem_euclid(page_size);
    if page_offset == 0 {
        page_offset = page_size;
    }
    page_offset += group_size - group_index - 2;
    if page_offset < 0 {
        page_offset += page_size;
    }
    page_offset.div_euclid(rows_per_page).max(0)
}

// Helper contract

#[async_trait]
pub trait GroupingHelper: Send + Sync + Debug {
    fn clone_box(&self) -> Box<dyn GroupingHelper>;

    fn groups_info(&self) -> &GroupsInfo;

    fn groups_info_mut(&mut self) -> &mut GroupsInfo;

    fn expand_state(&self) -> &ExpandState;

    fn expand_state_mut(&mut self) -> &mut ExpandState;

    /// Insert a group, keeping siblings ordered by offset.
    fn add_group_info(&mut self, entry: GroupInfoEntry) -> bool {
        self.groups_info_mut().add_group_info(entry)
    }

    /// Recompute the visible row count from the bookkeeping.
    fn update_total_items_count(&mut self) -> usize {
        let info = self.groups_info_mut();
        info.recompute();
        info.total_rows()
    }

    fn is_row_expanded(&self, path: &GroupPath, groups: &[GroupDescriptor]) -> bool {
        self.expand_state().is_expanded(path, groups)
    }

    /// Run lookahead requests and rewrite `options` into the primary store request.
    async fn handle_data_loading(
        &mut self,
        ctx: &LoadContext<'_>,
        options: &mut LoadOptions,
    ) -> Result<()>;

    /// Merge the primary response into the page tree.
    async fn handle_data_loaded(
        &mut self,
        ctx: &LoadContext<'_>,
        result: LoadResult,
    ) -> Result<PageResult>;

    /// Toggle the group at `path`. Returns the new expansion state.
    async fn change_row_expand(&mut self, ctx: &LoadContext<'_>, path: &GroupPath)
    -> Result<bool>;

    fn on_group_changed(&mut self, old: &[GroupDescriptor], new: &[GroupDescriptor]) {
        let mut expand = std::mem::take(self.expand_state_mut());
        reconcile_group_change(&mut expand, self.groups_info_mut(), old, new);
        *self.expand_state_mut() = expand;
    }

    /// Drop per-group overrides after a level default changed (all levels for `None`).
    fn reset_expanded(&mut self, level: Option<usize>) {
        self.expand_state_mut().clear_level(level);
        let info = self.groups_info_mut();
        match level {
            Some(level) => info.prune_level(level),
            None => info.clear(),
        }
        info.mark_stale();
    }

    /// Counts and offsets must be re-derived on the next load.
    fn mark_stale(&mut self) {
        self.groups_info_mut().mark_stale();
    }

    /// Full load cycle for the page described by `ctx.request`.
    async fn load_page(&mut self, ctx: &LoadContext<'_>) -> Result<PageResult> {
        let mut options = ctx.request.clone();
        self.handle_data_loading(ctx, &mut options).await?;
        let result = ctx.runner.load(&options, true).await?;
        self.handle_data_loaded(ctx, result).await
    }
}

impl Clone for Box<dyn GroupingHelper> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Slice a visible tree to a row window, flagging groups cut at either edge.
pub(crate) fn slice_rows(
    items: Vec<Item>,
    skip: &mut usize,
    take: &mut Option<usize>,
) -> Vec<Item> {
    let mut out = Vec::new();
    for item in items {
        if *take == Some(0) {
            break;
        }
        match item {
            Item::Group(mut group) if group.items.is_some() => {
                let span: usize = group.children().iter().map(visible_rows).sum();
                if *skip >= span {
                    *skip -= span;
                    continue;
                }
                let started_inside = *skip > 0;
                let remaining = span - *skip;
                let cut = matches!(*take, Some(t) if t < remaining);
                let children = group.items.take().unwrap_or_default();
                group.items = Some(slice_rows(children, skip, take));
                group.is_continuation = started_inside;
                group.is_continuation_on_next_page = cut;
                out.push(Item::Group(group));
            }
            other => {
                if *skip > 0 {
                    *skip -= 1;
                    continue;
                }
                out.push(other);
                if let Some(t) = take.as_mut() {
                    *t -= 1;
                }
            }
        }
    }
    out
}

/// Rows an item occupies in the flattened view.
pub(crate) fn visible_rows(item: &Item) -> usize {
    match item {
        Item::Group(group) if group.items.is_some() => {
            group.children().iter().map(visible_rows).sum()
        }
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::GroupItem;
    use pretty_assertions::assert_eq;

    #[test]
    fn continuation_group_count_reference_table() {
        let cases = [
            ((0, 3, 2), 1),
            ((0, 3, 3), 2),
            ((0, 3, 5), 3),
            ((0, 3, 6), 3),
            ((0, 3, 10), 5),
            ((0, 4, 10), 4),
            ((2, 3, 2), 1),
            ((2, 3, 3), 1),
            ((2, 3, 5), 2),
            ((2, 3, 10), 5),
            ((2, 4, 5), 1),
            ((2, 6, 5), 1),
            ((2, 7, 5), 0),
            ((4, 3, 2), 0),
            ((4, 3, 3), 1),
            ((4, 3, 5), 2),
            ((4, 3, 10), 4),
            ((-2, 3, 2), 0),
            ((-2, 3, 3), 1),
            ((-2, 3, 5), 2),
            ((-2, 3, 10), 4),
        ];
        for ((offset, page_size, size), expected) in cases {
            assert_eq!(
                get_continuation_group_count(offset, page_size, size, 0),
                expected,
                "offset {offset}, page size {page_size}, group size {size}"
            );
        }
    }

    #[test]
    fn continuation_group_count_degenerate_pages() {
        assert_eq!(get_continuation_group_count(0, 1, 10, 0), 0);
        assert_eq!(get_continuation_group_count(0, 3, 0, 0), 0);
        assert_eq!(get_continuation_group_count(0, 2, 10, 1), 0);
    }

    #[test]
    fn locate_skips_over_expanded_groups() {
        let expanded = [(0, 3), (2, 2)];
        assert_eq!(locate(&expanded, 0), (0, 0));
        assert_eq!(locate(&expanded, 2), (0, 2));
        assert_eq!(locate(&expanded, 3), (1, 0));
        assert_eq!(locate(&expanded, 4), (2, 0));
        assert_eq!(locate(&expanded, 5), (2, 1));
        assert_eq!(locate(&expanded, 6), (3, 0));
        assert_eq!(locate(&[], 7), (7, 0));
    }

    #[test]
    fn header_take_counts_spanned_rows() {
        let expanded = [(0, 3), (2, 2)];
        assert_eq!(header_take(&expanded, 0, 0, 2), 1);
        assert_eq!(header_take(&expanded, 0, 0, 4), 2);
        assert_eq!(header_take(&expanded, 0, 2, 3), 3);
        assert_eq!(header_take(&expanded, 3, 0, 2), 2);
        assert_eq!(header_take(&expanded, 0, 0, 0), 0);
    }

    #[test]
    fn expand_state_falls_back_to_level_defaults() {
        let groups = vec![GroupDescriptor::new("a").expanded(true), GroupDescriptor::new("b")];
        let mut state = ExpandState::default();
        let a1: GroupPath = [1].into_iter().collect();
        let a1b2: GroupPath = [1, 2].into_iter().collect();

        assert!(state.is_expanded(&a1, &groups));
        assert!(!state.is_expanded(&a1b2, &groups));
        state.set(a1.clone(), false);
        state.set(a1b2.clone(), true);
        assert!(!state.is_expanded(&a1, &groups));
        assert_eq!(state.expanded_paths(), vec![a1b2.clone()]);

        state.clear_from_level(1);
        assert!(!state.is_expanded(&a1b2, &groups));
    }

    #[test]
    fn group_change_resets_from_first_changed_level() {
        let old = vec![GroupDescriptor::new("a"), GroupDescriptor::new("b")];
        let new = vec![GroupDescriptor::new("a"), GroupDescriptor::new("c")];
        let mut expand = ExpandState::default();
        let mut info = GroupsInfo::new();
        let a1: GroupPath = [1].into_iter().collect();
        let a1b2: GroupPath = [1, 2].into_iter().collect();
        expand.set(a1.clone(), true);
        expand.set(a1b2.clone(), true);
        info.add_group_info(GroupInfoEntry {
            path: a1.clone(),
            index: 0,
            child_count: 2,
            is_expanded: true,
        });
        info.add_group_info(GroupInfoEntry {
            path: a1b2.clone(),
            index: 0,
            child_count: 2,
            is_expanded: true,
        });

        reconcile_group_change(&mut expand, &mut info, &old, &new);
        assert_eq!(expand.expanded_paths(), vec![a1.clone()]);
        assert!(info.find(&a1).is_some());
        assert!(info.find(&a1b2).is_none());
        assert!(info.is_stale());
    }

    #[test]
    fn slicing_flags_continuations() {
        let rows = |n: std::ops::Range<i32>| -> Vec<Item> {
            n.map(|i| Item::Row(Value::from(i))).collect()
        };
        let tree = vec![
            Item::Group(GroupItem {
                key: Value::from(1),
                items: Some(rows(0..3)),
                ..Default::default()
            }),
            Item::Group(GroupItem::new(2)),
        ];

        let page = slice_rows(tree.clone(), &mut 0, &mut Some(2));
        assert_eq!(
            page,
            vec![Item::Group(GroupItem {
                key: Value::from(1),
                items: Some(rows(0..2)),
                is_continuation_on_next_page: true,
                ..Default::default()
            })]
        );

        let page = slice_rows(tree, &mut 2, &mut Some(2));
        assert_eq!(
            page,
            vec![
                Item::Group(GroupItem {
                    key: Value::from(1),
                    items: Some(rows(2..3)),
                    is_continuation: true,
                    ..Default::default()
                }),
                Item::Group(GroupItem::new(2)),
            ]
        );
    }
}
