use async_trait::async_trait;
use gridsource_common::Result;
use tracing::debug;

use super::{
    ExpandState, GroupInfoEntry, GroupingHelper, GroupsInfo, LoadContext, PageResult, slice_rows,
};
use crate::item::{GroupPath, Item};
use crate::query::{GroupDescriptor, LoadOptions};
use crate::store::LoadResult;

/// Grouping evaluated on the client.
///
/// Every load asks for the complete filtered tree (served from the cache after the first
/// round trip) and cuts the page out of it. Expanding or collapsing only flips a flag.
#[derive(Debug, Clone, Default)]
pub struct CollapsedGroupingHelper {
    expand: ExpandState,
    info: GroupsInfo,
}

impl CollapsedGroupingHelper {
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild_info(&mut self, items: &[Item], parent: &GroupPath, groups: &[GroupDescriptor]) {
        for (index, item) in items.iter().enumerate() {
            let Some(group) = item.as_group() else {
                continue;
            };
            let path = parent.child(group.key.clone());
            self.info.add_group_info(GroupInfoEntry {
                path: path.clone(),
                index,
                child_count: group.children().len(),
                is_expanded: self.expand.is_expanded(&path, groups),
            });
            self.rebuild_info(group.children(), &path, groups);
        }
    }

    /// Collapse the fully expanded tree according to the expansion state.
    fn apply_expansion(
        &self,
        items: Vec<Item>,
        parent: &GroupPath,
        groups: &[GroupDescriptor],
    ) -> Vec<Item> {
        items
            .into_iter()
            .map(|item| match item {
                Item::Group(mut group) => {
                    let path = parent.child(group.key.clone());
                    let children = group.items.take().unwrap_or_default();
                    if self.expand.is_expanded(&path, groups) {
                        group.items = Some(self.apply_expansion(children, &path, groups));
                    }
                    Item::Group(group)
                }
                row => row,
            })
            .collect()
    }
}

#[async_trait]
impl GroupingHelper for CollapsedGroupingHelper {
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

    async fn handle_data_loading(
        &mut self,
        ctx: &LoadContext<'_>,
        options: &mut LoadOptions,
    ) -> Result<()> {
        options.group = ctx
            .groups()
            .iter()
            .map(|g| g.clone().expanded(true))
            .collect();
        options.skip = None;
        options.take = None;
        options.require_group_count = false;
        Ok(())
    }

    async fn handle_data_loaded(
        &mut self,
        ctx: &LoadContext<'_>,
        result: LoadResult,
    ) -> Result<PageResult> {
        let groups = ctx.groups();
        let root = GroupPath::new();

        self.info.clear();
        self.info.set_root_count(result.data.len());
        self.rebuild_info(&result.data, &root, groups);

        let visible = self.apply_expansion(result.data, &root, groups);
        let top_level = visible.len();
        let total_rows = self.update_total_items_count();

        let (items, total_items_count) = match ctx.request.take {
            Some(take) => {
                let mut skip = ctx.request.skip.unwrap_or(0);
                let mut take = Some(take);
                (slice_rows(visible, &mut skip, &mut take), total_rows)
            }
            None => (visible, top_level),
        };
        debug!(rows = total_rows, items = items.len(), "Sliced locally grouped page");

        Ok(PageResult {
            items: items.into_iter().map(Item::stripped).collect(),
            total_items_count,
            total_count: result.extra.total_count,
            summary: result.extra.summary,
        })
    }

    async fn change_row_expand(
        &mut self,
        ctx: &LoadContext<'_>,
        path: &GroupPath,
    ) -> Result<bool> {
        let expanded = !self.expand.is_expanded(path, ctx.groups());
        self.expand.set(path.clone(), expanded);
        self.info.set_expanded(path, expanded);
        Ok(expanded)
    }
}
