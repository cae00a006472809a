//! Per-group bookkeeping for paging through grouped data.
//!
//! Nodes live in an arena and are looked up by key path. A node knows its position among
//! its siblings (`index`) and how many children it has (`child_count`); its row span and
//! absolute offset are derived by walking the tree.
//!
//! Row model: a leaf or a collapsed header is one row, an expanded header contributes only
//! the rows of its children.

use std::collections::BTreeMap;

use gridsource_common::Value;
use tracing::trace;

use crate::item::GroupPath;

pub type NodeId = usize;

/// Facts needed to place a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfoEntry {
    pub path: GroupPath,
    /// Position among the siblings at its level.
    pub index: usize,
    /// Child groups, or leaves on the last level.
    pub child_count: usize,
    pub is_expanded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfo {
    pub key: Value,
    pub path: GroupPath,
    pub index: usize,
    pub child_count: usize,
    pub is_expanded: bool,
    /// First row of the group in the flattened row space.
    pub offset: usize,
    /// Rows the group spans; 1 when collapsed.
    pub count: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupsInfo {
    nodes: Vec<Option<GroupInfo>>,
    // Slots emptied by `remove`, reused before `nodes` grows.
    free: Vec<NodeId>,
    roots: Vec<NodeId>,
    by_path: BTreeMap<GroupPath, NodeId>,
    root_count: Option<usize>,
    stale: bool,
}

impl GroupsInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Number of top-level groups, when known.
    pub fn root_count(&self) -> Option<usize> {
        self.root_count
    }

    pub fn set_root_count(&mut self, count: usize) {
        self.root_count = Some(count);
    }

    /// Offsets and counts must be re-derived before the next page is built.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.roots.clear();
        self.by_path.clear();
        self.root_count = None;
        self.stale = false;
    }

    pub fn find(&self, path: &GroupPath) -> Option<&GroupInfo> {
        let id = *self.by_path.get(path)?;
        self.nodes.get(id)?.as_ref()
    }

    /// Insert or update a group, keeping siblings ordered by position.
    ///
    /// Returns `false` when the parent of a nested group is unknown.
    pub fn add_group_info(&mut self, entry: GroupInfoEntry) -> bool {
        if let Some(&id) = self.by_path.get(&entry.path) {
            if let Some(node) = self.nodes[id].as_mut() {
                node.index = entry.index;
                node.child_count = entry.child_count;
                node.is_expanded = entry.is_expanded;
            }
            self.resort_siblings(id);
            self.recompute();
            return true;
        }

        let Some(key) = entry.path.keys().last().cloned() else {
            return false;
        };

        let parent = match entry.path.parent() {
            Some(parent_path) if !parent_path.is_empty() => match self.by_path.get(&parent_path) {
                Some(&id) => Some(id),
                None => {
                    trace!(path = ?entry.path, "Parent group unknown, entry dropped");
                    return false;
                }
            },
            _ => None,
        };

        let node = GroupInfo {
            key,
            path: entry.path.clone(),
            index: entry.index,
            child_count: entry.child_count,
            is_expanded: entry.is_expanded,
            offset: 0,
            count: 1,
            parent,
            children: Vec::new(),
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.by_path.insert(entry.path, id);

        match parent {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        self.resort_siblings(id);
        self.recompute();
        true
    }

    fn index_of(&self, id: NodeId) -> usize {
        self.nodes[id].as_ref().map_or(usize::MAX, |n| n.index)
    }

    fn resort_siblings(&mut self, id: NodeId) {
        let parent = self.nodes[id].as_ref().and_then(|n| n.parent);
        let mut siblings = match parent {
            Some(p) => self.nodes[p]
                .as_mut()
                .map(|n| std::mem::take(&mut n.children))
                .unwrap_or_default(),
            None => std::mem::take(&mut self.roots),
        };
        siblings.sort_by_key(|&s| self.index_of(s));
        match parent {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.children = siblings;
                }
            }
            None => self.roots = siblings,
        }
    }

    /// Flip the expansion flag of a known group. Returns whether the group is known.
    pub fn set_expanded(&mut self, path: &GroupPath, expanded: bool) -> bool {
        let Some(&id) = self.by_path.get(path) else {
            return false;
        };
        if let Some(node) = self.nodes[id].as_mut() {
            node.is_expanded = expanded;
        }
        self.recompute();
        true
    }

    /// Remove a group and everything below it.
    pub fn remove(&mut self, path: &GroupPath) {
        let Some(&id) = self.by_path.get(path) else {
            return;
        };
        let parent = self.nodes[id].as_ref().and_then(|n| n.parent);
        match parent {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.children.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&c| c != id),
        }

        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes[next].take() {
                self.by_path.remove(&node.path);
                self.free.push(next);
                pending.extend(node.children);
            }
        }
        self.recompute();
    }

    /// Drop the groups of one level together with their descendants.
    pub fn prune_level(&mut self, level: usize) {
        let doomed: Vec<GroupPath> = self
            .by_path
            .keys()
            .filter(|p| p.len() == level + 1)
            .cloned()
            .collect();
        for path in doomed {
            self.remove(&path);
        }
        if level == 0 {
            self.root_count = None;
        }
    }

    // Span and offset derivation

    fn span(&self, id: NodeId) -> usize {
        let Some(node) = self.nodes[id].as_ref() else {
            return 0;
        };
        if !node.is_expanded {
            return 1;
        }
        let nested: usize = node
            .children
            .iter()
            .filter_map(|&c| {
                let child = self.nodes[c].as_ref()?;
                child.is_expanded.then(|| self.span(c).saturating_sub(1))
            })
            .sum();
        node.child_count + nested
    }

    /// Re-derive every span (bottom-up) and offset (top-down).
    pub fn recompute(&mut self) {
        let spans: Vec<usize> = (0..self.nodes.len()).map(|id| self.span(id)).collect();
        for (id, span) in spans.iter().enumerate() {
            if let Some(node) = self.nodes[id].as_mut() {
                node.count = *span;
            }
        }

        let roots = self.roots.clone();
        self.place(&roots, 0);
    }

    fn place(&mut self, siblings: &[NodeId], base: usize) {
        let mut extra = 0;
        for &id in siblings {
            let Some(node) = self.nodes[id].as_mut() else {
                continue;
            };
            node.offset = base + node.index + extra;
            if node.is_expanded {
                extra += node.count.saturating_sub(1);
            }
            let offset = node.offset;
            let children = node.children.clone();
            self.place(&children, offset);
        }
    }

    /// `(index, span)` of the expanded children of `parent` (roots for `None`), by index.
    pub fn expanded_children(&self, parent: Option<&GroupPath>) -> Vec<(usize, usize)> {
        let ids: &[NodeId] = match parent {
            Some(path) => match self.by_path.get(path).and_then(|&id| self.nodes[id].as_ref()) {
                Some(node) => &node.children,
                None => return Vec::new(),
            },
            None => &self.roots,
        };
        ids.iter()
            .filter_map(|&id| self.nodes[id].as_ref())
            .filter(|n| n.is_expanded)
            .map(|n| (n.index, n.count))
            .collect()
    }

    /// Rows of the whole grouped view. Needs the number of top-level groups.
    pub fn total_rows(&self) -> usize {
        let root_count = self.root_count.unwrap_or(self.roots.len());
        let nested: usize = self
            .roots
            .iter()
            .filter_map(|&id| self.nodes[id].as_ref())
            .filter(|n| n.is_expanded)
            .map(|n| n.count.saturating_sub(1))
            .sum();
        root_count + nested
    }

    /// All known groups ordered by key path.
    pub fn entries(&self) -> Vec<&GroupInfo> {
        self.by_path
            .values()
            .filter_map(|&id| self.nodes[id].as_ref())
            .collect()
    }

    /// Expanded siblings never overlap.
    pub fn offsets_consistent(&self) -> bool {
        let check = |ids: &[NodeId]| {
            let expanded: Vec<&GroupInfo> = ids
                .iter()
                .filter_map(|&id| self.nodes[id].as_ref())
                .filter(|n| n.is_expanded)
                .collect();
            expanded
                .windows(2)
                .all(|w| w[0].offset < w[1].offset && w[0].offset + w[0].count <= w[1].offset)
        };
        check(&self.roots)
            && self
                .nodes
                .iter()
                .flatten()
                .all(|node| check(&node.children))
    }
}
