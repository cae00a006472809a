//! Items exposed by a data source: plain rows and group nodes.

use std::cmp::Ordering;

use gridsource_common::{GridError, Result, Value};
use serde_json::json;
use smallvec::SmallVec;

/// Key sequence identifying a group from the root.
#[derive(Debug, Clone, Default)]
pub struct GroupPath(pub SmallVec<[Value; 4]>);

impl GroupPath {
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    pub fn level(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[Value] {
        &self.0
    }

    pub fn child(&self, key: Value) -> Self {
        let mut keys = self.0.clone();
        keys.push(key);
        Self(keys)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].iter().cloned().collect()))
    }

    pub fn starts_with(&self, prefix: &GroupPath) -> bool {
        prefix.0.len() <= self.0.len()
            && prefix.0.iter().zip(self.0.iter()).all(|(a, b)| a.loose_eq(b))
    }
}

impl PartialEq for GroupPath {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupPath {}

impl PartialOrd for GroupPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupPath {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = a.compare(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl<T: Into<Value>> FromIterator<T> for GroupPath {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Value>> for GroupPath {
    fn from(keys: Vec<Value>) -> Self {
        Self(SmallVec::from_vec(keys))
    }
}

/// A group node. `items == None` means collapsed with no nested data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupItem {
    pub key: Value,
    pub items: Option<Vec<Item>>,
    /// Leaf count as reported by the store; stripped before exposure.
    pub count: Option<usize>,
    pub aggregates: Option<Vec<Value>>,
    pub is_continuation: bool,
    pub is_continuation_on_next_page: bool,
}

impl GroupItem {
    pub fn new(key: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.items.is_some()
    }

    pub fn children(&self) -> &[Item] {
        self.items.as_deref().unwrap_or(&[])
    }

    /// Leaves below this node, counting collapsed groups by their reported count.
    pub fn leaf_count(&self) -> usize {
        match &self.items {
            Some(items) => items.iter().map(Item::leaf_count).sum(),
            None => self.count.unwrap_or(0),
        }
    }

    /// Drop `count` and nested data below collapsed levels.
    pub fn stripped(mut self) -> Self {
        self.count = None;
        if let Some(items) = self.items.take() {
            self.items = Some(items.into_iter().map(Item::stripped).collect());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Row(Value),
    Group(GroupItem),
}

impl Item {
    pub fn as_group(&self) -> Option<&GroupItem> {
        match self {
            Item::Group(g) => Some(g),
            Item::Row(_) => None,
        }
    }

    pub fn as_row(&self) -> Option<&Value> {
        match self {
            Item::Row(r) => Some(r),
            Item::Group(_) => None,
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Item::Row(_) => 1,
            Item::Group(g) => g.leaf_count(),
        }
    }

    /// Materialized nodes, headers and leaves alike.
    pub fn node_count(&self) -> usize {
        match self {
            Item::Row(_) => 1,
            Item::Group(g) => 1 + g.children().iter().map(Item::node_count).sum::<usize>(),
        }
    }

    pub fn stripped(self) -> Self {
        match self {
            Item::Group(g) => Item::Group(g.stripped()),
            row => row,
        }
    }

    /// JSON shape exposed to hosts. Continuation flags appear only when set.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Item::Row(row) => row.to_json(),
            Item::Group(g) => {
                let mut obj = serde_json::Map::new();
                obj.insert("key".into(), g.key.to_json());
                obj.insert(
                    "items".into(),
                    match &g.items {
                        Some(items) => items.iter().map(Item::to_json).collect(),
                        None => serde_json::Value::Null,
                    },
                );
                if let Some(count) = g.count {
                    obj.insert("count".into(), json!(count));
                }
                if let Some(aggregates) = &g.aggregates {
                    obj.insert(
                        "aggregates".into(),
                        aggregates.iter().map(Value::to_json).collect(),
                    );
                }
                if g.is_continuation {
                    obj.insert("isContinuation".into(), json!(true));
                }
                if g.is_continuation_on_next_page {
                    obj.insert("isContinuationOnNextPage".into(), json!(true));
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Parse a store item. `grouped_levels` is the number of group levels still below this item.
    ///
    /// Groups are `{key, items, count, summary}` objects; `aggregates` is accepted for `summary`.
    pub fn from_store_json(json: serde_json::Value, grouped_levels: usize) -> Result<Self> {
        if grouped_levels == 0 {
            return Ok(Item::Row(Value::from_json(json)));
        }

        let mut obj = match json {
            serde_json::Value::Object(obj) => obj,
            other => {
                return Err(GridError::Parse(format!(
                    "expected a group object, got {}",
                    other
                )));
            }
        };

        let key = obj.remove("key").map(Value::from_json).unwrap_or(Value::Null);
        let items = match obj.remove("items") {
            Some(serde_json::Value::Array(items)) => Some(
                items
                    .into_iter()
                    .map(|item| Item::from_store_json(item, grouped_levels - 1))
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => None,
        };
        let count = obj
            .remove("count")
            .and_then(|c| c.as_u64())
            .map(|c| c as usize);
        let aggregates = obj
            .remove("summary")
            .or_else(|| obj.remove("aggregates"))
            .and_then(|s| match s {
                serde_json::Value::Array(values) => {
                    Some(values.into_iter().map(Value::from_json).collect())
                }
                _ => None,
            });

        Ok(Item::Group(GroupItem {
            key,
            items,
            count,
            aggregates,
            ..Default::default()
        }))
    }
}

/// Count every node of a page tree.
pub fn node_count(items: &[Item]) -> usize {
    items.iter().map(Item::node_count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn paths_order_by_keys_then_length() {
        let a: GroupPath = [1].into_iter().collect();
        let b: GroupPath = [1, 2].into_iter().collect();
        let c: GroupPath = [2].into_iter().collect();
        assert!(a < b);
        assert!(b < c);
        assert!(b.starts_with(&a));
        assert_eq!(b.parent(), Some(a));
    }

    #[test]
    fn group_json_hides_unset_flags() {
        let group = Item::Group(GroupItem {
            key: Value::from(1),
            items: Some(vec![Item::Row(Value::from(1))]),
            is_continuation_on_next_page: true,
            ..Default::default()
        });
        assert_eq!(
            group.to_json(),
            json!({"key": 1, "items": [1], "isContinuationOnNextPage": true})
        );
        assert_eq!(group.node_count(), 2);
    }

    #[test]
    fn parses_store_groups() {
        let item = Item::from_store_json(
            json!({"key": "a", "items": null, "count": 3, "summary": [10]}),
            1,
        )
        .unwrap();
        let group = item.as_group().unwrap();
        assert_eq!(group.key, Value::from("a"));
        assert!(!group.is_expanded());
        assert_eq!(group.leaf_count(), 3);
        assert_eq!(group.aggregates, Some(vec![Value::from(10)]));
        assert!(Item::from_store_json(json!(5), 1).is_err());
    }
}
