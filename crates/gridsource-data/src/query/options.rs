//! Load options sent to stores, and the descriptors they are built from.

use std::{collections::BTreeMap, fmt};

use gridsource_common::Value;
use serde::{Deserialize, Serialize};

use super::filter::{Filter, FilterOp, combine_filters};

static NULL: Value = Value::Null;

/// Field accessor. `this` selects the row itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Selector {
    This,
    Field(String),
}

impl Selector {
    pub fn field(name: impl Into<String>) -> Self {
        Selector::from(name.into())
    }

    /// Read the selected value from a row; missing fields read as null.
    pub fn select<'a>(&self, row: &'a Value) -> &'a Value {
        match self {
            Selector::This => row,
            Selector::Field(path) => row.get_path(path).unwrap_or(&NULL),
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        if s == "this" {
            Selector::This
        } else {
            Selector::Field(s)
        }
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        Selector::from(s.to_string())
    }
}

impl From<Selector> for String {
    fn from(s: Selector) -> Self {
        s.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::This => f.write_str("this"),
            Selector::Field(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortDescriptor {
    pub selector: Selector,
    #[serde(default)]
    pub desc: bool,
}

impl SortDescriptor {
    pub fn new(selector: impl Into<Selector>, desc: bool) -> Self {
        Self {
            selector: selector.into(),
            desc,
        }
    }
}

/// One grouping level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDescriptor {
    pub selector: Selector,
    #[serde(default)]
    pub desc: bool,
    /// Default expansion of groups at this level.
    #[serde(default)]
    pub is_expanded: bool,
    /// Bucket width for numeric keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<f64>,
}

impl GroupDescriptor {
    pub fn new(selector: impl Into<Selector>) -> Self {
        Self {
            selector: selector.into(),
            desc: false,
            is_expanded: false,
            group_interval: None,
        }
    }

    pub fn expanded(mut self, is_expanded: bool) -> Self {
        self.is_expanded = is_expanded;
        self
    }

    pub fn descending(mut self, desc: bool) -> Self {
        self.desc = desc;
        self
    }

    pub fn interval(mut self, interval: f64) -> Self {
        self.group_interval = Some(interval);
        self
    }

    /// Same level shape, ignoring the expansion default and sort direction.
    pub fn same_shape(&self, other: &GroupDescriptor) -> bool {
        self.selector == other.selector && self.group_interval == other.group_interval
    }

    /// Group key of a row at this level.
    pub fn key_of(&self, row: &Value) -> Value {
        let value = self.selector.select(row);
        match (self.group_interval, value.as_number()) {
            (Some(interval), Some(n)) if interval > 0.0 => {
                let bucket = (n / interval).floor() * interval;
                if value.as_integer().is_some() && bucket.fract() == 0.0 {
                    Value::from(bucket as i64)
                } else {
                    Value::Float64(bucket)
                }
            }
            _ => value.clone(),
        }
    }

    fn interval_end(&self, key: &Value) -> Option<Value> {
        let interval = self.group_interval.filter(|i| *i > 0.0)?;
        let start = key.as_number()?;
        let end = start + interval;
        Some(if key.as_integer().is_some() && end.fract() == 0.0 {
            Value::from(end as i64)
        } else {
            Value::Float64(end)
        })
    }

    /// Filter selecting the rows that fall into the group with `key`.
    pub fn key_filter(&self, key: &Value) -> Filter {
        match self.interval_end(key) {
            Some(end) => Filter::And(vec![
                Filter::condition(self.selector.clone(), FilterOp::Ge, key.clone()),
                Filter::condition(self.selector.clone(), FilterOp::Lt, end),
            ]),
            None => Filter::eq(self.selector.clone(), key.clone()),
        }
    }

    /// Filter selecting the rows whose group sorts strictly before the group with `key`.
    ///
    /// Nulls sort first. Boolean and null keys are never compared with `<`/`>`.
    pub fn before_filter(&self, key: &Value) -> Filter {
        let sel = || self.selector.clone();
        let nothing = || {
            Filter::And(vec![
                Filter::condition(sel(), FilterOp::Ne, Value::Null),
                Filter::eq(sel(), Value::Null),
            ])
        };

        match (key, self.desc) {
            (Value::Null, false) => nothing(),
            (Value::Null, true) => Filter::condition(sel(), FilterOp::Ne, Value::Null),
            (Value::Bool(false), false) => Filter::eq(sel(), Value::Null),
            (Value::Bool(true), false) => Filter::condition(sel(), FilterOp::Ne, true),
            (Value::Bool(false), true) => Filter::eq(sel(), true),
            (Value::Bool(true), true) => nothing(),
            (key, false) => Filter::condition(sel(), FilterOp::Lt, key.clone()),
            (key, true) => match self.interval_end(key) {
                Some(end) => Filter::condition(sel(), FilterOp::Ge, end),
                None => Filter::condition(sel(), FilterOp::Gt, key.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
    pub summary_type: SummaryType,
}

impl SummaryDescriptor {
    pub fn new(selector: impl Into<Selector>, summary_type: SummaryType) -> Self {
        Self {
            selector: Some(selector.into()),
            summary_type,
        }
    }

    pub fn count() -> Self {
        Self {
            selector: None,
            summary_type: SummaryType::Count,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Options for one store request.
///
/// `skip`/`take` stay `None` when paging is off; they are never zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<GroupDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take: Option<usize>,
    #[serde(skip_serializing_if = "is_false")]
    pub require_total_count: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub require_group_count: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_operation: Option<FilterOp>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_expr: Vec<Selector>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub total_summary: Vec<SummaryDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_summary: Vec<SummaryDescriptor>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub user_data: BTreeMap<String, serde_json::Value>,
}

impl LoadOptions {
    pub fn is_grouped(&self) -> bool {
        !self.group.is_empty()
    }

    pub fn is_paged(&self) -> bool {
        self.skip.is_some() || self.take.is_some()
    }

    /// Search settings as a filter: `searchExpr` fields OR-ed with `searchOperation`.
    pub fn search_filter(&self) -> Option<Filter> {
        let value = self.search_value.as_ref().filter(|v| !v.is_null())?;
        if self.search_expr.is_empty() {
            return None;
        }
        let op = self.search_operation.unwrap_or(FilterOp::Contains);
        let parts = self
            .search_expr
            .iter()
            .map(|sel| Filter::condition(sel.clone(), op, value.clone()))
            .collect();
        Some(Filter::or(parts))
    }

    /// The filter combined with the search filter.
    pub fn effective_filter(&self) -> Option<Filter> {
        combine_filters(self.filter.clone(), self.search_filter())
    }

    /// Fold search settings into `filter` so the options can be evaluated without them.
    pub fn with_search_folded(mut self) -> Self {
        self.filter = self.effective_filter();
        self.search_value = None;
        self.search_operation = None;
        self.search_expr.clear();
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn paging_fields_are_omitted_when_unset() {
        let options = LoadOptions {
            sort: vec![SortDescriptor::new("name", false)],
            ..Default::default()
        };
        assert_eq!(options.to_json(), json!({"sort": [{"selector": "name", "desc": false}]}));
    }

    #[test]
    fn parses_camel_case_wire_options() {
        let options: LoadOptions = serde_json::from_value(json!({
            "filter": ["age", ">", 30],
            "group": [{"selector": "this", "isExpanded": true}],
            "skip": 0,
            "take": 20,
            "requireGroupCount": true,
            "totalSummary": [{"selector": "age", "summaryType": "sum"}]
        }))
        .unwrap();

        assert_eq!(options.filter, Some(Filter::condition("age", FilterOp::Gt, 30)));
        assert_eq!(options.group[0].selector, Selector::This);
        assert!(options.group[0].is_expanded);
        assert_eq!(options.skip, Some(0));
        assert!(options.require_group_count);
        assert!(!options.require_total_count);
        assert_eq!(options.total_summary[0].summary_type, SummaryType::Sum);
    }

    #[test]
    fn search_becomes_an_or_filter() {
        let options = LoadOptions {
            filter: Some(Filter::eq("active", true)),
            search_value: Some(Value::from("ann")),
            search_expr: vec![Selector::field("first"), Selector::field("last")],
            ..Default::default()
        };
        let folded = options.with_search_folded();
        assert_eq!(
            folded.filter.unwrap().to_json(),
            json!([
                ["active", "=", true],
                "and",
                [["first", "contains", "ann"], "or", ["last", "contains", "ann"]]
            ])
        );
        assert!(folded.search_value.is_none());
    }

    #[test]
    fn interval_keys_bucket_numbers() {
        let group = GroupDescriptor::new("age").interval(10.0);
        let row = Value::object([("age", 37)]);
        assert_eq!(group.key_of(&row), Value::Int32(30));
        assert_eq!(
            group.key_filter(&Value::from(30)).to_json(),
            json!([["age", ">=", 30], "and", ["age", "<", 40]])
        );
        assert_eq!(
            group.clone().descending(true).before_filter(&Value::from(30)).to_json(),
            json!(["age", ">=", 40])
        );
    }

    #[test]
    fn this_selector_reads_the_row() {
        let row = Value::from(7);
        assert_eq!(Selector::This.select(&row), &Value::from(7));
        assert_eq!(Selector::field("x").select(&row), &Value::Null);
    }
}
