//! Filter expressions and the offset-filter builder.
//!
//! Filters travel in the array wire format stores understand:
//! `["field", "=", 1]`, `["field", 1]`, `[a, "and", b]`, `[a, "or", b]`, `[a, b]`, `["!", a]`.

use std::fmt;

use gridsource_common::{GridError, Result, Value};
use serde::{Deserialize, Serialize};

use super::options::{GroupDescriptor, Selector};

/// Comparison operator of a single filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Contains => "contains",
            FilterOp::NotContains => "notcontains",
            FilterOp::StartsWith => "startswith",
            FilterOp::EndsWith => "endswith",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "=" | "==" => FilterOp::Eq,
            "<>" | "!=" => FilterOp::Ne,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Le,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Ge,
            "contains" => FilterOp::Contains,
            "notcontains" => FilterOp::NotContains,
            "startswith" => FilterOp::StartsWith,
            "endswith" => FilterOp::EndsWith,
            _ => return None,
        })
    }
}

impl TryFrom<String> for FilterOp {
    type Error = GridError;

    fn try_from(value: String) -> Result<Self> {
        FilterOp::parse(&value)
            .ok_or_else(|| GridError::Parse(format!("unknown filter operation '{}'", value)))
    }
}

impl From<FilterOp> for String {
    fn from(op: FilterOp) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `[selector, op, value]` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub selector: Selector,
    pub op: FilterOp,
    pub value: Value,
}

/// Filter expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Filter {
    Condition(Condition),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn condition(selector: impl Into<Selector>, op: FilterOp, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition {
            selector: selector.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(selector: impl Into<Selector>, value: impl Into<Value>) -> Self {
        Self::condition(selector, FilterOp::Eq, value)
    }

    /// Conjunction that flattens nested `And`s and unwraps a single operand.
    pub fn and(mut parts: Vec<Filter>) -> Self {
        if parts.len() == 1 {
            return parts.remove(0);
        }
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Filter::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Filter::And(flat)
    }

    /// Disjunction that flattens nested `Or`s and unwraps a single operand.
    pub fn or(mut parts: Vec<Filter>) -> Self {
        if parts.len() == 1 {
            return parts.remove(0);
        }
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Filter::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Filter::Or(flat)
    }

    /// Evaluate the filter against a row.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Condition(c) => condition_matches(c, c.selector.select(row)),
            Filter::And(parts) => parts.iter().all(|f| f.matches(row)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(row)),
            Filter::Not(inner) => !inner.matches(row),
        }
    }

    /// Wire representation.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Filter::Condition(c) => Json::Array(vec![
                Json::String(c.selector.to_string()),
                Json::String(c.op.as_str().to_string()),
                c.value.to_json(),
            ]),
            Filter::And(parts) => join_json(parts, "and"),
            Filter::Or(parts) => join_json(parts, "or"),
            Filter::Not(inner) => Json::Array(vec![Json::String("!".into()), inner.to_json()]),
        }
    }

    /// Parse the wire representation.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;

        let arr = json
            .as_array()
            .ok_or_else(|| GridError::Parse(format!("filter must be an array, got {}", json)))?;

        match arr.as_slice() {
            [] => Err(GridError::Parse("empty filter".into())),
            [Json::String(bang), inner] if bang == "!" => {
                Ok(Filter::Not(Box::new(Filter::from_json(inner)?)))
            }
            [Json::String(field), value] => Ok(Filter::condition(
                Selector::from(field.as_str()),
                FilterOp::Eq,
                Value::from_json(value.clone()),
            )),
            [Json::String(field), Json::String(op), value]
                if !is_connector(op) && FilterOp::parse(op).is_some() =>
            {
                Ok(Filter::condition(
                    Selector::from(field.as_str()),
                    FilterOp::try_from(op.clone())?,
                    Value::from_json(value.clone()),
                ))
            }
            [Json::String(field), ..] => Err(GridError::Parse(format!(
                "malformed condition for field '{}'",
                field
            ))),
            [single] => Filter::from_json(single),
            _ => parse_group(arr),
        }
    }
}

fn is_connector(s: &str) -> bool {
    s.eq_ignore_ascii_case("and") || s.eq_ignore_ascii_case("or")
}

fn join_json(parts: &[Filter], connector: &str) -> serde_json::Value {
    let mut out = Vec::with_capacity(parts.len() * 2);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(serde_json::Value::String(connector.to_string()));
        }
        out.push(part.to_json());
    }
    serde_json::Value::Array(out)
}

// `and` binds tighter than `or`; a missing connector means `and`.
fn parse_group(arr: &[serde_json::Value]) -> Result<Filter> {
    let mut disjuncts: Vec<Vec<Filter>> = vec![Vec::new()];
    let mut expect_operand = true;

    for item in arr {
        match item {
            serde_json::Value::String(s) if is_connector(s) => {
                if expect_operand {
                    return Err(GridError::Parse(format!("unexpected connector '{}'", s)));
                }
                if s.eq_ignore_ascii_case("or") {
                    disjuncts.push(Vec::new());
                }
                expect_operand = true;
            }
            other => {
                let filter = Filter::from_json(other)?;
                if let Some(current) = disjuncts.last_mut() {
                    current.push(filter);
                }
                expect_operand = false;
            }
        }
    }

    if expect_operand {
        return Err(GridError::Parse("filter ends with a connector".into()));
    }

    let parts: Vec<Filter> = disjuncts.into_iter().map(Filter::and).collect();
    Ok(Filter::or(parts))
}

impl TryFrom<serde_json::Value> for Filter {
    type Error = GridError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        Filter::from_json(&value)
    }
}

impl From<Filter> for serde_json::Value {
    fn from(filter: Filter) -> Self {
        filter.to_json()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

// Condition evaluation

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.to_lowercase()),
        other => Some(other.to_string().to_lowercase()),
    }
}

fn condition_matches(c: &Condition, actual: &Value) -> bool {
    use std::cmp::Ordering;

    // Null orders before every other value, matching the sort order.
    let ordered = |accept: fn(Ordering) -> bool| match (actual.is_null(), c.value.is_null()) {
        (true, true) => accept(Ordering::Equal),
        (true, false) => accept(Ordering::Less),
        (false, true) => accept(Ordering::Greater),
        (false, false) => actual.same_family(&c.value) && accept(actual.compare(&c.value)),
    };

    match c.op {
        FilterOp::Eq => actual.loose_eq(&c.value),
        FilterOp::Ne => !actual.loose_eq(&c.value),
        FilterOp::Lt => ordered(|o| o == Ordering::Less),
        FilterOp::Le => ordered(|o| o != Ordering::Greater),
        FilterOp::Gt => ordered(|o| o == Ordering::Greater),
        FilterOp::Ge => ordered(|o| o != Ordering::Less),
        FilterOp::Contains | FilterOp::NotContains | FilterOp::StartsWith | FilterOp::EndsWith => {
            let (Some(haystack), Some(needle)) = (text_of(actual), text_of(&c.value)) else {
                return c.op == FilterOp::NotContains;
            };
            match c.op {
                FilterOp::Contains => haystack.contains(&needle),
                FilterOp::NotContains => !haystack.contains(&needle),
                FilterOp::StartsWith => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            }
        }
    }
}

// Combinators

/// `[a, "and", b]`; when one side is absent the other is returned unchanged.
pub fn combine_filters(a: Option<Filter>, b: Option<Filter>) -> Option<Filter> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Filter::And(vec![a, b])),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Equality filter selecting the group identified by `path` at every level of `path`.
pub fn group_filter(path: &[Value], groups: &[GroupDescriptor]) -> Option<Filter> {
    let parts: Vec<Filter> = path
        .iter()
        .zip(groups)
        .map(|(key, group)| group.key_filter(key))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(Filter::and(parts))
    }
}

/// Build the "everything before this group" predicate for the group at `path`.
///
/// Level `i` contributes the equality conjunction of levels `j < i` and a strict "before" test
/// on level `i`; the levels are OR-ed together, so the predicate is the lexicographic order
/// over the key tuple. With `last_level_only` only the deepest level contributes, which
/// selects the preceding siblings inside the same parent. The result is AND-ed with `base`.
pub fn create_offset_filter(
    path: &[Value],
    groups: &[GroupDescriptor],
    base: Option<Filter>,
    last_level_only: bool,
) -> Option<Filter> {
    let depth = path.len().min(groups.len());
    if depth == 0 {
        return base;
    }

    let first = if last_level_only { depth - 1 } else { 0 };
    let mut levels = Vec::with_capacity(depth - first);
    for i in first..depth {
        let mut conj: Vec<Filter> = (0..i).map(|j| groups[j].key_filter(&path[j])).collect();
        conj.push(groups[i].before_filter(&path[i]));
        levels.push(Filter::and(conj));
    }

    combine_filters(Some(Filter::or(levels)), base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn group(selector: &str, desc: bool) -> GroupDescriptor {
        GroupDescriptor {
            desc,
            ..GroupDescriptor::new(selector)
        }
    }

    #[test]
    fn wire_format_shorthands() {
        let f = Filter::from_json(&json!(["id", 5])).unwrap();
        assert_eq!(f, Filter::eq("id", 5));

        let f = Filter::from_json(&json!([["a", ">", 1], ["b", "<", 2]])).unwrap();
        assert_eq!(
            f,
            Filter::And(vec![
                Filter::condition("a", FilterOp::Gt, 1),
                Filter::condition("b", FilterOp::Lt, 2),
            ])
        );

        let f = Filter::from_json(&json!(["!", ["a", "=", null]])).unwrap();
        assert_eq!(f, Filter::Not(Box::new(Filter::eq("a", Value::Null))));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let f = Filter::from_json(&json!([["a", 1], "or", ["b", 2], "and", ["c", 3]])).unwrap();
        assert_eq!(
            f,
            Filter::Or(vec![
                Filter::eq("a", 1),
                Filter::And(vec![Filter::eq("b", 2), Filter::eq("c", 3)]),
            ])
        );
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(Filter::from_json(&json!([])).is_err());
        assert!(Filter::from_json(&json!("a")).is_err());
        assert!(Filter::from_json(&json!([["a", 1], "and"])).is_err());
        assert!(Filter::from_json(&json!(["a", "between", 1])).is_err());
    }

    #[test]
    fn serializes_to_arrays() {
        let f = Filter::Or(vec![Filter::eq("a", 1), Filter::condition("b", FilterOp::Ne, true)]);
        assert_eq!(
            serde_json::to_value(&f).unwrap(),
            json!([["a", "=", 1], "or", ["b", "<>", true]])
        );
    }

    #[test]
    fn ordered_operators_put_nulls_first_and_skip_mixed_types() {
        let row = json!({"n": null, "s": "b", "i": 3});
        let row = Value::from_json(row);
        assert!(Filter::condition("n", FilterOp::Lt, 5).matches(&row));
        assert!(!Filter::condition("n", FilterOp::Gt, 5).matches(&row));
        assert!(Filter::condition("i", FilterOp::Gt, Value::Null).matches(&row));
        assert!(Filter::condition("n", FilterOp::Le, Value::Null).matches(&row));
        assert!(!Filter::condition("n", FilterOp::Lt, Value::Null).matches(&row));
        assert!(!Filter::condition("s", FilterOp::Lt, 5).matches(&row));
        assert!(Filter::condition("i", FilterOp::Ge, 3.0).matches(&row));
        assert!(Filter::eq("n", Value::Null).matches(&row));
        assert!(Filter::eq("missing", Value::Null).matches(&row));
    }

    #[test]
    fn string_operators_are_case_insensitive() {
        let row = Value::object([("name", "Alice Smith")]);
        assert!(Filter::condition("name", FilterOp::Contains, "smith").matches(&row));
        assert!(Filter::condition("name", FilterOp::StartsWith, "ALI").matches(&row));
        assert!(!Filter::condition("name", FilterOp::EndsWith, "ali").matches(&row));
        assert!(Filter::condition("name", FilterOp::NotContains, "bob").matches(&row));
    }

    #[test]
    fn combine_keeps_single_side_unchanged() {
        let a = Filter::eq("a", 1);
        assert_eq!(combine_filters(Some(a.clone()), None), Some(a.clone()));
        assert_eq!(combine_filters(None, Some(a.clone())), Some(a.clone()));
        assert_eq!(combine_filters(None, None), None);
    }

    #[test]
    fn offset_filter_orders_key_tuples() {
        let groups = vec![group("a", false), group("b", true)];
        let path = vec![Value::from(2), Value::from("m")];
        let filter = create_offset_filter(&path, &groups, None, false).unwrap();

        assert_eq!(
            filter.to_json(),
            json!([
                ["a", "<", 2],
                "or",
                [["a", "=", 2], "and", ["b", ">", "m"]]
            ])
        );

        let before =
            |a: i32, b: &str| Value::object([("a", Value::from(a)), ("b", Value::from(b))]);
        assert!(filter.matches(&Value::object([("a", Value::Null), ("b", Value::from("a"))])));
        assert!(filter.matches(&before(1, "z")));
        assert!(filter.matches(&before(2, "z")));
        assert!(!filter.matches(&before(2, "m")));
        assert!(!filter.matches(&before(2, "a")));
        assert!(!filter.matches(&before(3, "z")));
    }

    #[test]
    fn offset_filter_last_level_only_stays_inside_parent() {
        let groups = vec![group("a", false), group("b", false)];
        let path = vec![Value::from(2), Value::from("m")];
        let filter =
            create_offset_filter(&path, &groups, Some(Filter::eq("x", 1)), true).unwrap();

        assert_eq!(
            filter.to_json(),
            json!([
                [["a", "=", 2], "and", ["b", "<", "m"]],
                "and",
                ["x", "=", 1]
            ])
        );
    }

    #[test]
    fn offset_filter_for_boolean_and_null_keys() {
        let asc = [group("f", false)];
        let desc = [group("f", true)];
        let offset = |key: Value, groups: &[GroupDescriptor]| {
            create_offset_filter(&[key], groups, None, true).unwrap().to_json()
        };

        assert_eq!(offset(Value::Bool(false), &asc), json!(["f", "=", null]));
        assert_eq!(offset(Value::Bool(true), &asc), json!(["f", "<>", true]));
        assert_eq!(offset(Value::Bool(false), &desc), json!(["f", "=", true]));
        assert_eq!(offset(Value::Null, &desc), json!(["f", "<>", null]));
        assert_eq!(
            offset(Value::Null, &asc),
            json!([["f", "<>", null], "and", ["f", "=", null]])
        );
        assert_eq!(
            offset(Value::Bool(true), &desc),
            json!([["f", "<>", null], "and", ["f", "=", null]])
        );
    }

    #[test]
    fn offset_filter_nothing_precedes_matches_nothing() {
        let filter =
            create_offset_filter(&[Value::Null], &[group("f", false)], None, true).unwrap();
        for v in [Value::Null, Value::Bool(true), Value::from(1)] {
            assert!(!filter.matches(&Value::object([("f", v)])));
        }
    }
}
