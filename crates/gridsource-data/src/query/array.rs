//! In-memory query evaluation.
//!
//! Runs the full pipeline over a slice of rows: filter, sort, group, summaries, counts and
//! paging. `ArrayStore` answers every request with it, and the query runner uses it for the
//! stages a store leaves to the client.

use std::cmp::Ordering;

use gridsource_common::Value;
use tracing::trace;

use super::options::{GroupDescriptor, LoadOptions, SummaryDescriptor, SummaryType};
use crate::item::{GroupItem, Item};
use crate::store::{LoadExtra, LoadResult};

/// Evaluate `options` over `rows`.
pub fn execute(rows: &[Value], options: &LoadOptions) -> LoadResult {
    let filter = options.effective_filter();
    let mut selected: Vec<&Value> = match &filter {
        Some(f) => rows.iter().filter(|row| f.matches(row)).collect(),
        None => rows.iter().collect(),
    };

    sort_rows(&mut selected, options);

    let mut extra = LoadExtra::default();
    if options.require_total_count {
        extra.total_count = Some(selected.len());
    }
    if !options.total_summary.is_empty() {
        extra.summary = Some(summarize(&options.total_summary, &selected));
    }

    let data = if options.is_grouped() {
        let groups = group_rows(&selected, &options.group, &options.group_summary);
        if options.require_group_count {
            extra.group_count = Some(groups.len());
        }
        page(groups, options.skip, options.take)
    } else {
        let rows = selected.into_iter().cloned().map(Item::Row).collect();
        page(rows, options.skip, options.take)
    };

    trace!(items = data.len(), "Evaluated query in memory");
    LoadResult { data, extra }
}

/// Sort by group keys first, then by the sort descriptors. Stable.
pub fn sort_rows(rows: &mut [&Value], options: &LoadOptions) {
    if options.group.is_empty() && options.sort.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for group in &options.group {
            let ord = directed(group.key_of(a).compare(&group.key_of(b)), group.desc);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        for sort in &options.sort {
            let ord = directed(
                sort.selector.select(a).compare(sort.selector.select(b)),
                sort.desc,
            );
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn directed(ord: Ordering, desc: bool) -> Ordering {
    if desc { ord.reverse() } else { ord }
}

/// Group rows that are already sorted by the group keys.
///
/// Each group carries its leaf `count`. A level with `is_expanded == false` leaves `items`
/// unset, so nothing below it is materialized.
pub fn group_rows(
    rows: &[&Value],
    levels: &[GroupDescriptor],
    summaries: &[SummaryDescriptor],
) -> Vec<Item> {
    let Some((level, rest)) = levels.split_first() else {
        return rows.iter().map(|row| Item::Row((*row).clone())).collect();
    };

    let mut groups = Vec::new();
    let mut start = 0;
    while start < rows.len() {
        let key = level.key_of(rows[start]);
        let mut end = start + 1;
        while end < rows.len() && level.key_of(rows[end]).loose_eq(&key) {
            end += 1;
        }

        let members = &rows[start..end];
        groups.push(Item::Group(GroupItem {
            key,
            items: level
                .is_expanded
                .then(|| group_rows(members, rest, summaries)),
            count: Some(members.len()),
            aggregates: (!summaries.is_empty()).then(|| summarize(summaries, members)),
            ..Default::default()
        }));
        start = end;
    }
    groups
}

fn page(items: Vec<Item>, skip: Option<usize>, take: Option<usize>) -> Vec<Item> {
    let skip = skip.unwrap_or(0);
    let iter = items.into_iter().skip(skip);
    match take {
        Some(take) => iter.take(take).collect(),
        None => iter.collect(),
    }
}

// Summaries

/// Evaluate summary descriptors over a set of rows.
pub fn summarize(descriptors: &[SummaryDescriptor], rows: &[&Value]) -> Vec<Value> {
    descriptors
        .iter()
        .map(|d| aggregate(d, rows))
        .collect()
}

fn aggregate(descriptor: &SummaryDescriptor, rows: &[&Value]) -> Value {
    let values = || {
        rows.iter().map(|row| match &descriptor.selector {
            Some(sel) => sel.select(row),
            None => *row,
        })
    };

    match descriptor.summary_type {
        SummaryType::Count => Value::from(rows.len()),
        SummaryType::Sum => sum(values()).unwrap_or(Value::Int32(0)),
        SummaryType::Avg => {
            let numbers: Vec<f64> = values().filter_map(Value::as_number).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float64(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        SummaryType::Min => values()
            .filter(|v| !v.is_null())
            .min_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or(Value::Null),
        SummaryType::Max => values()
            .filter(|v| !v.is_null())
            .max_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

// Integer sums stay integers until a float shows up or they overflow.
fn sum<'a>(values: impl Iterator<Item = &'a Value>) -> Option<Value> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    let mut seen = false;

    for value in values {
        let Some(n) = value.as_number() else { continue };
        seen = true;
        float_total += n;
        int_total = match (int_total, value.as_integer()) {
            (Some(total), Some(i)) => total.checked_add(i),
            _ => None,
        };
    }

    if !seen {
        return None;
    }
    Some(match int_total {
        Some(total) => Value::from(total),
        None => Value::Float64(float_total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, FilterOp, SortDescriptor};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn people() -> Vec<Value> {
        [
            json!({"name": "Ann", "team": "b", "age": 31}),
            json!({"name": "Bob", "team": "a", "age": 25}),
            json!({"name": "Cid", "team": "b", "age": 44}),
            json!({"name": "Dee", "team": null, "age": 19}),
            json!({"name": "Eve", "team": "a", "age": 52}),
        ]
        .into_iter()
        .map(Value::from_json)
        .collect()
    }

    fn names(items: &[Item]) -> Vec<String> {
        items
            .iter()
            .filter_map(|i| i.as_row())
            .map(|r| r.get_path("name").and_then(Value::as_str).unwrap_or("").to_string())
            .collect()
    }

    #[test]
    fn filter_sort_and_page() {
        let options = LoadOptions {
            filter: Some(Filter::condition("age", FilterOp::Gt, 20)),
            sort: vec![SortDescriptor::new("age", true)],
            skip: Some(1),
            take: Some(2),
            require_total_count: true,
            ..Default::default()
        };
        let result = execute(&people(), &options);
        assert_eq!(names(&result.data), vec!["Cid", "Ann"]);
        assert_eq!(result.extra.total_count, Some(4));
    }

    #[test]
    fn groups_sort_nulls_first_and_carry_counts() {
        let options = LoadOptions {
            group: vec![GroupDescriptor::new("team")],
            require_group_count: true,
            group_summary: vec![SummaryDescriptor::new("age", SummaryType::Max)],
            ..Default::default()
        };
        let result = execute(&people(), &options);
        let keys: Vec<_> = result
            .data
            .iter()
            .map(|i| i.as_group().unwrap().key.clone())
            .collect();
        assert_eq!(keys, vec![Value::Null, Value::from("a"), Value::from("b")]);
        assert_eq!(result.extra.group_count, Some(3));

        let a = result.data[1].as_group().unwrap();
        assert_eq!(a.count, Some(2));
        assert_eq!(a.items, None);
        assert_eq!(a.aggregates, Some(vec![Value::from(52)]));
    }

    #[test]
    fn expanded_levels_nest_rows_and_page_top_level_groups() {
        let options = LoadOptions {
            group: vec![GroupDescriptor::new("team").expanded(true)],
            sort: vec![SortDescriptor::new("name", false)],
            skip: Some(1),
            take: Some(1),
            ..Default::default()
        };
        let result = execute(&people(), &options);
        assert_eq!(result.data.len(), 1);
        let group = result.data[0].as_group().unwrap();
        assert_eq!(group.key, Value::from("a"));
        assert_eq!(names(group.children()), vec!["Bob", "Eve"]);
    }

    #[test]
    fn summaries() {
        let rows = people();
        let refs: Vec<&Value> = rows.iter().collect();
        let result = summarize(
            &[
                SummaryDescriptor::count(),
                SummaryDescriptor::new("age", SummaryType::Sum),
                SummaryDescriptor::new("age", SummaryType::Min),
                SummaryDescriptor::new("age", SummaryType::Avg),
                SummaryDescriptor::new("team", SummaryType::Max),
            ],
            &refs,
        );
        assert_eq!(
            result,
            vec![
                Value::from(5),
                Value::from(171),
                Value::from(19),
                Value::Float64(34.2),
                Value::from("b"),
            ]
        );
        assert_eq!(
            summarize(&[SummaryDescriptor::new("age", SummaryType::Avg)], &[]),
            vec![Value::Null]
        );
    }
}
