// Row Backend
//
// Straightforward row-at-a-time operator implementations. This is the
// reference semantics the columnar backend is checked against.

use std::collections::HashMap;

use super::{
    compare_for_sort, is_key_column, predicate_matches, right_column_name, Accumulator,
    BackendKind, ExecutionBackend, OpContext, NULL,
};
use crate::models::{FilterSpec, JoinKey, KeyValue, MetricSpec, OrderSpec, Relation, Row, Value};
use crate::services::dag::error::ExecError;

/// Row-oriented backend over `Relation` values
#[derive(Debug, Clone, Copy, Default)]
pub struct RowBackend;

impl RowBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Index the right side by its key tuple, preserving row order per key
fn index_by_keys<'r>(rows: &'r Relation, keys: &[JoinKey]) -> HashMap<Vec<KeyValue>, Vec<&'r Row>> {
    let mut index: HashMap<Vec<KeyValue>, Vec<&Row>> = HashMap::new();
    for row in rows {
        let key = keys
            .iter()
            .map(|k| row.get(&k.right).unwrap_or(&NULL).key())
            .collect();
        index.entry(key).or_default().push(row);
    }
    index
}

/// Matched (left, right) pairs in left order, then right order
fn matched_pairs<'r>(
    left: &'r Relation,
    right: &'r Relation,
    keys: &[JoinKey],
) -> Vec<(&'r Row, &'r Row)> {
    let index = index_by_keys(right, keys);
    let mut pairs = Vec::new();
    for l in left {
        let key: Vec<KeyValue> = keys
            .iter()
            .map(|k| l.get(&k.left).unwrap_or(&NULL).key())
            .collect();
        if let Some(matches) = index.get(&key) {
            pairs.extend(matches.iter().map(|r| (l, *r)));
        }
    }
    pairs
}

/// Non-key columns across both sides of a pair, left columns first
fn non_key_columns<'r>(l: &'r Row, r: &'r Row, keys: &[JoinKey]) -> Vec<&'r str> {
    let mut columns: Vec<&str> = l.columns().filter(|c| !is_key_column(keys, c, true)).collect();
    for column in r.columns() {
        if !is_key_column(keys, column, false) && !columns.contains(&column) {
            columns.push(column);
        }
    }
    columns
}

impl ExecutionBackend for RowBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Row
    }

    fn union(&self, _ctx: OpContext<'_>, inputs: &[&Relation]) -> Result<Relation, ExecError> {
        let total = inputs.iter().map(|rel| rel.len()).sum();
        let mut output = Vec::with_capacity(total);
        for rel in inputs {
            output.extend(rel.iter().cloned());
        }
        Ok(output)
    }

    fn join(
        &self,
        _ctx: OpContext<'_>,
        left: &Relation,
        right: &Relation,
        keys: &[JoinKey],
    ) -> Result<Relation, ExecError> {
        let output = matched_pairs(left, right, keys)
            .into_iter()
            .map(|(l, r)| {
                let mut row = Row::with_capacity(l.len() + r.len());
                for key in keys {
                    row.insert(key.left.as_str(), l.value(&key.left));
                }
                for (name, value) in l.iter() {
                    if !is_key_column(keys, name, true) {
                        row.insert(name, value.clone());
                    }
                }
                for (name, value) in r.iter() {
                    if is_key_column(keys, name, false) {
                        continue;
                    }
                    let column = right_column_name(name, |c| row.contains(c));
                    row.insert(column, value.clone());
                }
                row
            })
            .collect();
        Ok(output)
    }

    fn compare(
        &self,
        _ctx: OpContext<'_>,
        left: &Relation,
        right: &Relation,
        keys: &[JoinKey],
    ) -> Result<Relation, ExecError> {
        let mut output = Vec::new();
        for (l, r) in matched_pairs(left, right, keys) {
            let columns = non_key_columns(l, r, keys);
            let differs = columns.iter().any(|c| {
                !l.get(c).unwrap_or(&NULL).loose_eq(r.get(c).unwrap_or(&NULL))
            });
            if !differs {
                continue;
            }

            let mut row = Row::with_capacity(keys.len() + columns.len() * 2);
            for key in keys {
                row.insert(key.left.as_str(), l.value(&key.left));
            }
            for column in columns {
                row.insert(format!("left_{}", column), l.value(column));
                row.insert(format!("right_{}", column), r.value(column));
            }
            output.push(row);
        }
        Ok(output)
    }

    fn filter(
        &self,
        _ctx: OpContext<'_>,
        input: &Relation,
        filters: &[FilterSpec],
    ) -> Result<Relation, ExecError> {
        Ok(input
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .all(|f| predicate_matches(row.get(&f.attribute).unwrap_or(&NULL), f))
            })
            .cloned()
            .collect())
    }

    fn aggregate(
        &self,
        _ctx: OpContext<'_>,
        input: &Relation,
        group_by: &[String],
        metrics: &[MetricSpec],
    ) -> Result<Relation, ExecError> {
        // Groups in first-seen order
        let mut positions: HashMap<Vec<KeyValue>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();

        for row in input {
            let values: Vec<&Value> = group_by
                .iter()
                .map(|c| row.get(c).unwrap_or(&NULL))
                .collect();
            let key: Vec<KeyValue> = values.iter().map(|v| v.key()).collect();
            let slot = *positions.entry(key).or_insert_with(|| {
                groups.push((
                    values.iter().map(|v| (*v).clone()).collect(),
                    metrics.iter().map(|m| Accumulator::new(m.aggregation)).collect(),
                ));
                groups.len() - 1
            });

            for (metric, acc) in metrics.iter().zip(groups[slot].1.iter_mut()) {
                match &metric.source_attribute {
                    Some(source) => acc.push(row.get(source).unwrap_or(&NULL)),
                    None => acc.push(&NULL),
                }
            }
        }

        Ok(groups
            .into_iter()
            .map(|(values, accumulators)| {
                let mut row = Row::with_capacity(group_by.len() + metrics.len());
                for (column, value) in group_by.iter().zip(values) {
                    row.insert(column.as_str(), value);
                }
                for (metric, acc) in metrics.iter().zip(accumulators) {
                    row.insert(metric.name.as_str(), acc.finish());
                }
                row
            })
            .collect())
    }

    fn project(
        &self,
        _ctx: OpContext<'_>,
        input: &Relation,
        columns: &[String],
    ) -> Result<Relation, ExecError> {
        if columns.is_empty() {
            return Ok(input.clone());
        }
        Ok(input
            .iter()
            .map(|row| columns.iter().map(|c| (c.as_str(), row.value(c))).collect())
            .collect())
    }

    fn sort(
        &self,
        _ctx: OpContext<'_>,
        input: &Relation,
        order_by: &[OrderSpec],
    ) -> Result<Relation, ExecError> {
        let mut output = input.clone();
        // Stable sort per key, least significant key first
        for spec in order_by.iter().rev() {
            output.sort_by(|a, b| {
                compare_for_sort(
                    a.get(&spec.attribute).unwrap_or(&NULL),
                    b.get(&spec.attribute).unwrap_or(&NULL),
                    spec.direction,
                )
            });
        }
        Ok(output)
    }

    fn limit(
        &self,
        _ctx: OpContext<'_>,
        input: &Relation,
        limit: Option<usize>,
    ) -> Result<Relation, ExecError> {
        Ok(match limit {
            Some(n) => input.iter().take(n).cloned().collect(),
            None => input.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Aggregation, FilterValue};
    use crate::row;

    fn ctx() -> OpContext<'static> {
        OpContext::new("node", "test")
    }

    fn people() -> Relation {
        vec![
            row!("id" => 1i64, "name" => "ann", "dept" => "eng", "salary" => 100i64),
            row!("id" => 2i64, "name" => "bob", "dept" => "ops", "salary" => 80i64),
            row!("id" => 3i64, "name" => "cy", "dept" => "eng", "salary" => 120i64),
        ]
    }

    #[test]
    fn test_join_renames_colliding_columns() {
        let left = vec![row!("id" => 1i64, "x" => 10i64)];
        let right = vec![row!("rid" => 1i64, "x" => 99i64, "y" => 5i64)];
        let keys = vec![JoinKey::new("id", "rid")];

        let out = RowBackend.join(ctx(), &left, &right, &keys).unwrap();
        assert_eq!(out.len(), 1);
        let cols: Vec<&str> = out[0].columns().collect();
        assert_eq!(cols, vec!["id", "x", "right_x", "y"]);
        assert_eq!(out[0].value("right_x"), Value::Int(99));
    }

    #[test]
    fn test_join_rename_never_overwrites_left_columns() {
        let left = vec![row!("id" => 1i64, "v" => 1i64, "right_v" => 2i64)];
        let right = vec![row!("id" => 1i64, "v" => 3i64)];
        let keys = vec![JoinKey::new("id", "id")];

        let out = RowBackend.join(ctx(), &left, &right, &keys).unwrap();
        let cols: Vec<&str> = out[0].columns().collect();
        assert_eq!(cols, vec!["id", "v", "right_v", "right_right_v"]);
        assert_eq!(out[0].value("right_v"), Value::Int(2));
        assert_eq!(out[0].value("right_right_v"), Value::Int(3));
    }

    #[test]
    fn test_join_multiplies_duplicate_keys() {
        let left = vec![row!("k" => 1i64, "a" => "l1"), row!("k" => 1i64, "a" => "l2")];
        let right = vec![row!("k" => 1i64, "b" => "r1"), row!("k" => 1.0, "b" => "r2")];
        let keys = vec![JoinKey::new("k", "k")];

        let out = RowBackend.join(ctx(), &left, &right, &keys).unwrap();
        let pairs: Vec<(String, String)> = out
            .iter()
            .map(|r| (r.value("a").to_string(), r.value("b").to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("l1".into(), "r1".into()),
                ("l1".into(), "r2".into()),
                ("l2".into(), "r1".into()),
                ("l2".into(), "r2".into()),
            ]
        );
    }

    #[test]
    fn test_compare_keeps_only_differing_pairs() {
        let left = vec![row!("id" => 1i64, "v" => 10i64), row!("id" => 2i64, "v" => 20i64)];
        let right = vec![row!("id" => 1i64, "v" => 10.0), row!("id" => 2i64, "v" => 21i64)];
        let keys = vec![JoinKey::new("id", "id")];

        let out = RowBackend.compare(ctx(), &left, &right, &keys).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value("id"), Value::Int(2));
        assert_eq!(out[0].value("left_v"), Value::Int(20));
        assert_eq!(out[0].value("right_v"), Value::Int(21));
    }

    #[test]
    fn test_compare_treats_missing_column_as_null() {
        let left = vec![row!("id" => 1i64, "only_left" => 1i64)];
        let right = vec![row!("id" => 1i64)];
        let keys = vec![JoinKey::new("id", "id")];

        let out = RowBackend.compare(ctx(), &left, &right, &keys).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value("right_only_left"), Value::Null);
    }

    #[test]
    fn test_filter_conjunction() {
        let filters = vec![
            FilterSpec::new("dept", "=", Value::from("eng")),
            FilterSpec::new("salary", ">", Value::Int(100)),
        ];
        let out = RowBackend.filter(ctx(), &people(), &filters).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value("name"), Value::from("cy"));
    }

    #[test]
    fn test_filter_unknown_operator_rejects_everything() {
        let filters = vec![FilterSpec::new("dept", "like", FilterValue::Scalar(Value::from("e%")))];
        assert!(RowBackend.filter(ctx(), &people(), &filters).unwrap().is_empty());
    }

    #[test]
    fn test_aggregate_groups_in_first_seen_order() {
        let metrics = vec![
            MetricSpec::new("headcount", Aggregation::Count, None),
            MetricSpec::new("total", Aggregation::Sum, Some("salary")),
            MetricSpec::new("avg", Aggregation::Avg, Some("salary")),
        ];
        let out = RowBackend
            .aggregate(ctx(), &people(), &["dept".to_string()], &metrics)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value("dept"), Value::from("eng"));
        assert_eq!(out[0].value("headcount"), Value::Int(2));
        assert_eq!(out[0].value("total"), Value::Int(220));
        assert_eq!(out[0].value("avg"), Value::Float(110.0));
        assert_eq!(out[1].value("dept"), Value::from("ops"));
    }

    #[test]
    fn test_aggregate_without_group_by_and_empty_input() {
        let metrics = vec![MetricSpec::new("n", Aggregation::Count, None)];
        let out = RowBackend.aggregate(ctx(), &people(), &[], &metrics).unwrap();
        assert_eq!(out, vec![row!("n" => 3i64)]);

        let out = RowBackend.aggregate(ctx(), &Vec::new(), &[], &metrics).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_aggregate_null_and_missing_group_keys() {
        let rel = vec![
            row!("x" => Value::Null, "v" => 1i64),
            row!("x" => "q", "v" => 2i64),
            row!("v" => 3i64),
        ];
        let metrics = vec![MetricSpec::new("n", Aggregation::Count, None)];
        let out = RowBackend
            .aggregate(ctx(), &rel, &["x".to_string()], &metrics)
            .unwrap();

        // Null and missing fall into the same group, first seen first
        assert_eq!(
            out,
            vec![
                row!("x" => Value::Null, "n" => 2i64),
                row!("x" => "q", "n" => 1i64),
            ]
        );
    }

    #[test]
    fn test_project_fills_missing_with_null() {
        let columns = vec!["name".to_string(), "missing".to_string()];
        let out = RowBackend.project(ctx(), &people(), &columns).unwrap();
        let cols: Vec<&str> = out[0].columns().collect();
        assert_eq!(cols, vec!["name", "missing"]);
        assert_eq!(out[0].value("missing"), Value::Null);

        let unchanged = RowBackend.project(ctx(), &people(), &[]).unwrap();
        assert_eq!(unchanged, people());
    }

    #[test]
    fn test_sort_multi_key_is_stable() {
        let order = vec![OrderSpec::asc("dept"), OrderSpec::desc("salary")];
        let out = RowBackend.sort(ctx(), &people(), &order).unwrap();
        let names: Vec<String> = out.iter().map(|r| r.value("name").to_string()).collect();
        assert_eq!(names, vec!["cy", "ann", "bob"]);
    }

    #[test]
    fn test_sort_places_nulls_first_ascending() {
        let rel = vec![row!("v" => 2i64), row!("other" => 1i64), row!("v" => 1i64)];
        let out = RowBackend.sort(ctx(), &rel, &[OrderSpec::asc("v")]).unwrap();
        assert_eq!(out[0].value("v"), Value::Null);
        assert_eq!(out[1].value("v"), Value::Int(1));
    }

    #[test]
    fn test_limit() {
        assert_eq!(RowBackend.limit(ctx(), &people(), Some(2)).unwrap().len(), 2);
        assert_eq!(RowBackend.limit(ctx(), &people(), Some(10)).unwrap().len(), 3);
        assert_eq!(RowBackend.limit(ctx(), &people(), None).unwrap().len(), 3);
        assert!(RowBackend.limit(ctx(), &people(), Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_union_concatenates_in_order() {
        let a = vec![row!("x" => 1i64)];
        let b = vec![row!("x" => 2i64), row!("x" => 3i64)];
        let out = RowBackend.union(ctx(), &[&a, &b]).unwrap();
        let xs: Vec<Value> = out.iter().map(|r| r.value("x")).collect();
        assert_eq!(xs, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }
}
