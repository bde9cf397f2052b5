// Execution Backends
//
// Operator contract shared by the row-oriented and the columnar backend, plus
// the value-level semantics both of them apply (predicates, metric
// accumulation).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::error::ExecError;
use crate::models::{
    Aggregation, FilterOperator, FilterSpec, FilterValue, JoinKey, MetricSpec, OrderSpec,
    Relation, SortDirection, Value,
};

pub mod columnar;
pub mod row;

pub use columnar::ColumnarBackend;
pub use row::RowBackend;

/// Available backend implementations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Row,
    Columnar,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Row => "row",
            BackendKind::Columnar => "columnar",
        }
    }

    /// Parse backend kind from string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "row" | "naive" => Ok(BackendKind::Row),
            "columnar" | "arrow" | "vectorized" => Ok(BackendKind::Columnar),
            _ => Err(format!("Unsupported execution backend: {}", s)),
        }
    }

    pub fn create(&self) -> Box<dyn ExecutionBackend> {
        match self {
            BackendKind::Row => Box::new(RowBackend::new()),
            BackendKind::Columnar => Box::new(ColumnarBackend::new()),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node being executed, for error reporting
#[derive(Debug, Clone, Copy)]
pub struct OpContext<'a> {
    pub node_id: &'a str,
    pub operation: &'a str,
}

impl<'a> OpContext<'a> {
    pub fn new(node_id: &'a str, operation: &'a str) -> Self {
        Self { node_id, operation }
    }

    pub fn mixed_types(&self, column: &str) -> ExecError {
        ExecError::MixedColumnTypes {
            node_id: self.node_id.to_string(),
            operation: self.operation.to_string(),
            column: column.to_string(),
        }
    }

    pub fn arrow_error(&self, message: impl fmt::Display) -> ExecError {
        ExecError::Arrow {
            node_id: self.node_id.to_string(),
            operation: self.operation.to_string(),
            message: message.to_string(),
        }
    }
}

/// Operator contract.
///
/// Arity, join-key presence and union schema compatibility are checked by the
/// interpreter before an operator is called.
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Concatenate inputs in order
    fn union(&self, ctx: OpContext<'_>, inputs: &[&Relation]) -> Result<Relation, ExecError>;

    /// Inner hash join, right side indexed
    fn join(
        &self,
        ctx: OpContext<'_>,
        left: &Relation,
        right: &Relation,
        keys: &[JoinKey],
    ) -> Result<Relation, ExecError>;

    /// Matched pairs differing in at least one non-key column
    fn compare(
        &self,
        ctx: OpContext<'_>,
        left: &Relation,
        right: &Relation,
        keys: &[JoinKey],
    ) -> Result<Relation, ExecError>;

    fn filter(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        filters: &[FilterSpec],
    ) -> Result<Relation, ExecError>;

    fn aggregate(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        group_by: &[String],
        metrics: &[MetricSpec],
    ) -> Result<Relation, ExecError>;

    fn project(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        columns: &[String],
    ) -> Result<Relation, ExecError>;

    fn sort(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        order_by: &[OrderSpec],
    ) -> Result<Relation, ExecError>;

    fn limit(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        limit: Option<usize>,
    ) -> Result<Relation, ExecError>;
}

pub(crate) static NULL: Value = Value::Null;

/// Evaluate one predicate against a cell value (absent cells are Null).
///
/// Unsupported operators and malformed operands reject the row.
pub fn predicate_matches(value: &Value, filter: &FilterSpec) -> bool {
    match (&filter.operator, &filter.value) {
        (FilterOperator::Eq, FilterValue::Scalar(operand)) => value.loose_eq(operand),
        (FilterOperator::Ne, FilterValue::Scalar(operand)) => !value.loose_eq(operand),
        (FilterOperator::Gt, FilterValue::Scalar(operand)) => {
            value.partial_order(operand) == Some(Ordering::Greater)
        }
        (FilterOperator::Gte, FilterValue::Scalar(operand)) => matches!(
            value.partial_order(operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        (FilterOperator::Lt, FilterValue::Scalar(operand)) => {
            value.partial_order(operand) == Some(Ordering::Less)
        }
        (FilterOperator::Lte, FilterValue::Scalar(operand)) => matches!(
            value.partial_order(operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        (FilterOperator::Between, FilterValue::List(bounds)) if bounds.len() == 2 => {
            matches!(
                value.partial_order(&bounds[0]),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                value.partial_order(&bounds[1]),
                Some(Ordering::Less | Ordering::Equal)
            )
        }
        (FilterOperator::In, FilterValue::List(options)) => {
            options.iter().any(|option| value.loose_eq(option))
        }
        (FilterOperator::Contains, FilterValue::Scalar(Value::String(needle))) => value
            .as_str()
            .map(|haystack| haystack.contains(needle.as_str()))
            .unwrap_or(false),
        _ => false,
    }
}

/// Comparator for one sort key, honoring direction
pub fn compare_for_sort(a: &Value, b: &Value, direction: SortDirection) -> Ordering {
    let ordering = a.total_cmp(b);
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// Running state of one metric over one group
#[derive(Debug, Clone)]
pub struct Accumulator {
    aggregation: Aggregation,
    rows: i64,
    numeric_count: usize,
    int_sum: Option<i64>,
    float_sum: f64,
    saw_float: bool,
    best: Option<Value>,
}

impl Accumulator {
    pub fn new(aggregation: Aggregation) -> Self {
        Self {
            aggregation,
            rows: 0,
            numeric_count: 0,
            int_sum: Some(0),
            float_sum: 0.0,
            saw_float: false,
            best: None,
        }
    }

    pub fn push(&mut self, value: &Value) {
        self.rows += 1;
        match self.aggregation {
            Aggregation::Count => {}
            Aggregation::Sum | Aggregation::Avg => match value {
                Value::Int(i) => {
                    self.numeric_count += 1;
                    self.int_sum = self.int_sum.and_then(|sum| sum.checked_add(*i));
                    self.float_sum += *i as f64;
                }
                Value::Float(f) => {
                    self.numeric_count += 1;
                    self.saw_float = true;
                    self.float_sum += f;
                }
                _ => {}
            },
            Aggregation::Min | Aggregation::Max => {
                if value.is_null() {
                    return;
                }
                let replace = match &self.best {
                    None => true,
                    Some(best) => {
                        let ordering = value.total_cmp(best);
                        if self.aggregation == Aggregation::Min {
                            ordering == Ordering::Less
                        } else {
                            ordering == Ordering::Greater
                        }
                    }
                };
                if replace {
                    self.best = Some(value.clone());
                }
            }
        }
    }

    pub fn finish(self) -> Value {
        match self.aggregation {
            Aggregation::Count => Value::Int(self.rows),
            Aggregation::Sum => {
                if self.numeric_count == 0 {
                    return Value::Int(0);
                }
                match self.int_sum {
                    Some(sum) if !self.saw_float => Value::Int(sum),
                    _ => Value::Float(self.float_sum),
                }
            }
            Aggregation::Avg => {
                if self.numeric_count == 0 {
                    Value::Float(0.0)
                } else {
                    Value::Float(self.float_sum / self.numeric_count as f64)
                }
            }
            Aggregation::Min | Aggregation::Max => self.best.unwrap_or(Value::Null),
        }
    }
}

/// Whether `column` is a join key on the given side
pub(crate) fn is_key_column(keys: &[JoinKey], column: &str, left_side: bool) -> bool {
    keys.iter().any(|k| {
        if left_side {
            k.left == column
        } else {
            k.right == column
        }
    })
}

/// Output name for a non-key right column of a join
///
/// Names already present in the output get `right_` prepended until free, so
/// `v` becomes `right_v`, or `right_right_v` when the left side also has `right_v`.
pub(crate) fn right_column_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = name.to_string();
    while taken(&candidate) {
        candidate = format!("right_{}", candidate);
    }
    candidate
}
