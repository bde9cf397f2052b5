// Combine Specification Model
//
// Declarative description of how sub-query results are recombined: which scans
// exist, how combine groups merge them, and which post-combine operations run
// on a combine group's output. Produced upstream by query decomposition and
// handed to the DAG compiler as already-validated input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::ir::{ColumnSpec, RelationSchema};
use super::relation::Value;

/// One upstream sub-query result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSpec {
    /// Node id of the scan, also the key of its data
    pub id: String,
    pub datasource_id: String,
    /// Columns the sub-query is expected to return
    #[serde(default)]
    pub expected_schema: RelationSchema,
}

impl ScanSpec {
    pub fn new(id: impl Into<String>, datasource_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            datasource_id: datasource_id.into(),
            expected_schema: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.expected_schema = columns.iter().map(|c| ColumnSpec::new(*c)).collect();
        self
    }
}

/// Combine operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CombineOperation {
    /// Single input passed through unchanged
    Standalone,
    Union,
    /// Inner hash join
    Join,
    /// Hash join keeping only pairs whose non-key columns differ
    Compare,
}

impl CombineOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombineOperation::Standalone => "standalone",
            CombineOperation::Union => "union",
            CombineOperation::Join => "join",
            CombineOperation::Compare => "compare",
        }
    }

    /// Whether inputs are paired left/right
    pub fn is_keyed(&self) -> bool {
        matches!(self, CombineOperation::Join | CombineOperation::Compare)
    }
}

impl fmt::Display for CombineOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality pair between a left and a right column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinKey {
    pub left: String,
    pub right: String,
}

impl JoinKey {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }
}

/// Reference from a combine group to one of its inputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombineInput {
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl CombineInput {
    pub fn new(ref_id: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            role: None,
        }
    }

    pub fn with_role(ref_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            role: Some(role.into()),
        }
    }
}

/// How several inputs merge into one relation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombineGroupSpec {
    pub group_id: String,
    pub operation: CombineOperation,
    /// Scans, other combine groups or post-ops, by id
    pub inputs: Vec<CombineInput>,
    /// Required for join and compare
    #[serde(default)]
    pub join_keys: Vec<JoinKey>,
}

/// Post-combine operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PostOperation {
    Filter,
    Aggregate,
    Project,
    Sort,
    Limit,
}

impl PostOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostOperation::Filter => "filter",
            PostOperation::Aggregate => "aggregate",
            PostOperation::Project => "project",
            PostOperation::Sort => "sort",
            PostOperation::Limit => "limit",
        }
    }
}

impl fmt::Display for PostOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator of a filter predicate.
///
/// Unrecognized operators are kept verbatim and reject every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    In,
    Contains,
    Unsupported(String),
}

impl From<String> for FilterOperator {
    fn from(op: String) -> Self {
        match op.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" => FilterOperator::Eq,
            "!=" | "<>" | "ne" => FilterOperator::Ne,
            ">" | "gt" => FilterOperator::Gt,
            ">=" | "gte" => FilterOperator::Gte,
            "<" | "lt" => FilterOperator::Lt,
            "<=" | "lte" => FilterOperator::Lte,
            "between" => FilterOperator::Between,
            "in" => FilterOperator::In,
            "contains" => FilterOperator::Contains,
            _ => FilterOperator::Unsupported(op),
        }
    }
}

impl From<FilterOperator> for String {
    fn from(op: FilterOperator) -> Self {
        match op {
            FilterOperator::Eq => "=".to_string(),
            FilterOperator::Ne => "!=".to_string(),
            FilterOperator::Gt => ">".to_string(),
            FilterOperator::Gte => ">=".to_string(),
            FilterOperator::Lt => "<".to_string(),
            FilterOperator::Lte => "<=".to_string(),
            FilterOperator::Between => "between".to_string(),
            FilterOperator::In => "in".to_string(),
            FilterOperator::Contains => "contains".to_string(),
            FilterOperator::Unsupported(op) => op,
        }
    }
}

/// Operand of a filter predicate: a scalar, or a list for `between` / `in`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    List(Vec<Value>),
    Scalar(Value),
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        FilterValue::Scalar(v)
    }
}

impl From<Vec<Value>> for FilterValue {
    fn from(v: Vec<Value>) -> Self {
        FilterValue::List(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub attribute: String,
    pub operator: FilterOperator,
    #[serde(default = "default_filter_value")]
    pub value: FilterValue,
}

fn default_filter_value() -> FilterValue {
    FilterValue::Scalar(Value::Null)
}

impl FilterSpec {
    pub fn new(attribute: impl Into<String>, operator: &str, value: impl Into<FilterValue>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: FilterOperator::from(operator.to_string()),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub aggregation: Aggregation,
    /// Column aggregated over; unused by `count`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_attribute: Option<String>,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, aggregation: Aggregation, source: Option<&str>) -> Self {
        Self {
            name: name.into(),
            aggregation,
            source_attribute: source.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSpec {
    pub attribute: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderSpec {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Operation applied to a combine group's output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostOpSpec {
    pub op_id: String,
    pub target_group_id: String,
    pub operation: PostOperation,
    /// Output columns; for project, the columns kept
    #[serde(default)]
    pub expected_schema: RelationSchema,
    /// Conjunction of predicates
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    /// Absent means no limit
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl PostOpSpec {
    pub fn new(
        op_id: impl Into<String>,
        target_group_id: impl Into<String>,
        operation: PostOperation,
    ) -> Self {
        Self {
            op_id: op_id.into(),
            target_group_id: target_group_id.into(),
            operation,
            expected_schema: Vec::new(),
            filters: Vec::new(),
            metrics: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.expected_schema = columns.iter().map(|c| ColumnSpec::new(*c)).collect();
        self
    }
}

/// Full input to the DAG compiler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CombinePlanSpec {
    pub scans: Vec<ScanSpec>,
    #[serde(default)]
    pub combine_groups: Vec<CombineGroupSpec>,
    #[serde(default)]
    pub post_ops: Vec<PostOpSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_operator_parsing() {
        assert_eq!(FilterOperator::from(">=".to_string()), FilterOperator::Gte);
        assert_eq!(FilterOperator::from("IN".to_string()), FilterOperator::In);
        assert_eq!(
            FilterOperator::from("like".to_string()),
            FilterOperator::Unsupported("like".to_string())
        );
    }

    #[test]
    fn test_post_op_defaults() {
        let op: PostOpSpec = serde_json::from_value(json!({
            "op_id": "agg",
            "target_group_id": "g1",
            "operation": "aggregate",
            "metrics": [{"name": "total", "aggregation": "sum", "source_attribute": "y"}]
        }))
        .unwrap();

        assert_eq!(op.operation, PostOperation::Aggregate);
        assert!(op.group_by.is_empty());
        assert!(op.limit.is_none());
        assert_eq!(op.metrics[0].aggregation, Aggregation::Sum);
    }

    #[test]
    fn test_filter_value_list_and_scalar() {
        let f: FilterSpec = serde_json::from_value(json!({
            "attribute": "x", "operator": "between", "value": [1, 5]
        }))
        .unwrap();
        assert_eq!(f.value, FilterValue::List(vec![Value::Int(1), Value::Int(5)]));

        let f: FilterSpec = serde_json::from_value(json!({
            "attribute": "x", "operator": "=", "value": "a"
        }))
        .unwrap();
        assert_eq!(f.value, FilterValue::Scalar(Value::String("a".to_string())));
    }

    #[test]
    fn test_unknown_combine_operation_rejected() {
        let group: Result<CombineGroupSpec, _> = serde_json::from_value(json!({
            "group_id": "g", "operation": "cross", "inputs": []
        }));
        assert!(group.is_err());
    }
}
