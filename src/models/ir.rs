// Execution IR
//
// Node/edge/schema data model shared by the DAG compiler and interpreter.
// An ExecutionDAG is built once by the compiler and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::combine_spec::{
    CombineOperation, FilterSpec, JoinKey, MetricSpec, OrderSpec,
};
use super::topology;

/// Current IR version, part of the content hash
pub const DAG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: None,
        }
    }

    pub fn typed(name: impl Into<String>, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: Some(dtype.into()),
        }
    }
}

/// Ordered column list; names are unique within one schema
pub type RelationSchema = Vec<ColumnSpec>;

/// First column name appearing twice in a schema, if any
pub fn duplicate_column(schema: &RelationSchema) -> Option<&str> {
    let mut seen = BTreeSet::new();
    schema
        .iter()
        .find(|col| !seen.insert(col.name.as_str()))
        .map(|col| col.name.as_str())
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Scan,
    Combine,
    PostFilter,
    PostAggregate,
    PostProject,
    PostSort,
    PostLimit,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Scan => "scan",
            NodeKind::Combine => "combine",
            NodeKind::PostFilter => "post_filter",
            NodeKind::PostAggregate => "post_aggregate",
            NodeKind::PostProject => "post_project",
            NodeKind::PostSort => "post_sort",
            NodeKind::PostLimit => "post_limit",
        }
    }

    pub fn is_post(&self) -> bool {
        !matches!(self, NodeKind::Scan | NodeKind::Combine)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScanAttributes {
    pub datasource_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CombineAttributes {
    pub operation: CombineOperation,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub join_keys: Vec<JoinKey>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FilterAttributes {
    pub filters: Vec<FilterSpec>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggregateAttributes {
    pub group_by: Vec<String>,
    pub metrics: Vec<MetricSpec>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectAttributes {
    /// Target column order; empty keeps the input as is
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SortAttributes {
    pub order_by: Vec<OrderSpec>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LimitAttributes {
    pub limit: Option<usize>,
}

/// Operator payload, one variant per node kind
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", content = "attributes", rename_all = "snake_case")]
pub enum NodeAttributes {
    Scan(ScanAttributes),
    Combine(CombineAttributes),
    PostFilter(FilterAttributes),
    PostAggregate(AggregateAttributes),
    PostProject(ProjectAttributes),
    PostSort(SortAttributes),
    PostLimit(LimitAttributes),
}

impl NodeAttributes {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeAttributes::Scan(_) => NodeKind::Scan,
            NodeAttributes::Combine(_) => NodeKind::Combine,
            NodeAttributes::PostFilter(_) => NodeKind::PostFilter,
            NodeAttributes::PostAggregate(_) => NodeKind::PostAggregate,
            NodeAttributes::PostProject(_) => NodeKind::PostProject,
            NodeAttributes::PostSort(_) => NodeKind::PostSort,
            NodeAttributes::PostLimit(_) => NodeKind::PostLimit,
        }
    }

    /// Operation label used in logs and errors
    pub fn operation(&self) -> &'static str {
        match self {
            NodeAttributes::Scan(_) => "scan",
            NodeAttributes::Combine(attrs) => attrs.operation.as_str(),
            NodeAttributes::PostFilter(_) => "filter",
            NodeAttributes::PostAggregate(_) => "aggregate",
            NodeAttributes::PostProject(_) => "project",
            NodeAttributes::PostSort(_) => "sort",
            NodeAttributes::PostLimit(_) => "limit",
        }
    }
}

/// One operation in the plan
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogicalNode {
    /// Scan id, `combine_<group_id>` or `post_<op_id>`
    pub node_id: String,
    /// Upstream node ids in execution order
    pub inputs: Vec<String>,
    /// Declared schema; combine nodes inherit their first input's
    pub output_schema: RelationSchema,
    /// Operation kind plus its parameters
    #[serde(flatten)]
    pub attributes: NodeAttributes,
    /// Opaque annotations carried through from post-op specs
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl LogicalNode {
    pub fn kind(&self) -> NodeKind {
        self.attributes.kind()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogicalEdge {
    /// `from->to`, suffixed with `:role` when a role is set
    pub edge_id: String,
    pub from_id: String,
    pub to_id: String,
    /// Combine input role (left, right, base, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl LogicalEdge {
    pub fn new(from_id: &str, to_id: &str, role: Option<String>) -> Self {
        let edge_id = match &role {
            Some(role) => format!("{}->{}:{}", from_id, to_id, role),
            None => format!("{}->{}", from_id, to_id),
        };
        Self {
            edge_id,
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            role,
        }
    }

    pub fn role_rank(&self) -> u8 {
        role_rank(self.role.as_deref())
    }

    /// Canonical sort key (from_id, to_id, role)
    pub fn sort_key(&self) -> (&str, &str, &str) {
        (
            self.from_id.as_str(),
            self.to_id.as_str(),
            self.role.as_deref().unwrap_or(""),
        )
    }
}

/// Ordering rank of a combine input role: left/base/primary first,
/// right/compare/secondary second, anything else last.
pub fn role_rank(role: Option<&str>) -> u8 {
    match role.map(str::to_ascii_lowercase).as_deref() {
        Some("left") | Some("base") | Some("primary") => 0,
        Some("right") | Some("compare") | Some("secondary") => 1,
        _ => 2,
    }
}

/// Compiled, content-addressed execution plan
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionDAG {
    /// Sorted by node id
    nodes: Vec<LogicalNode>,
    /// Sorted by (from_id, to_id, role)
    edges: Vec<LogicalEdge>,
    /// Hex SHA-256 of the canonical nodes, edges and version
    content_hash: String,
    /// `dag_` plus the first 12 hash characters
    dag_id: String,
    version: u32,
}

impl ExecutionDAG {
    /// Assemble a DAG from canonically sorted parts. Only the compiler calls this.
    pub(crate) fn from_parts(
        nodes: Vec<LogicalNode>,
        edges: Vec<LogicalEdge>,
        content_hash: String,
        version: u32,
    ) -> Self {
        let dag_id = format!("dag_{}", &content_hash[..12.min(content_hash.len())]);
        Self {
            nodes,
            edges,
            content_hash,
            dag_id,
            version,
        }
    }

    pub fn nodes(&self) -> &[LogicalNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[LogicalEdge] {
        &self.edges
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn node(&self, node_id: &str) -> Option<&LogicalNode> {
        self.nodes
            .binary_search_by(|n| n.node_id.as_str().cmp(node_id))
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn inbound_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a LogicalEdge> {
        self.edges.iter().filter(move |e| e.to_id == node_id)
    }

    pub fn scan_node_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::Scan)
            .map(|n| n.node_id.as_str())
            .collect()
    }

    /// Nodes with no outgoing edge, in node_id order
    pub fn terminal_node_ids(&self) -> Vec<&str> {
        let sources: BTreeSet<&str> = self.edges.iter().map(|e| e.from_id.as_str()).collect();
        self.nodes
            .iter()
            .map(|n| n.node_id.as_str())
            .filter(|id| !sources.contains(id))
            .collect()
    }

    /// Topological layers; layer 0 holds the nodes without inbound edges
    pub fn layers(&self) -> Vec<Vec<String>> {
        // Acyclicity was checked at construction, so every node is placed
        topology::layer_nodes(&self.nodes, &self.edges).layers
    }

    pub fn summary(&self) -> DagSummary {
        DagSummary {
            dag_id: self.dag_id.clone(),
            content_hash: self.content_hash.clone(),
            version: self.version,
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            layer_count: self.layers().len(),
            scan_count: self.scan_node_ids().len(),
            terminal_count: self.terminal_node_ids().len(),
        }
    }
}

/// Plan summary for observability collaborators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DagSummary {
    pub dag_id: String,
    pub content_hash: String,
    pub version: u32,
    pub node_count: usize,
    pub edge_count: usize,
    pub layer_count: usize,
    pub scan_count: usize,
    pub terminal_count: usize,
}
