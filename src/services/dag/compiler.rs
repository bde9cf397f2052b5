// DAG Compiler
//
// Turns scan / combine-group / post-op specifications into a validated,
// content-hashed ExecutionDAG.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::error::CompileError;
use super::hashing;
use crate::models::topology;
use crate::models::{
    duplicate_column, AggregateAttributes, CombineAttributes, CombineGroupSpec,
    CombinePlanSpec, ExecutionDAG, FilterAttributes, LimitAttributes, LogicalEdge, LogicalNode,
    NodeAttributes, NodeKind, PostOpSpec, PostOperation, ProjectAttributes, RelationSchema,
    ScanAttributes, ScanSpec, SortAttributes, DAG_VERSION,
};

const COMBINE_PREFIX: &str = "combine_";
const POST_PREFIX: &str = "post_";

pub fn combine_node_id(group_id: &str) -> String {
    format!("{}{}", COMBINE_PREFIX, group_id)
}

pub fn post_node_id(op_id: &str) -> String {
    format!("{}{}", POST_PREFIX, op_id)
}

/// DAG Compiler
///
/// Stateless apart from the IR version stamped into every plan.
#[derive(Debug, Clone)]
pub struct DagCompiler {
    version: u32,
}

impl DagCompiler {
    pub fn new() -> Self {
        Self {
            version: DAG_VERSION,
        }
    }

    /// Compile a full plan specification
    pub fn compile_plan(&self, plan: &CombinePlanSpec) -> Result<ExecutionDAG, CompileError> {
        self.compile(&plan.scans, &plan.combine_groups, &plan.post_ops)
    }

    /// Compile specifications into an ExecutionDAG
    ///
    /// # Arguments
    ///
    /// * `scans` - One entry per upstream sub-query result
    /// * `combine_groups` - How scan (or combine) outputs are merged
    /// * `post_ops` - Operations applied to a combine group's output
    ///
    /// # Returns
    ///
    /// The validated plan with canonical node/edge order, content hash and dag_id
    pub fn compile(
        &self,
        scans: &[ScanSpec],
        combine_groups: &[CombineGroupSpec],
        post_ops: &[PostOpSpec],
    ) -> Result<ExecutionDAG, CompileError> {
        let resolver = ReferenceResolver::new(scans, combine_groups, post_ops);

        let mut nodes: BTreeMap<String, LogicalNode> = BTreeMap::new();
        let mut edges: BTreeMap<String, LogicalEdge> = BTreeMap::new();

        for scan in scans {
            insert_node(
                &mut nodes,
                LogicalNode {
                    node_id: scan.id.clone(),
                    inputs: Vec::new(),
                    output_schema: scan.expected_schema.clone(),
                    attributes: NodeAttributes::Scan(ScanAttributes {
                        datasource_id: scan.datasource_id.clone(),
                    }),
                    metadata: BTreeMap::new(),
                },
            )?;
        }

        // Declared schemas; a combine node defaults to its first input's schema
        let mut schemas: HashMap<String, RelationSchema> = scans
            .iter()
            .map(|s| (s.id.clone(), s.expected_schema.clone()))
            .collect();
        for op in post_ops {
            schemas.insert(post_node_id(&op.op_id), op.expected_schema.clone());
        }

        // Resolve every group before deriving schemas, so a group may reference
        // one declared after it
        let mut resolved: Vec<(&CombineGroupSpec, String, Vec<String>, Vec<LogicalEdge>)> =
            Vec::with_capacity(combine_groups.len());
        let mut first_inputs: HashMap<String, String> = HashMap::new();
        for group in combine_groups {
            let node_id = combine_node_id(&group.group_id);
            if group.inputs.is_empty() {
                return Err(CompileError::EmptyCombineGroup {
                    group_id: group.group_id.clone(),
                });
            }

            let mut group_edges = Vec::with_capacity(group.inputs.len());
            for input in &group.inputs {
                let from_id = resolver.resolve_input(&input.ref_id).ok_or_else(|| {
                    CompileError::UnknownReference {
                        group_id: group.group_id.clone(),
                        ref_id: input.ref_id.clone(),
                    }
                })?;
                group_edges.push(LogicalEdge::new(&from_id, &node_id, input.role.clone()));
            }

            if group.operation.is_keyed() {
                check_role_ranks(&node_id, &group_edges)?;
            }

            // Inputs in execution order: role rank, then source id
            let mut ordered: Vec<&LogicalEdge> = group_edges.iter().collect();
            ordered.sort_by(|a, b| {
                (a.role_rank(), a.from_id.as_str()).cmp(&(b.role_rank(), b.from_id.as_str()))
            });
            let inputs: Vec<String> = ordered.iter().map(|e| e.from_id.clone()).collect();

            if let Some(first) = inputs.first() {
                first_inputs.insert(node_id.clone(), first.clone());
            }
            resolved.push((group, node_id, inputs, group_edges));
        }

        for (group, node_id, inputs, group_edges) in resolved {
            let output_schema = inherited_schema(&node_id, &schemas, &first_inputs);
            insert_node(
                &mut nodes,
                LogicalNode {
                    node_id,
                    inputs,
                    output_schema,
                    attributes: NodeAttributes::Combine(CombineAttributes {
                        operation: group.operation,
                        join_keys: group.join_keys.clone(),
                    }),
                    metadata: BTreeMap::new(),
                },
            )?;
            for edge in group_edges {
                insert_edge(&mut edges, edge)?;
            }
        }

        for op in post_ops {
            let target = resolver.resolve_group(&op.target_group_id).ok_or_else(|| {
                CompileError::UnknownCombineGroup {
                    op_id: op.op_id.clone(),
                    target_group_id: op.target_group_id.clone(),
                }
            })?;
            let node_id = post_node_id(&op.op_id);

            insert_node(
                &mut nodes,
                LogicalNode {
                    node_id: node_id.clone(),
                    inputs: vec![target.clone()],
                    output_schema: op.expected_schema.clone(),
                    attributes: post_attributes(op),
                    metadata: op.metadata.clone(),
                },
            )?;
            insert_edge(&mut edges, LogicalEdge::new(&target, &node_id, None))?;
        }

        let nodes: Vec<LogicalNode> = nodes.into_values().collect();
        let mut edges: Vec<LogicalEdge> = edges.into_values().collect();
        edges.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        validate(&nodes, &edges)?;

        let content_hash = hashing::plan_content_hash(&nodes, &edges, self.version)
            .map_err(|e| CompileError::Serialization(e.to_string()))?;
        let dag = ExecutionDAG::from_parts(nodes, edges, content_hash, self.version);

        tracing::info!(
            "Compiled plan {} ({} nodes, {} edges)",
            dag.dag_id(),
            dag.nodes().len(),
            dag.edges().len()
        );

        Ok(dag)
    }
}

impl Default for DagCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile with the default compiler
pub fn compile(
    scans: &[ScanSpec],
    combine_groups: &[CombineGroupSpec],
    post_ops: &[PostOpSpec],
) -> Result<ExecutionDAG, CompileError> {
    DagCompiler::new().compile(scans, combine_groups, post_ops)
}

/// Resolves specification ids to node ids
struct ReferenceResolver {
    node_ids: BTreeSet<String>,
    groups: HashMap<String, String>,
    ops: HashMap<String, String>,
}

impl ReferenceResolver {
    fn new(scans: &[ScanSpec], groups: &[CombineGroupSpec], post_ops: &[PostOpSpec]) -> Self {
        let groups: HashMap<String, String> = groups
            .iter()
            .map(|g| (g.group_id.clone(), combine_node_id(&g.group_id)))
            .collect();
        let ops: HashMap<String, String> = post_ops
            .iter()
            .map(|op| (op.op_id.clone(), post_node_id(&op.op_id)))
            .collect();
        let node_ids = scans
            .iter()
            .map(|s| s.id.clone())
            .chain(groups.values().cloned())
            .chain(ops.values().cloned())
            .collect();

        Self {
            node_ids,
            groups,
            ops,
        }
    }

    /// Exact node id first, then group id, then op id
    fn resolve_input(&self, ref_id: &str) -> Option<String> {
        if self.node_ids.contains(ref_id) {
            return Some(ref_id.to_string());
        }
        self.groups
            .get(ref_id)
            .or_else(|| self.ops.get(ref_id))
            .cloned()
    }

    fn resolve_group(&self, group_id: &str) -> Option<String> {
        if let Some(node_id) = self.groups.get(group_id) {
            return Some(node_id.clone());
        }
        // Already-prefixed combine node id
        self.groups
            .values()
            .find(|node_id| node_id.as_str() == group_id)
            .cloned()
    }
}

/// Follow first inputs from a combine node until a declared schema is found
///
/// A chain that loops back on itself yields an empty schema; the cycle check
/// rejects such plans afterwards.
fn inherited_schema(
    node_id: &str,
    schemas: &HashMap<String, RelationSchema>,
    first_inputs: &HashMap<String, String>,
) -> RelationSchema {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut current = node_id;
    loop {
        if let Some(schema) = schemas.get(current) {
            return schema.clone();
        }
        if !seen.insert(current) {
            return RelationSchema::default();
        }
        match first_inputs.get(current) {
            Some(next) => current = next.as_str(),
            None => return RelationSchema::default(),
        }
    }
}

fn post_attributes(op: &PostOpSpec) -> NodeAttributes {
    match op.operation {
        PostOperation::Filter => NodeAttributes::PostFilter(FilterAttributes {
            filters: op.filters.clone(),
        }),
        PostOperation::Aggregate => NodeAttributes::PostAggregate(AggregateAttributes {
            group_by: op.group_by.clone(),
            metrics: op.metrics.clone(),
        }),
        PostOperation::Project => NodeAttributes::PostProject(ProjectAttributes {
            columns: op.expected_schema.iter().map(|c| c.name.clone()).collect(),
        }),
        PostOperation::Sort => NodeAttributes::PostSort(SortAttributes {
            order_by: op.order_by.clone(),
        }),
        PostOperation::Limit => NodeAttributes::PostLimit(LimitAttributes { limit: op.limit }),
    }
}

fn insert_node(
    nodes: &mut BTreeMap<String, LogicalNode>,
    node: LogicalNode,
) -> Result<(), CompileError> {
    if nodes.contains_key(&node.node_id) {
        return Err(CompileError::DuplicateNode {
            node_id: node.node_id,
        });
    }
    nodes.insert(node.node_id.clone(), node);
    Ok(())
}

fn insert_edge(
    edges: &mut BTreeMap<String, LogicalEdge>,
    edge: LogicalEdge,
) -> Result<(), CompileError> {
    if edges.contains_key(&edge.edge_id) {
        return Err(CompileError::DuplicateEdge {
            edge_id: edge.edge_id,
        });
    }
    edges.insert(edge.edge_id.clone(), edge);
    Ok(())
}

/// At most one left-like and one right-like input on a keyed combine
fn check_role_ranks(node_id: &str, edges: &[LogicalEdge]) -> Result<(), CompileError> {
    for rank in [0u8, 1u8] {
        let ranked: Vec<&LogicalEdge> = edges.iter().filter(|e| e.role_rank() == rank).collect();
        if ranked.len() > 1 {
            return Err(CompileError::AmbiguousRoles {
                node_id: node_id.to_string(),
                role: ranked[1].role.clone().unwrap_or_default(),
            });
        }
    }
    Ok(())
}

/// Structural invariants: known endpoints, unique columns, post input shape, acyclicity
fn validate(nodes: &[LogicalNode], edges: &[LogicalEdge]) -> Result<(), CompileError> {
    let by_id: HashMap<&str, &LogicalNode> =
        nodes.iter().map(|n| (n.node_id.as_str(), n)).collect();

    for edge in edges {
        for endpoint in [&edge.from_id, &edge.to_id] {
            if !by_id.contains_key(endpoint.as_str()) {
                return Err(CompileError::DanglingEdge {
                    edge_id: edge.edge_id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    for node in nodes {
        if let Some(column) = duplicate_column(&node.output_schema) {
            return Err(CompileError::DuplicateColumn {
                node_id: node.node_id.clone(),
                column: column.to_string(),
            });
        }

        if node.kind().is_post() {
            let inbound: Vec<&LogicalEdge> =
                edges.iter().filter(|e| e.to_id == node.node_id).collect();
            let valid = inbound.len() == 1
                && by_id
                    .get(inbound[0].from_id.as_str())
                    .map(|src| src.kind() == NodeKind::Combine)
                    .unwrap_or(false);
            if !valid {
                return Err(CompileError::InvalidPostInput {
                    node_id: node.node_id.clone(),
                });
            }
        }
    }

    let layering = topology::layer_nodes(nodes, edges);
    if let Some(node_id) = layering.unplaced.first() {
        tracing::warn!("Rejecting plan: cycle through {}", node_id);
        return Err(CompileError::Cycle {
            node_id: node_id.clone(),
        });
    }

    Ok(())
}
