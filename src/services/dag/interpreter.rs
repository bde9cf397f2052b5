// DAG Interpreter
//
// Executes a compiled ExecutionDAG against supplied scan relations. Nodes run
// layer by layer (node_id order within a layer); every operator is delegated to
// an ExecutionBackend. The outputs of terminal nodes are the result.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::backend::{ExecutionBackend, OpContext, RowBackend};
use super::error::ExecError;
use crate::models::{
    role_rank, CombineAttributes, CombineOperation, ExecutionDAG, LogicalNode, NodeAttributes,
    Relation,
};

/// Shared cancellation signal, checked between nodes
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Interpreter bound to one execution backend
pub struct DagInterpreter<'b> {
    backend: &'b dyn ExecutionBackend,
}

impl<'b> DagInterpreter<'b> {
    pub fn new(backend: &'b dyn ExecutionBackend) -> Self {
        Self { backend }
    }

    /// Execute the DAG to completion
    ///
    /// # Arguments
    ///
    /// * `dag` - Compiled plan
    /// * `scan_results` - Relation per scan node id
    ///
    /// # Returns
    ///
    /// Terminal node id to output relation
    pub fn execute(
        &self,
        dag: &ExecutionDAG,
        scan_results: HashMap<String, Relation>,
    ) -> Result<BTreeMap<String, Relation>, ExecError> {
        self.execute_cancellable(dag, scan_results, &CancellationFlag::default())
    }

    /// Execute the DAG, stopping at the next node boundary once `cancel` is set
    pub fn execute_cancellable(
        &self,
        dag: &ExecutionDAG,
        mut scan_results: HashMap<String, Relation>,
        cancel: &CancellationFlag,
    ) -> Result<BTreeMap<String, Relation>, ExecError> {
        let start = Instant::now();

        let scan_ids: BTreeSet<&str> = dag.scan_node_ids().into_iter().collect();
        for scan_id in &scan_ids {
            if !scan_results.contains_key(*scan_id) {
                return Err(ExecError::MissingScanData {
                    node_id: scan_id.to_string(),
                });
            }
        }
        let mut extra: Vec<&String> = scan_results
            .keys()
            .filter(|id| !scan_ids.contains(id.as_str()))
            .collect();
        if !extra.is_empty() {
            extra.sort();
            tracing::warn!(
                "Ignoring scan results for unknown scan nodes in {}: {:?}",
                dag.dag_id(),
                extra
            );
        }

        let mut computed: HashMap<String, Relation> = HashMap::with_capacity(dag.nodes().len());
        for layer in dag.layers() {
            for node_id in layer {
                if cancel.is_cancelled() {
                    tracing::warn!("Execution of {} cancelled before node {}", dag.dag_id(), node_id);
                    return Err(ExecError::Cancelled { node_id });
                }

                let Some(node) = dag.node(&node_id) else {
                    continue;
                };
                let output = match &node.attributes {
                    NodeAttributes::Scan(_) => scan_results.remove(&node_id).ok_or_else(|| {
                        ExecError::MissingScanData {
                            node_id: node_id.clone(),
                        }
                    })?,
                    NodeAttributes::Combine(attrs) => self.run_combine(dag, node, attrs, &computed)?,
                    attributes => self.run_post(node, attributes, &computed)?,
                };

                tracing::debug!(
                    "Node {} ({}) produced {} rows",
                    node_id,
                    node.attributes.operation(),
                    output.len()
                );
                computed.insert(node_id, output);
            }
        }

        let terminals = dag.terminal_node_ids();
        if terminals.is_empty() {
            return Err(ExecError::NoTerminalNodes {
                dag_id: dag.dag_id().to_string(),
            });
        }

        let mut outputs = BTreeMap::new();
        for terminal in terminals {
            if let Some(relation) = computed.remove(terminal) {
                outputs.insert(terminal.to_string(), relation);
            }
        }

        tracing::info!(
            "Executed {} on {} backend: {} terminal outputs in {}ms",
            dag.dag_id(),
            self.backend.kind(),
            outputs.len(),
            start.elapsed().as_millis()
        );

        Ok(outputs)
    }

    fn run_combine(
        &self,
        dag: &ExecutionDAG,
        node: &LogicalNode,
        attrs: &CombineAttributes,
        computed: &HashMap<String, Relation>,
    ) -> Result<Relation, ExecError> {
        let operation = attrs.operation.as_str();
        let ctx = OpContext::new(&node.node_id, operation);

        let mut inbound: Vec<(u8, &str)> = dag
            .inbound_edges(&node.node_id)
            .map(|e| (role_rank(e.role.as_deref()), e.from_id.as_str()))
            .collect();
        inbound.sort();

        let mut inputs = Vec::with_capacity(inbound.len());
        for (_, from_id) in &inbound {
            let relation = computed.get(*from_id).ok_or_else(|| ExecError::MissingInput {
                node_id: node.node_id.clone(),
                operation: operation.to_string(),
                input_id: from_id.to_string(),
            })?;
            inputs.push(relation);
        }

        let arity = |expected: &str| ExecError::InputArity {
            node_id: node.node_id.clone(),
            operation: operation.to_string(),
            expected: expected.to_string(),
            actual: inputs.len(),
        };

        match attrs.operation {
            CombineOperation::Standalone => {
                if inputs.len() != 1 {
                    return Err(arity("exactly 1"));
                }
                Ok(inputs[0].clone())
            }
            CombineOperation::Union => {
                if inputs.is_empty() {
                    return Err(arity("at least 1"));
                }
                check_union_columns(ctx, &inputs, &inbound)?;
                self.backend.union(ctx, &inputs)
            }
            CombineOperation::Join | CombineOperation::Compare => {
                if inputs.len() != 2 {
                    return Err(arity("exactly 2"));
                }
                if attrs.join_keys.is_empty() {
                    return Err(ExecError::MissingJoinKeys {
                        node_id: node.node_id.clone(),
                        operation: operation.to_string(),
                    });
                }
                if attrs.operation == CombineOperation::Join {
                    self.backend.join(ctx, inputs[0], inputs[1], &attrs.join_keys)
                } else {
                    self.backend.compare(ctx, inputs[0], inputs[1], &attrs.join_keys)
                }
            }
        }
    }

    fn run_post(
        &self,
        node: &LogicalNode,
        attributes: &NodeAttributes,
        computed: &HashMap<String, Relation>,
    ) -> Result<Relation, ExecError> {
        let operation = attributes.operation();
        let ctx = OpContext::new(&node.node_id, operation);

        if node.inputs.len() != 1 {
            return Err(ExecError::InputArity {
                node_id: node.node_id.clone(),
                operation: operation.to_string(),
                expected: "exactly 1".to_string(),
                actual: node.inputs.len(),
            });
        }
        let input = computed
            .get(&node.inputs[0])
            .ok_or_else(|| ExecError::MissingInput {
                node_id: node.node_id.clone(),
                operation: operation.to_string(),
                input_id: node.inputs[0].clone(),
            })?;

        match attributes {
            NodeAttributes::PostFilter(attrs) => self.backend.filter(ctx, input, &attrs.filters),
            NodeAttributes::PostAggregate(attrs) => {
                self.backend
                    .aggregate(ctx, input, &attrs.group_by, &attrs.metrics)
            }
            NodeAttributes::PostProject(attrs) => self.backend.project(ctx, input, &attrs.columns),
            NodeAttributes::PostSort(attrs) => self.backend.sort(ctx, input, &attrs.order_by),
            NodeAttributes::PostLimit(attrs) => self.backend.limit(ctx, input, attrs.limit),
            NodeAttributes::Scan(_) | NodeAttributes::Combine(_) => Err(ExecError::SchemaMismatch {
                node_id: node.node_id.clone(),
                operation: operation.to_string(),
                message: "not a post-combine operation".to_string(),
            }),
        }
    }
}

/// Every non-empty union input must share the column set of the first
/// non-empty input (taken from its first row)
fn check_union_columns(
    ctx: OpContext<'_>,
    inputs: &[&Relation],
    inbound: &[(u8, &str)],
) -> Result<(), ExecError> {
    let mut reference: Option<(&str, BTreeSet<&str>)> = None;
    for (relation, (_, from_id)) in inputs.iter().zip(inbound) {
        let Some(first) = relation.first() else {
            continue;
        };
        let columns: BTreeSet<&str> = first.columns().collect();
        if reference.is_none() {
            reference = Some((*from_id, columns));
            continue;
        }
        if let Some((reference_id, expected)) = &reference {
            if *expected != columns {
                return Err(ExecError::SchemaMismatch {
                    node_id: ctx.node_id.to_string(),
                    operation: ctx.operation.to_string(),
                    message: format!(
                        "union input '{}' has columns {:?}, expected {:?} as in '{}'",
                        from_id, columns, expected, reference_id
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Execute with the row backend
pub fn execute(
    dag: &ExecutionDAG,
    scan_results: HashMap<String, Relation>,
) -> Result<BTreeMap<String, Relation>, ExecError> {
    execute_with_backend(dag, scan_results, &RowBackend)
}

pub fn execute_with_backend(
    dag: &ExecutionDAG,
    scan_results: HashMap<String, Relation>,
    backend: &dyn ExecutionBackend,
) -> Result<BTreeMap<String, Relation>, ExecError> {
    DagInterpreter::new(backend).execute(dag, scan_results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Aggregation, CombineGroupSpec, CombineInput, FilterSpec, JoinKey, MetricSpec, OrderSpec,
        PostOpSpec, PostOperation, ScanSpec, Value,
    };
    use crate::row;
    use crate::services::dag::backend::ColumnarBackend;
    use crate::services::dag::compile;

    fn join_group(group_id: &str, operation: CombineOperation, left: &str, right: &str) -> CombineGroupSpec {
        CombineGroupSpec {
            group_id: group_id.to_string(),
            operation,
            inputs: vec![
                CombineInput::with_role(left, "left"),
                CombineInput::with_role(right, "right"),
            ],
            join_keys: vec![JoinKey::new("id", "id")],
        }
    }

    fn scenario_data() -> HashMap<String, Relation> {
        HashMap::from([
            (
                "A".to_string(),
                vec![row!("id" => 1i64, "x" => "a"), row!("id" => 2i64, "x" => "b")],
            ),
            (
                "B".to_string(),
                vec![
                    row!("id" => 1i64, "y" => 10i64),
                    row!("id" => 2i64, "y" => 20i64),
                    row!("id" => 3i64, "y" => 30i64),
                ],
            ),
        ])
    }

    fn scans() -> Vec<ScanSpec> {
        vec![ScanSpec::new("A", "pg"), ScanSpec::new("B", "mysql")]
    }

    #[test]
    fn test_join_then_sum() {
        let mut agg = PostOpSpec::new("agg", "g", PostOperation::Aggregate);
        agg.metrics = vec![MetricSpec::new("total_y", Aggregation::Sum, Some("y"))];

        let dag = compile(&scans(), &[join_group("g", CombineOperation::Join, "A", "B")], &[agg]).unwrap();
        let outputs = execute(&dag, scenario_data()).unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["post_agg"], vec![row!("total_y" => 30i64)]);
    }

    #[test]
    fn test_join_is_terminal_without_post_ops() {
        let dag = compile(&scans(), &[join_group("g", CombineOperation::Join, "A", "B")], &[]).unwrap();
        let outputs = execute(&dag, scenario_data()).unwrap();

        assert_eq!(
            outputs["combine_g"],
            vec![
                row!("id" => 1i64, "x" => "a", "y" => 10i64),
                row!("id" => 2i64, "x" => "b", "y" => 20i64),
            ]
        );
    }

    #[test]
    fn test_backends_agree_on_scenario() {
        let mut filter = PostOpSpec::new("big", "g", PostOperation::Filter);
        filter.filters = vec![FilterSpec::new("y", ">", Value::Int(10))];
        let dag = compile(&scans(), &[join_group("g", CombineOperation::Join, "A", "B")], &[filter]).unwrap();

        let row = execute(&dag, scenario_data()).unwrap();
        let columnar = execute_with_backend(&dag, scenario_data(), &ColumnarBackend).unwrap();
        assert_eq!(row, columnar);
        assert_eq!(row["post_big"].len(), 1);
    }

    #[test]
    fn test_missing_scan_data() {
        let dag = compile(&scans(), &[join_group("g", CombineOperation::Join, "A", "B")], &[]).unwrap();
        let mut data = scenario_data();
        data.remove("B");

        let err = execute(&dag, data).unwrap_err();
        assert_eq!(err, ExecError::MissingScanData { node_id: "B".to_string() });
    }

    #[test]
    fn test_extra_scan_data_is_ignored() {
        let dag = compile(&scans(), &[join_group("g", CombineOperation::Join, "A", "B")], &[]).unwrap();
        let mut data = scenario_data();
        data.insert("Z".to_string(), vec![row!("id" => 9i64)]);

        assert!(execute(&dag, data).is_ok());
    }

    #[test]
    fn test_union_schema_mismatch_is_fatal() {
        let group = CombineGroupSpec {
            group_id: "u".to_string(),
            operation: CombineOperation::Union,
            inputs: vec![CombineInput::new("A"), CombineInput::new("B")],
            join_keys: vec![],
        };
        let dag = compile(&scans(), &[group], &[]).unwrap();

        let err = execute(&dag, scenario_data()).unwrap_err();
        assert!(matches!(err, ExecError::SchemaMismatch { ref node_id, .. } if node_id == "combine_u"));
    }

    #[test]
    fn test_union_accepts_empty_inputs() {
        let group = CombineGroupSpec {
            group_id: "u".to_string(),
            operation: CombineOperation::Union,
            inputs: vec![CombineInput::new("A"), CombineInput::new("B")],
            join_keys: vec![],
        };
        let dag = compile(&scans(), &[group], &[]).unwrap();
        let data = HashMap::from([
            ("A".to_string(), vec![row!("id" => 1i64)]),
            ("B".to_string(), Vec::new()),
        ]);

        let outputs = execute(&dag, data).unwrap();
        assert_eq!(outputs["combine_u"].len(), 1);
    }

    #[test]
    fn test_join_without_keys_is_fatal() {
        let mut group = join_group("g", CombineOperation::Join, "A", "B");
        group.join_keys.clear();
        let dag = compile(&scans(), &[group], &[]).unwrap();

        let err = execute(&dag, scenario_data()).unwrap_err();
        assert!(matches!(err, ExecError::MissingJoinKeys { .. }));
    }

    #[test]
    fn test_join_with_one_input_is_fatal() {
        let group = CombineGroupSpec {
            group_id: "g".to_string(),
            operation: CombineOperation::Join,
            inputs: vec![CombineInput::new("A")],
            join_keys: vec![JoinKey::new("id", "id")],
        };
        let dag = compile(&[ScanSpec::new("A", "pg")], &[group], &[]).unwrap();
        let mut data = scenario_data();
        data.remove("B");

        let err = execute(&dag, data).unwrap_err();
        assert!(matches!(err, ExecError::InputArity { actual: 1, .. }));
    }

    #[test]
    fn test_roles_decide_join_sides() {
        // B declared first but carries the right role
        let group = CombineGroupSpec {
            group_id: "g".to_string(),
            operation: CombineOperation::Compare,
            inputs: vec![
                CombineInput::with_role("B", "compare"),
                CombineInput::with_role("A", "base"),
            ],
            join_keys: vec![JoinKey::new("id", "id")],
        };
        let dag = compile(&scans(), &[group], &[]).unwrap();
        let data = HashMap::from([
            ("A".to_string(), vec![row!("id" => 1i64, "v" => "old")]),
            ("B".to_string(), vec![row!("id" => 1i64, "v" => "new")]),
        ]);

        let outputs = execute(&dag, data).unwrap();
        let diff = &outputs["combine_g"][0];
        assert_eq!(diff.value("left_v"), Value::from("old"));
        assert_eq!(diff.value("right_v"), Value::from("new"));
    }

    #[test]
    fn test_post_op_chain_on_standalone() {
        let group = CombineGroupSpec {
            group_id: "s".to_string(),
            operation: CombineOperation::Standalone,
            inputs: vec![CombineInput::new("B")],
            join_keys: vec![],
        };
        let mut sort = PostOpSpec::new("top", "s", PostOperation::Sort);
        sort.order_by = vec![OrderSpec::desc("y")];
        let mut limit = PostOpSpec::new("first", "s", PostOperation::Limit);
        limit.limit = Some(1);
        let project = PostOpSpec::new("ids", "s", PostOperation::Project).with_columns(&["id"]);

        let dag = compile(&[ScanSpec::new("B", "mysql")], &[group], &[sort, limit, project]).unwrap();
        let mut data = scenario_data();
        data.remove("A");
        let outputs = execute(&dag, data).unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs["post_top"][0].value("y"), Value::Int(30));
        assert_eq!(outputs["post_first"], vec![row!("id" => 1i64, "y" => 10i64)]);
        assert_eq!(outputs["post_ids"][2], row!("id" => 3i64));
    }

    #[test]
    fn test_cancelled_execution_stops() {
        let dag = compile(&scans(), &[join_group("g", CombineOperation::Join, "A", "B")], &[]).unwrap();
        let flag = CancellationFlag::new();
        flag.cancel();

        let err = DagInterpreter::new(&RowBackend)
            .execute_cancellable(&dag, scenario_data(), &flag)
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled { .. }));
    }

    #[test]
    fn test_repeated_execution_is_identical() {
        let mut sort = PostOpSpec::new("sorted", "g", PostOperation::Sort);
        sort.order_by = vec![OrderSpec::desc("y")];
        let dag = compile(&scans(), &[join_group("g", CombineOperation::Join, "A", "B")], &[sort]).unwrap();

        let first = serde_json::to_string(&execute(&dag, scenario_data()).unwrap()).unwrap();
        let second = serde_json::to_string(&execute(&dag, scenario_data()).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_plan_has_no_terminal_nodes() {
        let dag = compile(&[], &[], &[]).unwrap();
        let err = execute(&dag, HashMap::new()).unwrap_err();
        assert!(matches!(err, ExecError::NoTerminalNodes { .. }));
    }
}
