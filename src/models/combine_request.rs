// Combine Request / Response Models
//
// HTTP-facing payloads for compiling a combine plan and running it against
// supplied sub-query results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::combine_spec::{CombineGroupSpec, CombinePlanSpec, PostOpSpec, ScanSpec};
use super::ir::{DagSummary, ExecutionDAG};
use super::relation::Relation;
use crate::services::dag::BackendKind;

/// Request to execute a combine plan over pre-materialized scan results
///
/// # Request Body
///
/// ```json
/// {
///   "scans": [{"id": "a", "datasource_id": "pg"}, {"id": "b", "datasource_id": "mysql"}],
///   "combine_groups": [{
///     "group_id": "g", "operation": "join",
///     "inputs": [{"ref_id": "a", "role": "left"}, {"ref_id": "b", "role": "right"}],
///     "join_keys": [{"left": "id", "right": "id"}]
///   }],
///   "post_ops": [],
///   "scan_results": {"a": [{"id": 1}], "b": [{"id": 1, "y": 2}]},
///   "backend": "row"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineExecuteRequest {
    pub scans: Vec<ScanSpec>,
    #[serde(default)]
    pub combine_groups: Vec<CombineGroupSpec>,
    #[serde(default)]
    pub post_ops: Vec<PostOpSpec>,
    #[serde(default)]
    pub scan_results: HashMap<String, Relation>,
    /// Overrides the configured execution backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
}

impl CombineExecuteRequest {
    /// Split into the plan and the scan data
    pub fn into_parts(self) -> (CombinePlanSpec, HashMap<String, Relation>, Option<BackendKind>) {
        (
            CombinePlanSpec {
                scans: self.scans,
                combine_groups: self.combine_groups,
                post_ops: self.post_ops,
            },
            self.scan_results,
            self.backend,
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.scans.is_empty() {
            return Err("At least one scan is required".to_string());
        }
        Ok(())
    }
}

/// Compiled plan as returned by the compile endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CompileResponse {
    pub summary: DagSummary,
    pub layers: Vec<Vec<String>>,
    pub dag: ExecutionDAG,
}

impl CompileResponse {
    pub fn new(dag: ExecutionDAG) -> Self {
        Self {
            summary: dag.summary(),
            layers: dag.layers(),
            dag,
        }
    }
}

/// Per-scan collection statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanExecution {
    pub scan_id: String,
    pub datasource_id: String,
    pub row_count: usize,
    pub execution_time_ms: u128,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct CombineRunOutcome {
    pub run_id: String,
    pub summary: DagSummary,
    pub backend: BackendKind,
    /// Terminal node id to its rows
    pub outputs: BTreeMap<String, Relation>,
    pub scans: Vec<ScanExecution>,
    pub cache_hit: bool,
    pub execution_time_ms: u128,
    pub executed_at: DateTime<Utc>,
}

impl CombineRunOutcome {
    pub fn total_rows(&self) -> usize {
        self.outputs.values().map(|rows| rows.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_parsing() {
        let request: CombineExecuteRequest = serde_json::from_value(json!({
            "scans": [{"id": "a", "datasource_id": "pg"}],
            "combine_groups": [{"group_id": "g", "operation": "standalone", "inputs": [{"ref_id": "a"}]}],
            "scan_results": {"a": [{"id": 1, "name": "x"}]},
            "backend": "columnar"
        }))
        .unwrap();

        assert!(request.validate().is_ok());
        let (plan, data, backend) = request.into_parts();
        assert_eq!(plan.scans.len(), 1);
        assert_eq!(data["a"].len(), 1);
        assert_eq!(backend, Some(BackendKind::Columnar));
    }

    #[test]
    fn test_execute_request_requires_scans() {
        let request: CombineExecuteRequest = serde_json::from_value(json!({"scans": []})).unwrap();
        assert!(request.validate().is_err());
    }
}
