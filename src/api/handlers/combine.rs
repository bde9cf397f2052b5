// Combine Plan Handlers
//
// API endpoints for compiling a combine plan into an ExecutionDAG and for
// running it over sub-query results supplied in the request body.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::api::routes::AppState;
use crate::models::{CombineExecuteRequest, CombinePlanSpec, CombineRunOutcome, CompileResponse};
use crate::services::{CacheStats, StaticResultExecutor};

/// Compile a combine plan
///
/// # Request Body
///
/// ```json
/// {
///   "scans": [{"id": "a", "datasource_id": "pg"}, {"id": "b", "datasource_id": "mysql"}],
///   "combine_groups": [{
///     "group_id": "g", "operation": "union",
///     "inputs": [{"ref_id": "a"}, {"ref_id": "b"}]
///   }],
///   "post_ops": [{"op_id": "top", "target_group_id": "g", "operation": "limit", "limit": 10}]
/// }
/// ```
///
/// # Response
///
/// The compiled DAG, its summary (dag_id, counts) and its topological layers
pub async fn compile_plan(
    State(state): State<AppState>,
    Json(plan): Json<CombinePlanSpec>,
) -> Result<Json<CompileResponse>, AppError> {
    tracing::info!(
        "Compiling combine plan with {} scans and {} combine groups",
        plan.scans.len(),
        plan.combine_groups.len()
    );

    if plan.scans.is_empty() {
        return Err(AppError::Validation("At least one scan is required".to_string()));
    }

    let dag = state.pipeline.compile(&plan)?;
    Ok(Json(CompileResponse::new(dag)))
}

/// Compile and execute a combine plan over the supplied scan results
///
/// # Response
///
/// Terminal outputs keyed by node id, with run id, plan summary, backend,
/// per-scan statistics and cache status
pub async fn execute_plan(
    State(state): State<AppState>,
    Json(payload): Json<CombineExecuteRequest>,
) -> Result<Json<CombineRunOutcome>, AppError> {
    tracing::info!(
        "Executing combine plan with {} scans and {} combine groups",
        payload.scans.len(),
        payload.combine_groups.len()
    );

    payload.validate().map_err(AppError::Validation)?;

    let (plan, scan_results, backend) = payload.into_parts();
    let executor = StaticResultExecutor::new(scan_results);
    let unused = executor.unused_ids(&plan.scans);
    if !unused.is_empty() {
        tracing::warn!("Ignoring scan results without a matching scan: {:?}", unused);
    }

    let outcome = state
        .pipeline
        .run(plan, backend, Arc::new(executor))
        .await?;

    Ok(Json(outcome))
}

/// Result cache statistics
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.pipeline.cache_stats())
}
