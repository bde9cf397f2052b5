// Combine Pipeline Service
//
// Orchestrates one recombination run: compile the plan, collect every scan's
// relation through a SubQueryExecutor (bounded concurrency), interpret the DAG
// on a blocking worker, and cache the terminal outputs. The whole run is
// bounded by a wall-clock timeout: in-flight fetches are aborted and the
// interpreter is cancelled cooperatively.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::{
    CombinePlanSpec, CombineRunOutcome, ExecutionDAG, Relation, ScanExecution, ScanSpec,
};
use crate::services::dag::{
    hashing, BackendKind, CancellationFlag, DagCompiler, DagInterpreter, ExecError,
};
use crate::services::result_cache::{CacheStats, CombineOutputs, ResultCache};

/// Source of scan relations
///
/// Implementations run (or look up) the sub-query behind one scan.
#[async_trait]
pub trait SubQueryExecutor: Send + Sync {
    async fn fetch(&self, scan: &ScanSpec) -> Result<Relation, AppError>;
}

/// Serves relations that were materialized ahead of time
#[derive(Debug, Clone, Default)]
pub struct StaticResultExecutor {
    results: HashMap<String, Relation>,
}

impl StaticResultExecutor {
    pub fn new(results: HashMap<String, Relation>) -> Self {
        Self { results }
    }

    /// Supplied ids that no scan in `scans` asks for, sorted
    pub fn unused_ids(&self, scans: &[ScanSpec]) -> Vec<String> {
        let mut unused: Vec<String> = self
            .results
            .keys()
            .filter(|id| !scans.iter().any(|s| &s.id == *id))
            .cloned()
            .collect();
        unused.sort();
        unused
    }
}

#[async_trait]
impl SubQueryExecutor for StaticResultExecutor {
    async fn fetch(&self, scan: &ScanSpec) -> Result<Relation, AppError> {
        self.results.get(&scan.id).cloned().ok_or_else(|| {
            AppError::Execution(ExecError::MissingScanData {
                node_id: scan.id.clone(),
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub timeout: Duration,
    pub max_workers: usize,
    pub backend: BackendKind,
    pub cache_size: usize,
    pub cache_ttl_secs: u64,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let backend = BackendKind::from_str(&config.engine.backend).map_err(AppError::Validation)?;
        Ok(Self {
            timeout: Duration::from_secs(config.pipeline.timeout_secs),
            max_workers: config.pipeline.max_workers.max(1),
            backend,
            cache_size: config.cache.max_size,
            cache_ttl_secs: config.cache.ttl_secs,
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_workers: num_cpus::get().max(1),
            backend: BackendKind::Row,
            cache_size: 256,
            cache_ttl_secs: 300,
        }
    }
}

/// Collected scan data plus per-scan statistics
struct CollectedScans {
    relations: HashMap<String, Relation>,
    stats: Vec<ScanExecution>,
}

pub struct CombinePipeline {
    config: PipelineConfig,
    compiler: DagCompiler,
    cache: ResultCache,
}

impl CombinePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let cache = ResultCache::new(config.cache_size, config.cache_ttl_secs);
        Self {
            config,
            compiler: DagCompiler::new(),
            cache,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Compile a plan without running it
    pub fn compile(&self, plan: &CombinePlanSpec) -> Result<ExecutionDAG, AppError> {
        Ok(self.compiler.compile_plan(plan)?)
    }

    /// Run a plan end to end
    ///
    /// # Arguments
    ///
    /// * `plan` - Scans, combine groups and post-combine ops
    /// * `backend` - Overrides the configured backend when set
    /// * `executor` - Source of the scan relations
    ///
    /// # Returns
    ///
    /// Terminal outputs with run metadata
    pub async fn run(
        &self,
        plan: CombinePlanSpec,
        backend: Option<BackendKind>,
        executor: Arc<dyn SubQueryExecutor>,
    ) -> Result<CombineRunOutcome, AppError> {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let dag = Arc::new(self.compile(&plan)?);
        let backend = backend.unwrap_or(self.config.backend);

        tracing::info!(
            "Run {} started: {} ({} nodes, {} edges) on {} backend",
            run_id,
            dag.dag_id(),
            dag.nodes().len(),
            dag.edges().len(),
            backend
        );

        let cancel = CancellationFlag::new();
        let work = self.collect_and_execute(&plan.scans, dag.clone(), backend, executor, cancel.clone());

        let (outputs, scans, cache_hit) = match timeout(self.config.timeout, work).await {
            Ok(result) => result?,
            Err(_) => {
                cancel.cancel();
                tracing::warn!(
                    "Run {} timed out after {:?}, cancelling {}",
                    run_id,
                    self.config.timeout,
                    dag.dag_id()
                );
                return Err(AppError::Timeout(format!(
                    "Pipeline run exceeded {:?}",
                    self.config.timeout
                )));
            }
        };

        let outcome = CombineRunOutcome {
            run_id,
            summary: dag.summary(),
            backend,
            outputs,
            scans,
            cache_hit,
            execution_time_ms: start.elapsed().as_millis(),
            executed_at: Utc::now(),
        };

        tracing::info!(
            "Run {} finished: {} terminal rows in {}ms (cache_hit: {})",
            outcome.run_id,
            outcome.total_rows(),
            outcome.execution_time_ms,
            outcome.cache_hit
        );

        Ok(outcome)
    }

    async fn collect_and_execute(
        &self,
        scans: &[ScanSpec],
        dag: Arc<ExecutionDAG>,
        backend: BackendKind,
        executor: Arc<dyn SubQueryExecutor>,
        cancel: CancellationFlag,
    ) -> Result<(CombineOutputs, Vec<ScanExecution>, bool), AppError> {
        let collected = self.collect_scans(scans, executor).await?;

        let fingerprint = hashing::scan_data_fingerprint(&collected.relations)
            .map_err(|e| AppError::Internal(format!("Failed to fingerprint scan data: {}", e)))?;
        let key = ResultCache::generate_key(dag.dag_id(), backend.as_str(), &fingerprint);
        if let Some(outputs) = self.cache.get(&key) {
            return Ok((outputs, collected.stats, true));
        }

        let relations = collected.relations;
        let outputs = tokio::task::spawn_blocking(move || {
            let backend_impl = backend.create();
            DagInterpreter::new(backend_impl.as_ref()).execute_cancellable(&dag, relations, &cancel)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Interpreter task failed: {}", e)))??;

        self.cache.put(key, outputs.clone(), None);
        Ok((outputs, collected.stats, false))
    }

    /// Fetch every scan, at most `max_workers` at a time
    ///
    /// Fetches live in a JoinSet: returning early on the first error, or
    /// dropping this future on timeout, aborts whatever is still running.
    async fn collect_scans(
        &self,
        scans: &[ScanSpec],
        executor: Arc<dyn SubQueryExecutor>,
    ) -> Result<CollectedScans, AppError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut tasks = JoinSet::new();

        for (index, scan) in scans.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let executor = executor.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::Internal(format!("Worker pool closed: {}", e)))?;
                let started = Instant::now();
                let rows = executor.fetch(&scan).await?;
                tracing::debug!("Collected scan {} ({} rows)", scan.id, rows.len());
                Ok::<_, AppError>((index, scan, rows, started.elapsed().as_millis()))
            });
        }

        let mut finished = Vec::with_capacity(scans.len());
        while let Some(joined) = tasks.join_next().await {
            let fetched =
                joined.map_err(|e| AppError::Internal(format!("Scan task failed: {}", e)))??;
            finished.push(fetched);
        }
        // Completion order varies; report stats in declaration order
        finished.sort_by_key(|(index, ..)| *index);

        let mut relations = HashMap::with_capacity(scans.len());
        let mut stats = Vec::with_capacity(scans.len());
        for (_, scan, rows, elapsed) in finished {
            stats.push(ScanExecution {
                scan_id: scan.id.clone(),
                datasource_id: scan.datasource_id.clone(),
                row_count: rows.len(),
                execution_time_ms: elapsed,
            });
            relations.insert(scan.id, rows);
        }

        Ok(CollectedScans { relations, stats })
    }
}

impl Default for CombinePipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
