// DAG Recombination Engine
//
// Compiles a combine specification into a content-addressed ExecutionDAG and
// interprets it over already-materialized sub-query results.

pub mod backend;
pub mod compiler;
pub mod error;
pub mod hashing;
pub mod interpreter;

pub use backend::{BackendKind, ColumnarBackend, ExecutionBackend, OpContext, RowBackend};
pub use compiler::{compile, DagCompiler};
pub use error::{CompileError, ExecError};
pub use interpreter::{execute, execute_with_backend, CancellationFlag, DagInterpreter};
