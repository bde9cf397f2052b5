// DAG Engine Errors
//
// Compile-time and execution-time failures. Both are fatal to the current
// call: no partial plans, no partial results.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Combine group '{group_id}' input references unknown node '{ref_id}'")]
    UnknownReference { group_id: String, ref_id: String },

    #[error("Post-combine op '{op_id}' targets unknown combine group '{target_group_id}'")]
    UnknownCombineGroup { op_id: String, target_group_id: String },

    #[error("Combine group '{group_id}' has no inputs")]
    EmptyCombineGroup { group_id: String },

    #[error("Duplicate node id '{node_id}'")]
    DuplicateNode { node_id: String },

    #[error("Duplicate edge '{edge_id}'")]
    DuplicateEdge { edge_id: String },

    #[error("Duplicate column '{column}' in schema of node '{node_id}'")]
    DuplicateColumn { node_id: String, column: String },

    #[error("Edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("Cycle detected through node '{node_id}'")]
    Cycle { node_id: String },

    #[error("Post-combine node '{node_id}' must have exactly one combine input")]
    InvalidPostInput { node_id: String },

    #[error("Combine node '{node_id}' has more than one input with role rank of '{role}'")]
    AmbiguousRoles { node_id: String, role: String },

    #[error("Failed to serialize plan for hashing: {0}")]
    Serialization(String),
}

impl CompileError {
    /// The node, group or op id the error is about
    pub fn offending_id(&self) -> &str {
        match self {
            CompileError::UnknownReference { ref_id, .. } => ref_id,
            CompileError::UnknownCombineGroup { target_group_id, .. } => target_group_id,
            CompileError::EmptyCombineGroup { group_id } => group_id,
            CompileError::DuplicateNode { node_id }
            | CompileError::DuplicateColumn { node_id, .. }
            | CompileError::DanglingEdge { node_id, .. }
            | CompileError::Cycle { node_id }
            | CompileError::InvalidPostInput { node_id }
            | CompileError::AmbiguousRoles { node_id, .. } => node_id,
            CompileError::DuplicateEdge { edge_id } => edge_id,
            CompileError::Serialization(_) => "",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("No scan data supplied for scan node '{node_id}'")]
    MissingScanData { node_id: String },

    #[error("Node '{node_id}' ({operation}): input '{input_id}' has not been computed")]
    MissingInput {
        node_id: String,
        operation: String,
        input_id: String,
    },

    #[error("Node '{node_id}' ({operation}): {message}")]
    SchemaMismatch {
        node_id: String,
        operation: String,
        message: String,
    },

    #[error("Node '{node_id}' ({operation}) requires {expected} input(s), got {actual}")]
    InputArity {
        node_id: String,
        operation: String,
        expected: String,
        actual: usize,
    },

    #[error("Node '{node_id}' ({operation}) requires at least one join key")]
    MissingJoinKeys { node_id: String, operation: String },

    #[error("Node '{node_id}' ({operation}): column '{column}' mixes incompatible value types")]
    MixedColumnTypes {
        node_id: String,
        operation: String,
        column: String,
    },

    #[error("Node '{node_id}' ({operation}): arrow kernel failed: {message}")]
    Arrow {
        node_id: String,
        operation: String,
        message: String,
    },

    #[error("Execution cancelled before node '{node_id}'")]
    Cancelled { node_id: String },

    #[error("Plan '{dag_id}' has no terminal nodes")]
    NoTerminalNodes { dag_id: String },
}

impl ExecError {
    pub fn node_id(&self) -> &str {
        match self {
            ExecError::MissingScanData { node_id }
            | ExecError::MissingInput { node_id, .. }
            | ExecError::SchemaMismatch { node_id, .. }
            | ExecError::InputArity { node_id, .. }
            | ExecError::MissingJoinKeys { node_id, .. }
            | ExecError::MixedColumnTypes { node_id, .. }
            | ExecError::Arrow { node_id, .. }
            | ExecError::Cancelled { node_id } => node_id,
            ExecError::NoTerminalNodes { dag_id } => dag_id,
        }
    }
}
