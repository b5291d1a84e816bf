use thiserror::Error;

/// Errors raised from inside a node's lifecycle methods.
///
/// These are recoverable at the node level: an `execute` error feeds the
/// retry loop and then the fallback before it escalates to a `FlowError`.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("missing required key: {0}")]
    MissingKey(String),

    #[error("invalid type for '{field}': expected {expected}, got {actual}")]
    InvalidType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

/// Errors surfaced by flow construction, validation, or execution.
#[derive(Error, Debug)]
pub enum FlowError {
    /// A node exhausted its retries and its fallback. The original error
    /// from the last failing attempt is preserved as the source.
    #[error("node '{node}' failed after {attempts} attempt(s): {source}")]
    NodeFailed {
        node: String,
        attempts: u32,
        #[source]
        source: NodeError,
    },

    #[error("invalid flow: {0}")]
    Invalid(String),

    #[error("flow not found: {0}")]
    NotFound(String),

    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("node error: {0}")]
    Node(#[from] NodeError),
}
