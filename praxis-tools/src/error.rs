use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolsError {
    #[error(transparent)]
    Store(#[from] praxis_store::StoreError),
    #[error(transparent)]
    Vector(#[from] praxis_store::VectorError),
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tool execution timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("pathway invalidation failed: {0}")]
    Invalidation(String),
}
