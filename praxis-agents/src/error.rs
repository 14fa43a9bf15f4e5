use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentsError {
    #[error(transparent)]
    Store(#[from] praxis_store::StoreError),
    #[error(transparent)]
    Vector(#[from] praxis_store::VectorError),
    #[error(transparent)]
    Memory(#[from] praxis_memory::MemoryError),
    #[error(transparent)]
    Tools(#[from] praxis_tools::ToolsError),
    #[error(transparent)]
    Llm(#[from] praxis_core::LlmError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no tool selected for goal: {0}")]
    NoToolSelected(String),
    #[error("llm selected unknown tool: {0}")]
    UnknownToolSelected(String),
    #[error("goal cannot be satisfied by any known tool: {0}")]
    Impossible(String),
}
