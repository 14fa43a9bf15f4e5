//! Praxis Core
//!
//! Shared domain types, the engine-wide configuration, and the narrow
//! LLM backend contract consumed by every other crate in the workspace.
//! Nothing in here talks to the relational store, the vector index, the
//! sandbox, or the tool directory directly — those live in their own
//! crates and depend on these types, not the other way around.

pub mod config;
pub mod llm;
pub mod models;

pub use config::EngineConfig;
pub use llm::{LlmBackend, LlmError, OpenAiBackend, StubBackend};
pub use models::*;
