//! Request handlers for the HTTP surface (§6 CLI surface, `serve` mode).
//!
//! Grounded on `api/src/handlers/mod.rs`'s `ApiState` + handler shape
//! (shared `Arc` state extracted via `State`, `Json` request/response).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use praxis_agents::Orchestrator;
use praxis_store::Store;
use praxis_tools::ToolRegistry;
use serde::{Deserialize, Serialize};

pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<Store>,
    pub registry: Arc<ToolRegistry>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub goal: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub success: bool,
    pub value: Option<serde_json::Value>,
    pub tool_chain: Vec<String>,
    pub duration_ms: u64,
    pub used_cached_pathway: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub total_executions: u64,
    pub valid_pathways: u64,
    pub learned_patterns: u64,
    pub available_tools: u64,
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "service": "praxis-api" }))
}

pub async fn ask(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, StatusCode> {
    tracing::debug!("ask: {}", request.goal);
    match state.orchestrator.execute(&request.goal).await {
        Ok(outcome) => Ok(Json(AskResponse {
            success: outcome.success,
            value: outcome.value,
            tool_chain: outcome.tool_chain,
            duration_ms: outcome.duration_ms,
            used_cached_pathway: outcome.used_cached_pathway,
            explanation: outcome.explanation,
        })),
        Err(e) => {
            tracing::error!("ask failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn status(State(state): State<Arc<ApiState>>) -> Result<Json<StatusResponse>, StatusCode> {
    let total_executions = state.store.count_executions().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let valid_pathways = state.store.list_valid_pathways().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?.len() as u64;
    let learned_patterns = state.store.count_patterns().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let available_tools = state.registry.len().await as u64;

    Ok(Json(StatusResponse {
        status: "ok".to_string(),
        total_executions,
        valid_pathways,
        learned_patterns,
        available_tools,
    }))
}
