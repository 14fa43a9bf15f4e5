//! Thin wrapper tying the tool registry, sandbox runtime, and execution
//! log together: "run this tool with these params, record what happened."
//! Shared by the orchestrator (C7) and error recovery (C6).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use praxis_core::ToolInvocation;
use praxis_store::Store;
use praxis_tools::{SandboxRuntime, ToolRegistry};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AgentsError;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    sandbox: Arc<SandboxRuntime>,
    store: Arc<Store>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, sandbox: Arc<SandboxRuntime>, store: Arc<Store>) -> Self {
        Self { registry, sandbox, store }
    }

    /// Run one tool invocation, persist the resulting record unconditionally
    /// (the log is append-only regardless of the eventual goal outcome),
    /// and return the parsed output on success or an error string on
    /// failure.
    pub async fn invoke(
        &self,
        goal_execution_id: Uuid,
        tool_name: &str,
        params: &HashMap<String, Value>,
    ) -> Result<Result<Value, String>, AgentsError> {
        let record = self.registry.get(tool_name).await?;
        let started_at = Utc::now();

        let outcome = self.sandbox.execute(&record.definition.executable_path, params, None).await;

        let (success, output, error, duration_ms) = match outcome {
            Ok(result) => {
                let duration_ms = result.duration.as_millis() as u64;
                if result.success {
                    match serde_json::from_str::<Value>(&result.stdout) {
                        Ok(value) => (true, Some(value), None, duration_ms),
                        Err(e) => (false, None, Some(format!("unparseable tool output: {e}")), duration_ms),
                    }
                } else {
                    (false, None, Some(if result.stderr.is_empty() { "tool exited with failure".to_string() } else { result.stderr }), duration_ms)
                }
            }
            Err(e) => (false, None, Some(e.to_string()), 0),
        };

        let invocation = ToolInvocation {
            id: Uuid::new_v4(),
            execution_id: goal_execution_id,
            tool_name: tool_name.to_string(),
            params: serde_json::to_value(params)?,
            output: output.clone(),
            success,
            duration_ms,
            error: error.clone(),
            started_at,
        };
        self.store.record_invocation(&invocation).await?;

        match (success, output, error) {
            (true, Some(value), _) => Ok(Ok(value)),
            (_, _, Some(err)) => Ok(Err(err)),
            _ => Ok(Err("tool produced no output".to_string())),
        }
    }
}
