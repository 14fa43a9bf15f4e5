//! Error Recovery (C6): classifies a tool failure and chooses
//! retry / fallback / adapt / give-up (§4.2).
//!
//! Grounded on `src/execution_engine/circuit_breaker.rs`'s closed state
//! enum and bounded-attempt bookkeeping, generalised from a per-tool
//! open/half-open/closed breaker to a per-failure recovery run. The
//! "deterministic rule table in front of LLM calls" design follows the
//! same local-heuristics-first preference as `tool_router.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use praxis_core::{ChatMessage, FailureKind, LlmBackend, RecoveryStrategy};
use praxis_tools::ToolDiscovery;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AgentsError;
use crate::executor::ToolExecutor;

const FALLBACK_CANDIDATE_COUNT: usize = 2;

/// Result of one `Recover` call.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub result: Option<Value>,
    pub strategy: RecoveryStrategy,
    pub attempts: u32,
    /// Name of whichever tool ultimately produced `result` (may differ
    /// from the originally failed tool after a `Fallback`).
    pub tool_used: Option<String>,
    pub explanation: Option<String>,
}

/// Keyword rules tried before falling back to the LLM classifier. Order
/// matters: the first matching rule wins.
fn classify_by_rule_table(exception: &str) -> Option<FailureKind> {
    let lower = exception.to_lowercase();
    let transient_markers = ["timeout", "timed out", "rate limit", "connection reset", "temporarily unavailable"];
    let wrong_tool_markers = ["not applicable", "wrong tool", "semantic mismatch", "cannot handle"];
    let parameter_markers = ["missing field", "invalid argument", "type mismatch", "unparseable", "bad parameter"];
    let impossible_markers = ["no tool exists", "unsupported goal", "cannot be satisfied"];

    if transient_markers.iter().any(|m| lower.contains(m)) {
        return Some(FailureKind::Transient);
    }
    if wrong_tool_markers.iter().any(|m| lower.contains(m)) {
        return Some(FailureKind::WrongTool);
    }
    if parameter_markers.iter().any(|m| lower.contains(m)) {
        return Some(FailureKind::ParameterMismatch);
    }
    if impossible_markers.iter().any(|m| lower.contains(m)) {
        return Some(FailureKind::Impossible);
    }
    None
}

async fn classify(llm: &dyn LlmBackend, exception: &str) -> FailureKind {
    if let Some(kind) = classify_by_rule_table(exception) {
        return kind;
    }

    let prompt = vec![
        ChatMessage::system(
            "Classify the following tool failure as exactly one word: transient, wrong_tool, \
             parameter_mismatch, or impossible.",
        ),
        ChatMessage::user(exception),
    ];
    match llm.complete(&prompt).await {
        Ok(reply) => {
            let reply = reply.to_lowercase();
            if reply.contains("transient") {
                FailureKind::Transient
            } else if reply.contains("wrong_tool") || reply.contains("wrong tool") {
                FailureKind::WrongTool
            } else if reply.contains("impossible") {
                FailureKind::Impossible
            } else {
                FailureKind::ParameterMismatch
            }
        }
        Err(_) => FailureKind::ParameterMismatch,
    }
}

pub struct ErrorRecovery {
    executor: Arc<ToolExecutor>,
    discovery: Arc<ToolDiscovery>,
    llm: Arc<dyn LlmBackend>,
    max_retry_attempts: u32,
}

impl ErrorRecovery {
    pub fn new(
        executor: Arc<ToolExecutor>,
        discovery: Arc<ToolDiscovery>,
        llm: Arc<dyn LlmBackend>,
        max_retry_attempts: u32,
    ) -> Self {
        Self { executor, discovery, llm, max_retry_attempts }
    }

    /// `Recover(tool, params, exception, context) -> RecoveryOutcome`.
    /// Never loops; total attempts <= retry_cap + fallback_cap + 1.
    pub async fn recover(
        &self,
        goal_execution_id: Uuid,
        tool_name: &str,
        params: &HashMap<String, Value>,
        exception: &str,
        goal_embedding: &[f32],
    ) -> Result<RecoveryOutcome, AgentsError> {
        let kind = classify(self.llm.as_ref(), exception).await;
        info!("recovery classified failure for {} as {:?}", tool_name, kind);

        match kind {
            FailureKind::Transient => self.retry(goal_execution_id, tool_name, params).await,
            FailureKind::WrongTool => self.fallback(goal_execution_id, tool_name, params, goal_embedding).await,
            FailureKind::ParameterMismatch => {
                self.adapt(goal_execution_id, tool_name, params, exception).await
            }
            FailureKind::Impossible => Ok(RecoveryOutcome {
                recovered: false,
                result: None,
                strategy: RecoveryStrategy::GiveUp,
                attempts: 0,
                tool_used: None,
                explanation: Some(format!("goal cannot be satisfied by any known tool: {exception}")),
            }),
        }
    }

    async fn retry(
        &self,
        goal_execution_id: Uuid,
        tool_name: &str,
        params: &HashMap<String, Value>,
    ) -> Result<RecoveryOutcome, AgentsError> {
        let cap = self.max_retry_attempts.max(1);
        let mut attempts = 0u32;

        for attempt in 0..cap {
            if attempt > 0 {
                let backoff = Duration::from_secs(2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
            attempts += 1;
            match self.executor.invoke(goal_execution_id, tool_name, params).await? {
                Ok(value) => {
                    return Ok(RecoveryOutcome {
                        recovered: true,
                        result: Some(value),
                        strategy: RecoveryStrategy::Retry,
                        attempts,
                        tool_used: Some(tool_name.to_string()),
                        explanation: None,
                    });
                }
                Err(_) => continue,
            }
        }

        warn!("retry exhausted after {} attempts for tool {}", attempts, tool_name);
        Ok(RecoveryOutcome {
            recovered: false,
            result: None,
            strategy: RecoveryStrategy::GiveUp,
            attempts,
            tool_used: None,
            explanation: Some(format!("tool {tool_name} failed after {attempts} retries")),
        })
    }

    async fn fallback(
        &self,
        goal_execution_id: Uuid,
        tool_name: &str,
        params: &HashMap<String, Value>,
        goal_embedding: &[f32],
    ) -> Result<RecoveryOutcome, AgentsError> {
        let candidates = self.discovery.discover(goal_embedding, FALLBACK_CANDIDATE_COUNT, Some(tool_name)).await?;
        let mut attempts = 0u32;

        for candidate in candidates {
            attempts += 1;
            match self.executor.invoke(goal_execution_id, &candidate.record.definition.name, params).await? {
                Ok(value) => {
                    return Ok(RecoveryOutcome {
                        recovered: true,
                        result: Some(value),
                        strategy: RecoveryStrategy::Fallback,
                        attempts,
                        tool_used: Some(candidate.record.definition.name),
                        explanation: None,
                    });
                }
                Err(_) => continue,
            }
        }

        Ok(RecoveryOutcome {
            recovered: false,
            result: None,
            strategy: RecoveryStrategy::GiveUp,
            attempts,
            tool_used: None,
            explanation: Some(format!("no fallback candidate for {tool_name} succeeded")),
        })
    }

    async fn adapt(
        &self,
        goal_execution_id: Uuid,
        tool_name: &str,
        params: &HashMap<String, Value>,
        exception: &str,
    ) -> Result<RecoveryOutcome, AgentsError> {
        let prompt = vec![
            ChatMessage::system(
                "Re-synthesise the JSON parameter object for this tool call given the failure \
                 below. Reply with JSON only.",
            ),
            ChatMessage::user(format!(
                "tool: {tool_name}\noriginal params: {}\nfailure: {exception}",
                serde_json::to_string(params)?
            )),
        ];

        let reply = self.llm.complete(&prompt).await?;
        let adapted: HashMap<String, Value> = match serde_json::from_str(&reply) {
            Ok(p) => p,
            Err(_) => {
                return Ok(RecoveryOutcome {
                    recovered: false,
                    result: None,
                    strategy: RecoveryStrategy::GiveUp,
                    attempts: 1,
                    tool_used: None,
                    explanation: Some("LLM parameter adaptation returned unparseable JSON".to_string()),
                })
            }
        };

        match self.executor.invoke(goal_execution_id, tool_name, &adapted).await? {
            Ok(value) => Ok(RecoveryOutcome {
                recovered: true,
                result: Some(value),
                strategy: RecoveryStrategy::Adapt,
                attempts: 1,
                tool_used: Some(tool_name.to_string()),
                explanation: None,
            }),
            Err(err) => Ok(RecoveryOutcome {
                recovered: false,
                result: None,
                strategy: RecoveryStrategy::GiveUp,
                attempts: 1,
                tool_used: None,
                explanation: Some(format!("adapted parameters still failed: {err}")),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_core::StubBackend;
    use praxis_store::{Store, VectorIndex};
    use praxis_tools::{SandboxRuntime, ToolRegistry};
    use std::io::Write;

    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{body}").unwrap();
        std::fs::set_permissions(&path, std::os::unix::fs::PermissionsExt::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    async fn harness(dir: &std::path::Path) -> (Arc<ToolExecutor>, Arc<ToolDiscovery>, Arc<ToolRegistry>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let index = Arc::new(VectorIndex::new(4).unwrap());
        let registry = Arc::new(ToolRegistry::new());
        let sandbox = Arc::new(SandboxRuntime::new(Duration::from_secs(5)));
        let executor = Arc::new(ToolExecutor::new(registry.clone(), sandbox, store));
        let discovery = Arc::new(ToolDiscovery::new(index, registry.clone()));
        let _ = dir;
        (executor, discovery, registry)
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, discovery, registry) = harness(dir.path()).await;

        let marker = dir.path().join("flaky_marker");
        let script = format!(
            "#!/bin/sh\ncat > /dev/null\n[ -f {m} ] && {{ echo '{{\"ok\":true}}'; exit 0; }} || {{ touch {m}; exit 1; }}",
            m = marker.display()
        );
        let path = write_script(dir.path(), "flaky", &script);
        registry
            .register(
                praxis_core::ToolDefinition {
                    name: "flaky".to_string(),
                    description: "flaky tool".to_string(),
                    parameters: vec![],
                    characteristics: None,
                    test_cases: vec![],
                    executable_path: path,
                    content_hash: "h".to_string(),
                },
                praxis_core::ToolStatistics::empty("flaky"),
            )
            .await;

        let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::new(4));
        let recovery = ErrorRecovery::new(executor, discovery, llm, 3);
        let outcome = recovery
            .recover(Uuid::new_v4(), "flaky", &HashMap::new(), "request timed out", &[0.0; 4])
            .await
            .unwrap();

        assert!(outcome.recovered);
        assert_eq!(outcome.strategy, RecoveryStrategy::Retry);
    }

    #[tokio::test]
    async fn retry_never_exceeds_the_configured_cap() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, discovery, registry) = harness(dir.path()).await;

        let path = write_script(dir.path(), "always_fails", "#!/bin/sh\ncat > /dev/null\nexit 1");
        registry
            .register(
                praxis_core::ToolDefinition {
                    name: "always_fails".to_string(),
                    description: "never succeeds".to_string(),
                    parameters: vec![],
                    characteristics: None,
                    test_cases: vec![],
                    executable_path: path,
                    content_hash: "h".to_string(),
                },
                praxis_core::ToolStatistics::empty("always_fails"),
            )
            .await;

        let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::new(4));
        let recovery = ErrorRecovery::new(executor, discovery, llm, 3);
        let outcome = recovery
            .recover(Uuid::new_v4(), "always_fails", &HashMap::new(), "connection reset by peer", &[0.0; 4])
            .await
            .unwrap();

        assert!(!outcome.recovered);
        assert_eq!(outcome.strategy, RecoveryStrategy::GiveUp);
        assert_eq!(outcome.attempts, 3, "retry must stop at exactly max_retry_attempts, never loop past it");
    }

    #[tokio::test]
    async fn impossible_failure_gives_up_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, discovery, _registry) = harness(dir.path()).await;
        let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::new(4));
        let recovery = ErrorRecovery::new(executor, discovery, llm, 3);

        let outcome = recovery
            .recover(Uuid::new_v4(), "ghost_tool", &HashMap::new(), "no tool exists for this goal", &[0.0; 4])
            .await
            .unwrap();

        assert!(!outcome.recovered);
        assert_eq!(outcome.strategy, RecoveryStrategy::GiveUp);
        assert_eq!(outcome.attempts, 0);
    }
}
