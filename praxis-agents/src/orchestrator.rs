//! Orchestrator (C7): drives a single goal through cache lookup, pattern
//! lookup, intent classification, decomposition, tool selection, code
//! generation, sandboxed execution, recovery, and cache/pattern
//! write-back (§4.1).
//!
//! Grounded on `agents/src/coordinator/mod.rs`'s `AgentCoordinator` shape
//! (an async value holding `Arc`-shared dependencies, driving multi-step
//! work under `tracing` spans) and `src/execution_engine/executor.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use praxis_core::{
    ChatMessage, EngineConfig, EngineOutcome, GoalExecution, Intent, LlmBackend, Pathway, TraceStep,
};
use praxis_memory::{DecompositionLearner, PathwayCache};
use praxis_store::Store;
use praxis_tools::{ToolDiscovery, ToolRegistry};
use serde_json::Value;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::error::AgentsError;
use crate::executor::ToolExecutor;
use crate::recovery::ErrorRecovery;

const TOOL_SELECTION_TOP_K: usize = 5;

/// Local lookup table tried before asking the LLM to classify intent —
/// the same local-heuristics-first preference §4.2 calls out for C6.
fn classify_intent_by_keywords(goal_text: &str) -> Option<Intent> {
    let lower = goal_text.to_lowercase();
    let conversational = ["what is", "why does", "explain", "how do you feel", "tell me about"];
    let impossible = ["travel back in time", "divide by zero", "violate physics"];

    if impossible.iter().any(|m| lower.contains(m)) {
        return Some(Intent::Impossible);
    }
    if conversational.iter().any(|m| lower.starts_with(m)) {
        return Some(Intent::Conversation);
    }
    None
}

pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<Store>,
    pathway_cache: Arc<PathwayCache>,
    decomposition: Arc<DecompositionLearner>,
    registry: Arc<ToolRegistry>,
    discovery: Arc<ToolDiscovery>,
    executor: Arc<ToolExecutor>,
    recovery: Arc<ErrorRecovery>,
    llm: Arc<dyn LlmBackend>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        store: Arc<Store>,
        pathway_cache: Arc<PathwayCache>,
        decomposition: Arc<DecompositionLearner>,
        registry: Arc<ToolRegistry>,
        discovery: Arc<ToolDiscovery>,
        executor: Arc<ToolExecutor>,
        recovery: Arc<ErrorRecovery>,
        llm: Arc<dyn LlmBackend>,
    ) -> Self {
        Self { config, store, pathway_cache, decomposition, registry, discovery, executor, recovery, llm }
    }

    pub async fn execute(&self, goal_text: &str) -> Result<EngineOutcome, AgentsError> {
        let goal_id = Uuid::new_v4();
        let span = info_span!("orchestrator.execute", goal_id = %goal_id);
        self.execute_inner(goal_id, goal_text).instrument(span).await
    }

    async fn execute_inner(&self, goal_id: Uuid, goal_text: &str) -> Result<EngineOutcome, AgentsError> {
        let started = Instant::now();
        let embedding = self.llm.embed(goal_text).await?;

        // 1. Cache lookup ("System 1" path).
        if let Some(pathway) = self.pathway_cache.find(&embedding, self.config.pathway_cache_threshold).await {
            let stale = self.stale_dependencies(&pathway).await;
            if stale.is_empty() {
                info!("cache hit for goal {}, replaying {} step(s)", goal_id, pathway.trace.len());
                match self.replay_pathway(goal_id, &pathway).await {
                    Ok(outcome) => {
                        self.pathway_cache.record_outcome(pathway.id, true).await.ok();
                        return Ok(EngineOutcome { duration_ms: started.elapsed().as_millis() as u64, ..outcome });
                    }
                    Err(_) => {
                        self.pathway_cache.record_outcome(pathway.id, false).await.ok();
                        // fall through to full reasoning below
                    }
                }
            } else {
                for tool_name in &stale {
                    self.pathway_cache.invalidate_by_tool(tool_name).await.ok();
                }
            }
        }

        // 2. Pattern lookup.
        let subgoals = match self.decomposition.suggest(&embedding, self.config.pattern_suggestion_threshold).await {
            Some(suggestion) => suggestion.subgoals,
            None => self.decompose_with_llm(goal_text).await?,
        };

        // 3. Intent classification.
        let intent = self.classify_intent(goal_text).await?;
        if intent == Intent::Impossible {
            let explanation = format!("goal cannot be satisfied by any known tool: {goal_text}");
            self.store
                .record_execution(&GoalExecution {
                    id: goal_id,
                    goal_text: goal_text.to_string(),
                    intent,
                    success: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error_summary: Some(explanation.clone()),
                    metadata: HashMap::new(),
                    created_at: Utc::now(),
                })
                .await?;
            return Ok(EngineOutcome::failure(explanation, Vec::new()));
        }
        if intent == Intent::Conversation {
            let reply = self.llm.complete(&[ChatMessage::user(goal_text)]).await?;
            self.store
                .record_execution(&GoalExecution {
                    id: goal_id,
                    goal_text: goal_text.to_string(),
                    intent,
                    success: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error_summary: None,
                    metadata: HashMap::new(),
                    created_at: Utc::now(),
                })
                .await?;
            return Ok(EngineOutcome {
                success: true,
                value: Some(Value::String(reply)),
                tool_chain: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
                used_cached_pathway: false,
                recovery_fired: false,
                explanation: None,
                strategies_tried: Vec::new(),
            });
        }

        // 4-7. Tool selection, parameter synthesis, sandbox execution,
        // recovery, write-back — once per subgoal (or the whole goal if
        // decomposition produced none).
        let steps: Vec<String> = if subgoals.is_empty() { vec![goal_text.to_string()] } else { subgoals.clone() };
        let mut trace = Vec::new();
        let mut tool_dependencies = HashMap::new();
        let mut tool_chain = Vec::new();
        let mut strategies_tried = Vec::new();
        let mut last_value: Option<Value> = None;

        for step_text in &steps {
            match self.run_step(goal_id, step_text, &embedding).await {
                Ok((tool_name, content_hash, params, value, strategy)) => {
                    trace.push(TraceStep { tool: tool_name.clone(), params, result_summary: summarize(&value) });
                    tool_dependencies.insert(tool_name.clone(), content_hash);
                    tool_chain.push(tool_name);
                    if let Some(s) = strategy {
                        strategies_tried.push(s);
                    }
                    last_value = Some(value);
                }
                Err(explanation) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.store
                        .record_execution(&GoalExecution {
                            id: goal_id,
                            goal_text: goal_text.to_string(),
                            intent,
                            success: false,
                            duration_ms,
                            error_summary: Some(explanation.clone()),
                            metadata: HashMap::new(),
                            created_at: Utc::now(),
                        })
                        .await?;
                    return Ok(EngineOutcome { duration_ms, ..EngineOutcome::failure(explanation, strategies_tried) });
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.store
            .record_execution(&GoalExecution {
                id: goal_id,
                goal_text: goal_text.to_string(),
                intent,
                success: true,
                duration_ms,
                error_summary: None,
                metadata: HashMap::new(),
                created_at: Utc::now(),
            })
            .await?;
        self.pathway_cache.store(goal_text, embedding.clone(), trace, tool_dependencies).await?;
        self.decomposition
            .store(goal_text, "general", steps.clone(), true, duration_ms, tool_chain.clone(), embedding)
            .await?;

        Ok(EngineOutcome {
            success: true,
            value: last_value,
            tool_chain,
            duration_ms,
            used_cached_pathway: false,
            recovery_fired: !strategies_tried.is_empty(),
            explanation: None,
            strategies_tried,
        })
    }

    /// Names of the dependencies whose registered content hash no longer
    /// matches the hash the pathway was cached against (deleted tools
    /// included). Empty means the pathway is still safe to replay.
    async fn stale_dependencies(&self, pathway: &Pathway) -> Vec<String> {
        let mut stale = Vec::new();
        for (tool_name, hash) in &pathway.tool_dependencies {
            match self.registry.get(tool_name).await {
                Ok(record) if &record.definition.content_hash == hash => continue,
                _ => stale.push(tool_name.clone()),
            }
        }
        stale
    }

    async fn replay_pathway(&self, goal_id: Uuid, pathway: &Pathway) -> Result<EngineOutcome, AgentsError> {
        let mut tool_chain = Vec::new();
        let mut last_value = None;
        for step in &pathway.trace {
            let params: HashMap<String, Value> = match &step.params {
                Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                _ => HashMap::new(),
            };
            match self.executor.invoke(goal_id, &step.tool, &params).await? {
                Ok(value) => {
                    tool_chain.push(step.tool.clone());
                    last_value = Some(value);
                }
                Err(err) => return Err(AgentsError::NoToolSelected(format!("cached step {} failed: {err}", step.tool))),
            }
        }
        Ok(EngineOutcome {
            success: true,
            value: last_value,
            tool_chain,
            duration_ms: 0,
            used_cached_pathway: true,
            recovery_fired: false,
            explanation: None,
            strategies_tried: Vec::new(),
        })
    }

    async fn classify_intent(&self, goal_text: &str) -> Result<Intent, AgentsError> {
        if let Some(intent) = classify_intent_by_keywords(goal_text) {
            return Ok(intent);
        }
        let prompt = vec![
            ChatMessage::system(
                "Classify the user's goal as exactly one word: tool_use, conversation, or impossible.",
            ),
            ChatMessage::user(goal_text),
        ];
        let reply = self.llm.complete(&prompt).await?.to_lowercase();
        Ok(if reply.contains("impossible") {
            Intent::Impossible
        } else if reply.contains("conversation") {
            Intent::Conversation
        } else {
            Intent::ToolUse
        })
    }

    async fn decompose_with_llm(&self, goal_text: &str) -> Result<Vec<String>, AgentsError> {
        let prompt = vec![
            ChatMessage::system("Break the goal into an ordered list of subgoals, one per line. If it is already atomic, reply with just the goal."),
            ChatMessage::user(goal_text),
        ];
        let reply = self.llm.complete(&prompt).await?;
        Ok(reply.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Steps 4-7 for a single (sub)goal: select a tool, synthesise
    /// parameters, execute, recover on failure. Returns the tool used,
    /// its content hash, the params it was invoked with, the result
    /// value, and the recovery strategy name if recovery fired.
    async fn run_step(
        &self,
        goal_id: Uuid,
        step_text: &str,
        embedding: &[f32],
    ) -> Result<(String, String, Value, Value, Option<String>), String> {
        let step_embedding = self.llm.embed(step_text).await.map_err(|e| e.to_string())?;
        let candidates = self
            .discovery
            .discover(&step_embedding, TOOL_SELECTION_TOP_K, None)
            .await
            .map_err(|e| e.to_string())?;
        if candidates.is_empty() {
            return Err(format!("no candidate tool found for subgoal: {step_text}"));
        }

        let hint_list: Vec<String> = candidates.iter().map(|c| c.record.definition.name.clone()).collect();
        let selection_prompt = vec![
            ChatMessage::system(format!(
                "Choose exactly one tool name from this list for the subgoal, reply with the name only: {}",
                hint_list.join(", ")
            )),
            ChatMessage::user(step_text),
        ];
        let mut chosen = self.llm.complete(&selection_prompt).await.map_err(|e| e.to_string())?.trim().to_string();
        if !hint_list.iter().any(|n| n == &chosen) {
            // selection error: retry once with the narrower candidate list
            let retry_prompt = vec![
                ChatMessage::system(format!("Pick exactly one of: {}", hint_list.join(", "))),
                ChatMessage::user(step_text),
            ];
            chosen = self.llm.complete(&retry_prompt).await.map_err(|e| e.to_string())?.trim().to_string();
            if !hint_list.iter().any(|n| n == &chosen) {
                chosen = hint_list[0].clone();
            }
        }

        let param_prompt = vec![
            ChatMessage::system("Emit a JSON object of parameters for this tool call. Reply with JSON only."),
            ChatMessage::user(format!("tool: {chosen}\nsubgoal: {step_text}")),
        ];
        let param_reply = self.llm.complete(&param_prompt).await.map_err(|e| e.to_string())?;
        let params: HashMap<String, Value> = serde_json::from_str(&param_reply).unwrap_or_default();

        let content_hash =
            self.registry.get(&chosen).await.map(|r| r.definition.content_hash).unwrap_or_default();
        let params_value = serde_json::to_value(&params).unwrap_or(Value::Null);

        match self.executor.invoke(goal_id, &chosen, &params).await.map_err(|e| e.to_string())? {
            Ok(value) => Ok((chosen, content_hash, params_value, value, None)),
            Err(exception) => {
                let outcome = self
                    .recovery
                    .recover(goal_id, &chosen, &params, &exception, embedding)
                    .await
                    .map_err(|e| e.to_string())?;
                match (outcome.recovered, outcome.result, outcome.tool_used) {
                    (true, Some(value), Some(tool_used)) => {
                        let hash = self.registry.get(&tool_used).await.map(|r| r.definition.content_hash).unwrap_or_default();
                        Ok((tool_used, hash, params_value, value, Some(outcome.strategy.to_string())))
                    }
                    _ => Err(outcome.explanation.unwrap_or_else(|| format!("recovery failed for {chosen}"))),
                }
            }
        }
    }
}

fn summarize(value: &Value) -> String {
    let s = value.to_string();
    if s.len() > 200 {
        format!("{}...", &s[..200])
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_core::StubBackend;
    use praxis_store::VectorIndex;
    use praxis_tools::{SandboxRuntime, ToolRegistry};
    use std::io::Write;
    use std::time::Duration;

    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{body}").unwrap();
        std::fs::set_permissions(&path, std::os::unix::fs::PermissionsExt::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn conversational_goal_skips_tool_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vector = Arc::new(VectorIndex::new(4).unwrap());
        let pathway_cache = Arc::new(PathwayCache::new(store.clone(), vector.clone()));
        let decomposition = Arc::new(DecompositionLearner::new(store.clone(), vector.clone()));
        let registry = Arc::new(ToolRegistry::new());
        let discovery = Arc::new(ToolDiscovery::new(vector.clone(), registry.clone()));
        let sandbox = Arc::new(SandboxRuntime::new(Duration::from_secs(5)));
        let executor = Arc::new(ToolExecutor::new(registry.clone(), sandbox, store.clone()));
        let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::new(4));
        let recovery = Arc::new(ErrorRecovery::new(executor.clone(), discovery.clone(), llm.clone(), 3));
        let config = EngineConfig::permissive(dir.path().to_path_buf());

        let orchestrator = Orchestrator::new(
            config, store, pathway_cache, decomposition, registry, discovery, executor, recovery, llm,
        );

        let outcome = orchestrator.execute("What is the capital of France?").await.unwrap();
        assert!(outcome.success);
        assert!(outcome.tool_chain.is_empty());
    }

    #[tokio::test]
    async fn impossible_goal_fails_without_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vector = Arc::new(VectorIndex::new(4).unwrap());
        let pathway_cache = Arc::new(PathwayCache::new(store.clone(), vector.clone()));
        let decomposition = Arc::new(DecompositionLearner::new(store.clone(), vector.clone()));
        let registry = Arc::new(ToolRegistry::new());
        let discovery = Arc::new(ToolDiscovery::new(vector.clone(), registry.clone()));
        let sandbox = Arc::new(SandboxRuntime::new(Duration::from_secs(5)));
        let executor = Arc::new(ToolExecutor::new(registry.clone(), sandbox, store.clone()));
        let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::new(4));
        let recovery = Arc::new(ErrorRecovery::new(executor.clone(), discovery.clone(), llm.clone(), 3));
        let config = EngineConfig::permissive(dir.path().to_path_buf());

        let orchestrator = Orchestrator::new(
            config, store, pathway_cache, decomposition, registry, discovery, executor, recovery, llm,
        );

        let outcome = orchestrator.execute("please divide by zero for me").await.unwrap();
        assert!(!outcome.success);
        assert!(!outcome.recovery_fired);
    }

    #[tokio::test]
    async fn tool_use_goal_executes_the_only_registered_tool() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo_tool", "#!/bin/sh\ncat > /dev/null\necho '{\"ok\":true}'\n");

        let store = Arc::new(Store::open_in_memory().unwrap());
        let vector = Arc::new(VectorIndex::new(4).unwrap());
        let pathway_cache = Arc::new(PathwayCache::new(store.clone(), vector.clone()));
        let decomposition = Arc::new(DecompositionLearner::new(store.clone(), vector.clone()));
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                praxis_core::ToolDefinition {
                    name: "echo_tool".to_string(),
                    description: "echoes back ok".to_string(),
                    parameters: vec![],
                    characteristics: None,
                    test_cases: vec![],
                    executable_path: script,
                    content_hash: "hash1".to_string(),
                },
                praxis_core::ToolStatistics::empty("echo_tool"),
            )
            .await;
        let discovery = Arc::new(ToolDiscovery::new(vector.clone(), registry.clone()));
        discovery.index_description("echo_tool", vec![1.0, 0.0, 0.0, 0.0]).await.unwrap();

        let sandbox = Arc::new(SandboxRuntime::new(Duration::from_secs(5)));
        let executor = Arc::new(ToolExecutor::new(registry.clone(), sandbox, store.clone()));
        let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::new(4));
        let recovery = Arc::new(ErrorRecovery::new(executor.clone(), discovery.clone(), llm.clone(), 3));
        let config = EngineConfig::permissive(dir.path().to_path_buf());

        let orchestrator = Orchestrator::new(
            config, store, pathway_cache, decomposition, registry, discovery, executor, recovery, llm,
        );

        let outcome = orchestrator.execute("run the echo tool please").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.tool_chain, vec!["echo_tool".to_string()]);
    }
}
