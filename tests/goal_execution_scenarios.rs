//! End-to-end goal-execution scenarios driving the full dependency graph
//! (store, vector index, pathway cache, registry, lifecycle, discovery,
//! sandbox, executor, recovery, orchestrator) the way `build_engine` in
//! the `praxis` binary wires it, minus the CLI/HTTP layer.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use praxis_agents::{ErrorRecovery, Orchestrator, PathwayCacheInvalidator, ToolExecutor};
use praxis_core::{EngineConfig, LlmBackend, StubBackend};
use praxis_memory::{DecompositionLearner, PathwayCache};
use praxis_store::{Store, VectorIndex};
use praxis_tools::{FilesystemBackend, LifecycleManager, ToolDiscovery, ToolManifest, ToolRegistry};

fn write_tool(dir: &std::path::Path, name: &str, description: &str, script: &str) {
    let exe_path = dir.join(name);
    let mut f = std::fs::File::create(&exe_path).unwrap();
    write!(f, "{script}").unwrap();
    std::fs::set_permissions(&exe_path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let manifest = ToolManifest {
        name: name.to_string(),
        description: description.to_string(),
        parameters: vec![],
        characteristics: None,
        test_cases: vec![],
        executable: name.to_string(),
    };
    std::fs::write(dir.join(format!("{name}.tool.json")), serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();
}

async fn build_stack(tool_dir: &std::path::Path) -> Arc<Orchestrator> {
    let config = EngineConfig::permissive(tool_dir.parent().unwrap().to_path_buf());

    let store = Arc::new(Store::open_in_memory().unwrap());
    let pathway_vector = Arc::new(VectorIndex::new(config.embedding_dim).unwrap());
    let tool_vector = Arc::new(VectorIndex::new(config.embedding_dim).unwrap());

    let pathway_cache = Arc::new(PathwayCache::new(store.clone(), pathway_vector.clone()));
    let decomposition = Arc::new(DecompositionLearner::new(store.clone(), pathway_vector));

    let registry = Arc::new(ToolRegistry::new());
    let discovery = Arc::new(ToolDiscovery::new(tool_vector, registry.clone()));
    let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::from_config(&config));

    let discovery_backend = Arc::new(FilesystemBackend::new(tool_dir));
    let invalidator = Arc::new(PathwayCacheInvalidator::new(pathway_cache.clone()));
    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        registry.clone(),
        discovery_backend,
        discovery.clone(),
        llm.clone(),
        invalidator.clone(),
        config.clone(),
    ));
    lifecycle.reconcile().await.unwrap();

    let sandbox = Arc::new(praxis_tools::SandboxRuntime::new(config.tool_timeout));
    let executor = Arc::new(ToolExecutor::new(registry.clone(), sandbox, store.clone()));
    let recovery = Arc::new(ErrorRecovery::new(executor.clone(), discovery.clone(), llm.clone(), config.max_retry_attempts));

    Arc::new(Orchestrator::new(
        config, store, pathway_cache, decomposition, registry, discovery, executor, recovery, llm,
    ))
}

/// S1: cache miss-then-hit. The first run does full reasoning and caches
/// a pathway; the second run with the same goal hits the cache and
/// replays the same tool chain without re-reasoning.
#[tokio::test]
async fn cache_miss_then_hit_replays_the_same_tool_chain() {
    let dir = tempfile::tempdir().unwrap();
    let tool_dir = dir.path().join("tools");
    std::fs::create_dir_all(&tool_dir).unwrap();
    write_tool(&tool_dir, "greeter", "says hello back", "#!/bin/sh\ncat > /dev/null\necho '{\"greeting\":\"hi\"}'\n");

    let orchestrator = build_stack(&tool_dir).await;
    let goal = "greet the user";

    let first = orchestrator.execute(goal).await.unwrap();
    assert!(first.success, "first run should succeed: {:?}", first.explanation);
    assert!(!first.used_cached_pathway);
    assert_eq!(first.tool_chain, vec!["greeter".to_string()]);

    let second = orchestrator.execute(goal).await.unwrap();
    assert!(second.success);
    assert!(second.used_cached_pathway, "second run with the same goal should hit the pathway cache");
    assert_eq!(second.tool_chain, first.tool_chain);
    assert_eq!(second.value, first.value);
}

/// S2: a tool that fails with a transient error the first time but
/// succeeds on retry should be recovered from without the goal failing.
#[tokio::test]
async fn transient_failure_is_recovered_by_retry() {
    let dir = tempfile::tempdir().unwrap();
    let tool_dir = dir.path().join("tools");
    std::fs::create_dir_all(&tool_dir).unwrap();

    let counter_path = dir.path().join("flaky_tool.count");
    std::fs::write(&counter_path, "0").unwrap();
    let script = format!(
        "#!/bin/sh\ncat > /dev/null\ncount=$(cat {0})\nif [ \"$count\" = \"0\" ]; then\n  echo 1 > {0}\n  echo 'connection reset by peer' 1>&2\n  exit 1\nfi\necho '{{\"status\":\"ok\"}}'\n",
        counter_path.display()
    );
    write_tool(&tool_dir, "flaky_tool", "occasionally flaky network call", &script);

    let orchestrator = build_stack(&tool_dir).await;
    let outcome = orchestrator.execute("call the flaky network service").await.unwrap();

    assert!(outcome.success, "goal should succeed once recovery retries the tool: {:?}", outcome.explanation);
    assert!(outcome.recovery_fired);
    assert_eq!(outcome.strategies_tried, vec!["retry".to_string()]);
}

/// Boundary: with zero registered tools, a tool-use goal fails cleanly
/// instead of panicking or hanging.
#[tokio::test]
async fn zero_registered_tools_fails_the_goal_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let tool_dir = dir.path().join("tools");
    std::fs::create_dir_all(&tool_dir).unwrap();

    let orchestrator = build_stack(&tool_dir).await;
    let outcome = orchestrator.execute("do the only available thing").await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.explanation.is_some());
}
