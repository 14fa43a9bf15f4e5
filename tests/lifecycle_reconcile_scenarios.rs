//! Scenarios exercising `LifecycleManager::reconcile` against the rest of
//! the dependency graph: a tool vanishing from disk must invalidate any
//! pathway that depends on it, not just the registry entry.

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

fn remove_tool(dir: &std::path::Path, name: &str) {
    std::fs::remove_file(dir.join(name)).unwrap();
    std::fs::remove_file(dir.join(format!("{name}.tool.json"))).unwrap();
}

/// S3: a pathway that was cached while `backup_tool` was present becomes
/// unfindable the moment `Reconcile` notices the tool is gone from disk —
/// invalidation must flow lifecycle -> pathway cache, not just registry.
#[tokio::test]
async fn tool_deletion_invalidates_the_pathway_that_depends_on_it() {
    let dir = tempfile::tempdir().unwrap();
    let tool_dir = dir.path().join("tools");
    std::fs::create_dir_all(&tool_dir).unwrap();
    write_tool(&tool_dir, "backup_tool", "backs up the database", "#!/bin/sh\ncat > /dev/null\necho '{\"ok\":true}'\n");

    let config = EngineConfig::permissive(dir.path().to_path_buf());
    let store = Arc::new(Store::open_in_memory().unwrap());
    let pathway_vector = Arc::new(VectorIndex::new(config.embedding_dim).unwrap());
    let tool_vector = Arc::new(VectorIndex::new(config.embedding_dim).unwrap());

    let pathway_cache = Arc::new(PathwayCache::new(store.clone(), pathway_vector.clone()));
    let decomposition = Arc::new(DecompositionLearner::new(store.clone(), pathway_vector));
    let registry = Arc::new(ToolRegistry::new());
    let discovery = Arc::new(ToolDiscovery::new(tool_vector, registry.clone()));
    let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::from_config(&config));

    let discovery_backend = Arc::new(FilesystemBackend::new(&tool_dir));
    let invalidator = Arc::new(PathwayCacheInvalidator::new(pathway_cache.clone()));
    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        registry.clone(),
        discovery_backend,
        discovery.clone(),
        llm.clone(),
        invalidator,
        config.clone(),
    ));
    lifecycle.reconcile().await.unwrap();

    let sandbox = Arc::new(praxis_tools::SandboxRuntime::new(config.tool_timeout));
    let executor = Arc::new(ToolExecutor::new(registry.clone(), sandbox, store.clone()));
    let recovery = Arc::new(ErrorRecovery::new(executor.clone(), discovery.clone(), llm.clone(), config.max_retry_attempts));
    let orchestrator = Orchestrator::new(
        config, store, pathway_cache.clone(), decomposition, registry, discovery, executor, recovery, llm.clone(),
    );

    let goal = "back up the database now";
    let outcome = orchestrator.execute(goal).await.unwrap();
    assert!(outcome.success, "seeding run should succeed: {:?}", outcome.explanation);

    let embedding = llm.embed(goal).await.unwrap();
    assert!(pathway_cache.find(&embedding, 0.90).await.is_some(), "pathway should be cached before deletion");

    remove_tool(&tool_dir, "backup_tool");
    let report = lifecycle.reconcile().await.unwrap();
    assert_eq!(report.deleted, vec!["backup_tool".to_string()]);

    assert!(
        pathway_cache.find(&embedding, 0.90).await.is_none(),
        "pathway depending on a deleted tool must no longer be findable"
    );
}

/// Reconcile is idempotent: running it again with no filesystem changes
/// produces an empty report.
#[tokio::test]
async fn reconcile_with_no_changes_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let tool_dir = dir.path().join("tools");
    std::fs::create_dir_all(&tool_dir).unwrap();
    write_tool(&tool_dir, "steady_tool", "does one thing reliably", "#!/bin/sh\ncat > /dev/null\necho '{\"ok\":true}'\n");

    let config = EngineConfig::permissive(dir.path().to_path_buf());
    let store = Arc::new(Store::open_in_memory().unwrap());
    let tool_vector = Arc::new(VectorIndex::new(config.embedding_dim).unwrap());
    let registry = Arc::new(ToolRegistry::new());
    let discovery = Arc::new(ToolDiscovery::new(tool_vector, registry.clone()));
    let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::from_config(&config));
    let discovery_backend = Arc::new(FilesystemBackend::new(&tool_dir));
    let invalidator = Arc::new(praxis_tools::NoopInvalidator);
    let lifecycle = LifecycleManager::new(store, registry, discovery_backend, discovery, llm, invalidator, config);

    let first = lifecycle.reconcile().await.unwrap();
    assert_eq!(first.registered, vec!["steady_tool".to_string()]);

    let second = lifecycle.reconcile().await.unwrap();
    assert!(second.registered.is_empty());
    assert!(second.deleted.is_empty());
    assert!(second.hash_changed.is_empty());
}
