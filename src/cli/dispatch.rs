//! Mode dispatch: wires up the full dependency graph for each CLI mode
//! and maps the outcome to an exit code.
//!
//! Grounded on the teacher's `cli::dispatch::run_cli_mode`, generalised
//! from tui/plan/execute/evidence to ask/demo/serve/status (§6).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use praxis_agents::{
    AutonomousLoop, DeploymentMonitor, ErrorRecovery, ImprovementEngine, Orchestrator,
    PathwayCacheInvalidator, ToolExecutor,
};
use praxis_core::{EngineConfig, LlmBackend, OpenAiBackend, StubBackend};
use praxis_memory::{DecompositionLearner, PathwayCache};
use praxis_store::{Store, VectorIndex};
use praxis_tools::{FilesystemBackend, LifecycleManager, SandboxRuntime, ToolDiscovery, ToolRegistry};

use super::args::{Cli, Command};
use super::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_SUCCESS};

/// Engine instance with every component wired, shared between the
/// `ask`/`status` one-shot paths and the `serve`/`demo` long-running ones.
struct Engine {
    config: EngineConfig,
    store: Arc<Store>,
    registry: Arc<ToolRegistry>,
    orchestrator: Arc<Orchestrator>,
    lifecycle: Arc<LifecycleManager>,
    improvement: Arc<ImprovementEngine>,
    monitor: Arc<DeploymentMonitor>,
}

fn llm_backend(config: &EngineConfig) -> Arc<dyn LlmBackend> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            info!("using OpenAI-compatible backend at {}", config.llm_base_url);
            Arc::new(OpenAiBackend::new(config, key))
        }
        _ => {
            info!("no OPENAI_API_KEY set, using deterministic stub LLM backend");
            Arc::new(StubBackend::from_config(config))
        }
    }
}

async fn build_engine(config: EngineConfig, in_memory: bool) -> anyhow::Result<Engine> {
    std::fs::create_dir_all(&config.tool_dir)?;

    let store = Arc::new(if in_memory {
        Store::open_in_memory()?
    } else {
        std::fs::create_dir_all(&config.data_dir)?;
        Store::open(config.data_dir.join("praxis.sqlite3"))?
    });
    let vector = Arc::new(VectorIndex::new(config.embedding_dim)?);

    let pathway_cache = Arc::new(PathwayCache::new(store.clone(), vector.clone()));
    pathway_cache.warm_up().await?;
    let decomposition = Arc::new(DecompositionLearner::new(store.clone(), vector.clone()));
    // Every pattern this workspace writes is stamped "general" (see
    // Orchestrator::execute_inner's write-back call), so that's the only
    // goal_type warm_up needs to load on startup.
    decomposition.warm_up("general").await?;

    let registry = Arc::new(ToolRegistry::new());
    let discovery_backend = Arc::new(FilesystemBackend::new(config.tool_dir.clone()));
    let invalidator: Arc<dyn praxis_tools::PathwayInvalidator> =
        Arc::new(PathwayCacheInvalidator::new(pathway_cache.clone()));
    let tool_discovery = Arc::new(ToolDiscovery::new(vector, registry.clone()));
    let llm = llm_backend(&config);
    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        registry.clone(),
        discovery_backend,
        tool_discovery.clone(),
        llm.clone(),
        invalidator.clone(),
        config.clone(),
    ));
    lifecycle.reconcile().await?;

    let sandbox = Arc::new(SandboxRuntime::new(config.tool_timeout));
    let executor = Arc::new(ToolExecutor::new(registry.clone(), sandbox.clone(), store.clone()));

    let recovery = Arc::new(ErrorRecovery::new(
        executor.clone(),
        tool_discovery.clone(),
        llm.clone(),
        config.max_retry_attempts,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        store.clone(),
        pathway_cache,
        decomposition,
        registry.clone(),
        tool_discovery,
        executor,
        recovery,
        llm.clone(),
    ));

    let improvement = Arc::new(ImprovementEngine::new(
        store.clone(),
        registry.clone(),
        invalidator.clone(),
        llm,
        sandbox,
        config.tool_dir.clone(),
    ));
    let monitor = Arc::new(DeploymentMonitor::new(
        store.clone(),
        registry.clone(),
        invalidator,
        config.tool_dir.clone(),
        config.monitor_window_standard,
    ));

    Ok(Engine { config, store, registry, orchestrator, lifecycle, improvement, monitor })
}

pub async fn run(cli: Cli) -> i32 {
    let mut config = match EngineConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load config: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };
    if let Some(dir) = cli.data_dir {
        config.tool_dir = dir.join("tools");
        config.data_dir = dir;
    }

    match cli.command {
        Command::Ask { goal } => run_ask(config, &goal, cli.json).await,
        Command::Demo => run_demo(config).await,
        Command::Serve => run_serve(config).await,
        Command::Status => run_status(config, cli.json).await,
    }
}

async fn run_ask(config: EngineConfig, goal: &str, json: bool) -> i32 {
    let engine = match build_engine(config, false).await {
        Ok(e) => e,
        Err(e) => {
            error!("failed to initialize engine: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    match engine.orchestrator.execute(goal).await {
        Ok(outcome) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
            } else if outcome.success {
                println!("done in {}ms: {:?}", outcome.duration_ms, outcome.value);
            } else {
                println!("failed: {}", outcome.explanation.unwrap_or_default());
            }
            if outcome.success { EXIT_SUCCESS } else { EXIT_FAILURE }
        }
        Err(e) => {
            error!("ask failed: {}", e);
            EXIT_FAILURE
        }
    }
}

async fn run_status(config: EngineConfig, json: bool) -> i32 {
    let engine = match build_engine(config, false).await {
        Ok(e) => e,
        Err(e) => {
            error!("failed to initialize engine: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let executions = engine.store.count_executions().await;
    let pathways = engine.store.list_valid_pathways().await;
    let patterns = engine.store.count_patterns().await;
    let tools = engine.registry.len().await;

    match (executions, pathways, patterns) {
        (Ok(executions), Ok(pathways), Ok(patterns)) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "ok",
                        "total_executions": executions,
                        "valid_pathways": pathways.len(),
                        "learned_patterns": patterns,
                        "available_tools": tools,
                    })
                );
            } else {
                println!("status: ok");
                println!("  executions:      {executions}");
                println!("  valid pathways:  {}", pathways.len());
                println!("  learned patterns:{patterns}");
                println!("  available tools: {tools}");
            }
            EXIT_SUCCESS
        }
        _ => {
            error!("failed to read status from the store");
            EXIT_FAILURE
        }
    }
}

async fn run_demo(mut config: EngineConfig) -> i32 {
    config.tool_dir = std::env::temp_dir().join(format!("praxis-demo-{}", uuid::Uuid::new_v4()));

    let engine = match build_engine(config, true).await {
        Ok(e) => e,
        Err(e) => {
            error!("failed to initialize demo engine: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let cancel = CancellationToken::new();
    let autonomous = Arc::new(AutonomousLoop::new(
        engine.config.clone(),
        engine.store.clone(),
        engine.lifecycle.clone(),
        engine.improvement.clone(),
        engine.monitor.clone(),
    ));
    let (check, maintenance) = autonomous.spawn(cancel.clone());

    for goal in ["what can you do?", "list the registered tools"] {
        match engine.orchestrator.execute(goal).await {
            Ok(outcome) => println!("> {goal}\n{}", outcome.explanation.unwrap_or_default()),
            Err(e) => println!("> {goal}\nerror: {e}"),
        }
    }

    cancel.cancel();
    let _ = tokio::join!(check, maintenance);
    EXIT_SUCCESS
}

async fn run_serve(config: EngineConfig) -> i32 {
    let engine = match build_engine(config, false).await {
        Ok(e) => e,
        Err(e) => {
            error!("failed to initialize engine: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let bind_addr = match engine.config.api_bind_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid api_bind_addr {}: {}", engine.config.api_bind_addr, e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let cancel = CancellationToken::new();
    let autonomous = Arc::new(AutonomousLoop::new(
        engine.config.clone(),
        engine.store.clone(),
        engine.lifecycle.clone(),
        engine.improvement.clone(),
        engine.monitor.clone(),
    ));
    let (check, maintenance) = autonomous.spawn(cancel.clone());

    let state = Arc::new(praxis_api::ApiState {
        orchestrator: engine.orchestrator.clone(),
        store: engine.store.clone(),
        registry: engine.registry.clone(),
    });
    let server = praxis_api::ApiServer::new(bind_addr, state);

    let result = tokio::select! {
        r = server.run() => r.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    cancel.cancel();
    let _ = tokio::join!(check, maintenance);

    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!("server error: {}", e);
            EXIT_FAILURE
        }
    }
}

