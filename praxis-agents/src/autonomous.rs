//! Autonomous Loop (C11): the background scheduler that periodically
//! reconciles the tool directory, checks active deployments, and spends a
//! bounded budget of improvement attempts per cycle (§4.8).
//!
//! Grounded on the teacher's `tokio::time::interval`-driven background
//! tasks (`agents/src/coordinator/mod.rs`'s task spawning) generalised to
//! two independent cadences, cooperatively cancelled via
//! `tokio_util::sync::CancellationToken` as §5 requires.

use std::sync::Arc;

use praxis_core::EngineConfig;
use praxis_store::Store;
use praxis_tools::LifecycleManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::improvement::ImprovementEngine;
use crate::monitor::DeploymentMonitor;

pub struct AutonomousLoop {
    config: EngineConfig,
    store: Arc<Store>,
    lifecycle: Arc<LifecycleManager>,
    improvement: Arc<ImprovementEngine>,
    monitor: Arc<DeploymentMonitor>,
}

impl AutonomousLoop {
    pub fn new(
        config: EngineConfig,
        store: Arc<Store>,
        lifecycle: Arc<LifecycleManager>,
        improvement: Arc<ImprovementEngine>,
        monitor: Arc<DeploymentMonitor>,
    ) -> Self {
        Self { config, store, lifecycle, improvement, monitor }
    }

    /// Spawn the two interval-driven background tasks. Returns their
    /// join handles so the caller (`serve`/`demo` CLI modes) can await
    /// clean shutdown after cancelling the token.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let check_loop = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run_check_loop(cancel).await })
        };
        let maintenance_loop = {
            let this = self.clone();
            tokio::spawn(async move { this.run_maintenance_loop(cancel).await })
        };
        (check_loop, maintenance_loop)
    }

    async fn run_check_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.autonomous_loop_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("autonomous check loop cancelled");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_check_cycle().await {
                        warn!("autonomous check cycle failed: {}", e);
                    }
                }
            }
        }
    }

    async fn run_maintenance_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.maintenance_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("autonomous maintenance loop cancelled");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_maintenance_cycle().await {
                        warn!("autonomous maintenance cycle failed: {}", e);
                    }
                }
            }
        }
    }

    /// One `check_interval` cycle: reconcile, check active deployments,
    /// detect and act on improvement opportunities.
    async fn run_check_cycle(&self) -> Result<(), crate::error::AgentsError> {
        let report = self.lifecycle.reconcile().await?;
        info!(
            "reconcile: {} registered, {} deleted, {} archived, {} hash changes",
            report.registered.len(),
            report.deleted.len(),
            report.archived.len(),
            report.hash_changed.len()
        );

        let active_sessions = self.store.list_active_monitoring_sessions().await?;
        for session in &active_sessions {
            if let Err(e) = self.monitor.check_once(session.id).await {
                warn!("health check failed for session {}: {}", session.id, e);
            }
        }

        let opportunities = self.detect_opportunities().await?;
        for tool_name in opportunities.into_iter().take(self.config.max_improvements_per_cycle) {
            info!("autonomous loop improving {}", tool_name);
            match self.improvement.improve(&tool_name).await {
                Ok(improvement_report) if improvement_report.deployed => {
                    if let Some(version_id) = improvement_report.version_id {
                        let baseline = self
                            .store
                            .get_tool_statistics(&tool_name)
                            .await?
                            .map(|s| s.success_rate())
                            .unwrap_or(0.0);
                        if let Err(e) = self.monitor.start_session(&tool_name, version_id, baseline).await {
                            warn!("failed to start monitoring session for {}: {}", tool_name, e);
                        }
                    }
                }
                Ok(improvement_report) => {
                    info!("improvement for {} not deployed: {}", tool_name, improvement_report.explanation);
                }
                Err(e) => warn!("improvement attempt for {} failed: {}", tool_name, e),
            }
        }

        Ok(())
    }

    /// Every deployed tool with a success rate below `improvement_threshold`
    /// and enough history to judge it is an opportunity (§4.8).
    async fn detect_opportunities(&self) -> Result<Vec<String>, crate::error::AgentsError> {
        let records = self.store.list_lifecycle_records().await?;
        let mut opportunities = Vec::new();
        for record in records {
            if record.status != praxis_core::LifecycleStatus::Active {
                continue;
            }
            let Some(stats) = self.store.get_tool_statistics(&record.tool_name).await? else {
                continue;
            };
            if stats.total >= self.config.min_executions_for_analysis
                && stats.success_rate() < self.config.improvement_threshold
            {
                opportunities.push(record.tool_name);
            }
        }
        Ok(opportunities)
    }

    /// Auto-cleanup pass run every `maintenance_interval`: archives any
    /// stale deletions the check loop's reconciliation hasn't already
    /// caught (cheap idempotent re-run of the same rule).
    async fn run_maintenance_cycle(&self) -> Result<(), crate::error::AgentsError> {
        let report = self.lifecycle.reconcile().await?;
        info!("maintenance pass: {} archived", report.archived.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_core::StubBackend;
    use praxis_core::LlmBackend;
    use praxis_store::VectorIndex;
    use praxis_tools::{FilesystemBackend, NoopInvalidator, ToolDiscovery, ToolRegistry};
    use std::time::Duration;

    #[tokio::test]
    async fn detect_opportunities_ignores_tools_below_the_execution_floor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tools")).unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = Arc::new(ToolRegistry::new());
        let backend = Arc::new(FilesystemBackend::new(dir.path().join("tools")));
        let invalidator: Arc<dyn praxis_tools::PathwayInvalidator> = Arc::new(NoopInvalidator);
        let config = EngineConfig::permissive(dir.path().to_path_buf());

        let vector = Arc::new(VectorIndex::new(4).unwrap());
        let discovery = Arc::new(ToolDiscovery::new(vector.clone(), registry.clone()));
        let llm: Arc<dyn LlmBackend> = Arc::new(StubBackend::new(4));
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(), registry.clone(), backend, discovery, llm.clone(), invalidator.clone(), config.clone(),
        ));

        let sandbox = Arc::new(praxis_tools::SandboxRuntime::new(Duration::from_secs(5)));
        let improvement = Arc::new(ImprovementEngine::new(store.clone(), registry.clone(), invalidator.clone(), llm, sandbox, dir.path().join("tools")));
        let monitor = Arc::new(DeploymentMonitor::new(store.clone(), registry, invalidator, dir.path().join("tools"), Duration::from_secs(3600)));

        let auto = AutonomousLoop::new(config, store, lifecycle, improvement, monitor);
        let opportunities = auto.detect_opportunities().await.unwrap();
        assert!(opportunities.is_empty());
        let _ = vector;
    }
}
