//! Tool Lifecycle Manager (C8): reconciles the tool directory with the
//! registry and the log, alerting on accidental deletion of valuable
//! tools, archiving stale deletions, and invalidating dependent pathways.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use praxis_core::{AuthorKind, EngineConfig, LifecycleStatus, LlmBackend, ToolLifecycleRecord, ToolStatistics, ToolVersion};
use praxis_store::Store;
use tracing::{info, warn};

use crate::discovery::ToolDiscovery;
use crate::error::ToolsError;
use crate::plugin::ToolDiscoveryBackend;
use crate::registry::SharedToolRegistry;

/// C4's invalidation operations, as seen from `praxis-tools`. `praxis-tools`
/// cannot depend on `praxis-memory` directly (the crate-to-component map
/// keeps C4 there), so the caller wires in whatever implements this —
/// normally an adapter in `praxis-agents` wrapping a `PathwayCache`.
#[async_trait]
pub trait PathwayInvalidator: Send + Sync {
    async fn invalidate_by_tool(&self, tool_name: &str) -> Result<u64, ToolsError>;
    async fn invalidate_by_hash(&self, tool_name: &str, new_hash: &str) -> Result<u64, ToolsError>;
}

/// An invalidator that does nothing, useful for tests and for running
/// `praxis-tools` standalone without a pathway cache wired in.
pub struct NoopInvalidator;

#[async_trait]
impl PathwayInvalidator for NoopInvalidator {
    async fn invalidate_by_tool(&self, _tool_name: &str) -> Result<u64, ToolsError> {
        Ok(0)
    }
    async fn invalidate_by_hash(&self, _tool_name: &str, _new_hash: &str) -> Result<u64, ToolsError> {
        Ok(0)
    }
}

/// One alert raised by `Reconcile` when a tool with real track record
/// disappears from disk without going through the improvement engine.
#[derive(Debug, Clone)]
pub struct DeletionAlert {
    pub tool_name: String,
    pub success_rate: f64,
    pub total_uses: u64,
}

/// Summary of one `Reconcile` run.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub registered: Vec<String>,
    pub deleted: Vec<String>,
    pub archived: Vec<String>,
    pub hash_changed: Vec<String>,
    pub alerts: Vec<DeletionAlert>,
}

pub struct LifecycleManager {
    store: Arc<Store>,
    registry: SharedToolRegistry,
    discovery_backend: Arc<dyn ToolDiscoveryBackend>,
    discovery: Arc<ToolDiscovery>,
    llm: Arc<dyn LlmBackend>,
    invalidator: Arc<dyn PathwayInvalidator>,
    config: EngineConfig,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<Store>,
        registry: SharedToolRegistry,
        discovery_backend: Arc<dyn ToolDiscoveryBackend>,
        discovery: Arc<ToolDiscovery>,
        llm: Arc<dyn LlmBackend>,
        invalidator: Arc<dyn PathwayInvalidator>,
        config: EngineConfig,
    ) -> Self {
        Self { store, registry, discovery_backend, discovery, llm, invalidator, config }
    }

    /// Embed a tool's description and index it, so it becomes visible to
    /// `ToolDiscovery::discover`. Logged, not fatal: a tool that fails to
    /// embed stays registered and reachable by name, just not by similarity
    /// search until the next reconcile retries it.
    async fn index_tool(&self, name: &str, description: &str) {
        match self.llm.embed(description).await {
            Ok(embedding) => {
                if let Err(e) = self.discovery.index_description(name, embedding).await {
                    warn!("failed to index description for tool {}: {}", name, e);
                }
            }
            Err(e) => warn!("failed to embed description for tool {}: {}", name, e),
        }
    }

    /// §4.5's five-step algorithm.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ToolsError> {
        let mut report = ReconcileReport::default();

        // 1. Scan the tool directory; derive present names and content hashes.
        let discovered = self.discovery_backend.discover().await?;
        let present: HashSet<String> = discovered.iter().map(|(d, _)| d.name.clone()).collect();

        // 2. Load the current set of lifecycle records.
        let mut records = self.store.list_lifecycle_records().await?;
        let known: HashSet<String> = records.iter().map(|r| r.tool_name.clone()).collect();

        // 3a. Present on disk but not registered -> register.
        for (definition, content_hash) in &discovered {
            if !known.contains(&definition.name) {
                let record = ToolLifecycleRecord::new(&definition.name, "discovered on disk");
                self.store.upsert_lifecycle_record(&record).await?;
                self.registry.register(definition.clone(), ToolStatistics::empty(&definition.name)).await;
                self.index_tool(&definition.name, &definition.description).await;
                self.store
                    .record_tool_version(&ToolVersion {
                        tool_name: definition.name.clone(),
                        version: 1,
                        content_hash: content_hash.clone(),
                        author: AuthorKind::Human,
                        reason: "initial discovery".to_string(),
                        created_at: Utc::now(),
                    })
                    .await?;
                report.registered.push(definition.name.clone());
                records.push(record);
            }
        }

        // 3b. Registered but missing from disk -> mark deleted, alert, invalidate.
        for record in records.iter_mut() {
            if present.contains(&record.tool_name) || record.status == LifecycleStatus::Deleted {
                continue;
            }
            if record.status == LifecycleStatus::Archived {
                continue;
            }

            let stats = self.store.get_tool_statistics(&record.tool_name).await?.unwrap_or_else(|| {
                ToolStatistics::empty(&record.tool_name)
            });
            let value = stats.success_rate() * stats.total as f64;

            record.transition(LifecycleStatus::Deleted, "missing from tool directory");
            self.store.upsert_lifecycle_record(record).await?;
            self.registry.remove(&record.tool_name).await;
            if let Err(e) = self.discovery.remove_description(&record.tool_name).await {
                warn!("failed to remove description index for tool {}: {}", record.tool_name, e);
            }
            report.deleted.push(record.tool_name.clone());

            if stats.success_rate() >= self.config.lifecycle_alert_success_rate
                && stats.total >= self.config.lifecycle_alert_min_uses
            {
                warn!(
                    "tool {} disappeared from disk with success_rate={:.2} over {} uses (value={:.2})",
                    record.tool_name, stats.success_rate(), stats.total, value
                );
                report.alerts.push(DeletionAlert {
                    tool_name: record.tool_name.clone(),
                    success_rate: stats.success_rate(),
                    total_uses: stats.total,
                });
            }

            self.invalidator.invalidate_by_tool(&record.tool_name).await?;
        }

        // 4. Archive stale deletions.
        for record in records.iter_mut() {
            if record.status != LifecycleStatus::Deleted {
                continue;
            }
            let age = Utc::now().signed_duration_since(record.status_changed_at);
            let age_exceeds_threshold =
                age.to_std().unwrap_or_default() >= self.config.lifecycle_archive_after;
            let stats = self.store.get_tool_statistics(&record.tool_name).await?.unwrap_or_else(|| {
                ToolStatistics::empty(&record.tool_name)
            });

            if age_exceeds_threshold && stats.total < self.config.lifecycle_archive_max_uses {
                record.transition(LifecycleStatus::Archived, "stale deletion past archive threshold");
                self.store.upsert_lifecycle_record(record).await?;
                report.archived.push(record.tool_name.clone());
                info!("archived stale deleted tool {}", record.tool_name);
            }
        }

        // 5. Content-hash changes -> invalidate by hash.
        for (definition, content_hash) in &discovered {
            let versions = self.store.list_tool_versions(&definition.name).await?;
            let Some(latest) = versions.last() else { continue };
            if &latest.content_hash != content_hash {
                self.invalidator.invalidate_by_hash(&definition.name, content_hash).await?;
                self.store
                    .record_tool_version(&ToolVersion {
                        tool_name: definition.name.clone(),
                        version: latest.version + 1,
                        content_hash: content_hash.clone(),
                        author: AuthorKind::Human,
                        reason: "content hash changed on disk".to_string(),
                        created_at: Utc::now(),
                    })
                    .await?;
                self.registry.register(definition.clone(), ToolStatistics::empty(&definition.name)).await;
                self.index_tool(&definition.name, &definition.description).await;
                report.hash_changed.push(definition.name.clone());
            }
        }

        Ok(report)
    }

    /// Copy the most recent backup back into the tool directory, mark the
    /// tool active, refresh the registry, log the event.
    pub async fn restore(&self, tool_name: &str, backup_path: &std::path::Path, live_path: &std::path::Path) -> Result<(), ToolsError> {
        std::fs::copy(backup_path, live_path)?;

        if let Some(mut record) = self.store.get_lifecycle_record(tool_name).await? {
            record.transition(LifecycleStatus::Active, "restored from backup");
            self.store.upsert_lifecycle_record(&record).await?;
        } else {
            let record = ToolLifecycleRecord::new(tool_name, "restored from backup");
            self.store.upsert_lifecycle_record(&record).await?;
        }

        info!("restored tool {} from backup {}", tool_name, backup_path.display());
        Ok(())
    }
}
