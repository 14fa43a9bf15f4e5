//! Deployment Monitor (C10): watches a freshly deployed tool version for
//! regressions and rolls back under a three-tier policy (§4.7).
//!
//! Grounded on `src/execution_engine/circuit_breaker.rs`'s per-tool
//! bookkeeping (consecutive-failure counters, windowed state), generalised
//! from a request-time breaker to a background per-deployment session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use praxis_core::{DeploymentHealthCheck, DeploymentMonitoringSession, DeploymentRollback, HealthVerdict, MonitoringTier, SessionStatus};
use praxis_store::Store;
use praxis_tools::{PathwayInvalidator, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AgentsError;

const MIN_EXECUTIONS: u64 = 10;
const FAST_REGRESSION_ABS: f64 = 0.30;
const STANDARD_REGRESSION_ABS: f64 = 0.15;
const IMMEDIATE_CONSECUTIVE_FAILURES: usize = 3;
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// `ToolExecutor::invoke` wraps a sandbox spawn/io failure as `"io error: ..."`
/// before it ever gets to run the candidate — the executable didn't load.
fn is_load_time_error(error: &Option<String>) -> bool {
    error.as_deref().is_some_and(|e| e.starts_with("io error"))
}

/// `ToolExecutor::invoke` reports this when a tool's stdout doesn't parse as
/// the JSON value the rest of the pipeline expects from it.
fn is_signature_mismatch(error: &Option<String>) -> bool {
    error.as_deref().is_some_and(|e| e.starts_with("unparseable tool output"))
}

fn tier_for_age(deploy_at: DateTime<Utc>, now: DateTime<Utc>) -> MonitoringTier {
    let age = now - deploy_at;
    if age < chrono::Duration::minutes(1) {
        MonitoringTier::Immediate
    } else if age < chrono::Duration::hours(1) {
        MonitoringTier::Fast
    } else {
        MonitoringTier::Standard
    }
}

pub struct DeploymentMonitor {
    store: Arc<Store>,
    registry: Arc<ToolRegistry>,
    invalidator: Arc<dyn PathwayInvalidator>,
    tool_dir: PathBuf,
    monitoring_window: chrono::Duration,
}

impl DeploymentMonitor {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ToolRegistry>,
        invalidator: Arc<dyn PathwayInvalidator>,
        tool_dir: impl Into<PathBuf>,
        monitoring_window: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            invalidator,
            tool_dir: tool_dir.into(),
            monitoring_window: chrono::Duration::from_std(monitoring_window).unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    /// Start watching a freshly deployed version; registers a session and
    /// returns its id. The caller (improvement engine) hands this off
    /// immediately after a successful deploy (§4.6 step 8).
    pub async fn start_session(
        &self,
        tool_name: &str,
        version_id: u64,
        baseline_success_rate: f64,
    ) -> Result<Uuid, AgentsError> {
        let now = Utc::now();
        let session = DeploymentMonitoringSession {
            id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            version_id,
            baseline_success_rate,
            deploy_at: now,
            window_end: now + self.monitoring_window,
            tier: MonitoringTier::Immediate,
            status: SessionStatus::Monitoring,
        };
        self.store.record_monitoring_session(&session).await?;
        Ok(session.id)
    }

    /// Spawn the polling task for one session. Returns the `JoinHandle` so
    /// the caller (autonomous loop) can track it; the task terminates
    /// itself once the window elapses or a rollback fires, or when
    /// `cancel` is triggered.
    pub fn spawn(self: Arc<Self>, session_id: Uuid, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
                match self.check_once(session_id).await {
                    Ok(true) => return,
                    Ok(false) => continue,
                    Err(e) => {
                        warn!("deployment monitor check failed for session {}: {}", session_id, e);
                        continue;
                    }
                }
            }
        })
    }

    /// One poll: compute the rolling window, decide, act. Returns `true`
    /// if the session is finished (rolled back or window elapsed).
    pub async fn check_once(&self, session_id: Uuid) -> Result<bool, AgentsError> {
        let Some(mut session) = self.store.get_monitoring_session(session_id).await? else {
            return Ok(true);
        };
        if session.status != SessionStatus::Monitoring {
            return Ok(true);
        }

        let now = Utc::now();
        if now >= session.window_end {
            self.store.update_monitoring_session_status(session_id, SessionStatus::Completed).await?;
            info!("monitoring session {} completed without rollback", session_id);
            return Ok(true);
        }

        session.tier = tier_for_age(session.deploy_at, now);
        let recent = self.store.recent_invocations_for_tool(&session.tool_name, MIN_EXECUTIONS.max(20)).await?;
        let sample_size = recent.len() as u64;

        let verdict = if sample_size == 0 {
            HealthVerdict::Ok
        } else {
            // `recent` is newest-first, so the current failure streak is the
            // leading run of failures, not the trailing one.
            let consecutive_failures = recent.iter().take_while(|inv| !inv.success).count();
            let rolling_success_rate = recent.iter().filter(|inv| inv.success).count() as f64 / sample_size as f64;

            let should_rollback = match session.tier {
                // §4.7's other two immediate triggers, surfaced through the
                // same error string the executor already records: `ToolsError::Io`
                // means the executable never loaded, and a JSON-parse failure on
                // stdout means the tool's output no longer matches the contract
                // the orchestrator expects.
                MonitoringTier::Immediate => {
                    consecutive_failures >= IMMEDIATE_CONSECUTIVE_FAILURES
                        || recent.iter().any(|inv| is_load_time_error(&inv.error) || is_signature_mismatch(&inv.error))
                }
                MonitoringTier::Fast => {
                    sample_size >= MIN_EXECUTIONS
                        && (session.baseline_success_rate - rolling_success_rate) > FAST_REGRESSION_ABS
                }
                MonitoringTier::Standard => {
                    sample_size >= MIN_EXECUTIONS
                        && rolling_success_rate < (session.baseline_success_rate - STANDARD_REGRESSION_ABS)
                }
            };

            self.store
                .record_health_check(&DeploymentHealthCheck {
                    id: Uuid::new_v4(),
                    session_id,
                    at: now,
                    rolling_success_rate,
                    sample_size,
                    tier: session.tier,
                    verdict: if should_rollback { HealthVerdict::Rollback } else { HealthVerdict::Ok },
                })
                .await?;

            if should_rollback {
                HealthVerdict::Rollback
            } else {
                HealthVerdict::Ok
            }
        };

        if verdict == HealthVerdict::Rollback {
            self.rollback(&session).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn rollback(&self, session: &DeploymentMonitoringSession) -> Result<(), AgentsError> {
        let versions = self.store.list_tool_versions(&session.tool_name).await?;
        let Some(previous) = versions.iter().filter(|v| v.version < session.version_id).max_by_key(|v| v.version) else {
            warn!("no prior version recorded for {}, cannot roll back automatically", session.tool_name);
            self.store.update_monitoring_session_status(session.id, SessionStatus::RolledBack).await?;
            return Ok(());
        };

        let record = self.registry.get(&session.tool_name).await?;
        let executable_path = PathBuf::from(&record.definition.executable_path);
        let backup_path = self.tool_dir.join("backups").join(format!("{}.v{}.bak", session.tool_name, previous.version));
        if backup_path.exists() {
            tokio::fs::copy(&backup_path, &executable_path).await?;
        }

        self.invalidator
            .invalidate_by_hash(&session.tool_name, &previous.content_hash)
            .await
            .map_err(|e| AgentsError::Tools(praxis_tools::ToolsError::Invalidation(e.to_string())))?;

        self.store
            .record_rollback(&DeploymentRollback {
                id: Uuid::new_v4(),
                session_id: session.id,
                tool_name: session.tool_name.clone(),
                from_version: session.version_id,
                to_version: previous.version,
                tier: session.tier,
                reason: "rolling success rate regressed past threshold".to_string(),
                at: Utc::now(),
            })
            .await?;
        self.store.update_monitoring_session_status(session.id, SessionStatus::RolledBack).await?;

        warn!("rolled back {} from version {} to {}", session.tool_name, session.version_id, previous.version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_tools::NoopInvalidator;

    #[tokio::test]
    async fn session_completes_when_window_has_elapsed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = Arc::new(ToolRegistry::new());
        let invalidator: Arc<dyn PathwayInvalidator> = Arc::new(NoopInvalidator);
        let monitor = DeploymentMonitor::new(store.clone(), registry, invalidator, dir.path(), Duration::from_secs(3600));

        let session_id = Uuid::new_v4();
        let session = DeploymentMonitoringSession {
            id: session_id,
            tool_name: "summarizer".to_string(),
            version_id: 1,
            baseline_success_rate: 0.9,
            deploy_at: Utc::now() - chrono::Duration::hours(2),
            window_end: Utc::now() - chrono::Duration::seconds(1),
            tier: MonitoringTier::Standard,
            status: SessionStatus::Monitoring,
        };
        store.record_monitoring_session(&session).await.unwrap();

        let finished = monitor.check_once(session_id).await.unwrap();
        assert!(finished);
        let session = store.get_monitoring_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn immediate_tier_rolls_back_on_a_single_load_time_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = Arc::new(ToolRegistry::new());
        let invalidator: Arc<dyn PathwayInvalidator> = Arc::new(NoopInvalidator);
        let monitor = DeploymentMonitor::new(store.clone(), registry, invalidator, dir.path(), Duration::from_secs(3600));

        let session_id = Uuid::new_v4();
        let session = DeploymentMonitoringSession {
            id: session_id,
            tool_name: "summarizer".to_string(),
            version_id: 2,
            baseline_success_rate: 0.9,
            deploy_at: Utc::now(),
            window_end: Utc::now() + chrono::Duration::hours(24),
            tier: MonitoringTier::Immediate,
            status: SessionStatus::Monitoring,
        };
        store.record_monitoring_session(&session).await.unwrap();

        store
            .record_invocation(&praxis_core::ToolInvocation {
                id: Uuid::new_v4(),
                execution_id: Uuid::new_v4(),
                tool_name: "summarizer".to_string(),
                params: serde_json::json!({}),
                output: None,
                success: false,
                duration_ms: 0,
                error: Some("io error: No such file or directory (os error 2)".to_string()),
                started_at: Utc::now(),
            })
            .await
            .unwrap();

        let finished = monitor.check_once(session_id).await.unwrap();
        assert!(finished);
        let session = store.get_monitoring_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::RolledBack);
    }
}
