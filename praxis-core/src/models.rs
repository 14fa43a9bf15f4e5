//! Domain model shared across the workspace.
//!
//! Ground truth: `tools/src/tool_models.rs`, `src/execution_engine/tool_registry.rs`,
//! `src/execution_engine/tool_memory.rs`, and `databases/src/sqlite.rs` from the
//! reference implementation, generalised from code-analysis tooling to arbitrary
//! registered tools.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classified intent of a submitted goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// The goal requires invoking one or more tools.
    ToolUse,
    /// The goal is conversational and needs no tool.
    Conversation,
    /// No registered tool (or combination) can satisfy the goal.
    Impossible,
}

/// Append-only record of one goal execution. Created by the orchestrator;
/// immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalExecution {
    pub id: Uuid,
    pub goal_text: String,
    pub intent: Intent,
    pub success: bool,
    pub duration_ms: u64,
    pub error_summary: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// One tool call made in service of a goal execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub tool_name: String,
    pub params: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Derived, hourly-recomputed per-tool statistics. Never edited in place
/// by the hot execution path — only by the stats recompute job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStatistics {
    pub tool_name: String,
    pub total: u64,
    pub successes: u64,
    pub mean_duration_ms: f64,
    pub median_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
    pub first_use: Option<DateTime<Utc>>,
    pub last_use: Option<DateTime<Utc>>,
}

impl ToolStatistics {
    pub fn empty(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            total: 0,
            successes: 0,
            mean_duration_ms: 0.0,
            median_duration_ms: 0.0,
            p95_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            first_use: None,
            last_use: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.successes as f64 / self.total as f64
    }
}

/// Tool lifecycle status (§3 `Tool lifecycle record`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Active,
    Deleted,
    Archived,
    Deprecated,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleStatus::Active => write!(f, "active"),
            LifecycleStatus::Deleted => write!(f, "deleted"),
            LifecycleStatus::Archived => write!(f, "archived"),
            LifecycleStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// One entry in a lifecycle record's append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleTransition {
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Tool lifecycle record. Tool name is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLifecycleRecord {
    pub tool_name: String,
    pub status: LifecycleStatus,
    pub status_changed_at: DateTime<Utc>,
    pub reason: String,
    pub audit_trail: Vec<LifecycleTransition>,
}

impl ToolLifecycleRecord {
    pub fn new(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            tool_name: tool_name.into(),
            status: LifecycleStatus::Active,
            status_changed_at: now,
            reason: reason.into(),
            audit_trail: Vec::new(),
        }
    }

    /// Apply a status transition, recording it in the audit trail.
    pub fn transition(&mut self, to: LifecycleStatus, reason: impl Into<String>) {
        let reason = reason.into();
        let now = Utc::now();
        self.audit_trail.push(LifecycleTransition {
            from: self.status,
            to,
            reason: reason.clone(),
            at: now,
        });
        self.status = to;
        self.status_changed_at = now;
        self.reason = reason;
    }
}

/// Author of a tool version's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorKind {
    Human,
    Generated,
}

/// One recorded version of a tool's source, required for rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVersion {
    pub tool_name: String,
    pub version: u64,
    pub content_hash: String,
    pub author: AuthorKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// One step of a compressed execution trace stored inside a [`Pathway`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub tool: String,
    pub params: serde_json::Value,
    pub result_summary: String,
}

/// A cached, successful end-to-end execution plan keyed by goal embedding.
///
/// Invariant: if any tool in `tools_used` is not `active`, `valid` must be
/// false. Invalidation is terminal — a pathway is never resurrected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pathway {
    pub id: Uuid,
    pub goal_text: String,
    pub embedding: Vec<f32>,
    pub trace: Vec<TraceStep>,
    /// Tool name -> content hash recorded at store time.
    pub tool_dependencies: HashMap<String, String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub valid: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl Pathway {
    pub fn tools_used(&self) -> Vec<String> {
        self.tool_dependencies.keys().cloned().collect()
    }

    pub fn success_ratio(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }
}

/// A learned (goal -> subgoal list) association. Patterns with identical
/// normalised goal text collapse into one row with incremented usage count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionPattern {
    pub id: Uuid,
    pub goal_text: String,
    pub goal_type: String,
    pub subgoals: Vec<String>,
    pub success: bool,
    pub execution_time_ms: u64,
    pub tools_used: Vec<String>,
    pub usage_count: u64,
    pub efficiency_score: f64,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl DecompositionPattern {
    /// Normalise goal text for pattern collapsing: lowercase, collapse
    /// internal whitespace, trim ends.
    pub fn normalize(goal_text: &str) -> String {
        goal_text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    pub fn confidence(&self) -> f64 {
        let success_rate = if self.usage_count == 0 {
            0.0
        } else if self.success {
            1.0
        } else {
            0.0
        };
        let usage_term = ((self.usage_count + 1) as f64).ln() / (10f64).ln();
        success_rate * usage_term.min(1.0)
    }
}

/// Monitoring tier for a post-deployment rollback decision (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringTier {
    Immediate,
    Fast,
    Standard,
}

/// Lifecycle status of a deployment monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Monitoring,
    RolledBack,
    Completed,
}

/// A post-deployment monitoring session (§3, added: named only implicitly
/// by the distillation's external-interface table listing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentMonitoringSession {
    pub id: Uuid,
    pub tool_name: String,
    pub version_id: u64,
    pub baseline_success_rate: f64,
    pub deploy_at: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub tier: MonitoringTier,
    pub status: SessionStatus,
}

/// One health-check sample taken during a monitoring session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHealthCheck {
    pub id: Uuid,
    pub session_id: Uuid,
    pub at: DateTime<Utc>,
    pub rolling_success_rate: f64,
    pub sample_size: u64,
    pub tier: MonitoringTier,
    pub verdict: HealthVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Ok,
    Rollback,
}

/// A recorded rollback event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRollback {
    pub id: Uuid,
    pub session_id: Uuid,
    pub tool_name: String,
    pub from_version: u64,
    pub to_version: u64,
    pub tier: MonitoringTier,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Declared test-safety characteristics of a tool (§4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCharacteristics {
    pub idempotent: bool,
    pub side_effects: bool,
    pub safe_for_shadow_testing: bool,
    pub requires_mocking: bool,
    pub test_data_available: bool,
}

/// A single declared synthetic test case for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticTestCase {
    pub params: serde_json::Value,
    pub expected_output: serde_json::Value,
}

/// One argument in a tool's parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

/// The static definition of a tool, as discovered from the tool directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolArgument>,
    pub characteristics: Option<ToolCharacteristics>,
    pub test_cases: Vec<SyntheticTestCase>,
    pub executable_path: String,
    pub content_hash: String,
}

/// Closed classification of a tool-invocation failure (§4.2, §7). Total on
/// the error space by construction — every exception maps to exactly one
/// variant, including a catch-all that folds into `ParameterMismatch` for
/// anything the classifier can't place more precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    WrongTool,
    ParameterMismatch,
    Impossible,
}

/// Recovery strategy chosen for a given [`FailureKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Adapt,
    GiveUp,
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStrategy::Retry => write!(f, "retry"),
            RecoveryStrategy::Fallback => write!(f, "fallback"),
            RecoveryStrategy::Adapt => write!(f, "adapt"),
            RecoveryStrategy::GiveUp => write!(f, "give_up"),
        }
    }
}

/// Outcome returned from the orchestrator's `Execute` entry point. The only
/// shape a caller ever sees — no raw backend errors, no stack traces (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutcome {
    pub success: bool,
    pub value: Option<serde_json::Value>,
    pub tool_chain: Vec<String>,
    pub duration_ms: u64,
    pub used_cached_pathway: bool,
    pub recovery_fired: bool,
    pub explanation: Option<String>,
    pub strategies_tried: Vec<String>,
}

impl EngineOutcome {
    pub fn failure(explanation: impl Into<String>, strategies_tried: Vec<String>) -> Self {
        Self {
            success: false,
            value: None,
            tool_chain: Vec::new(),
            duration_ms: 0,
            used_cached_pathway: false,
            recovery_fired: !strategies_tried.is_empty(),
            explanation: Some(explanation.into()),
            strategies_tried,
        }
    }
}
