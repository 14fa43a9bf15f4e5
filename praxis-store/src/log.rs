//! The relational store (C1, Execution Log).
//!
//! Grounded on `databases/src/sqlite.rs`: a `Mutex<Connection>` wrapped
//! behind async methods, `CREATE TABLE IF NOT EXISTS` schema creation,
//! busy-timeout and foreign-key pragmas. Generalised from LTMC's learning
//! patterns/thinking sessions to goal executions, tool invocations, tool
//! lifecycle, tool versions, decomposition patterns, and deployment
//! monitoring (§3, §6 "Relational store").

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use praxis_core::{
    AuthorKind, DecompositionPattern, DeploymentHealthCheck, DeploymentMonitoringSession,
    DeploymentRollback, GoalExecution, HealthVerdict, Intent, LifecycleStatus,
    LifecycleTransition, MonitoringTier, Pathway, ToolInvocation, ToolLifecycleRecord,
    ToolStatistics, ToolVersion, TraceStep,
};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection lock poisoned")]
    LockPoisoned,
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Relational store. One sqlite file, one serialised connection, shared
/// across the workspace behind an `Arc`.
pub struct Store {
    connection: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("opening store at {}", path.display());

        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;

        let store = Self { connection: Arc::new(Mutex::new(conn)) };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        let store = Self { connection: Arc::new(Mutex::new(conn)) };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS goal_executions (
                id TEXT PRIMARY KEY,
                goal_text TEXT NOT NULL,
                intent TEXT NOT NULL,
                success INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                error_summary TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tool_invocations (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                params TEXT NOT NULL,
                output TEXT,
                success INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                FOREIGN KEY (execution_id) REFERENCES goal_executions (id)
            );

            CREATE INDEX IF NOT EXISTS idx_invocations_execution ON tool_invocations(execution_id);
            CREATE INDEX IF NOT EXISTS idx_invocations_tool ON tool_invocations(tool_name);

            CREATE TABLE IF NOT EXISTS tool_statistics (
                tool_name TEXT PRIMARY KEY,
                total INTEGER NOT NULL,
                successes INTEGER NOT NULL,
                mean_duration_ms REAL NOT NULL,
                median_duration_ms REAL NOT NULL,
                p95_duration_ms REAL NOT NULL,
                p99_duration_ms REAL NOT NULL,
                first_use TEXT,
                last_use TEXT
            );

            CREATE TABLE IF NOT EXISTS tool_lifecycle (
                tool_name TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                status_changed_at TEXT NOT NULL,
                reason TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tool_lifecycle_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tool_name TEXT NOT NULL,
                from_status TEXT NOT NULL,
                to_status TEXT NOT NULL,
                reason TEXT NOT NULL,
                at TEXT NOT NULL,
                FOREIGN KEY (tool_name) REFERENCES tool_lifecycle (tool_name)
            );

            CREATE TABLE IF NOT EXISTS tool_versions (
                tool_name TEXT NOT NULL,
                version INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                author TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (tool_name, version)
            );

            CREATE TABLE IF NOT EXISTS pathways (
                id TEXT PRIMARY KEY,
                goal_text TEXT NOT NULL,
                embedding TEXT NOT NULL,
                trace TEXT NOT NULL,
                tool_dependencies TEXT NOT NULL,
                success_count INTEGER NOT NULL,
                failure_count INTEGER NOT NULL,
                valid INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS decomposition_patterns (
                id TEXT PRIMARY KEY,
                goal_text TEXT NOT NULL,
                goal_type TEXT NOT NULL,
                subgoals TEXT NOT NULL,
                success INTEGER NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                tools_used TEXT NOT NULL,
                usage_count INTEGER NOT NULL,
                efficiency_score REAL NOT NULL,
                embedding TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_goal_type ON decomposition_patterns(goal_type);

            CREATE TABLE IF NOT EXISTS deployment_sessions (
                id TEXT PRIMARY KEY,
                tool_name TEXT NOT NULL,
                version_id INTEGER NOT NULL,
                baseline_success_rate REAL NOT NULL,
                deploy_at TEXT NOT NULL,
                window_end TEXT NOT NULL,
                tier TEXT NOT NULL,
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deployment_health_checks (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                at TEXT NOT NULL,
                rolling_success_rate REAL NOT NULL,
                sample_size INTEGER NOT NULL,
                tier TEXT NOT NULL,
                verdict TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES deployment_sessions (id)
            );

            CREATE TABLE IF NOT EXISTS deployment_rollbacks (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                from_version INTEGER NOT NULL,
                to_version INTEGER NOT NULL,
                tier TEXT NOT NULL,
                reason TEXT NOT NULL,
                at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_store (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;

        debug!("store schema initialized");
        Ok(())
    }

    // -- goal executions / tool invocations (C7 write-back, owned exclusively by the orchestrator) --

    pub async fn record_execution(&self, exec: &GoalExecution) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let metadata_json = serde_json::to_string(&exec.metadata)?;
        let intent_str = intent_to_str(exec.intent);
        conn.execute(
            "INSERT INTO goal_executions (id, goal_text, intent, success, duration_ms, error_summary, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                exec.id.to_string(),
                exec.goal_text,
                intent_str,
                exec.success as i64,
                exec.duration_ms as i64,
                exec.error_summary,
                metadata_json,
                exec.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn record_invocation(&self, inv: &ToolInvocation) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tool_invocations (id, execution_id, tool_name, params, output, success, duration_ms, error, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                inv.id.to_string(),
                inv.execution_id.to_string(),
                inv.tool_name,
                inv.params.to_string(),
                inv.output.as_ref().map(|v| v.to_string()),
                inv.success as i64,
                inv.duration_ms as i64,
                inv.error,
                inv.started_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<GoalExecution>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, goal_text, intent, success, duration_ms, error_summary, metadata, created_at
                 FROM goal_executions WHERE id = ?1;",
                params![id.to_string()],
                map_goal_execution,
            )
            .optional()?;
        row.transpose().map_err(StoreError::from)
    }

    pub async fn list_invocations(&self, execution_id: Uuid) -> Result<Vec<ToolInvocation>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, tool_name, params, output, success, duration_ms, error, started_at
             FROM tool_invocations WHERE execution_id = ?1 ORDER BY started_at ASC;",
        )?;
        let rows = stmt
            .query_map(params![execution_id.to_string()], map_tool_invocation)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recompute and persist aggregated statistics for one tool from its
    /// raw invocation history. Run periodically, not on the hot path.
    pub async fn recompute_tool_statistics(&self, tool_name: &str) -> Result<ToolStatistics, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT success, duration_ms, started_at FROM tool_invocations WHERE tool_name = ?1 ORDER BY started_at ASC;",
        )?;
        let mut durations: Vec<f64> = Vec::new();
        let mut total = 0u64;
        let mut successes = 0u64;
        let mut first_use: Option<DateTime<Utc>> = None;
        let mut last_use: Option<DateTime<Utc>> = None;

        let rows = stmt.query_map(params![tool_name], |row| {
            let success: i64 = row.get(0)?;
            let duration_ms: i64 = row.get(1)?;
            let started_at: String = row.get(2)?;
            Ok((success != 0, duration_ms as f64, started_at))
        })?;

        for row in rows {
            let (success, duration_ms, started_at) = row?;
            total += 1;
            if success {
                successes += 1;
            }
            durations.push(duration_ms);
            let at = DateTime::parse_from_rfc3339(&started_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            first_use = Some(first_use.map_or(at, |cur| cur.min(at)));
            last_use = Some(last_use.map_or(at, |cur| cur.max(at)));
        }
        drop(stmt);

        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mean = if durations.is_empty() { 0.0 } else { durations.iter().sum::<f64>() / durations.len() as f64 };
        let median = percentile(&durations, 0.50);
        let p95 = percentile(&durations, 0.95);
        let p99 = percentile(&durations, 0.99);

        let stats = ToolStatistics {
            tool_name: tool_name.to_string(),
            total,
            successes,
            mean_duration_ms: mean,
            median_duration_ms: median,
            p95_duration_ms: p95,
            p99_duration_ms: p99,
            first_use,
            last_use,
        };

        conn.execute(
            "INSERT INTO tool_statistics (tool_name, total, successes, mean_duration_ms, median_duration_ms, p95_duration_ms, p99_duration_ms, first_use, last_use)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(tool_name) DO UPDATE SET
                total = excluded.total, successes = excluded.successes,
                mean_duration_ms = excluded.mean_duration_ms, median_duration_ms = excluded.median_duration_ms,
                p95_duration_ms = excluded.p95_duration_ms, p99_duration_ms = excluded.p99_duration_ms,
                first_use = excluded.first_use, last_use = excluded.last_use;",
            params![
                stats.tool_name,
                stats.total as i64,
                stats.successes as i64,
                stats.mean_duration_ms,
                stats.median_duration_ms,
                stats.p95_duration_ms,
                stats.p99_duration_ms,
                stats.first_use.map(|d| d.to_rfc3339()),
                stats.last_use.map(|d| d.to_rfc3339()),
            ],
        )?;

        Ok(stats)
    }

    pub async fn get_tool_statistics(&self, tool_name: &str) -> Result<Option<ToolStatistics>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT tool_name, total, successes, mean_duration_ms, median_duration_ms, p95_duration_ms, p99_duration_ms, first_use, last_use
                 FROM tool_statistics WHERE tool_name = ?1;",
                params![tool_name],
                |row| {
                    Ok(ToolStatistics {
                        tool_name: row.get(0)?,
                        total: row.get::<_, i64>(1)? as u64,
                        successes: row.get::<_, i64>(2)? as u64,
                        mean_duration_ms: row.get(3)?,
                        median_duration_ms: row.get(4)?,
                        p95_duration_ms: row.get(5)?,
                        p99_duration_ms: row.get(6)?,
                        first_use: row.get::<_, Option<String>>(7)?.and_then(|s| parse_dt(&s)),
                        last_use: row.get::<_, Option<String>>(8)?.and_then(|s| parse_dt(&s)),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // -- tool lifecycle (C8, owned exclusively by the lifecycle manager) --

    pub async fn upsert_lifecycle_record(&self, record: &ToolLifecycleRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tool_lifecycle (tool_name, status, status_changed_at, reason)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tool_name) DO UPDATE SET
                status = excluded.status, status_changed_at = excluded.status_changed_at, reason = excluded.reason;",
            params![
                record.tool_name,
                lifecycle_status_to_str(record.status),
                record.status_changed_at.to_rfc3339(),
                record.reason,
            ],
        )?;

        if let Some(last) = record.audit_trail.last() {
            conn.execute(
                "INSERT INTO tool_lifecycle_audit (tool_name, from_status, to_status, reason, at)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    record.tool_name,
                    lifecycle_status_to_str(last.from),
                    lifecycle_status_to_str(last.to),
                    last.reason,
                    last.at.to_rfc3339(),
                ],
            )?;
        }
        Ok(())
    }

    pub async fn get_lifecycle_record(&self, tool_name: &str) -> Result<Option<ToolLifecycleRecord>, StoreError> {
        let conn = self.conn()?;
        let head = conn
            .query_row(
                "SELECT tool_name, status, status_changed_at, reason FROM tool_lifecycle WHERE tool_name = ?1;",
                params![tool_name],
                |row| {
                    let status: String = row.get(1)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        status,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, status, changed_at, reason)) = head else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT from_status, to_status, reason, at FROM tool_lifecycle_audit WHERE tool_name = ?1 ORDER BY id ASC;",
        )?;
        let audit_trail = stmt
            .query_map(params![tool_name], |row| {
                Ok(LifecycleTransition {
                    from: str_to_lifecycle_status(&row.get::<_, String>(0)?),
                    to: str_to_lifecycle_status(&row.get::<_, String>(1)?),
                    reason: row.get(2)?,
                    at: row.get::<_, String>(3).map(|s| parse_dt(&s).unwrap_or_else(Utc::now))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(ToolLifecycleRecord {
            tool_name: name,
            status: str_to_lifecycle_status(&status),
            status_changed_at: parse_dt(&changed_at).unwrap_or_else(Utc::now),
            reason,
            audit_trail,
        }))
    }

    pub async fn list_lifecycle_records(&self) -> Result<Vec<ToolLifecycleRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT tool_name FROM tool_lifecycle;")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            if let Some(record) = self.get_lifecycle_record(&name).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // -- tool versions (C9, owned exclusively by the improvement engine) --

    pub async fn record_tool_version(&self, version: &ToolVersion) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tool_versions (tool_name, version, content_hash, author, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                version.tool_name,
                version.version as i64,
                version.content_hash,
                author_to_str(version.author),
                version.reason,
                version.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_tool_versions(&self, tool_name: &str) -> Result<Vec<ToolVersion>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT tool_name, version, content_hash, author, reason, created_at
             FROM tool_versions WHERE tool_name = ?1 ORDER BY version ASC;",
        )?;
        let rows = stmt
            .query_map(params![tool_name], |row| {
                let author: String = row.get(3)?;
                Ok(ToolVersion {
                    tool_name: row.get(0)?,
                    version: row.get::<_, i64>(1)? as u64,
                    content_hash: row.get(2)?,
                    author: str_to_author(&author),
                    reason: row.get(4)?,
                    created_at: row.get::<_, String>(5).map(|s| parse_dt(&s).unwrap_or_else(Utc::now))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -- pathways (C4, write-back owned by the orchestrator) --

    pub async fn insert_pathway(&self, pathway: &Pathway) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pathways (id, goal_text, embedding, trace, tool_dependencies, success_count, failure_count, valid, created_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                pathway.id.to_string(),
                pathway.goal_text,
                serde_json::to_string(&pathway.embedding)?,
                serde_json::to_string(&pathway.trace)?,
                serde_json::to_string(&pathway.tool_dependencies)?,
                pathway.success_count as i64,
                pathway.failure_count as i64,
                pathway.valid as i64,
                pathway.created_at.to_rfc3339(),
                pathway.last_used_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_pathway(&self, id: Uuid) -> Result<Option<Pathway>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, goal_text, embedding, trace, tool_dependencies, success_count, failure_count, valid, created_at, last_used_at
                 FROM pathways WHERE id = ?1;",
                params![id.to_string()],
                map_pathway,
            )
            .optional()?;
        row.transpose()
    }

    pub async fn list_valid_pathways(&self) -> Result<Vec<Pathway>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, goal_text, embedding, trace, tool_dependencies, success_count, failure_count, valid, created_at, last_used_at
             FROM pathways WHERE valid = 1;",
        )?;
        let rows = stmt
            .query_map([], map_pathway)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Invalidation is terminal (§4.3 invariant ii) — this only ever sets
    /// `valid` to false, never back to true.
    pub async fn invalidate_pathways_by_tool(&self, tool_name: &str) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let pattern = format!("%\"{tool_name}\":%");
        let n = conn.execute(
            "UPDATE pathways SET valid = 0 WHERE valid = 1 AND tool_dependencies LIKE ?1;",
            params![pattern],
        )?;
        Ok(n as u64)
    }

    pub async fn invalidate_pathways_by_hash(&self, tool_name: &str, new_hash: &str) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let ids: Vec<(String, String)> = {
            let mut stmt = conn.prepare("SELECT id, tool_dependencies FROM pathways WHERE valid = 1;")?;
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut invalidated = 0u64;
        for (id, deps_json) in ids {
            let deps: HashMap<String, String> = serde_json::from_str(&deps_json)?;
            if let Some(stored_hash) = deps.get(tool_name) {
                if stored_hash != new_hash {
                    conn.execute("UPDATE pathways SET valid = 0 WHERE id = ?1;", params![id])?;
                    invalidated += 1;
                }
            }
        }
        Ok(invalidated)
    }

    pub async fn record_pathway_outcome(&self, id: Uuid, success: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        if success {
            conn.execute(
                "UPDATE pathways SET success_count = success_count + 1, last_used_at = ?2 WHERE id = ?1;",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )?;
        } else {
            conn.execute(
                "UPDATE pathways SET failure_count = failure_count + 1, last_used_at = ?2 WHERE id = ?1;",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    }

    // -- decomposition patterns (C5, write-back owned by the orchestrator) --

    /// Insert a fresh pattern, or if one with the same normalised goal text
    /// already exists, bump its usage count and refresh last-used (§4.4).
    pub async fn upsert_decomposition_pattern(&self, pattern: &DecompositionPattern) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let normalized = DecompositionPattern::normalize(&pattern.goal_text);

        // `normalize` collapses whitespace beyond what SQL `LOWER()` can
        // express, so the match has to happen in Rust rather than in the
        // query itself.
        let existing_id: Option<String> = {
            let mut stmt = conn.prepare("SELECT id, goal_text FROM decomposition_patterns;")?;
            let mut rows = stmt.query([])?;
            let mut found = None;
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let goal_text: String = row.get(1)?;
                if DecompositionPattern::normalize(&goal_text) == normalized {
                    found = Some(id);
                    break;
                }
            }
            found
        };

        if let Some(id) = existing_id {
            conn.execute(
                "UPDATE decomposition_patterns SET usage_count = usage_count + 1, last_used_at = ?2,
                    efficiency_score = ?3, success = ?4 WHERE id = ?1;",
                params![
                    id,
                    pattern.last_used_at.to_rfc3339(),
                    pattern.efficiency_score,
                    pattern.success as i64,
                ],
            )?;
        } else {
            conn.execute(
                "INSERT INTO decomposition_patterns
                 (id, goal_text, goal_type, subgoals, success, execution_time_ms, tools_used, usage_count, efficiency_score, embedding, created_at, last_used_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
                params![
                    pattern.id.to_string(),
                    pattern.goal_text,
                    pattern.goal_type,
                    serde_json::to_string(&pattern.subgoals)?,
                    pattern.success as i64,
                    pattern.execution_time_ms as i64,
                    serde_json::to_string(&pattern.tools_used)?,
                    pattern.usage_count as i64,
                    pattern.efficiency_score,
                    serde_json::to_string(&pattern.embedding)?,
                    pattern.created_at.to_rfc3339(),
                    pattern.last_used_at.to_rfc3339(),
                ],
            )?;
        }
        Ok(())
    }

    pub async fn list_patterns_by_goal_type(&self, goal_type: &str) -> Result<Vec<DecompositionPattern>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, goal_text, goal_type, subgoals, success, execution_time_ms, tools_used, usage_count, efficiency_score, embedding, created_at, last_used_at
             FROM decomposition_patterns WHERE goal_type = ?1 ORDER BY efficiency_score DESC, last_used_at DESC;",
        )?;
        let rows = stmt
            .query_map(params![goal_type], map_decomposition_pattern)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total goal executions ever recorded, for the `status` CLI report.
    pub async fn count_executions(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM goal_executions;", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Total learned decomposition patterns, for the `status` CLI report.
    pub async fn count_patterns(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM decomposition_patterns;", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // -- deployment monitoring (C10, owned exclusively by the deployment monitor) --

    pub async fn record_monitoring_session(&self, session: &DeploymentMonitoringSession) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO deployment_sessions (id, tool_name, version_id, baseline_success_rate, deploy_at, window_end, tier, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                session.id.to_string(),
                session.tool_name,
                session.version_id as i64,
                session.baseline_success_rate,
                session.deploy_at.to_rfc3339(),
                session.window_end.to_rfc3339(),
                tier_to_str(session.tier),
                session_status_to_str(session.status),
            ],
        )?;
        Ok(())
    }

    pub async fn update_monitoring_session_status(&self, id: Uuid, status: praxis_core::SessionStatus) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE deployment_sessions SET status = ?2 WHERE id = ?1;",
            params![id.to_string(), session_status_to_str(status)],
        )?;
        Ok(())
    }

    pub async fn record_health_check(&self, check: &DeploymentHealthCheck) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO deployment_health_checks (id, session_id, at, rolling_success_rate, sample_size, tier, verdict)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                check.id.to_string(),
                check.session_id.to_string(),
                check.at.to_rfc3339(),
                check.rolling_success_rate,
                check.sample_size as i64,
                tier_to_str(check.tier),
                verdict_to_str(check.verdict),
            ],
        )?;
        Ok(())
    }

    pub async fn record_rollback(&self, rollback: &DeploymentRollback) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO deployment_rollbacks (id, session_id, tool_name, from_version, to_version, tier, reason, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                rollback.id.to_string(),
                rollback.session_id.to_string(),
                rollback.tool_name,
                rollback.from_version as i64,
                rollback.to_version as i64,
                tier_to_str(rollback.tier),
                rollback.reason,
                rollback.at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_monitoring_session(&self, id: Uuid) -> Result<Option<DeploymentMonitoringSession>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, tool_name, version_id, baseline_success_rate, deploy_at, window_end, tier, status
                 FROM deployment_sessions WHERE id = ?1;",
                params![id.to_string()],
                map_monitoring_session,
            )
            .optional()?;
        row.transpose().map_err(StoreError::from)
    }

    pub async fn list_active_monitoring_sessions(&self) -> Result<Vec<DeploymentMonitoringSession>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, tool_name, version_id, baseline_success_rate, deploy_at, window_end, tier, status
             FROM deployment_sessions WHERE status = 'monitoring';",
        )?;
        let rows = stmt
            .query_map([], map_monitoring_session)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The most recent `limit` invocations of a tool, newest first — the
    /// raw material for the deployment monitor's rolling success rate.
    pub async fn recent_invocations_for_tool(&self, tool_name: &str, limit: u64) -> Result<Vec<ToolInvocation>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, tool_name, params, output, success, duration_ms, error, started_at
             FROM tool_invocations WHERE tool_name = ?1 ORDER BY started_at DESC LIMIT ?2;",
        )?;
        let rows = stmt
            .query_map(params![tool_name, limit as i64], map_tool_invocation)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -- generic namespaced key-value storage (credentials and other opaque blobs) --

    pub async fn kv_set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_store (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value;",
            params![namespace, key, value],
        )?;
        Ok(())
    }

    pub async fn kv_get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE namespace = ?1 AND key = ?2;",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn parse_dt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

fn intent_to_str(intent: Intent) -> &'static str {
    match intent {
        Intent::ToolUse => "tool_use",
        Intent::Conversation => "conversation",
        Intent::Impossible => "impossible",
    }
}

fn str_to_intent(s: &str) -> Intent {
    match s {
        "tool_use" => Intent::ToolUse,
        "impossible" => Intent::Impossible,
        _ => Intent::Conversation,
    }
}

fn lifecycle_status_to_str(status: LifecycleStatus) -> &'static str {
    match status {
        LifecycleStatus::Active => "active",
        LifecycleStatus::Deleted => "deleted",
        LifecycleStatus::Archived => "archived",
        LifecycleStatus::Deprecated => "deprecated",
    }
}

fn str_to_lifecycle_status(s: &str) -> LifecycleStatus {
    match s {
        "deleted" => LifecycleStatus::Deleted,
        "archived" => LifecycleStatus::Archived,
        "deprecated" => LifecycleStatus::Deprecated,
        _ => LifecycleStatus::Active,
    }
}

fn author_to_str(author: AuthorKind) -> &'static str {
    match author {
        AuthorKind::Human => "human",
        AuthorKind::Generated => "generated",
    }
}

fn str_to_author(s: &str) -> AuthorKind {
    match s {
        "human" => AuthorKind::Human,
        _ => AuthorKind::Generated,
    }
}

fn tier_to_str(tier: MonitoringTier) -> &'static str {
    match tier {
        MonitoringTier::Immediate => "immediate",
        MonitoringTier::Fast => "fast",
        MonitoringTier::Standard => "standard",
    }
}

fn verdict_to_str(verdict: HealthVerdict) -> &'static str {
    match verdict {
        HealthVerdict::Ok => "ok",
        HealthVerdict::Rollback => "rollback",
    }
}

fn session_status_to_str(status: praxis_core::SessionStatus) -> &'static str {
    match status {
        praxis_core::SessionStatus::Monitoring => "monitoring",
        praxis_core::SessionStatus::RolledBack => "rolled_back",
        praxis_core::SessionStatus::Completed => "completed",
    }
}

fn str_to_tier(s: &str) -> MonitoringTier {
    match s {
        "immediate" => MonitoringTier::Immediate,
        "fast" => MonitoringTier::Fast,
        _ => MonitoringTier::Standard,
    }
}

fn str_to_session_status(s: &str) -> praxis_core::SessionStatus {
    match s {
        "rolled_back" => praxis_core::SessionStatus::RolledBack,
        "completed" => praxis_core::SessionStatus::Completed,
        _ => praxis_core::SessionStatus::Monitoring,
    }
}

fn map_monitoring_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<DeploymentMonitoringSession, StoreError>> {
    Ok((|| {
        let id = Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| StoreError::NotFound(e.to_string()))?;
        Ok(DeploymentMonitoringSession {
            id,
            tool_name: row.get(1)?,
            version_id: row.get::<_, i64>(2)? as u64,
            baseline_success_rate: row.get(3)?,
            deploy_at: parse_dt(&row.get::<_, String>(4)?).unwrap_or_else(Utc::now),
            window_end: parse_dt(&row.get::<_, String>(5)?).unwrap_or_else(Utc::now),
            tier: str_to_tier(&row.get::<_, String>(6)?),
            status: str_to_session_status(&row.get::<_, String>(7)?),
        })
    })())
}

fn map_goal_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<GoalExecution, StoreError>> {
    let metadata_json: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let intent: String = row.get(2)?;
    Ok((|| {
        Ok(GoalExecution {
            id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| StoreError::NotFound(e.to_string()))?,
            goal_text: row.get(1)?,
            intent: str_to_intent(&intent),
            success: row.get::<_, i64>(3)? != 0,
            duration_ms: row.get::<_, i64>(4)? as u64,
            error_summary: row.get(5)?,
            metadata: serde_json::from_str::<HashMap<String, String>>(&metadata_json)?,
            created_at: parse_dt(&created_at).unwrap_or_else(Utc::now),
        })
    })())
}

fn map_tool_invocation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ToolInvocation, StoreError>> {
    Ok((|| {
        let output: Option<String> = row.get(4)?;
        Ok(ToolInvocation {
            id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| StoreError::NotFound(e.to_string()))?,
            execution_id: Uuid::parse_str(&row.get::<_, String>(1)?).map_err(|e| StoreError::NotFound(e.to_string()))?,
            tool_name: row.get(2)?,
            params: serde_json::from_str(&row.get::<_, String>(3)?)?,
            output: output.map(|o| serde_json::from_str(&o)).transpose()?,
            success: row.get::<_, i64>(5)? != 0,
            duration_ms: row.get::<_, i64>(6)? as u64,
            error: row.get(7)?,
            started_at: parse_dt(&row.get::<_, String>(8)?).unwrap_or_else(Utc::now),
        })
    })())
}

fn map_pathway(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Pathway, StoreError>> {
    Ok((|| {
        Ok(Pathway {
            id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| StoreError::NotFound(e.to_string()))?,
            goal_text: row.get(1)?,
            embedding: serde_json::from_str(&row.get::<_, String>(2)?)?,
            trace: serde_json::from_str::<Vec<TraceStep>>(&row.get::<_, String>(3)?)?,
            tool_dependencies: serde_json::from_str(&row.get::<_, String>(4)?)?,
            success_count: row.get::<_, i64>(5)? as u64,
            failure_count: row.get::<_, i64>(6)? as u64,
            valid: row.get::<_, i64>(7)? != 0,
            created_at: parse_dt(&row.get::<_, String>(8)?).unwrap_or_else(Utc::now),
            last_used_at: parse_dt(&row.get::<_, String>(9)?).unwrap_or_else(Utc::now),
        })
    })())
}

fn map_decomposition_pattern(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<DecompositionPattern, StoreError>> {
    Ok((|| {
        Ok(DecompositionPattern {
            id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| StoreError::NotFound(e.to_string()))?,
            goal_text: row.get(1)?,
            goal_type: row.get(2)?,
            subgoals: serde_json::from_str(&row.get::<_, String>(3)?)?,
            success: row.get::<_, i64>(4)? != 0,
            execution_time_ms: row.get::<_, i64>(5)? as u64,
            tools_used: serde_json::from_str(&row.get::<_, String>(6)?)?,
            usage_count: row.get::<_, i64>(7)? as u64,
            efficiency_score: row.get(8)?,
            embedding: serde_json::from_str(&row.get::<_, String>(9)?)?,
            created_at: parse_dt(&row.get::<_, String>(10)?).unwrap_or_else(Utc::now),
            last_used_at: parse_dt(&row.get::<_, String>(11)?).unwrap_or_else(Utc::now),
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_core::EngineOutcome;

    fn sample_execution() -> GoalExecution {
        GoalExecution {
            id: Uuid::new_v4(),
            goal_text: "list files in /tmp".to_string(),
            intent: Intent::ToolUse,
            success: true,
            duration_ms: 42,
            error_summary: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_and_reads_back_an_execution() {
        let store = Store::open_in_memory().unwrap();
        let exec = sample_execution();
        store.record_execution(&exec).await.unwrap();

        let fetched = store.get_execution(exec.id).await.unwrap().unwrap();
        assert_eq!(fetched.goal_text, exec.goal_text);
        assert_eq!(fetched.intent, Intent::ToolUse);
    }

    #[tokio::test]
    async fn recomputes_statistics_from_invocation_history() {
        let store = Store::open_in_memory().unwrap();
        let exec = sample_execution();
        store.record_execution(&exec).await.unwrap();

        for (success, duration) in [(true, 10u64), (true, 20), (false, 30)] {
            let inv = ToolInvocation {
                id: Uuid::new_v4(),
                execution_id: exec.id,
                tool_name: "list_dir".to_string(),
                params: serde_json::json!({"path": "/tmp"}),
                output: None,
                success,
                duration_ms: duration,
                error: if success { None } else { Some("boom".to_string()) },
                started_at: Utc::now(),
            };
            store.record_invocation(&inv).await.unwrap();
        }

        let stats = store.recompute_tool_statistics("list_dir").await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successes, 2);
        assert!((stats.success_rate() - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_appended_to_the_audit_trail() {
        let store = Store::open_in_memory().unwrap();
        let mut record = ToolLifecycleRecord::new("my_tool", "registered");
        store.upsert_lifecycle_record(&record).await.unwrap();

        record.transition(LifecycleStatus::Deprecated, "superseded by v2");
        store.upsert_lifecycle_record(&record).await.unwrap();

        let fetched = store.get_lifecycle_record("my_tool").await.unwrap().unwrap();
        assert_eq!(fetched.status, LifecycleStatus::Deprecated);
        assert_eq!(fetched.audit_trail.len(), 1);
        assert_eq!(fetched.audit_trail[0].to, LifecycleStatus::Deprecated);
    }

    #[tokio::test]
    async fn decomposition_pattern_upsert_collapses_on_normalized_goal_text() {
        let store = Store::open_in_memory().unwrap();
        let pattern = DecompositionPattern {
            id: Uuid::new_v4(),
            goal_text: "Deploy the new build".to_string(),
            goal_type: "deployment".to_string(),
            subgoals: vec!["build".to_string(), "push".to_string()],
            success: true,
            execution_time_ms: 500,
            tools_used: vec!["build_tool".to_string()],
            usage_count: 1,
            efficiency_score: 0.5,
            embedding: vec![0.1, 0.2],
            created_at: Utc::now(),
            last_used_at: Utc::now(),
        };
        store.upsert_decomposition_pattern(&pattern).await.unwrap();

        let mut again = pattern.clone();
        again.id = Uuid::new_v4();
        again.goal_text = "deploy   the new build".to_string();
        again.last_used_at = Utc::now();
        store.upsert_decomposition_pattern(&again).await.unwrap();

        let patterns = store.list_patterns_by_goal_type("deployment").await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].usage_count, 2);
    }

    #[tokio::test]
    async fn kv_store_roundtrips_and_overwrites() {
        let store = Store::open_in_memory().unwrap();
        store.kv_set("credentials", "api_key", "secret-1").await.unwrap();
        assert_eq!(store.kv_get("credentials", "api_key").await.unwrap(), Some("secret-1".to_string()));

        store.kv_set("credentials", "api_key", "secret-2").await.unwrap();
        assert_eq!(store.kv_get("credentials", "api_key").await.unwrap(), Some("secret-2".to_string()));
        assert_eq!(store.kv_get("credentials", "missing").await.unwrap(), None);
    }

    fn sample_pathway(tool: &str, hash: &str) -> Pathway {
        let mut deps = HashMap::new();
        deps.insert(tool.to_string(), hash.to_string());
        Pathway {
            id: Uuid::new_v4(),
            goal_text: "back up the database".to_string(),
            embedding: vec![0.1, 0.2, 0.3],
            trace: vec![],
            tool_dependencies: deps,
            success_count: 1,
            failure_count: 0,
            valid: true,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn invalidate_by_tool_is_terminal() {
        let store = Store::open_in_memory().unwrap();
        let pathway = sample_pathway("backup_tool", "hash-v1");
        store.insert_pathway(&pathway).await.unwrap();

        assert_eq!(store.list_valid_pathways().await.unwrap().len(), 1);
        let invalidated = store.invalidate_pathways_by_tool("backup_tool").await.unwrap();
        assert_eq!(invalidated, 1);
        assert_eq!(store.list_valid_pathways().await.unwrap().len(), 0);

        // re-invalidating an already-invalid pathway is a no-op, not a resurrection
        let invalidated_again = store.invalidate_pathways_by_tool("backup_tool").await.unwrap();
        assert_eq!(invalidated_again, 0);
    }

    #[tokio::test]
    async fn invalidate_by_hash_only_affects_changed_dependencies() {
        let store = Store::open_in_memory().unwrap();
        let matching = sample_pathway("backup_tool", "hash-v1");
        let stale = sample_pathway("backup_tool", "hash-old");
        store.insert_pathway(&matching).await.unwrap();
        store.insert_pathway(&stale).await.unwrap();

        let invalidated = store.invalidate_pathways_by_hash("backup_tool", "hash-v1").await.unwrap();
        assert_eq!(invalidated, 1);

        let remaining = store.list_valid_pathways().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, matching.id);
    }

    #[test]
    fn engine_outcome_failure_marks_recovery_fired_when_strategies_present() {
        let outcome = EngineOutcome::failure("no tool matched", vec!["fallback".to_string()]);
        assert!(!outcome.success);
        assert!(outcome.recovery_fired);
    }
}
