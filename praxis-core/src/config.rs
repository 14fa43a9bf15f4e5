//! Engine-wide configuration.
//!
//! Grounded on `src/execution_engine/safety_config.rs`'s `SafetyConfig`
//! (struct of thresholds with a `default()` plus a `#[cfg(test)] permissive()`
//! escape hatch) and `core/src/config.rs`'s environment-variable layering
//! (`Config::from_env` reading `PRAXIS_*` vars over struct defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// All tunable thresholds and paths the engine needs at startup. Every
/// field has a sane default; nothing here is required to run `demo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory on disk where the sqlite log and tool directory live.
    pub data_dir: PathBuf,
    /// Directory scanned for tool manifests at startup and on `Reconcile`.
    pub tool_dir: PathBuf,

    /// Cosine-similarity threshold above which a cached pathway is reused
    /// without re-running intent classification (§4.1, §9 decision 1).
    pub pathway_cache_threshold: f64,
    /// Cosine-similarity threshold above which a decomposition pattern is
    /// suggested to the planner (§4.4, §9 decision 1).
    pub pattern_suggestion_threshold: f64,

    /// Wall-clock timeout applied to every sandboxed tool invocation.
    pub tool_timeout: Duration,
    /// Maximum number of retry attempts before `RecoveryStrategy::GiveUp`.
    pub max_retry_attempts: u32,

    /// Rolling window size (sample count) used by the deployment monitor.
    pub monitor_window_size: u64,
    /// Minimum rolling success rate below which a deployment is rolled back.
    pub monitor_rollback_threshold: f64,
    /// Monitoring window length for the `Immediate` tier.
    pub monitor_window_immediate: Duration,
    /// Monitoring window length for the `Fast` tier.
    pub monitor_window_fast: Duration,
    /// Monitoring window length for the `Standard` tier.
    pub monitor_window_standard: Duration,

    /// Poll interval of the autonomous improvement loop (C11, §4.8
    /// `check_interval`).
    pub autonomous_loop_interval: Duration,
    /// Interval between auto-cleanup passes (§4.8 `maintenance_interval`).
    pub maintenance_interval: Duration,
    /// Success rate below which a tool is an improvement opportunity
    /// (§4.8 opportunity detection).
    pub improvement_threshold: f64,
    /// Minimum total invocations before a tool is considered for
    /// improvement analysis (§4.8 opportunity detection).
    pub min_executions_for_analysis: u64,
    /// Maximum number of improvement opportunities processed per
    /// autonomous-loop cycle (§4.8 "up to M opportunities").
    pub max_improvements_per_cycle: usize,

    /// Embedding dimensionality used by the vector index. Fixed once the
    /// index is created; changing it requires rebuilding the index.
    pub embedding_dim: usize,

    /// Base URL for the OpenAI-compatible completion/embedding backend.
    /// Ignored when running with `StubBackend`.
    pub llm_base_url: String,
    /// Model name passed to the completion endpoint.
    pub llm_model: String,
    /// Model name passed to the embedding endpoint.
    pub llm_embedding_model: String,

    /// HTTP bind address used by the `serve` CLI mode.
    pub api_bind_addr: String,

    /// Minimum success rate a deleted tool must have had to trigger an
    /// alert on accidental deletion (§4.5 step 3).
    pub lifecycle_alert_success_rate: f64,
    /// Minimum total uses a deleted tool must have had to trigger an
    /// alert on accidental deletion (§4.5 step 3).
    pub lifecycle_alert_min_uses: u64,
    /// Age past which a deleted tool becomes eligible for archival
    /// (§4.5 step 4).
    pub lifecycle_archive_after: Duration,
    /// Usage count below which a deleted tool becomes eligible for
    /// archival once old enough (§4.5 step 4).
    pub lifecycle_archive_max_uses: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./praxis-data"),
            tool_dir: PathBuf::from("./praxis-data/tools"),
            pathway_cache_threshold: 0.90,
            pattern_suggestion_threshold: 0.80,
            tool_timeout: Duration::from_secs(30),
            max_retry_attempts: 3,
            monitor_window_size: 50,
            monitor_rollback_threshold: 0.5,
            monitor_window_immediate: Duration::from_secs(5 * 60),
            monitor_window_fast: Duration::from_secs(60 * 60),
            monitor_window_standard: Duration::from_secs(24 * 60 * 60),
            autonomous_loop_interval: Duration::from_secs(5 * 60),
            maintenance_interval: Duration::from_secs(24 * 60 * 60),
            improvement_threshold: 0.7,
            min_executions_for_analysis: 20,
            max_improvements_per_cycle: 3,
            embedding_dim: 384,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_embedding_model: "text-embedding-3-small".to_string(),
            api_bind_addr: "127.0.0.1:8080".to_string(),
            lifecycle_alert_success_rate: 0.85,
            lifecycle_alert_min_uses: 20,
            lifecycle_archive_after: Duration::from_secs(90 * 24 * 60 * 60),
            lifecycle_archive_max_uses: 10,
        }
    }
}

/// Errors loading `EngineConfig` from a TOML file (§6 `EXIT_CONFIG_ERROR`).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

impl EngineConfig {
    /// Start from defaults, then overlay any `PRAXIS_*` environment
    /// variables that are set. Unset variables leave the default in place.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.overlay_env();
        cfg
    }

    /// Parse a TOML config file into a complete `EngineConfig`. Any field
    /// the file omits falls back to `Default::default()` (every field is
    /// optional from the file's point of view via `#[serde(default)]`
    /// on the type itself would be needed for partial files; this engine
    /// expects full files, written by `demo`/operators from `Default`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Resolve the effective configuration the way the CLI does: an
    /// optional `--config` TOML file (falling back to defaults when
    /// absent), with `PRAXIS_*` environment variables always taking
    /// final precedence. Ground truth: `core/src/config.rs`'s env
    /// resolution layered over file config.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.overlay_env();
        Ok(cfg)
    }

    fn overlay_env(&mut self) {
        let cfg = self;
        let mut data_dir_overridden = false;
        if let Ok(v) = std::env::var("PRAXIS_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
            data_dir_overridden = true;
        }
        if let Ok(v) = std::env::var("PRAXIS_TOOL_DIR") {
            cfg.tool_dir = PathBuf::from(v);
        } else if data_dir_overridden {
            // Keep tool_dir in sync with a data_dir override, but never
            // clobber a tool_dir a config file set explicitly.
            cfg.tool_dir = cfg.data_dir.join("tools");
        }
        if let Some(v) = parse_env_f64("PRAXIS_PATHWAY_CACHE_THRESHOLD") {
            cfg.pathway_cache_threshold = v;
        }
        if let Some(v) = parse_env_f64("PRAXIS_PATTERN_SUGGESTION_THRESHOLD") {
            cfg.pattern_suggestion_threshold = v;
        }
        if let Some(v) = parse_env_u64("PRAXIS_TOOL_TIMEOUT_SECS") {
            cfg.tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_env_u64("PRAXIS_MAX_RETRY_ATTEMPTS") {
            cfg.max_retry_attempts = v as u32;
        }
        if let Some(v) = parse_env_u64("PRAXIS_MONITOR_WINDOW_SIZE") {
            cfg.monitor_window_size = v;
        }
        if let Some(v) = parse_env_f64("PRAXIS_MONITOR_ROLLBACK_THRESHOLD") {
            cfg.monitor_rollback_threshold = v;
        }
        if let Ok(v) = std::env::var("PRAXIS_LLM_BASE_URL") {
            cfg.llm_base_url = v;
        }
        if let Ok(v) = std::env::var("PRAXIS_LLM_MODEL") {
            cfg.llm_model = v;
        }
        if let Ok(v) = std::env::var("PRAXIS_LLM_EMBEDDING_MODEL") {
            cfg.llm_embedding_model = v;
        }
        if let Ok(v) = std::env::var("PRAXIS_API_BIND_ADDR") {
            cfg.api_bind_addr = v;
        }
        if let Some(v) = parse_env_u64("PRAXIS_CHECK_INTERVAL_SECS") {
            cfg.autonomous_loop_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_env_u64("PRAXIS_MAINTENANCE_INTERVAL_SECS") {
            cfg.maintenance_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_env_f64("PRAXIS_IMPROVEMENT_THRESHOLD") {
            cfg.improvement_threshold = v;
        }
    }

    /// Permissive config used by integration tests: low thresholds, short
    /// timeouts, a throwaway temp directory left to the caller to set.
    #[cfg(any(test, feature = "test-util"))]
    pub fn permissive(data_dir: PathBuf) -> Self {
        let tool_dir = data_dir.join("tools");
        Self {
            data_dir,
            tool_dir,
            pathway_cache_threshold: 0.90,
            pattern_suggestion_threshold: 0.80,
            tool_timeout: Duration::from_secs(5),
            max_retry_attempts: 2,
            monitor_window_size: 5,
            monitor_rollback_threshold: 0.5,
            monitor_window_immediate: Duration::from_millis(50),
            monitor_window_fast: Duration::from_millis(100),
            monitor_window_standard: Duration::from_millis(200),
            autonomous_loop_interval: Duration::from_millis(50),
            ..Self::default()
        }
    }
}

fn parse_env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = EngineConfig::default();
        assert!(cfg.pathway_cache_threshold > cfg.pattern_suggestion_threshold);
        assert_eq!(cfg.tool_dir, PathBuf::from("./praxis-data/tools"));
    }

    #[test]
    fn permissive_overrides_timeouts() {
        let cfg = EngineConfig::permissive(PathBuf::from("/tmp/praxis-test"));
        assert_eq!(cfg.max_retry_attempts, 2);
        assert_eq!(cfg.tool_dir, PathBuf::from("/tmp/praxis-test/tools"));
    }

    #[test]
    fn from_file_round_trips_a_written_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("praxis.toml");
        let written = EngineConfig::permissive(PathBuf::from("/tmp/praxis-round-trip"));
        std::fs::write(&path, toml::to_string_pretty(&written).unwrap()).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.tool_dir, written.tool_dir);
        assert_eq!(loaded.max_retry_attempts, written.max_retry_attempts);
    }

    #[test]
    fn load_falls_back_to_defaults_without_a_config_path() {
        let cfg = EngineConfig::load(None).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn load_surfaces_a_missing_file_as_a_config_error() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/praxis.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
