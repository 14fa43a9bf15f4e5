//! The Tool Registry (C2): the in-memory source of truth for which tools
//! currently exist and what they look like, refreshed by `Reconcile` (C8)
//! and read by the Orchestrator and Discovery (C3) on every turn.

use std::sync::Arc;

use dashmap::DashMap;
use praxis_core::{ToolDefinition, ToolStatistics};

use crate::error::ToolsError;

/// A registered tool plus its rolling performance statistics.
#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub definition: ToolDefinition,
    pub statistics: ToolStatistics,
}

/// Sharded concurrent map: readers and writers for different tool names
/// never block each other, matching §5's registry locking rule (brief
/// exclusive access per mutated key, no global lock for reads).
pub struct ToolRegistry {
    tools: DashMap<String, ToolRecord>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: DashMap::new() }
    }

    pub async fn register(&self, definition: ToolDefinition, statistics: ToolStatistics) {
        self.tools.insert(definition.name.clone(), ToolRecord { definition, statistics });
    }

    pub async fn remove(&self, name: &str) -> Option<ToolRecord> {
        self.tools.remove(name).map(|(_, record)| record)
    }

    pub async fn get(&self, name: &str) -> Result<ToolRecord, ToolsError> {
        self.tools.get(name).map(|r| r.clone()).ok_or_else(|| ToolsError::NotFound(name.to_string()))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn list(&self) -> Vec<ToolRecord> {
        self.tools.iter().map(|r| r.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.tools.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Update the cached statistics for a tool already present in the
    /// registry; a no-op if the tool has since been removed.
    pub async fn update_statistics(&self, name: &str, statistics: ToolStatistics) {
        if let Some(mut record) = self.tools.get_mut(name) {
            record.statistics = statistics;
        }
    }
}

pub type SharedToolRegistry = Arc<ToolRegistry>;
