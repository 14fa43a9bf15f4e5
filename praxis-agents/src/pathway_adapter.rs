//! Adapts `praxis-memory`'s `PathwayCache` onto `praxis-tools`'s
//! `PathwayInvalidator` trait, resolving the C8→C4 dependency direction
//! the crate-to-component split otherwise forbids (`praxis-tools` cannot
//! depend on `praxis-memory`).

use std::sync::Arc;

use async_trait::async_trait;
use praxis_memory::PathwayCache;
use praxis_tools::{PathwayInvalidator, ToolsError};

pub struct PathwayCacheInvalidator {
    cache: Arc<PathwayCache>,
}

impl PathwayCacheInvalidator {
    pub fn new(cache: Arc<PathwayCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PathwayInvalidator for PathwayCacheInvalidator {
    async fn invalidate_by_tool(&self, tool_name: &str) -> Result<u64, ToolsError> {
        self.cache.invalidate_by_tool(tool_name).await.map_err(|e| ToolsError::Invalidation(e.to_string()))
    }

    async fn invalidate_by_hash(&self, tool_name: &str, new_hash: &str) -> Result<u64, ToolsError> {
        self.cache
            .invalidate_by_hash(tool_name, new_hash)
            .await
            .map_err(|e| ToolsError::Invalidation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_store::{Store, VectorIndex};
    use std::collections::HashMap;

    #[tokio::test]
    async fn invalidate_by_tool_delegates_to_the_wrapped_cache() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let index = Arc::new(VectorIndex::new(4).unwrap());
        let cache = Arc::new(PathwayCache::new(store, index));
        let mut deps = HashMap::new();
        deps.insert("backup_tool".to_string(), "hash1".to_string());
        cache.store("back up the database", vec![1.0, 0.0, 0.0, 0.0], vec![], deps).await.unwrap();

        let adapter = PathwayCacheInvalidator::new(cache);
        let invalidated = adapter.invalidate_by_tool("backup_tool").await.unwrap();
        assert_eq!(invalidated, 1);
    }
}
