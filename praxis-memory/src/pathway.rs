//! The Pathway Cache (C4): "System 1" reuse of whole cached execution
//! plans, keyed by goal embedding similarity (§4.3).

use std::collections::HashMap;
use std::sync::Arc;

use praxis_core::{Pathway, TraceStep};
use praxis_store::{Store, VectorIndex, VectorQuery, VectorUpsert};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::MemoryError;

const VECTOR_NAMESPACE_KEY: &str = "kind";
const VECTOR_NAMESPACE_VALUE: &str = "pathway";

/// In-memory hot copy of every valid pathway, backed by the vector index
/// for similarity search and the relational store for durability — the
/// same split the teacher's `LTMManager` draws between `pattern_cache`
/// and its database bridge.
pub struct PathwayCache {
    store: Arc<Store>,
    index: Arc<VectorIndex>,
    hot: RwLock<HashMap<Uuid, Pathway>>,
}

impl PathwayCache {
    pub fn new(store: Arc<Store>, index: Arc<VectorIndex>) -> Self {
        Self { store, index, hot: RwLock::new(HashMap::new()) }
    }

    /// Load every valid pathway from the store into the hot copy. Call
    /// once at startup; the vector index is assumed already populated or
    /// rebuilt by a prior `store` call in the same process.
    pub async fn warm_up(&self) -> Result<usize, MemoryError> {
        let pathways = self.store.list_valid_pathways().await?;
        let mut hot = self.hot.write().await;
        for pathway in &pathways {
            self.index
                .upsert(VectorUpsert {
                    id: pathway.id.to_string(),
                    vector: pathway.embedding.clone(),
                    metadata: namespace_metadata(),
                })
                .await?;
            hot.insert(pathway.id, pathway.clone());
        }
        Ok(pathways.len())
    }

    /// Cosine top-1 among valid pathways strictly above `threshold`
    /// (§4.3 invariant iii). Ties broken by highest success ratio, then
    /// most recent use (§4.1).
    pub async fn find(&self, embedding: &[f32], threshold: f64) -> Option<Pathway> {
        let mut filters = HashMap::new();
        filters.insert(VECTOR_NAMESPACE_KEY.to_string(), VECTOR_NAMESPACE_VALUE.to_string());

        let candidates = self
            .index
            .search(VectorQuery { vector: embedding.to_vec(), k: 8, filters: Some(filters) })
            .await
            .ok()?;

        let hot = self.hot.read().await;
        let mut best: Option<&Pathway> = None;
        for candidate in &candidates {
            if (candidate.score as f64) <= threshold {
                continue;
            }
            let Ok(id) = Uuid::parse_str(&candidate.id) else { continue };
            let Some(pathway) = hot.get(&id) else { continue };
            if !pathway.valid {
                continue;
            }
            best = Some(match best {
                None => pathway,
                Some(current) => pick_better(current, pathway),
            });
        }
        best.cloned()
    }

    /// Persist a freshly executed trace as a reusable pathway.
    pub async fn store(
        &self,
        goal_text: impl Into<String>,
        embedding: Vec<f32>,
        trace: Vec<TraceStep>,
        tool_dependencies: HashMap<String, String>,
    ) -> Result<Uuid, MemoryError> {
        let now = chrono::Utc::now();
        let pathway = Pathway {
            id: Uuid::new_v4(),
            goal_text: goal_text.into(),
            embedding: embedding.clone(),
            trace,
            tool_dependencies,
            success_count: 1,
            failure_count: 0,
            valid: true,
            created_at: now,
            last_used_at: now,
        };

        self.store.insert_pathway(&pathway).await?;
        self.index
            .upsert(VectorUpsert { id: pathway.id.to_string(), vector: embedding, metadata: namespace_metadata() })
            .await?;
        self.hot.write().await.insert(pathway.id, pathway.clone());

        debug!("stored pathway {} for goal {:?}", pathway.id, pathway.goal_text);
        Ok(pathway.id)
    }

    pub async fn record_outcome(&self, id: Uuid, success: bool) -> Result<(), MemoryError> {
        self.store.record_pathway_outcome(id, success).await?;
        let mut hot = self.hot.write().await;
        if let Some(pathway) = hot.get_mut(&id) {
            if success {
                pathway.success_count += 1;
            } else {
                pathway.failure_count += 1;
            }
            pathway.last_used_at = chrono::Utc::now();
        }
        Ok(())
    }

    /// Invalidation is terminal (§4.3 invariant ii).
    pub async fn invalidate_by_tool(&self, tool_name: &str) -> Result<u64, MemoryError> {
        let n = self.store.invalidate_pathways_by_tool(tool_name).await?;
        let mut hot = self.hot.write().await;
        for pathway in hot.values_mut() {
            if pathway.tool_dependencies.contains_key(tool_name) {
                pathway.valid = false;
            }
        }
        if n > 0 {
            info!("invalidated {} pathway(s) depending on tool {}", n, tool_name);
        }
        Ok(n)
    }

    pub async fn invalidate_by_hash(&self, tool_name: &str, new_hash: &str) -> Result<u64, MemoryError> {
        let n = self.store.invalidate_pathways_by_hash(tool_name, new_hash).await?;
        let mut hot = self.hot.write().await;
        for pathway in hot.values_mut() {
            if let Some(stored_hash) = pathway.tool_dependencies.get(tool_name) {
                if stored_hash != new_hash {
                    pathway.valid = false;
                }
            }
        }
        Ok(n)
    }
}

fn namespace_metadata() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert(VECTOR_NAMESPACE_KEY.to_string(), VECTOR_NAMESPACE_VALUE.to_string());
    m
}

fn pick_better<'a>(a: &'a Pathway, b: &'a Pathway) -> &'a Pathway {
    if b.success_ratio() > a.success_ratio() {
        b
    } else if b.success_ratio() < a.success_ratio() {
        a
    } else if b.last_used_at > a.last_used_at {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vec(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    async fn new_cache() -> PathwayCache {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let index = Arc::new(VectorIndex::new(4).unwrap());
        PathwayCache::new(store, index)
    }

    #[tokio::test]
    async fn stores_and_finds_above_threshold() {
        let cache = new_cache().await;
        cache
            .store("back up the database", unit_vec(4, 0), vec![], HashMap::new())
            .await
            .unwrap();

        let found = cache.find(&unit_vec(4, 0), 0.90).await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().goal_text, "back up the database");
    }

    #[tokio::test]
    async fn invalidate_by_tool_makes_pathway_unfindable() {
        let cache = new_cache().await;
        let mut deps = HashMap::new();
        deps.insert("backup_tool".to_string(), "hash-v1".to_string());
        cache.store("back up the database", unit_vec(4, 0), vec![], deps).await.unwrap();

        cache.invalidate_by_tool("backup_tool").await.unwrap();
        let found = cache.find(&unit_vec(4, 0), 0.90).await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn tie_break_prefers_higher_success_ratio() {
        let cache = new_cache().await;
        let a = cache.store("goal a", unit_vec(4, 0), vec![], HashMap::new()).await.unwrap();
        let _b = cache.store("goal a variant", unit_vec(4, 0), vec![], HashMap::new()).await.unwrap();

        cache.record_outcome(a, true).await.unwrap();
        cache.record_outcome(a, true).await.unwrap();

        let found = cache.find(&unit_vec(4, 0), 0.5).await.unwrap();
        assert_eq!(found.id, a);
    }
}
