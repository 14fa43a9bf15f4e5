//! The Decomposition Learner (C5): coarser goal→subgoal pattern reuse,
//! suggested when no full pathway is cached (§4.4).

use std::collections::HashMap;
use std::sync::Arc;

use praxis_core::DecompositionPattern;
use praxis_store::{Store, VectorIndex, VectorQuery, VectorUpsert};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::MemoryError;

const VECTOR_NAMESPACE_KEY: &str = "kind";
const VECTOR_NAMESPACE_VALUE: &str = "decomposition_pattern";

/// A suggested decomposition: the subgoal list and the learner's
/// confidence in it (§4.4: `success_rate × min(1, log(usage+1)/log(10))`).
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub subgoals: Vec<String>,
    pub confidence: f64,
    pub pattern_id: Uuid,
}

/// In-memory map of patterns keyed by normalised goal text, backed by the
/// vector index for similarity search and the relational store for
/// durability.
pub struct DecompositionLearner {
    store: Arc<Store>,
    index: Arc<VectorIndex>,
    hot: RwLock<HashMap<String, DecompositionPattern>>,
}

impl DecompositionLearner {
    pub fn new(store: Arc<Store>, index: Arc<VectorIndex>) -> Self {
        Self { store, index, hot: RwLock::new(HashMap::new()) }
    }

    pub async fn warm_up(&self, goal_type: &str) -> Result<usize, MemoryError> {
        let patterns = self.store.list_patterns_by_goal_type(goal_type).await?;
        let mut hot = self.hot.write().await;
        for pattern in &patterns {
            self.index
                .upsert(VectorUpsert {
                    id: pattern.id.to_string(),
                    vector: pattern.embedding.clone(),
                    metadata: namespace_metadata(),
                })
                .await?;
            hot.insert(DecompositionPattern::normalize(&pattern.goal_text), pattern.clone());
        }
        Ok(patterns.len())
    }

    /// `Suggest(goalEmbedding) -> (subgoals, confidence)?`. Suggestion
    /// threshold is lower than the pathway cache's (coarser patterns);
    /// when multiple match above threshold, prefer the highest efficiency
    /// score (§4.4).
    pub async fn suggest(&self, embedding: &[f32], threshold: f64) -> Option<Suggestion> {
        let mut filters = HashMap::new();
        filters.insert(VECTOR_NAMESPACE_KEY.to_string(), VECTOR_NAMESPACE_VALUE.to_string());

        let candidates = self
            .index
            .search(VectorQuery { vector: embedding.to_vec(), k: 8, filters: Some(filters) })
            .await
            .ok()?;

        let hot = self.hot.read().await;
        let mut best: Option<&DecompositionPattern> = None;
        for candidate in &candidates {
            if (candidate.score as f64) <= threshold {
                continue;
            }
            let pattern = hot.values().find(|p| p.id.to_string() == candidate.id)?;
            best = Some(match best {
                None => pattern,
                Some(current) if pattern.efficiency_score > current.efficiency_score => pattern,
                Some(current) => current,
            });
        }

        best.map(|pattern| Suggestion {
            subgoals: pattern.subgoals.clone(),
            confidence: pattern.confidence(),
            pattern_id: pattern.id,
        })
    }

    /// `Store(goal, subgoals, success, duration, tools)`. Patterns with
    /// identical normalised goal text collapse into one row with an
    /// incremented usage count (§3, §4.4).
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        goal_text: impl Into<String>,
        goal_type: impl Into<String>,
        subgoals: Vec<String>,
        success: bool,
        execution_time_ms: u64,
        tools_used: Vec<String>,
        embedding: Vec<f32>,
    ) -> Result<Uuid, MemoryError> {
        let goal_text = goal_text.into();
        let normalized = DecompositionPattern::normalize(&goal_text);
        let now = chrono::Utc::now();

        let mut hot = self.hot.write().await;
        let (id, pattern) = if let Some(existing) = hot.get(&normalized) {
            let mut updated = existing.clone();
            updated.usage_count += 1;
            updated.success = success;
            updated.last_used_at = now;
            (updated.id, updated)
        } else {
            let pattern = DecompositionPattern {
                id: Uuid::new_v4(),
                goal_text: goal_text.clone(),
                goal_type: goal_type.into(),
                subgoals,
                success,
                execution_time_ms,
                tools_used,
                usage_count: 1,
                efficiency_score: efficiency_score(execution_time_ms, success),
                embedding: embedding.clone(),
                created_at: now,
                last_used_at: now,
            };
            (pattern.id, pattern)
        };

        self.store.upsert_decomposition_pattern(&pattern).await?;
        if !hot.contains_key(&normalized) {
            self.index
                .upsert(VectorUpsert { id: id.to_string(), vector: embedding, metadata: namespace_metadata() })
                .await?;
        }
        hot.insert(normalized, pattern);

        Ok(id)
    }
}

/// Faster, successful decompositions score higher. Purely heuristic —
/// this is the input to the efficiency tie-break, not to confidence.
fn efficiency_score(execution_time_ms: u64, success: bool) -> f64 {
    if !success {
        return 0.0;
    }
    1.0 / (1.0 + (execution_time_ms as f64 / 1000.0))
}

fn namespace_metadata() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert(VECTOR_NAMESPACE_KEY.to_string(), VECTOR_NAMESPACE_VALUE.to_string());
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vec(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    async fn new_learner() -> DecompositionLearner {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let index = Arc::new(VectorIndex::new(4).unwrap());
        DecompositionLearner::new(store, index)
    }

    #[tokio::test]
    async fn identical_normalized_goal_text_collapses_usage_count() {
        let learner = new_learner().await;
        learner
            .store("Deploy the  Service", "deployment", vec!["build".into()], true, 500, vec![], unit_vec(4, 0))
            .await
            .unwrap();
        learner
            .store("deploy the service", "deployment", vec!["build".into()], true, 400, vec![], unit_vec(4, 0))
            .await
            .unwrap();

        let patterns = learner.store.list_patterns_by_goal_type("deployment").await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].usage_count, 2);
    }

    #[tokio::test]
    async fn suggests_above_threshold_with_confidence() {
        let learner = new_learner().await;
        learner
            .store("back up the database", "maintenance", vec!["snapshot".into()], true, 200, vec![], unit_vec(4, 0))
            .await
            .unwrap();

        let suggestion = learner.suggest(&unit_vec(4, 0), 0.80).await;
        assert!(suggestion.is_some());
        let suggestion = suggestion.unwrap();
        assert_eq!(suggestion.subgoals, vec!["snapshot".to_string()]);
        assert!(suggestion.confidence > 0.0);
    }

    #[tokio::test]
    async fn below_threshold_no_candidate_matches() {
        let learner = new_learner().await;
        learner
            .store("back up the database", "maintenance", vec!["snapshot".into()], true, 200, vec![], unit_vec(4, 0))
            .await
            .unwrap();

        // orthogonal query vector -> similarity 0, below any positive threshold
        let suggestion = learner.suggest(&unit_vec(4, 1), 0.80).await;
        assert!(suggestion.is_none());
    }
}
