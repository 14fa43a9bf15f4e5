//! Tool Discovery (C3): vector-similarity search over tool descriptions,
//! statistically re-ranked by success rate × log(usage) × recency.

use std::collections::HashMap;
use std::sync::Arc;

use praxis_store::{VectorIndex, VectorQuery, VectorUpsert};

use crate::error::ToolsError;
use crate::registry::{SharedToolRegistry, ToolRecord};

const VECTOR_NAMESPACE_KEY: &str = "kind";
const VECTOR_NAMESPACE_VALUE: &str = "tool_description";

/// One candidate tool surfaced by discovery, carrying both the raw
/// similarity score and the composite re-rank score it was ordered by.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: ToolRecord,
    pub similarity: f32,
    pub rank_score: f64,
}

/// Wraps the shared tool description index and the live registry to turn
/// a free-text (sub)goal into a ranked shortlist of candidate tools.
pub struct ToolDiscovery {
    index: Arc<VectorIndex>,
    registry: SharedToolRegistry,
}

impl ToolDiscovery {
    pub fn new(index: Arc<VectorIndex>, registry: SharedToolRegistry) -> Self {
        Self { index, registry }
    }

    /// Index (or re-index) a tool's description embedding. Called by the
    /// lifecycle manager whenever a tool is registered or its description
    /// changes.
    pub async fn index_description(&self, tool_name: &str, embedding: Vec<f32>) -> Result<(), ToolsError> {
        self.index
            .upsert(VectorUpsert { id: tool_name.to_string(), vector: embedding, metadata: namespace_metadata() })
            .await?;
        Ok(())
    }

    pub async fn remove_description(&self, tool_name: &str) -> Result<(), ToolsError> {
        self.index.delete(tool_name).await?;
        Ok(())
    }

    /// Top-k candidates for a (sub)goal embedding, re-ranked by
    /// `success_rate * log(usage + 1) * recency_weight`, optionally
    /// excluding a tool known to have just failed (§4.2 fallback path).
    pub async fn discover(
        &self,
        embedding: &[f32],
        k: usize,
        exclude: Option<&str>,
    ) -> Result<Vec<Candidate>, ToolsError> {
        let mut filters = HashMap::new();
        filters.insert(VECTOR_NAMESPACE_KEY.to_string(), VECTOR_NAMESPACE_VALUE.to_string());

        let matches = self
            .index
            .search(VectorQuery { vector: embedding.to_vec(), k: (k * 4).max(k + 8), filters: Some(filters) })
            .await?;

        let mut candidates = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for m in matches {
            if Some(m.id.as_str()) == exclude {
                continue;
            }
            // The index already dedups by id; this guards against a stale
            // duplicate surviving a future index implementation change.
            if !seen.insert(m.id.clone()) {
                continue;
            }
            let Ok(record) = self.registry.get(&m.id).await else { continue };
            let rank_score = rerank_score(&record, m.score);
            candidates.push(Candidate { record, similarity: m.score, rank_score });
        }

        candidates.sort_by(|a, b| b.rank_score.partial_cmp(&a.rank_score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(k);
        Ok(candidates)
    }
}

/// `success_rate * log(usage + 1) * recency_weight`. Recency decays
/// gently over the 30 days following last use so a long-idle-but-reliable
/// tool still outranks a brand-new one, but a recently exercised tool
/// with the same reliability wins ties.
fn rerank_score(record: &ToolRecord, similarity: f32) -> f64 {
    let stats = &record.statistics;
    let usage = stats.total;
    let usage_factor = (usage as f64 + 1.0).ln();
    let recency_weight = stats
        .last_use
        .map(|last| {
            let age_days = (chrono::Utc::now() - last).num_seconds().max(0) as f64 / 86_400.0;
            (1.0 - (age_days / 30.0)).clamp(0.1, 1.0)
        })
        .unwrap_or(0.5);

    similarity as f64 * stats.success_rate() * (1.0 + usage_factor) * recency_weight
}

fn namespace_metadata() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert(VECTOR_NAMESPACE_KEY.to_string(), VECTOR_NAMESPACE_VALUE.to_string());
    m
}
