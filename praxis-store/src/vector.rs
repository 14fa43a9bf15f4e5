//! The vector index that backs similarity search for the Pathway Cache
//! (C4) and Tool Discovery (C3).
//!
//! Grounded on `databases/src/faiss.rs`: a `Flat` index with
//! `MetricType::InnerProduct` over L2-normalised vectors (cosine
//! similarity), an `Arc<RwLock<..>>`-guarded index plus a side table of
//! metadata keyed by caller-assigned string ids, and the same
//! metadata-only soft-delete the teacher uses (FAISS's flat index has no
//! cheap single-vector removal).

use std::collections::HashMap;
use std::sync::Arc;

use faiss::{index_factory, Index, MetricType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("faiss error: {0}")]
    Faiss(String),
    #[error("index not initialized")]
    NotInitialized,
}

/// One vector to add or overwrite in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorUpsert {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

/// A similarity query.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    pub filters: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

struct Entry {
    vector: Vec<f32>,
    metadata: HashMap<String, String>,
    deleted: bool,
}

/// Flat, in-process cosine-similarity index. One instance per embedding
/// space (pathways and tool descriptions each get their own).
pub struct VectorIndex {
    index: Arc<RwLock<faiss::index::IndexImpl>>,
    dimension: usize,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    position_to_id: Arc<RwLock<HashMap<usize, String>>>,
    id_to_position: Arc<RwLock<HashMap<String, usize>>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Result<Self, VectorError> {
        let index = index_factory(dimension as u32, "Flat", MetricType::InnerProduct)
            .map_err(|e| VectorError::Faiss(e.to_string()))?;
        Ok(Self {
            index: Arc::new(RwLock::new(index)),
            dimension,
            entries: Arc::new(RwLock::new(HashMap::new())),
            position_to_id: Arc::new(RwLock::new(HashMap::new())),
            id_to_position: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn upsert(&self, item: VectorUpsert) -> Result<(), VectorError> {
        if item.vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch { expected: self.dimension, got: item.vector.len() });
        }
        let normalized = l2_normalize(&item.vector);

        {
            let mut entries = self.entries.write().await;
            if let Some(existing) = entries.get_mut(&item.id) {
                existing.vector = normalized.clone();
                existing.metadata = item.metadata.clone();
                existing.deleted = false;
            } else {
                entries.insert(
                    item.id.clone(),
                    Entry { vector: normalized.clone(), metadata: item.metadata.clone(), deleted: false },
                );
            }
        }

        let mut index = self.index.write().await;
        index.add(&normalized).map_err(|e| VectorError::Faiss(e.to_string()))?;
        let position = (index.ntotal() - 1) as usize;

        let mut position_to_id = self.position_to_id.write().await;
        let mut id_to_position = self.id_to_position.write().await;
        // Retire the id's previous FAISS position (if any): FAISS can't
        // remove a single vector from a flat index, so the old slot stays
        // physically present but orphaned, and search skips unmapped
        // positions the same way it skips soft-deleted entries.
        if let Some(old_position) = id_to_position.insert(item.id.clone(), position) {
            position_to_id.remove(&old_position);
        }
        position_to_id.insert(position, item.id.clone());

        debug!("upserted vector id={}", item.id);
        Ok(())
    }

    /// Soft-delete: the FAISS flat index has no cheap single-vector
    /// removal, so deletion marks the entry dead and search results
    /// filter it out, matching the teacher's `remove_embedding`.
    pub async fn delete(&self, id: &str) -> Result<bool, VectorError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn search(&self, query: VectorQuery) -> Result<Vec<VectorMatch>, VectorError> {
        if query.vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch { expected: self.dimension, got: query.vector.len() });
        }
        let normalized = l2_normalize(&query.vector);

        // Over-fetch to absorb soft-deleted / filtered-out hits.
        let fetch_k = (query.k * 4).max(query.k + 8);
        let result = {
            let mut index = self.index.write().await;
            if index.ntotal() == 0 {
                return Ok(Vec::new());
            }
            index
                .search(&normalized, fetch_k)
                .map_err(|e| VectorError::Faiss(e.to_string()))?
        };

        let position_to_id = self.position_to_id.read().await;
        let entries = self.entries.read().await;

        let mut matches = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();
        for (label, score) in result.labels.iter().zip(result.distances.iter()) {
            let Some(position) = label.get() else { continue };
            let Some(id) = position_to_id.get(&(position as usize)) else { continue };
            let Some(entry) = entries.get(id) else { continue };
            if entry.deleted {
                continue;
            }
            // Belt and suspenders alongside the position retirement in
            // `upsert`: never surface the same id twice in one result set.
            if !seen_ids.insert(id.clone()) {
                continue;
            }
            if let Some(ref filters) = query.filters {
                if !matches_filters(&entry.metadata, filters) {
                    continue;
                }
            }
            matches.push(VectorMatch { id: id.clone(), score: *score, metadata: entry.metadata.clone() });
            if matches.len() >= query.k {
                break;
            }
        }

        Ok(matches)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values().filter(|e| !e.deleted).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn matches_filters(metadata: &HashMap<String, String>, filters: &HashMap<String, String>) -> bool {
    filters.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        warn!("normalizing a zero vector, leaving it as-is");
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vec(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn exact_match_has_the_highest_score() {
        let index = VectorIndex::new(4).unwrap();
        index.upsert(VectorUpsert { id: "a".to_string(), vector: unit_vec(4, 0), metadata: HashMap::new() }).await.unwrap();
        index.upsert(VectorUpsert { id: "b".to_string(), vector: unit_vec(4, 1), metadata: HashMap::new() }).await.unwrap();

        let results = index.search(VectorQuery { vector: unit_vec(4, 0), k: 2, filters: None }).await.unwrap();
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn deleted_vectors_are_excluded_from_search() {
        let index = VectorIndex::new(4).unwrap();
        index.upsert(VectorUpsert { id: "a".to_string(), vector: unit_vec(4, 0), metadata: HashMap::new() }).await.unwrap();

        assert!(index.delete("a").await.unwrap());
        let results = index.search(VectorQuery { vector: unit_vec(4, 0), k: 5, filters: None }).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let index = VectorIndex::new(4).unwrap();
        let err = index
            .upsert(VectorUpsert { id: "a".to_string(), vector: vec![0.0; 3], metadata: HashMap::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { expected: 4, got: 3 }));
    }

    #[tokio::test]
    async fn filters_restrict_results() {
        let index = VectorIndex::new(4).unwrap();
        let mut meta_a = HashMap::new();
        meta_a.insert("kind".to_string(), "pathway".to_string());
        let mut meta_b = HashMap::new();
        meta_b.insert("kind".to_string(), "tool".to_string());

        index.upsert(VectorUpsert { id: "a".to_string(), vector: unit_vec(4, 0), metadata: meta_a }).await.unwrap();
        index.upsert(VectorUpsert { id: "b".to_string(), vector: unit_vec(4, 0), metadata: meta_b }).await.unwrap();

        let mut filters = HashMap::new();
        filters.insert("kind".to_string(), "tool".to_string());
        let results = index.search(VectorQuery { vector: unit_vec(4, 0), k: 5, filters: Some(filters) }).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }
}
