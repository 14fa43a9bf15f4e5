//! Praxis Memory
//!
//! The Pathway Cache (C4, "System 1" reuse of whole execution plans) and
//! the Decomposition Learner (C5, coarser goal→subgoal pattern reuse).
//! Both keep an in-memory hot copy (`Arc<RwLock<HashMap<..>>>`) backed by
//! a [`praxis_store::VectorIndex`] for similarity search and a
//! [`praxis_store::Store`] for durability, the same split the teacher's
//! `LTMManager` draws between `pattern_cache` and its database bridge.

pub mod decomposition;
pub mod error;
pub mod pathway;

pub use decomposition::DecompositionLearner;
pub use error::MemoryError;
pub use pathway::PathwayCache;
