//! # Vector Index Abstraction (component D)
//!
//! The concrete vector index (and the embedding model behind it) is an
//! external collaborator named by interface only: production deployments
//! plug in whatever ANN/index implementation they run. memory-core depends
//! only on this trait, plus [`crate::embedder::Embedder`] for turning text
//! into vectors in the first place.

use async_trait::async_trait;

use crate::Result;

/// A single nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: i64,
    /// Cosine distance in `[0.0, 2.0]`; lower is more similar. Callers
    /// convert to a similarity score via `max(0.0, 1.0 - distance)`
    /// (spec.md §4.H, tier 2).
    pub distance: f32,
}

/// Minimal nearest-neighbor index over knowledge item ids.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for `id`.
    async fn upsert(&self, id: i64, embedding: &[f32]) -> Result<()>;

    /// Remove the vector for `id`, if present.
    async fn remove(&self, id: i64) -> Result<()>;

    /// Return up to `limit` nearest neighbors to `query`, closest first.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>>;
}

/// A [`VectorIndex`] that stores nothing and always returns no hits.
///
/// The default when no embedding model is configured (`EMBEDDING_MODEL`
/// unset): retrieval tier 2 degrades to empty results rather than failing,
/// matching the original's graceful degradation when semantic search is
/// unavailable.
#[derive(Debug, Default)]
pub struct NullVectorIndex;

#[async_trait]
impl VectorIndex for NullVectorIndex {
    async fn upsert(&self, _id: i64, _embedding: &[f32]) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _id: i64) -> Result<()> {
        Ok(())
    }

    async fn search(&self, _query: &[f32], _limit: usize) -> Result<Vec<VectorHit>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_index_is_always_empty() {
        let idx = NullVectorIndex;
        idx.upsert(1, &[0.1, 0.2]).await.unwrap();
        let hits = idx.search(&[0.1, 0.2], 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
