//! # Embedding Abstraction (component E)
//!
//! Like the vector index, the embedding model itself is an external
//! collaborator named by interface only (spec.md §1). This trait is the
//! seam an embedding-model adapter implements; memory-core never loads a
//! model directly.

use async_trait::async_trait;

use crate::Result;

/// Converts text to a fixed-dimension embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimensionality of vectors this embedder produces.
    fn dimensions(&self) -> usize;

    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// An [`Embedder`] that produces no vectors.
///
/// Used when `EMBEDDING_MODEL` is unset; paired with [`crate::vector::NullVectorIndex`]
/// so tier 2 of retrieval degrades to empty results instead of failing.
#[derive(Debug, Default)]
pub struct NullEmbedder;

#[async_trait]
impl Embedder for NullEmbedder {
    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}
