use crate::error::{CompletionError, EmbeddingError, StoreError};
use crate::models::{Chunk, ChunkId, EntityNode, GraphEdge, NodeId};
use async_trait::async_trait;
use std::time::Duration;

/// Read-only view over the persisted chunks and graph.
///
/// Implementations are shared across concurrent queries behind an `Arc`, so
/// every method takes `&self` and none of them may block on a collaborator.
pub trait ChunkStore: Send + Sync {
    /// Chunks in the same order as `ids`. Fails with `StoreError::NotFound`
    /// naming every id that does not exist.
    fn chunks_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, StoreError>;

    fn all_chunk_count(&self) -> usize;

    fn edges_from(&self, node_id: &str) -> &[GraphEdge];

    fn contains_chunk(&self, chunk_id: &str) -> bool;

    fn chunks(&self) -> Box<dyn Iterator<Item = &Chunk> + '_>;

    fn entities(&self) -> &[EntityNode];

    /// Pages a visitor can land on without following a link.
    fn entry_points(&self) -> &[NodeId];

    /// Length of every stored embedding; `None` while the store is empty or
    /// no chunk carries a vector.
    fn dimensions(&self) -> Option<usize>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Deterministic for identical input. Never returns a zero vector; a
    /// backend that cannot produce one fails with `EmbeddingError::Unavailable`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, CompletionError>;

    /// Model or backend name, for logs.
    fn name(&self) -> &str;
}
