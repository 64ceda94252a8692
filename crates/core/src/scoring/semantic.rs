use crate::models::{Chunk, ChunkId};
use crate::traits::ChunkStore;
use std::collections::HashMap;

/// Cosine similarity in `[-1, 1]`. `None` when the vectors differ in length or
/// either one has zero magnitude.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Option<f64> {
    if left.len() != right.len() || left.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut left_norm = 0.0f64;
    let mut right_norm = 0.0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return None;
    }
    Some((dot / (left_norm.sqrt() * right_norm.sqrt())).clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticScorer;

impl SemanticScorer {
    /// Scores `candidates`, or every chunk in the store when `None`. Chunks
    /// whose embedding cannot be compared with the query are left out.
    pub fn score(
        &self,
        query_vector: &[f32],
        store: &dyn ChunkStore,
        candidates: Option<&[ChunkId]>,
    ) -> HashMap<ChunkId, f64> {
        let score_chunk = |chunk: &Chunk| {
            cosine_similarity(query_vector, &chunk.embedding)
                .map(|similarity| (chunk.chunk_id.clone(), similarity))
        };

        match candidates {
            None => store.chunks().filter_map(score_chunk).collect(),
            Some(ids) => {
                let known: Vec<ChunkId> = ids
                    .iter()
                    .filter(|id| store.contains_chunk(id))
                    .cloned()
                    .collect();
                store
                    .chunks_by_ids(&known)
                    .map(|chunks| chunks.iter().filter_map(score_chunk).collect())
                    .unwrap_or_default()
            }
        }
    }
}
