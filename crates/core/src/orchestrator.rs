use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{QueryError, SignalFailure, SignalFailureReason};
use crate::fusion::{FusionRanker, SignalOutcome, SignalSet};
use crate::models::{SearchMode, SearchResult, Signal};
use crate::scoring::{classify_intent, derive_seeds, GraphWalkScorer, MultiModalScorer, SemanticScorer};
use crate::traits::{ChunkStore, Embedder};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fans a query out to the scorers its mode needs, waits for each one up to
/// the scorer timeout, and fuses whatever came back.
pub struct SearchCoordinator {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
    graph: GraphWalkScorer,
    modality: MultiModalScorer,
    ranker: FusionRanker,
}

impl SearchCoordinator {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>, config: EngineConfig) -> Self {
        if let Some(indexed) = store.dimensions() {
            if indexed != embedder.dimensions() {
                warn!(
                    indexed,
                    embedder = embedder.dimensions(),
                    "embedder dimension differs from the index; semantic signal will be unavailable"
                );
            }
        }
        Self {
            graph: GraphWalkScorer::new(config.graph_walk),
            modality: MultiModalScorer::new(config.modality),
            ranker: FusionRanker::from_config(&config),
            store,
            embedder,
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn ChunkStore> {
        Arc::clone(&self.store)
    }

    pub fn graph_scorer(&self) -> &GraphWalkScorer {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if self.store.all_chunk_count() == 0 {
            return Err(QueryError::EmptyIndex);
        }
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled {
                at: "before scoring".to_string(),
            });
        }

        let query_id = Uuid::new_v4();
        let started = Instant::now();
        debug!(%query_id, %mode, top_k, "scoring query");

        let (semantic, graph, modality) = tokio::join!(
            self.semantic_signal(query, mode),
            self.graph_signal(query, mode),
            self.modality_signal(query, mode)
        );
        let signals = SignalSet {
            semantic,
            graph,
            modality,
        };

        for failure in signals.failures() {
            warn!(%query_id, signal = %failure.signal, reason = %failure.reason, "signal unavailable");
        }

        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled {
                at: "after scoring".to_string(),
            });
        }

        let hits = self.ranker.rank(mode, &signals, self.store.as_ref(), top_k)?;
        info!(
            %query_id,
            %mode,
            hits = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search completed"
        );

        Ok(SearchResult {
            query_id,
            query: query.to_string(),
            mode,
            signal_weights: self.ranker.effective_weights(mode, &signals),
            unavailable_signals: signals.failures(),
            hits,
        })
    }

    async fn semantic_signal(&self, query: &str, mode: SearchMode) -> SignalOutcome {
        if !mode.uses(Signal::Semantic) {
            return SignalOutcome::NotRequested;
        }

        let embedder = Arc::clone(&self.embedder);
        let store = Arc::clone(&self.store);
        run_signal(Signal::Semantic, self.config.scorer_timeout, async move {
            let vector = embedder
                .embed(query)
                .await
                .map_err(|error| SignalFailureReason::EmbeddingUnavailable(error.to_string()))?;
            if let Some(indexed) = store.dimensions() {
                if vector.len() != indexed {
                    return Err(SignalFailureReason::EmbeddingUnavailable(format!(
                        "query embedding has {} dimensions, index has {indexed}",
                        vector.len()
                    )));
                }
            }
            tokio::task::spawn_blocking(move || SemanticScorer.score(&vector, store.as_ref(), None))
                .await
                .map_err(|error| SignalFailureReason::TaskFailed(error.to_string()))
        })
        .await
    }

    async fn graph_signal(&self, query: &str, mode: SearchMode) -> SignalOutcome {
        if !mode.uses(Signal::Graph) {
            return SignalOutcome::NotRequested;
        }

        let store = Arc::clone(&self.store);
        let scorer = self.graph.clone();
        let query = query.to_string();
        run_signal(Signal::Graph, self.config.scorer_timeout, async move {
            tokio::task::spawn_blocking(move || {
                let seeds = derive_seeds(store.as_ref(), &query);
                scorer.score(store.as_ref(), &seeds)
            })
            .await
            .map_err(|error| SignalFailureReason::TaskFailed(error.to_string()))
        })
        .await
    }

    async fn modality_signal(&self, query: &str, mode: SearchMode) -> SignalOutcome {
        if !mode.uses(Signal::Modality) {
            return SignalOutcome::NotRequested;
        }

        let store = Arc::clone(&self.store);
        let scorer = self.modality.clone();
        let intent = classify_intent(query);
        debug!(?intent, "query intent");
        run_signal(Signal::Modality, self.config.scorer_timeout, async move {
            tokio::task::spawn_blocking(move || scorer.score(store.as_ref(), intent))
                .await
                .map_err(|error| SignalFailureReason::TaskFailed(error.to_string()))
        })
        .await
    }
}

async fn run_signal<F>(signal: Signal, limit: Duration, scoring: F) -> SignalOutcome
where
    F: Future<Output = Result<HashMap<String, f64>, SignalFailureReason>>,
{
    match tokio::time::timeout(limit, scoring).await {
        Ok(Ok(scores)) => SignalOutcome::Available(scores),
        Ok(Err(reason)) => SignalOutcome::Unavailable(SignalFailure { signal, reason }),
        Err(_) => SignalOutcome::Unavailable(SignalFailure {
            signal,
            reason: SignalFailureReason::ScorerTimeout(limit.as_millis() as u64),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ten_chunk_site, FailingEmbedder, SlowEmbedder, StaticEmbedder};
    use crate::models::ScoredEvidence;
    use crate::stores::IndexSnapshot;

    fn coordinator(embedder: Arc<dyn Embedder>) -> SearchCoordinator {
        SearchCoordinator::new(Arc::new(ten_chunk_site()), embedder, EngineConfig::default())
    }

    fn ids(result: &SearchResult) -> Vec<&str> {
        result.hits.iter().map(ScoredEvidence::chunk_id).collect()
    }

    #[tokio::test]
    async fn hybrid_ranks_semantic_and_graph_matches_first() -> Result<(), QueryError> {
        let search = coordinator(Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0])));
        let result = search
            .search("pricing plans", SearchMode::Hybrid, 5, &CancellationToken::new())
            .await?;

        assert_eq!(ids(&result), vec!["t1", "t2", "t3", "o1", "o2"]);
        assert!(result.unavailable_signals.is_empty());
        assert_eq!(
            result.signal_weights,
            vec![(Signal::Semantic, 0.5), (Signal::Graph, 0.5)]
        );
        assert_eq!(result.hits[0].scores.graph, Some(0.7));
        assert_eq!(result.hits[3].scores.graph, None);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_degrades_hybrid_to_graph_only() -> Result<(), QueryError> {
        let search = coordinator(Arc::new(FailingEmbedder));
        let result = search
            .search("pricing plans", SearchMode::Hybrid, 5, &CancellationToken::new())
            .await?;

        assert_eq!(ids(&result), vec!["t1", "t2", "t3"]);
        assert!(result.hits.iter().all(|hit| hit.fused_score > 0.0));
        assert_eq!(result.unavailable_signals.len(), 1);
        assert_eq!(result.unavailable_signals[0].signal, Signal::Semantic);
        assert!(matches!(
            result.unavailable_signals[0].reason,
            SignalFailureReason::EmbeddingUnavailable(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_size_query_embedding_is_reported_and_reweighted() -> Result<(), QueryError> {
        let search = coordinator(Arc::new(StaticEmbedder::new(vec![1.0, 0.0])));
        let result = search
            .search("pricing plans", SearchMode::Hybrid, 5, &CancellationToken::new())
            .await?;

        assert_eq!(result.signal_weights, vec![(Signal::Graph, 1.0)]);
        assert_eq!(result.unavailable_signals.len(), 1);
        assert_eq!(result.unavailable_signals[0].signal, Signal::Semantic);
        assert!(matches!(
            &result.unavailable_signals[0].reason,
            SignalFailureReason::EmbeddingUnavailable(reason) if reason.contains("2 dimensions")
        ));
        assert_eq!(&ids(&result)[..3], ["t1", "t2", "t3"]);
        assert!((result.hits[0].fused_score - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn slow_modality_scorer_leaves_ranking_unboosted() -> Result<(), QueryError> {
        let store: Arc<dyn ChunkStore> = Arc::new(ten_chunk_site());
        let query_vector = [1.0, 0.0, 0.0];
        let limit = Duration::from_millis(50);

        let semantic = run_signal(Signal::Semantic, limit, async {
            Ok(SemanticScorer.score(&query_vector, store.as_ref(), None))
        })
        .await;
        let modality = run_signal(Signal::Modality, limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(MultiModalScorer::default().score(store.as_ref(), classify_intent("pricing table")))
        })
        .await;
        let signals = SignalSet {
            semantic,
            graph: SignalOutcome::NotRequested,
            modality,
        };

        let hits = FusionRanker::default().rank(SearchMode::Multimodal, &signals, store.as_ref(), 3)?;
        let ranked: Vec<&str> = hits.iter().map(ScoredEvidence::chunk_id).collect();
        assert_eq!(ranked, vec!["t1", "t2", "t3"]);
        assert!(hits.iter().all(|hit| hit.scores.modality_boost.is_none()));
        assert!((hits[0].fused_score - 1.0).abs() < 1e-9);
        assert_eq!(
            signals.failures(),
            vec![SignalFailure {
                signal: Signal::Modality,
                reason: SignalFailureReason::ScorerTimeout(50),
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn semantic_mode_without_embeddings_fails_with_reasons() {
        let search = coordinator(Arc::new(FailingEmbedder));
        let result = search
            .search("pricing plans", SearchMode::Semantic, 5, &CancellationToken::new())
            .await;

        match result {
            Err(QueryError::AllSignalsUnavailable { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].signal, Signal::Semantic);
            }
            other => panic!("expected AllSignalsUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_embedder_times_out_as_unavailable() -> Result<(), QueryError> {
        let config = EngineConfig {
            scorer_timeout: Duration::from_millis(100),
            ..EngineConfig::default()
        };
        let search = SearchCoordinator::new(
            Arc::new(ten_chunk_site()),
            Arc::new(SlowEmbedder {
                delay: Duration::from_secs(5),
            }),
            config,
        );
        let result = search
            .search("pricing plans", SearchMode::Hybrid, 5, &CancellationToken::new())
            .await?;

        assert_eq!(
            result.unavailable_signals[0].reason,
            SignalFailureReason::ScorerTimeout(100)
        );
        assert_eq!(ids(&result), vec!["t1", "t2", "t3"]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_is_reported_before_embedding() {
        let embedder = Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0]));
        let search = SearchCoordinator::new(
            Arc::new(IndexSnapshot::default()),
            embedder.clone(),
            EngineConfig::default(),
        );
        let result = search
            .search("pricing", SearchMode::Hybrid, 5, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(QueryError::EmptyIndex)));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let search = coordinator(Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0])));
        let result = search
            .search("   ", SearchMode::Hybrid, 5, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(QueryError::EmptyQuery)));
    }

    #[tokio::test]
    async fn cancelled_query_does_no_work() {
        let embedder = Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0]));
        let search = SearchCoordinator::new(
            Arc::new(ten_chunk_site()),
            embedder.clone(),
            EngineConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = search.search("pricing", SearchMode::Hybrid, 5, &cancel).await;
        assert!(matches!(result, Err(QueryError::Cancelled { .. })));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn graph_walk_mode_skips_the_embedder() -> Result<(), QueryError> {
        let embedder = Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0]));
        let search = SearchCoordinator::new(
            Arc::new(ten_chunk_site()),
            embedder.clone(),
            EngineConfig::default(),
        );
        let result = search
            .search("pricing", SearchMode::GraphWalk, 10, &CancellationToken::new())
            .await?;

        assert_eq!(embedder.calls(), 0);
        assert_eq!(ids(&result), vec!["t1", "t2", "t3"]);
        Ok(())
    }

    #[tokio::test]
    async fn multimodal_prefers_tables_for_price_questions() -> Result<(), QueryError> {
        let search = coordinator(Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0])));
        let result = search
            .search("pricing table", SearchMode::Multimodal, 3, &CancellationToken::new())
            .await?;

        assert_eq!(result.hits[0].chunk_id(), "t1");
        assert_eq!(result.hits[0].scores.modality_boost, Some(1.25));
        assert_eq!(result.hits[1].scores.modality_boost, Some(1.0));
        Ok(())
    }
}
