use crate::agents::AgentPipelineCoordinator;
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::conversation::ConversationContext;
use crate::error::QueryError;
use crate::models::{PipelineResult, SearchMode};
use crate::orchestrator::SearchCoordinator;
use crate::traits::{ChunkStore, CompletionClient, Embedder};
use std::sync::Arc;
use tracing::info;

/// Public entry point: retrieval followed by the answer pipeline.
///
/// A successful result may still be degraded; check
/// [`PipelineResult::degraded`] and [`PipelineResult::degradations`].
pub struct AnswerService {
    search: SearchCoordinator,
    pipeline: AgentPipelineCoordinator,
}

impl AnswerService {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn CompletionClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pipeline: AgentPipelineCoordinator::new(completion, config.clone()),
            search: SearchCoordinator::new(store, embedder, config),
        }
    }

    pub fn search_coordinator(&self) -> &SearchCoordinator {
        &self.search
    }

    pub async fn answer_query(
        &self,
        query_text: &str,
        search_mode: &str,
        top_k: usize,
    ) -> Result<PipelineResult, QueryError> {
        self.answer_query_with_cancel(query_text, search_mode, top_k, &CancellationToken::new())
            .await
    }

    pub async fn answer_query_with_cancel(
        &self,
        query_text: &str,
        search_mode: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, QueryError> {
        self.answer_in_conversation(
            query_text,
            search_mode,
            top_k,
            &ConversationContext::new(),
            cancel,
        )
        .await
    }

    /// Answers a follow-up question. Recent turns of `conversation` are shown
    /// to the answer stages; recording the new turn is left to the caller.
    pub async fn answer_query_in_conversation(
        &self,
        query_text: &str,
        search_mode: &str,
        top_k: usize,
        conversation: &ConversationContext,
    ) -> Result<PipelineResult, QueryError> {
        self.answer_in_conversation(
            query_text,
            search_mode,
            top_k,
            conversation,
            &CancellationToken::new(),
        )
        .await
    }

    pub async fn answer_in_conversation(
        &self,
        query_text: &str,
        search_mode: &str,
        top_k: usize,
        conversation: &ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, QueryError> {
        let mode: SearchMode = search_mode.parse()?;
        let search = self.search.search(query_text, mode, top_k, cancel).await?;
        let store = self.search.store();
        let result = self
            .pipeline
            .run(
                &search,
                store.as_ref(),
                self.search.graph_scorer(),
                conversation,
                cancel,
            )
            .await?;

        info!(
            query_id = %result.query_id,
            %mode,
            relationship = ?conversation.relationship(),
            confidence = result.confidence,
            degraded = result.degraded,
            sources = result.sources_used.len(),
            "query answered"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{
        ten_chunk_site, Reply, ScriptedCompletion, StaticEmbedder, PRICING, SITE,
    };
    use crate::models::Stage;
    use crate::stores::IndexSnapshot;

    const STRUCTURED: &str = r#"Here are the facts:
{"key_facts": [
  {"statement": "The Starter plan costs $10 per month for 3 users", "sources": ["t1"], "category": "pricing"},
  {"statement": "The Pro plan costs $25 per month with priority support", "sources": ["t2", "t1"]},
  {"statement": "Enterprise plans are priced on request", "sources": ["t3", "bogus"]}
 ],
 "information_gaps": ["Annual discounts are not listed"]}"#;

    fn scripted() -> ScriptedCompletion {
        ScriptedCompletion::new()
            .text(Stage::InformationStructurer, STRUCTURED)
            .text(
                Stage::SiteMapping,
                &format!(r#"{{"related": ["{SITE}", "o1"], "analysis": "Plans are on the pricing page."}}"#),
            )
            .text(
                Stage::ResponseStructurer,
                "Starter costs $10 per month and Pro costs $25 per month.",
            )
            .text(
                Stage::FinalVerifier,
                r#"{"agreement": 0.9, "revised_answer": "The Starter plan costs $10 per month and the Pro plan costs $25 per month.", "unsupported": []}"#,
            )
    }

    fn service(completion: ScriptedCompletion) -> (AnswerService, Arc<StaticEmbedder>) {
        let embedder = Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0]));
        let service = AnswerService::new(
            Arc::new(ten_chunk_site()),
            embedder.clone(),
            Arc::new(completion),
            EngineConfig::default(),
        );
        (service, embedder)
    }

    #[tokio::test]
    async fn full_pipeline_answers_with_traceable_sources() -> Result<(), QueryError> {
        let (service, _) = service(scripted());
        let result = service.answer_query("pricing plans", "HYBRID", 5).await?;

        assert!(!result.degraded);
        assert_eq!(result.completed_stages, Stage::ALL.to_vec());
        assert_eq!(result.structured_facts.len(), 3);
        assert_eq!(result.navigation_path, vec![SITE, PRICING]);
        assert_eq!(result.related_content, vec![SITE, "o1"]);
        assert!(result.final_answer.starts_with("The Starter plan costs $10"));
        assert_eq!(result.sources_used, vec!["t1", "t2", "t3"]);
        // 0.4 * 0.9 + 0.3 * 0.8 + 0.3 * 1.0
        assert!((result.confidence - 0.9).abs() < 1e-9);

        let store = service.search_coordinator().store();
        let ids = result.sources_used.clone();
        assert!(store.chunks_by_ids(&ids).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn verifier_timeout_degrades_to_heuristic_confidence() -> Result<(), QueryError> {
        let (service, _) = service(scripted().reply(Stage::FinalVerifier, Reply::Timeout));
        let result = service.answer_query("pricing plans", "hybrid", 5).await?;

        assert!(result.degraded);
        assert_eq!(result.degradations.len(), 1);
        assert_eq!(result.degradations[0].stage, Stage::FinalVerifier);
        assert_eq!(result.final_answer, result.draft_answer);
        let expected = 0.4 * (2.0 / 3.0) + 0.3 * 0.8 + 0.3 * 1.0;
        assert!((result.confidence - expected).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_mode_fails_before_any_scorer_runs() {
        let (service, embedder) = service(scripted());
        let result = service.answer_query("pricing plans", "KEYWORD", 5).await;

        assert!(matches!(result, Err(QueryError::InvalidSearchMode(mode)) if mode == "KEYWORD"));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn empty_index_is_distinct_from_zero_matches() {
        let embedder = Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0]));
        let service = AnswerService::new(
            Arc::new(IndexSnapshot::default()),
            embedder,
            Arc::new(scripted()),
            EngineConfig::default(),
        );
        let result = service.answer_query("pricing plans", "SEMANTIC", 5).await;
        assert!(matches!(result, Err(QueryError::EmptyIndex)));
    }

    #[tokio::test]
    async fn zero_matches_is_a_successful_nothing_found_answer() -> Result<(), QueryError> {
        // no entity or chunk text matches, so the walk has no seeds
        let (service, _) = service(scripted());
        let result = service.answer_query("weather forecast", "GRAPH_WALK", 5).await?;

        assert!(!result.degraded);
        assert!(result.structured_facts.is_empty());
        assert!(result.sources_used.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert!(!result.final_answer.is_empty());
        assert!(result.unavailable_signals.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn follow_up_questions_see_the_session_history() -> Result<(), QueryError> {
        let completion = Arc::new(scripted());
        let service = AnswerService::new(
            Arc::new(ten_chunk_site()),
            Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0])),
            completion.clone(),
            EngineConfig::default(),
        );

        let mut conversation = ConversationContext::new();
        let first = service
            .answer_query_in_conversation("pricing plans", "HYBRID", 5, &conversation)
            .await?;
        conversation.record_result(&first);
        assert_eq!(conversation.len(), 1);

        service
            .answer_query_in_conversation("and the enterprise plan?", "HYBRID", 5, &conversation)
            .await?;

        let prompts = completion.prompts();
        assert_eq!(prompts.len(), 2 * Stage::ALL.len());
        assert!(prompts[..Stage::ALL.len()]
            .iter()
            .all(|prompt| !prompt.contains("Q: pricing plans")));
        assert!(prompts[Stage::ALL.len()..]
            .iter()
            .any(|prompt| prompt.contains("Q: pricing plans\nA: The Starter plan costs $10")));
        Ok(())
    }
}
