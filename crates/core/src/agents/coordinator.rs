use super::{responder, site_mapper, structurer, verifier, StageContext};
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::conversation::ConversationContext;
use crate::error::QueryError;
use crate::models::{PipelineResult, SearchResult, Stage};
use crate::scoring::GraphWalkScorer;
use crate::traits::{ChunkStore, CompletionClient};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};

/// Runs the four answer stages strictly in order over one search result.
pub struct AgentPipelineCoordinator {
    completion: Arc<dyn CompletionClient>,
    config: EngineConfig,
}

impl AgentPipelineCoordinator {
    pub fn new(completion: Arc<dyn CompletionClient>, config: EngineConfig) -> Self {
        Self { completion, config }
    }

    pub async fn run(
        &self,
        search: &SearchResult,
        store: &dyn ChunkStore,
        graph: &GraphWalkScorer,
        conversation: &ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, QueryError> {
        if search.hits.is_empty() {
            info!(query_id = %search.query_id, "no evidence, skipping stages");
            return Ok(PipelineResult::no_evidence(search));
        }

        let history = conversation.render();
        let ctx = StageContext {
            query: &search.query,
            evidence: &search.hits,
            store,
            graph,
            completion: self.completion.as_ref(),
            config: &self.config,
            now: Utc::now(),
            conversation: history.as_deref(),
        };

        let mut result = PipelineResult {
            unavailable_signals: search.unavailable_signals.clone(),
            ..PipelineResult::new(search.query_id, search.query.clone(), search.mode)
        };

        for stage in Stage::ALL {
            if cancel.is_cancelled() {
                return Err(QueryError::Cancelled {
                    at: format!("before {stage}"),
                });
            }

            let started = Instant::now();
            let span = info_span!(
                "stage",
                query_id = %search.query_id,
                %stage,
                client = self.completion.name()
            );
            result = match stage {
                Stage::InformationStructurer => structurer::run(&ctx, result).instrument(span).await,
                Stage::SiteMapping => site_mapper::run(&ctx, result).instrument(span).await,
                Stage::ResponseStructurer => responder::run(&ctx, result).instrument(span).await,
                Stage::FinalVerifier => verifier::run(&ctx, result).instrument(span).await,
            };
            info!(
                query_id = %search.query_id,
                %stage,
                degraded = result.degradations.iter().any(|item| item.stage == stage),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "stage finished"
            );
        }

        Ok(result)
    }
}
