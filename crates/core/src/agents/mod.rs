//! The four answer stages and the coordinator that sequences them.
//!
//! Each stage takes the accumulated [`PipelineResult`](crate::models::PipelineResult)
//! by value and returns a new one with only its own fields set. A stage whose
//! completion call fails falls back to a deterministic rendition and marks the
//! result degraded.

pub mod coordinator;
pub mod prompt;
pub mod responder;
pub mod site_mapper;
pub mod structurer;
pub mod verifier;

use crate::config::EngineConfig;
use crate::error::CompletionError;
use crate::models::ScoredEvidence;
use crate::scoring::GraphWalkScorer;
use crate::traits::{ChunkStore, CompletionClient};
use chrono::{DateTime, Utc};

pub use coordinator::AgentPipelineCoordinator;

/// Read-only inputs shared by every stage of one query.
pub struct StageContext<'a> {
    pub query: &'a str,
    pub evidence: &'a [ScoredEvidence],
    pub store: &'a dyn ChunkStore,
    pub graph: &'a GraphWalkScorer,
    pub completion: &'a dyn CompletionClient,
    pub config: &'a EngineConfig,
    pub now: DateTime<Utc>,
    /// Recent turns of the caller's session, already rendered.
    pub conversation: Option<&'a str>,
}

impl StageContext<'_> {
    /// One completion call bounded by the stage timeout, even when the client
    /// does not enforce it itself.
    pub async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let limit = self.config.stage_timeout;
        match tokio::time::timeout(limit, self.completion.complete(prompt, limit)).await {
            Ok(reply) => reply,
            Err(_) => Err(CompletionError::Timeout(limit)),
        }
    }

    /// Prompt lines carrying the session history, empty for a fresh session.
    pub fn conversation_block(&self) -> String {
        match self.conversation {
            Some(turns) => format!(
                "Continue this conversation with the user; earlier turns:\n{turns}\n\n"
            ),
            None => String::new(),
        }
    }

    pub fn evidence_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.evidence.iter().map(ScoredEvidence::chunk_id)
    }

    pub fn evidence_for(&self, chunk_id: &str) -> Option<&ScoredEvidence> {
        self.evidence.iter().find(|item| item.chunk_id() == chunk_id)
    }
}
