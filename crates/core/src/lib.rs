pub mod agents;
pub mod answer;
pub mod cancel;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod fusion;
pub mod models;
pub mod orchestrator;
pub mod scoring;
pub mod stores;
pub mod traits;

#[cfg(test)]
pub(crate) mod fixtures;

pub use agents::{AgentPipelineCoordinator, StageContext};
pub use answer::AnswerService;
pub use cancel::CancellationToken;
pub use completion::ChatCompletionClient;
pub use config::{
    ConfidenceWeights, EngineConfig, FusionWeights, GraphWalkConfig, ModalityConfig,
    RelationWeights,
};
pub use conversation::{ConversationContext, ConversationTurn, QueryRelationship};
pub use embeddings::{CharacterNgramEmbedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    CompletionError, ConfigError, EmbeddingError, QueryError, SignalFailure, SignalFailureReason,
    StoreError,
};
pub use fusion::{FusionRanker, SignalOutcome, SignalSet};
pub use models::{
    Chunk, ChunkId, ContentType, EntityNode, GraphEdge, NodeId, PipelineResult, QueryIntent,
    RelationType, ScoredEvidence, SearchMode, SearchResult, Signal, SignalScores, SourceAuthority,
    Stage, StageDegradation, StructuredFact,
};
pub use orchestrator::SearchCoordinator;
pub use scoring::{GraphWalkScorer, MultiModalScorer, SemanticScorer};
pub use stores::{
    load_snapshot_dir, save_snapshot_dir, IndexSnapshot, Neo4jStore, SiteSummary, SnapshotFile,
};
pub use traits::{ChunkStore, CompletionClient, Embedder};
