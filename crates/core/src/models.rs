use crate::error::{QueryError, SignalFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type ChunkId = String;
pub type NodeId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    #[default]
    Text,
    Table,
    PdfText,
    ImageCaption,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Table => "table",
            ContentType::PdfText => "pdf-text",
            ContentType::ImageCaption => "image-caption",
        }
    }

    /// Lenient mapping for labels written by the extractor (`pdf`, `image`, ...).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "table" | "tables" | "csv" => ContentType::Table,
            "pdf" | "pdf-text" | "pdf_text" => ContentType::PdfText,
            "image" | "image-caption" | "image_caption" | "caption" => ContentType::ImageCaption,
            _ => ContentType::Text,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub source_url: String,
    #[serde(default)]
    pub content_type: ContentType,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub entity_tags: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub crawled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    LinksTo,
    HasChunk,
    Contains,
    Mentions,
    RelatedTo,
}

impl RelationType {
    pub const ALL: [RelationType; 5] = [
        RelationType::LinksTo,
        RelationType::HasChunk,
        RelationType::Contains,
        RelationType::Mentions,
        RelationType::RelatedTo,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RelationType::LinksTo => "LINKS_TO",
            RelationType::HasChunk => "HAS_CHUNK",
            RelationType::Contains => "CONTAINS",
            RelationType::Mentions => "MENTIONS",
            RelationType::RelatedTo => "RELATED_TO",
        }
    }

    pub fn from_label(label: &str) -> Self {
        RelationType::ALL
            .into_iter()
            .find(|relation| relation.label().eq_ignore_ascii_case(label.trim()))
            .unwrap_or(RelationType::RelatedTo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub relation: RelationType,
    #[serde(default = "default_edge_weight")]
    pub weight: f64,
}

fn default_edge_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityNode {
    pub node_id: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchMode {
    Semantic,
    GraphWalk,
    #[default]
    Hybrid,
    Multimodal,
}

impl SearchMode {
    pub const ALL: [SearchMode; 4] = [
        SearchMode::Semantic,
        SearchMode::GraphWalk,
        SearchMode::Hybrid,
        SearchMode::Multimodal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "SEMANTIC",
            SearchMode::GraphWalk => "GRAPH_WALK",
            SearchMode::Hybrid => "HYBRID",
            SearchMode::Multimodal => "MULTIMODAL",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "Pure semantic search using embeddings",
            SearchMode::GraphWalk => "Graph-based search following relationships",
            SearchMode::Hybrid => "Combines semantic and graph search (recommended)",
            SearchMode::Multimodal => "Hybrid search boosted by content type for the query intent",
        }
    }

    /// Signals that must run for this mode.
    pub fn signals(&self) -> &'static [Signal] {
        match self {
            SearchMode::Semantic => &[Signal::Semantic],
            SearchMode::GraphWalk => &[Signal::Graph],
            SearchMode::Hybrid => &[Signal::Semantic, Signal::Graph],
            SearchMode::Multimodal => &[Signal::Semantic, Signal::Graph, Signal::Modality],
        }
    }

    pub fn uses(&self, signal: Signal) -> bool {
        self.signals().contains(&signal)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "SEMANTIC" => Ok(SearchMode::Semantic),
            "GRAPH_WALK" | "GRAPHWALK" | "GRAPH" => Ok(SearchMode::GraphWalk),
            "HYBRID" => Ok(SearchMode::Hybrid),
            "MULTIMODAL" | "MULTI_MODAL" => Ok(SearchMode::Multimodal),
            _ => Err(QueryError::InvalidSearchMode(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Semantic,
    Graph,
    Modality,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Semantic => "semantic",
            Signal::Graph => "graph",
            Signal::Modality => "modality",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    WantsTable,
    WantsDocument,
    WantsImage,
    WantsNarrative,
}

impl QueryIntent {
    pub fn preferred_content(&self) -> Option<ContentType> {
        match self {
            QueryIntent::WantsTable => Some(ContentType::Table),
            QueryIntent::WantsDocument => Some(ContentType::PdfText),
            QueryIntent::WantsImage => Some(ContentType::ImageCaption),
            QueryIntent::WantsNarrative => None,
        }
    }
}

/// Raw per-signal scores; `None` means the signal did not score this chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SignalScores {
    pub semantic: Option<f64>,
    pub graph: Option<f64>,
    pub modality_boost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredEvidence {
    pub chunk: Chunk,
    pub scores: SignalScores,
    pub fused_score: f64,
}

impl ScoredEvidence {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query_id: Uuid,
    pub query: String,
    pub mode: SearchMode,
    pub hits: Vec<ScoredEvidence>,
    pub signal_weights: Vec<(Signal, f64)>,
    pub unavailable_signals: Vec<SignalFailure>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    InformationStructurer,
    SiteMapping,
    ResponseStructurer,
    FinalVerifier,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::InformationStructurer,
        Stage::SiteMapping,
        Stage::ResponseStructurer,
        Stage::FinalVerifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::InformationStructurer => "information-structurer",
            Stage::SiteMapping => "site-mapping",
            Stage::ResponseStructurer => "response-structurer",
            Stage::FinalVerifier => "final-verifier",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Stage::InformationStructurer => "Information Structurer",
            Stage::SiteMapping => "Site Mapper",
            Stage::ResponseStructurer => "Response Structurer",
            Stage::FinalVerifier => "Final Verifier",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredFact {
    pub statement: String,
    pub sources: Vec<ChunkId>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAuthority {
    pub chunk_id: ChunkId,
    pub source_url: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageDegradation {
    pub stage: Stage,
    pub reason: String,
}

/// Accumulated answer for one query. Stages never mutate a shared value; each
/// returns a new `PipelineResult` with only its own fields filled in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineResult {
    pub query_id: Uuid,
    pub query: String,
    pub mode: SearchMode,
    pub generated_at: DateTime<Utc>,

    // information structurer
    pub structured_facts: Vec<StructuredFact>,
    pub information_gaps: Vec<String>,
    pub source_authority: Vec<SourceAuthority>,

    // site mapping
    pub navigation_path: Vec<NodeId>,
    pub related_content: Vec<NodeId>,
    pub navigation_notes: Option<String>,

    // response structurer
    pub draft_answer: String,
    pub actionable_steps: Vec<String>,
    pub follow_up_suggestions: Vec<String>,

    // final verifier
    pub final_answer: String,
    pub confidence: f64,
    pub sources_used: Vec<ChunkId>,

    pub completed_stages: Vec<Stage>,
    pub degraded: bool,
    pub degradations: Vec<StageDegradation>,
    pub unavailable_signals: Vec<SignalFailure>,
}

impl PipelineResult {
    pub fn new(query_id: Uuid, query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            query_id,
            query: query.into(),
            mode,
            generated_at: Utc::now(),
            ..Self::default()
        }
    }

    /// Result for a query with zero matching evidence. Not degraded: nothing failed.
    pub fn no_evidence(search: &SearchResult) -> Self {
        Self {
            final_answer: "I couldn't find specific information about that on this site. \
                Could you try rephrasing your question or asking about a related topic?"
                .to_string(),
            actionable_steps: vec![
                "Try rephrasing your question".to_string(),
                "Ask about related topics".to_string(),
            ],
            follow_up_suggestions: vec!["What topics can you help me with?".to_string()],
            unavailable_signals: search.unavailable_signals.clone(),
            ..Self::new(search.query_id, search.query.clone(), search.mode)
        }
    }

    pub fn with_completed(mut self, stage: Stage) -> Self {
        self.completed_stages.push(stage);
        self
    }

    pub fn with_degradation(mut self, stage: Stage, reason: impl Into<String>) -> Self {
        self.degraded = true;
        self.degradations.push(StageDegradation {
            stage,
            reason: reason.into(),
        });
        self
    }

    /// Chunk ids cited by structured facts, first citation order, no duplicates.
    pub fn cited_chunk_ids(&self) -> Vec<ChunkId> {
        let mut cited = Vec::new();
        for fact in &self.structured_facts {
            for source in &fact.sources {
                if !cited.contains(source) {
                    cited.push(source.clone());
                }
            }
        }
        cited
    }

    /// The answer to show: the verified text when present, otherwise the draft.
    pub fn answer(&self) -> &str {
        if self.final_answer.is_empty() {
            &self.draft_answer
        } else {
            &self.final_answer
        }
    }
}
