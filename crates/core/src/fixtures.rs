//! Shared in-memory fakes for unit tests.

use crate::cancel::CancellationToken;
use crate::error::{CompletionError, EmbeddingError};
use crate::models::{Chunk, ContentType, EntityNode, GraphEdge, RelationType, Stage};
use crate::stores::IndexSnapshot;
use crate::traits::{CompletionClient, Embedder};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) const SITE: &str = "https://site.test/";
pub(crate) const PRICING: &str = "https://site.test/pricing";
pub(crate) const ENTERPRISE: &str = "https://site.test/pricing/enterprise";

pub(crate) fn chunk(
    id: &str,
    url: &str,
    content_type: ContentType,
    text: &str,
    embedding: Vec<f32>,
) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        source_url: url.to_string(),
        content_type,
        text: text.to_string(),
        embedding,
        entity_tags: Vec::new(),
        title: None,
        crawled_at: None,
    }
}

pub(crate) fn edge(source: &str, target: &str, relation: RelationType, weight: f64) -> GraphEdge {
    GraphEdge {
        source: source.to_string(),
        target: target.to_string(),
        relation,
        weight,
    }
}

/// Unit vector at cosine `similarity` to `[1, 0, 0]`.
pub(crate) fn at_cosine(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).sqrt(), 0.0]
}

/// Ten chunks over seven pages. Against the query vector `[1, 0, 0]` the three
/// pricing chunks score 0.95, 0.9 and 0.85 and are mentioned by the
/// `entity:pricing` node; the other seven score between 0.6 and -0.5.
pub(crate) fn ten_chunk_site() -> IndexSnapshot {
    let about = "https://site.test/about";
    let blog = "https://site.test/blog";
    let careers = "https://site.test/careers";
    let contact = "https://site.test/contact";

    let chunks = vec![
        chunk("t1", PRICING, ContentType::Table, "Starter plan | $10 per month | 3 users", at_cosine(0.95)),
        chunk("t2", PRICING, ContentType::Text, "The Pro plan costs $25 per month and includes priority support.", at_cosine(0.9)),
        chunk("t3", ENTERPRISE, ContentType::PdfText, "Enterprise plans are priced on request with annual billing.", at_cosine(0.85)),
        chunk("o1", SITE, ContentType::Text, "Acme builds scheduling software for small teams.", at_cosine(0.6)),
        chunk("o2", about, ContentType::Text, "Founded in 2015, Acme is headquartered in Lisbon.", at_cosine(0.5)),
        chunk("o3", about, ContentType::ImageCaption, "Photo of the Acme team at the Lisbon office.", at_cosine(0.3)),
        chunk("o4", blog, ContentType::Text, "Release notes for the calendar sync feature.", at_cosine(0.1)),
        chunk("o5", blog, ContentType::Text, "How we moved our infrastructure to a new region.", at_cosine(0.0)),
        chunk("o6", careers, ContentType::Text, "We are hiring backend engineers.", at_cosine(-0.2)),
        chunk("o7", contact, ContentType::Text, "Email support@acme.test for help.", at_cosine(-0.5)),
    ];

    let mut edges = vec![
        edge(SITE, PRICING, RelationType::LinksTo, 1.0),
        edge(SITE, about, RelationType::LinksTo, 1.0),
        edge(PRICING, ENTERPRISE, RelationType::LinksTo, 1.0),
        edge(PRICING, SITE, RelationType::LinksTo, 1.0),
        edge(about, blog, RelationType::LinksTo, 1.0),
        edge(blog, SITE, RelationType::LinksTo, 1.0),
        edge(about, careers, RelationType::LinksTo, 0.5),
        edge(SITE, contact, RelationType::LinksTo, 0.5),
        edge("entity:lisbon", "o2", RelationType::Mentions, 1.0),
        edge("entity:lisbon", "o3", RelationType::Mentions, 1.0),
    ];
    for target in ["t1", "t2", "t3"] {
        edges.push(edge("entity:pricing", target, RelationType::Mentions, 1.0));
    }
    for item in &chunks {
        edges.push(edge(&item.source_url, &item.chunk_id, RelationType::HasChunk, 1.0));
    }

    let entities = vec![
        EntityNode {
            node_id: "entity:pricing".to_string(),
            name: "pricing".to_string(),
        },
        EntityNode {
            node_id: "entity:lisbon".to_string(),
            name: "Lisbon".to_string(),
        },
    ];

    match IndexSnapshot::from_parts(chunks, edges, entities, vec![SITE.to_string()]) {
        Ok(snapshot) => snapshot,
        Err(error) => panic!("ten chunk fixture is invalid: {error}"),
    }
}

/// Returns the same vector for every input and counts calls.
#[derive(Debug, Default)]
pub(crate) struct StaticEmbedder {
    vector: Vec<f32>,
    calls: AtomicUsize,
}

impl StaticEmbedder {
    pub(crate) fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

#[derive(Debug, Default)]
pub(crate) struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimensions(&self) -> usize {
        3
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("connection refused".to_string()))
    }
}

/// Answers only after `delay`, to exercise the scorer timeout.
#[derive(Debug)]
pub(crate) struct SlowEmbedder {
    pub(crate) delay: Duration,
}

#[async_trait]
impl Embedder for SlowEmbedder {
    fn dimensions(&self) -> usize {
        3
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![1.0, 0.0, 0.0])
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Timeout,
    RateLimited,
    Hang(Duration),
}

/// Completion fake keyed by pipeline stage. The stage is recognised from the
/// role line every prompt starts with.
#[derive(Debug, Default)]
pub(crate) struct ScriptedCompletion {
    replies: HashMap<Stage, Reply>,
    calls: Mutex<Vec<Stage>>,
    prompts: Mutex<Vec<String>>,
    cancel_during: Option<(Stage, CancellationToken)>,
}

impl ScriptedCompletion {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(mut self, stage: Stage, reply: Reply) -> Self {
        self.replies.insert(stage, reply);
        self
    }

    pub(crate) fn text(self, stage: Stage, text: &str) -> Self {
        self.reply(stage, Reply::Text(text.to_string()))
    }

    /// Cancels `token` while answering `stage`, as a user aborting mid-query.
    pub(crate) fn cancel_during(mut self, stage: Stage, token: CancellationToken) -> Self {
        self.cancel_during = Some((stage, token));
        self
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Stage> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, CompletionError> {
        let role = prompt.lines().next().unwrap_or_default();
        let stage = Stage::ALL
            .into_iter()
            .find(|stage| role.contains(stage.title()))
            .ok_or_else(|| CompletionError::Backend(format!("unrecognised prompt: {role}")))?;

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(stage);
        }
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some((_, token)) = self.cancel_during.as_ref().filter(|(at, _)| *at == stage) {
            token.cancel();
        }

        match self.replies.get(&stage) {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::Timeout) => Err(CompletionError::Timeout(timeout)),
            Some(Reply::RateLimited) => Err(CompletionError::RateLimited("429".to_string())),
            Some(Reply::Hang(delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(String::new())
            }
            None => Err(CompletionError::Backend(format!("no reply scripted for {stage}"))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
