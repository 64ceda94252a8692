use super::prompt::{extract_json_object, format_facts, role_line};
use super::StageContext;
use crate::error::CompletionError;
use crate::models::{NodeId, PipelineResult, Stage};
use crate::scoring::shortest_path;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt::Write;
use tracing::{debug, warn};

const STAGE: Stage = Stage::SiteMapping;
const MAX_LINK_HOPS: usize = 8;

#[derive(Debug, Deserialize)]
struct NavigationReply {
    #[serde(default)]
    related: Vec<String>,
    #[serde(default)]
    analysis: Option<String>,
}

/// Deterministic part of the stage: where the answer lives and what sits
/// near it in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteMap {
    pub navigation_path: Vec<NodeId>,
    pub candidates: Vec<(NodeId, f64)>,
}

/// Walks the graph from the cited chunks and their pages, and finds the
/// shortest link path from an entry page to the page of the best cited chunk.
pub fn map_site(ctx: &StageContext<'_>, prior: &PipelineResult) -> SiteMap {
    let mut cited = prior.cited_chunk_ids();
    if cited.is_empty() {
        cited = ctx.evidence_ids().map(str::to_string).collect();
    }

    let mut seeds: BTreeSet<NodeId> = cited.iter().cloned().collect();
    for id in &cited {
        if let Some(item) = ctx.evidence_for(id) {
            seeds.insert(item.chunk.source_url.clone());
        }
    }
    let seeds: Vec<NodeId> = seeds.into_iter().collect();

    let mut candidates: Vec<(NodeId, f64)> = ctx
        .graph
        .score(ctx.store, &seeds)
        .into_iter()
        .filter(|(node, score)| *score > 0.0 && seeds.binary_search(node).is_err())
        .collect();
    candidates.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(&right.0)));

    // Evidence is already ordered by fused score.
    let target = ctx
        .evidence
        .iter()
        .find(|item| cited.iter().any(|id| id == item.chunk_id()))
        .map(|item| item.chunk.source_url.clone());

    let navigation_path = match target {
        Some(target) => {
            let mut best: Option<Vec<NodeId>> = None;
            for entry in ctx.store.entry_points() {
                if let Some(path) = shortest_path(ctx.store, entry, &target, MAX_LINK_HOPS) {
                    if best.as_ref().map_or(true, |current| path.len() < current.len()) {
                        best = Some(path);
                    }
                }
            }
            best.unwrap_or_else(|| vec![target])
        }
        None => Vec::new(),
    };

    debug!(
        path_len = navigation_path.len(),
        candidates = candidates.len(),
        "site map computed"
    );
    SiteMap {
        navigation_path,
        candidates,
    }
}

pub fn build_prompt(ctx: &StageContext<'_>, prior: &PipelineResult, map: &SiteMap) -> String {
    let mut nearby = String::new();
    for (node, score) in map.candidates.iter().take(ctx.config.related_content_limit * 3) {
        let _ = writeln!(nearby, "- {node} (proximity {score:.3})");
    }

    format!(
        "{role}\n\
         Analyze the website navigation for the query: \"{query}\"\n\n\
         Facts found:\n{facts}\n\
         Path from the entry page: {path}\n\n\
         Nearby pages and sections:\n{nearby}\n\
         Reply with a single JSON object: {{\"related\": [\"<node id from the nearby list>\"], \
         \"analysis\": \"<one or two sentences on where the information lives>\"}}",
        role = role_line(STAGE),
        query = ctx.query,
        facts = format_facts(&prior.structured_facts),
        path = map.navigation_path.join(" > "),
    )
}

pub fn parse_reply(
    reply: &str,
    map: &SiteMap,
    limit: usize,
) -> Result<(Vec<NodeId>, Option<String>), CompletionError> {
    let parsed: NavigationReply = serde_json::from_value(extract_json_object(reply)?)
        .map_err(|error| CompletionError::Malformed(error.to_string()))?;

    let mut related: Vec<NodeId> = Vec::new();
    for node in parsed.related {
        let known = map.candidates.iter().any(|(candidate, _)| *candidate == node);
        if known && !related.contains(&node) {
            related.push(node);
        }
    }
    if related.is_empty() {
        related = top_candidates(map, limit);
    }
    related.truncate(limit);

    let analysis = parsed
        .analysis
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    Ok((related, analysis))
}

fn top_candidates(map: &SiteMap, limit: usize) -> Vec<NodeId> {
    map.candidates
        .iter()
        .take(limit)
        .map(|(node, _)| node.clone())
        .collect()
}

pub fn fallback(ctx: &StageContext<'_>, prior: PipelineResult, map: SiteMap) -> PipelineResult {
    PipelineResult {
        related_content: top_candidates(&map, ctx.config.related_content_limit),
        navigation_path: map.navigation_path,
        navigation_notes: None,
        ..prior
    }
}

pub async fn run(ctx: &StageContext<'_>, prior: PipelineResult) -> PipelineResult {
    let map = map_site(ctx, &prior);
    let outcome = match ctx.complete(&build_prompt(ctx, &prior, &map)).await {
        Ok(reply) => parse_reply(&reply, &map, ctx.config.related_content_limit),
        Err(error) => Err(error),
    };

    match outcome {
        Ok((related_content, navigation_notes)) => PipelineResult {
            navigation_path: map.navigation_path,
            related_content,
            navigation_notes,
            ..prior
        }
        .with_completed(STAGE),
        Err(error) => {
            warn!(stage = %STAGE, %error, "stage fell back");
            fallback(ctx, prior, map)
                .with_completed(STAGE)
                .with_degradation(STAGE, error.to_string())
        }
    }
}
