use super::prompt::{extract_json_object, format_evidence, role_line, truncate_chars};
use super::StageContext;
use crate::error::CompletionError;
use crate::models::{
    ContentType, PipelineResult, ScoredEvidence, SourceAuthority, Stage, StructuredFact,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::warn;

const STAGE: Stage = Stage::InformationStructurer;
const FALLBACK_FACTS: usize = 3;
const FALLBACK_STATEMENT_CHARS: usize = 150;
const FALLBACK_GAP: &str = "May need additional context based on user needs";

#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(default)]
    key_facts: Vec<FactReply>,
    #[serde(default)]
    information_gaps: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FactReply {
    Cited {
        statement: String,
        #[serde(default)]
        sources: Vec<String>,
        #[serde(default)]
        category: Option<String>,
    },
    Bare(serde::de::IgnoredAny),
}

pub fn build_prompt(ctx: &StageContext<'_>) -> String {
    format!(
        "{role}\n{conversation}\
         Analyze and structure the retrieved information for: \"{query}\"\n\n\
         Retrieved information:\n{evidence}\n\
         Reply with a single JSON object:\n\
         {{\"key_facts\": [{{\"statement\": \"...\", \"sources\": [\"<id>\"], \"category\": \"...\"}}], \
         \"information_gaps\": [\"...\"]}}\n\
         Every fact must cite the ids of the sources it comes from. Use at most {max} facts.",
        role = role_line(STAGE),
        conversation = ctx.conversation_block(),
        query = ctx.query,
        evidence = format_evidence(ctx.evidence, ctx.config.evidence_excerpt_chars),
        max = ctx.config.max_facts,
    )
}

/// Keeps the facts that cite at least one retrieved chunk, with citations
/// outside the evidence removed.
pub fn parse_reply(
    reply: &str,
    ctx: &StageContext<'_>,
) -> Result<(Vec<StructuredFact>, Vec<String>), CompletionError> {
    let parsed: StructuredReply = serde_json::from_value(extract_json_object(reply)?)
        .map_err(|error| CompletionError::Malformed(error.to_string()))?;
    let known: HashSet<&str> = ctx.evidence_ids().collect();

    let facts: Vec<StructuredFact> = parsed
        .key_facts
        .into_iter()
        .filter_map(|fact| match fact {
            FactReply::Cited {
                statement,
                sources,
                category,
            } => {
                let mut cited: Vec<String> = Vec::new();
                for source in sources {
                    if known.contains(source.as_str()) && !cited.contains(&source) {
                        cited.push(source);
                    }
                }
                let statement = statement.trim().to_string();
                (!statement.is_empty() && !cited.is_empty()).then_some(StructuredFact {
                    statement,
                    sources: cited,
                    category: category.filter(|value| !value.trim().is_empty()),
                })
            }
            FactReply::Bare(_) => None,
        })
        .take(ctx.config.max_facts)
        .collect();

    if facts.is_empty() {
        return Err(CompletionError::Malformed(
            "no fact cites the retrieved evidence".to_string(),
        ));
    }

    let gaps = parsed
        .information_gaps
        .into_iter()
        .map(|gap| gap.trim().to_string())
        .filter(|gap| !gap.is_empty())
        .collect();
    Ok((facts, gaps))
}

fn recency(crawled_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match crawled_at {
        Some(crawled) => {
            let age_days = ((now - crawled).num_seconds().max(0) as f64) / 86_400.0;
            1.0 / (1.0 + age_days / 30.0)
        }
        None => 0.5,
    }
}

fn specificity(item: &ScoredEvidence) -> f64 {
    match item.chunk.content_type {
        ContentType::Table | ContentType::PdfText => 1.0,
        ContentType::ImageCaption => 0.6,
        ContentType::Text => (item.chunk.text.chars().count() as f64 / 800.0).min(1.0),
    }
}

/// Deterministic ranking of the evidence by how much it should be trusted:
/// retrieval score, freshness and how specific the content is.
pub fn source_authority(evidence: &[ScoredEvidence], now: DateTime<Utc>) -> Vec<SourceAuthority> {
    let top = evidence
        .iter()
        .map(|item| item.fused_score)
        .fold(0.0f64, f64::max);

    let mut ranked: Vec<SourceAuthority> = evidence
        .iter()
        .map(|item| {
            let relevance = if top > 0.0 { item.fused_score / top } else { 0.0 };
            SourceAuthority {
                chunk_id: item.chunk.chunk_id.clone(),
                source_url: item.chunk.source_url.clone(),
                score: 0.5 * relevance + 0.3 * recency(item.chunk.crawled_at, now) + 0.2 * specificity(item),
            }
        })
        .collect();
    ranked.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.chunk_id.cmp(&right.chunk_id))
    });
    ranked
}

/// One fact per leading evidence chunk, quoting its text.
pub fn fallback(ctx: &StageContext<'_>, prior: PipelineResult) -> PipelineResult {
    let structured_facts = ctx
        .evidence
        .iter()
        .take(FALLBACK_FACTS.min(ctx.config.max_facts))
        .map(|item| StructuredFact {
            statement: truncate_chars(&item.chunk.text, FALLBACK_STATEMENT_CHARS),
            sources: vec![item.chunk.chunk_id.clone()],
            category: None,
        })
        .collect();

    PipelineResult {
        structured_facts,
        information_gaps: vec![FALLBACK_GAP.to_string()],
        source_authority: source_authority(ctx.evidence, ctx.now),
        ..prior
    }
}

pub async fn run(ctx: &StageContext<'_>, prior: PipelineResult) -> PipelineResult {
    let outcome = match ctx.complete(&build_prompt(ctx)).await {
        Ok(reply) => parse_reply(&reply, ctx),
        Err(error) => Err(error),
    };

    match outcome {
        Ok((structured_facts, information_gaps)) => PipelineResult {
            structured_facts,
            information_gaps,
            source_authority: source_authority(ctx.evidence, ctx.now),
            ..prior
        }
        .with_completed(STAGE),
        Err(error) => {
            warn!(stage = %STAGE, %error, "stage fell back");
            fallback(ctx, prior)
                .with_completed(STAGE)
                .with_degradation(STAGE, error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fixtures::{chunk, ten_chunk_site, Reply, ScriptedCompletion};
    use crate::models::SignalScores;
    use crate::scoring::GraphWalkScorer;
    use chrono::{Duration, TimeZone};

    fn evidence() -> Vec<ScoredEvidence> {
        let make = |id: &str, content_type, text: &str, score| ScoredEvidence {
            chunk: chunk(id, "https://site.test/pricing", content_type, text, vec![1.0, 0.0, 0.0]),
            scores: SignalScores::default(),
            fused_score: score,
        };
        vec![
            make("t1", ContentType::Table, "Starter plan | $10 per month", 1.0),
            make("t2", ContentType::Text, "The Pro plan costs $25 per month.", 0.8),
            make("o1", ContentType::Text, "Acme builds scheduling software.", 0.4),
        ]
    }

    #[tokio::test]
    async fn facts_keep_only_citations_of_retrieved_chunks() {
        let store = ten_chunk_site();
        let evidence = evidence();
        let config = EngineConfig::default();
        let graph = GraphWalkScorer::default();
        let completion = ScriptedCompletion::new().text(
            STAGE,
            r#"{"key_facts": [
                {"statement": "Starter costs $10 per month", "sources": ["t1", "zzz", "t1"], "category": "pricing"},
                {"statement": "Made up", "sources": ["zzz"]},
                "a bare string fact"
              ],
              "information_gaps": ["Annual discounts", "  "]}"#,
        );
        let ctx = StageContext {
            query: "pricing",
            evidence: &evidence,
            store: &store,
            graph: &graph,
            completion: &completion,
            config: &config,
            now: Utc::now(),
            conversation: None,
        };

        let result = run(&ctx, PipelineResult::default()).await;
        assert!(!result.degraded);
        assert_eq!(result.structured_facts.len(), 1);
        assert_eq!(result.structured_facts[0].sources, vec!["t1"]);
        assert_eq!(result.information_gaps, vec!["Annual discounts"]);
        assert_eq!(result.completed_stages, vec![STAGE]);
    }

    #[tokio::test]
    async fn rate_limit_falls_back_to_quoting_evidence() {
        let store = ten_chunk_site();
        let evidence = evidence();
        let config = EngineConfig::default();
        let graph = GraphWalkScorer::default();
        let completion = ScriptedCompletion::new().reply(STAGE, Reply::RateLimited);
        let ctx = StageContext {
            query: "pricing",
            evidence: &evidence,
            store: &store,
            graph: &graph,
            completion: &completion,
            config: &config,
            now: Utc::now(),
            conversation: None,
        };

        let result = run(&ctx, PipelineResult::default()).await;
        assert!(result.degraded);
        assert_eq!(result.degradations[0].stage, STAGE);
        assert_eq!(result.structured_facts.len(), 3);
        assert_eq!(result.structured_facts[1].statement, "The Pro plan costs $25 per month.");
        assert_eq!(result.information_gaps, vec![FALLBACK_GAP]);
        assert_eq!(result.source_authority.len(), 3);
    }

    #[test]
    fn authority_rewards_score_freshness_and_specificity() {
        let now = match Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single() {
            Some(now) => now,
            None => panic!("valid timestamp"),
        };
        let mut items = evidence();
        items[0].chunk.crawled_at = Some(now - Duration::days(30));

        let ranked = source_authority(&items, now);
        let t1 = ranked.iter().find(|item| item.chunk_id == "t1").map(|item| item.score);
        // 0.5 * 1.0 + 0.3 * 0.5 + 0.2 * 1.0
        assert_eq!(ranked[0].chunk_id, "t1");
        assert!((t1.unwrap_or_default() - 0.85).abs() < 1e-9);
        assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }
}
