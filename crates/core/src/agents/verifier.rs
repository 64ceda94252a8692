use super::prompt::{content_words, extract_json_object, format_facts, role_line};
use super::StageContext;
use crate::config::ConfidenceWeights;
use crate::error::CompletionError;
use crate::models::{ChunkId, PipelineResult, Stage, StructuredFact};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

const STAGE: Stage = Stage::FinalVerifier;
const MIN_SUPPORTED_SHARE: f64 = 0.6;

#[derive(Debug, Deserialize)]
struct VerificationReply {
    agreement: f64,
    #[serde(default)]
    revised_answer: Option<String>,
    #[serde(default)]
    unsupported: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub agreement: f64,
    pub revised_answer: Option<String>,
    pub unsupported: Vec<usize>,
}

pub fn build_prompt(ctx: &StageContext<'_>, prior: &PipelineResult) -> String {
    format!(
        "{role}\n\
         Check the draft answer to \"{query}\" against the numbered facts.\n\n\
         Facts:\n{facts}\n\
         Draft answer:\n{draft}\n\n\
         Reply with a single JSON object: {{\"agreement\": <0..1, how well the sources agree>, \
         \"revised_answer\": \"<optional clearer wording; never add claims absent from the facts>\", \
         \"unsupported\": [<indices of facts the sources do not support>]}}",
        role = role_line(STAGE),
        query = ctx.query,
        facts = format_facts(&prior.structured_facts),
        draft = prior.draft_answer,
    )
}

pub fn parse_reply(reply: &str, fact_count: usize) -> Result<Verification, CompletionError> {
    let parsed: VerificationReply = serde_json::from_value(extract_json_object(reply)?)
        .map_err(|error| CompletionError::Malformed(error.to_string()))?;
    if !parsed.agreement.is_finite() {
        return Err(CompletionError::Malformed("agreement is not a number".to_string()));
    }

    let mut unsupported: Vec<usize> = parsed
        .unsupported
        .into_iter()
        .filter(|index| *index < fact_count)
        .collect();
    unsupported.sort_unstable();
    unsupported.dedup();

    Ok(Verification {
        agreement: parsed.agreement.clamp(0.0, 1.0),
        revised_answer: parsed
            .revised_answer
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()),
        unsupported,
    })
}

/// A revision may reword the draft but not add claims: every sentence with
/// at least three content words must draw most of them from the facts.
pub fn claims_supported(answer: &str, facts: &[StructuredFact]) -> bool {
    let vocabulary: HashSet<String> = facts
        .iter()
        .flat_map(|fact| content_words(&fact.statement).collect::<Vec<_>>())
        .collect();

    answer
        .split(['.', '!', '?', '\n'])
        .map(|sentence| content_words(sentence).collect::<Vec<_>>())
        .filter(|words| words.len() >= 3)
        .all(|words| {
            let known = words.iter().filter(|word| vocabulary.contains(*word)).count();
            known as f64 / words.len() as f64 >= MIN_SUPPORTED_SHARE
        })
}

/// Agreement without a verifier: a fact backed by two or more retrieved
/// chunks counts fully, one chunk counts half.
pub fn heuristic_agreement(facts: &[StructuredFact]) -> f64 {
    if facts.is_empty() {
        return 0.0;
    }
    facts
        .iter()
        .map(|fact| (fact.sources.len() as f64 / 2.0).min(1.0))
        .sum::<f64>()
        / facts.len() as f64
}

/// `agreement`, gap coverage and citation density, weighted and clamped to
/// `[0, 1]`. Zero without facts.
pub fn confidence(
    weights: &ConfidenceWeights,
    agreement: f64,
    facts: &[StructuredFact],
    gap_count: usize,
    distinct_sources: usize,
) -> f64 {
    if facts.is_empty() {
        return 0.0;
    }
    let coverage = (1.0 - gap_count as f64 / 5.0).max(0.0);
    let density = (distinct_sources as f64 / 3.0).min(1.0);
    let total = weights.agreement + weights.coverage + weights.citation_density;
    if total <= 0.0 {
        return 0.0;
    }

    let weighted = weights.agreement * agreement
        + weights.coverage * coverage
        + weights.citation_density * density;
    (weighted / total).clamp(0.0, 1.0)
}

/// Distinct chunks cited by the supported facts, in evidence order. When the
/// verifier rejects every fact the citations of all of them are kept.
pub fn sources_used(ctx: &StageContext<'_>, facts: &[StructuredFact], unsupported: &[usize]) -> Vec<ChunkId> {
    let supported: Vec<&StructuredFact> = facts
        .iter()
        .enumerate()
        .filter(|(index, _)| !unsupported.contains(index))
        .map(|(_, fact)| fact)
        .collect();
    let counted: Vec<&StructuredFact> = if supported.is_empty() {
        facts.iter().collect()
    } else {
        supported
    };

    let cited: HashSet<&str> = counted
        .iter()
        .flat_map(|fact| fact.sources.iter().map(String::as_str))
        .collect();
    ctx.evidence_ids()
        .filter(|id| cited.contains(id))
        .map(str::to_string)
        .collect()
}

fn finish(
    ctx: &StageContext<'_>,
    prior: PipelineResult,
    agreement: f64,
    final_answer: String,
    unsupported: &[usize],
) -> PipelineResult {
    let sources_used = sources_used(ctx, &prior.structured_facts, unsupported);
    let confidence = confidence(
        &ctx.config.confidence,
        agreement,
        &prior.structured_facts,
        prior.information_gaps.len(),
        sources_used.len(),
    );
    debug!(agreement, confidence, sources = sources_used.len(), "answer verified");

    PipelineResult {
        final_answer,
        confidence,
        sources_used,
        ..prior
    }
}

pub fn fallback(ctx: &StageContext<'_>, prior: PipelineResult) -> PipelineResult {
    let agreement = heuristic_agreement(&prior.structured_facts);
    let final_answer = prior.draft_answer.clone();
    finish(ctx, prior, agreement, final_answer, &[])
}

pub async fn run(ctx: &StageContext<'_>, prior: PipelineResult) -> PipelineResult {
    let outcome = match ctx.complete(&build_prompt(ctx, &prior)).await {
        Ok(reply) => parse_reply(&reply, prior.structured_facts.len()),
        Err(error) => Err(error),
    };

    match outcome {
        Ok(verification) => {
            let final_answer = match verification.revised_answer {
                Some(revised) if claims_supported(&revised, &prior.structured_facts) => revised,
                Some(_) => {
                    debug!("revision introduced unsupported claims, keeping the draft");
                    prior.draft_answer.clone()
                }
                None => prior.draft_answer.clone(),
            };
            finish(ctx, prior, verification.agreement, final_answer, &verification.unsupported)
                .with_completed(STAGE)
        }
        Err(error) => {
            warn!(stage = %STAGE, %error, "stage fell back");
            fallback(ctx, prior)
                .with_completed(STAGE)
                .with_degradation(STAGE, error.to_string())
        }
    }
}
