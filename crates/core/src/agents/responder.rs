use super::prompt::{format_facts, role_line, strip_code_fences};
use super::StageContext;
use crate::error::CompletionError;
use crate::models::{PipelineResult, Stage};
use tracing::warn;

const STAGE: Stage = Stage::ResponseStructurer;

const FOLLOW_UPS: [&str; 4] = [
    "Can you show me more details about this topic?",
    "How do I navigate to this information on the website?",
    "What related topics might interest me?",
    "Can you explain this in simpler terms?",
];

pub fn build_prompt(ctx: &StageContext<'_>, prior: &PipelineResult) -> String {
    format!(
        "{role}\n{conversation}\
         Write a helpful, conversational answer to: \"{query}\"\n\n\
         Use only these facts:\n{facts}\n\
         Known gaps: {gaps}\n\
         Where it lives on the site: {path}\n\
         Related pages: {related}\n\n\
         Answer directly first, then add navigation guidance. Plain text only.",
        role = role_line(STAGE),
        conversation = ctx.conversation_block(),
        query = ctx.query,
        facts = format_facts(&prior.structured_facts),
        gaps = if prior.information_gaps.is_empty() {
            "none".to_string()
        } else {
            prior.information_gaps.join("; ")
        },
        path = prior.navigation_path.join(" > "),
        related = prior.related_content.join(", "),
    )
}

pub fn parse_reply(reply: &str) -> Result<String, CompletionError> {
    let draft = strip_code_fences(reply);
    if draft.is_empty() {
        return Err(CompletionError::EmptyResponse);
    }
    Ok(draft)
}

pub fn actionable_steps(prior: &PipelineResult) -> Vec<String> {
    let mut steps = Vec::new();
    match prior.navigation_path.as_slice() {
        [] => {}
        [page] => steps.push(format!("Open {page}")),
        path => steps.push(format!("Navigate: {}", path.join(" > "))),
    }
    if !prior.related_content.is_empty() {
        steps.push(format!(
            "See related content: {}",
            prior.related_content.join(", ")
        ));
    }
    steps.push("Ask me for more details about any specific aspect".to_string());
    steps.push("I can help you explore related topics".to_string());
    steps
}

pub fn follow_up_suggestions() -> Vec<String> {
    FOLLOW_UPS.iter().take(3).map(|text| text.to_string()).collect()
}

/// Draft assembled from the facts alone.
pub fn compose_draft(query: &str, prior: &PipelineResult) -> String {
    let mut draft = format!("Here is what I found about \"{query}\":");
    for fact in &prior.structured_facts {
        draft.push_str("\n- ");
        draft.push_str(&fact.statement);
    }
    if !prior.navigation_path.is_empty() {
        draft.push_str("\n\nYou can find this at: ");
        draft.push_str(&prior.navigation_path.join(" > "));
    }
    draft
}

pub fn fallback(ctx: &StageContext<'_>, prior: PipelineResult) -> PipelineResult {
    PipelineResult {
        draft_answer: compose_draft(ctx.query, &prior),
        actionable_steps: actionable_steps(&prior),
        follow_up_suggestions: follow_up_suggestions(),
        ..prior
    }
}

pub async fn run(ctx: &StageContext<'_>, prior: PipelineResult) -> PipelineResult {
    let outcome = match ctx.complete(&build_prompt(ctx, &prior)).await {
        Ok(reply) => parse_reply(&reply),
        Err(error) => Err(error),
    };

    match outcome {
        Ok(draft_answer) => PipelineResult {
            draft_answer,
            actionable_steps: actionable_steps(&prior),
            follow_up_suggestions: follow_up_suggestions(),
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
    use crate::fixtures::{ten_chunk_site, ScriptedCompletion};
    use crate::models::StructuredFact;
    use crate::scoring::GraphWalkScorer;
    use chrono::Utc;

    fn mapped() -> PipelineResult {
        PipelineResult {
            structured_facts: vec![
                StructuredFact {
                    statement: "Starter costs $10 per month".to_string(),
                    sources: vec!["t1".to_string()],
                    category: None,
                },
                StructuredFact {
                    statement: "Pro costs $25 per month".to_string(),
                    sources: vec!["t2".to_string()],
                    category: None,
                },
            ],
            navigation_path: vec!["home".to_string(), "pricing".to_string()],
            related_content: vec!["faq".to_string()],
            ..PipelineResult::default()
        }
    }

    #[test]
    fn steps_describe_path_and_related_content() {
        let steps = actionable_steps(&mapped());
        assert_eq!(steps[0], "Navigate: home > pricing");
        assert_eq!(steps[1], "See related content: faq");
        assert_eq!(steps.len(), 4);
    }

    #[test]
    fn blank_reply_is_an_empty_response() {
        assert!(matches!(parse_reply("```\n\n```"), Err(CompletionError::EmptyResponse)));
    }

    #[tokio::test]
    async fn empty_reply_falls_back_to_fact_list() {
        let store = ten_chunk_site();
        let config = EngineConfig::default();
        let graph = GraphWalkScorer::default();
        let completion = ScriptedCompletion::new().text(STAGE, "   ");
        let ctx = StageContext {
            query: "pricing plans",
            evidence: &[],
            store: &store,
            graph: &graph,
            completion: &completion,
            config: &config,
            now: Utc::now(),
            conversation: None,
        };

        let result = run(&ctx, mapped()).await;
        assert!(result.degraded);
        assert_eq!(
            result.draft_answer,
            "Here is what I found about \"pricing plans\":\n\
             - Starter costs $10 per month\n\
             - Pro costs $25 per month\n\n\
             You can find this at: home > pricing"
        );
        assert_eq!(result.follow_up_suggestions.len(), 3);
        assert_eq!(result.navigation_path, vec!["home", "pricing"]);
    }

    #[tokio::test]
    async fn reply_becomes_the_draft() {
        let store = ten_chunk_site();
        let config = EngineConfig::default();
        let graph = GraphWalkScorer::default();
        let completion = ScriptedCompletion::new().text(STAGE, "Starter is $10 a month.");
        let ctx = StageContext {
            query: "pricing plans",
            evidence: &[],
            store: &store,
            graph: &graph,
            completion: &completion,
            config: &config,
            now: Utc::now(),
            conversation: None,
        };

        let result = run(&ctx, mapped()).await;
        assert!(!result.degraded);
        assert_eq!(result.draft_answer, "Starter is $10 a month.");
        assert_eq!(result.completed_stages, vec![STAGE]);
    }
}
