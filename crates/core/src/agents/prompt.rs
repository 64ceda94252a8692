use crate::error::CompletionError;
use crate::models::{ScoredEvidence, Stage, StructuredFact};
use regex::Regex;
use serde_json::Value;
use std::fmt::Write;
use std::sync::OnceLock;

/// First line of every stage prompt.
pub fn role_line(stage: Stage) -> String {
    format!(
        "You are the {} of a website question-answering assistant.",
        stage.title()
    )
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(limit).collect();
    format!("{}...", cut.trim_end())
}

pub fn format_evidence(evidence: &[ScoredEvidence], excerpt_chars: usize) -> String {
    let mut formatted = String::new();
    for (position, item) in evidence.iter().enumerate() {
        let _ = writeln!(
            formatted,
            "[Source {}] id={} ({:.3} relevance)\nFrom: {}\nType: {}\nContent: {}\n",
            position + 1,
            item.chunk.chunk_id,
            item.fused_score,
            item.chunk.source_url,
            item.chunk.content_type,
            truncate_chars(&item.chunk.text, excerpt_chars)
        );
    }
    formatted
}

pub fn format_facts(facts: &[StructuredFact]) -> String {
    let mut formatted = String::new();
    for (position, fact) in facts.iter().enumerate() {
        let _ = writeln!(
            formatted,
            "{}. {} [{}]",
            position,
            fact.statement,
            fact.sources.join(", ")
        );
    }
    formatted
}

/// The outermost `{...}` span of a completion, parsed as JSON. Models often
/// wrap the object in prose or code fences.
pub fn extract_json_object(text: &str) -> Result<Value, CompletionError> {
    let span = json_object_pattern()?
        .find(text)
        .ok_or_else(|| CompletionError::Malformed("no JSON object in completion".to_string()))?;
    serde_json::from_str(span.as_str()).map_err(|error| CompletionError::Malformed(error.to_string()))
}

fn json_object_pattern() -> Result<&'static Regex, CompletionError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let compiled = Regex::new(r"(?s)\{.*\}")?;
    Ok(PATTERN.get_or_init(|| compiled))
}

pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Lower-cased words longer than three characters.
pub fn content_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.chars().count() > 3)
        .map(str::to_lowercase)
}
