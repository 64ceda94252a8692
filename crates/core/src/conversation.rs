//! Recent questions and answers of one user session.
//!
//! The engine keeps no state between queries: the caller owns a
//! [`ConversationContext`], hands it to
//! [`AnswerService::answer_query_in_conversation`](crate::AnswerService::answer_query_in_conversation)
//! and records each answered turn itself.

use crate::agents::prompt::truncate_chars;
use crate::models::PipelineResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Turns kept per session; older ones are dropped first.
pub const MAX_TURNS: usize = 10;
/// Turns rendered into stage prompts.
pub const PROMPT_TURNS: usize = 3;
const PROMPT_ANSWER_CHARS: usize = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryRelationship {
    NewTopic,
    Continuation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> + '_ {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn record(&mut self, query: impl Into<String>, answer: impl Into<String>) {
        self.turns.push_back(ConversationTurn {
            query: query.into(),
            answer: answer.into(),
            asked_at: Utc::now(),
        });
        while self.turns.len() > MAX_TURNS {
            self.turns.pop_front();
        }
    }

    pub fn record_result(&mut self, result: &PipelineResult) {
        self.record(result.query.clone(), result.answer().to_string());
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn relationship(&self) -> QueryRelationship {
        if self.is_empty() {
            QueryRelationship::NewTopic
        } else {
            QueryRelationship::Continuation
        }
    }

    /// The last few turns as `Q:`/`A:` pairs with shortened answers, or `None`
    /// for a fresh session.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let skip = self.turns.len().saturating_sub(PROMPT_TURNS);
        let rendered = self
            .turns
            .iter()
            .skip(skip)
            .map(|turn| {
                let answer = truncate_chars(&turn.answer, PROMPT_ANSWER_CHARS);
                format!("Q: {}\nA: {}", turn.query, answer)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Some(rendered)
    }
}
