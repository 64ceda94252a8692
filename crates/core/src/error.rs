use crate::models::Signal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunks not found: {}", missing.join(", "))]
    NotFound { missing: Vec<String> },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("completion rate limited: {0}")]
    RateLimited(String),

    #[error("invalid response from completion backend: {0}")]
    Backend(String),

    #[error("completion response was empty")]
    EmptyResponse,

    #[error("malformed completion output: {0}")]
    Malformed(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SignalFailureReason {
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("scorer timed out after {0} ms")]
    ScorerTimeout(u64),

    #[error("scorer task failed: {0}")]
    TaskFailed(String),
}

/// A scoring signal that could not contribute to fusion for one query.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{signal} signal unavailable: {reason}")]
pub struct SignalFailure {
    pub signal: Signal,
    pub reason: SignalFailureReason,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid search mode: {0}")]
    InvalidSearchMode(String),

    #[error("index is empty")]
    EmptyIndex,

    #[error("query is empty")]
    EmptyQuery,

    #[error("all signals unavailable: {}", describe_failures(failures))]
    AllSignalsUnavailable { failures: Vec<SignalFailure> },

    #[error("query cancelled {at}")]
    Cancelled { at: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

fn describe_failures(failures: &[SignalFailure]) -> String {
    if failures.is_empty() {
        return "no signal was requested".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T, E = QueryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_signals_unavailable_names_each_signal() {
        let error = QueryError::AllSignalsUnavailable {
            failures: vec![
                SignalFailure {
                    signal: Signal::Semantic,
                    reason: SignalFailureReason::EmbeddingUnavailable("connection refused".into()),
                },
                SignalFailure {
                    signal: Signal::Graph,
                    reason: SignalFailureReason::ScorerTimeout(250),
                },
            ],
        };

        let message = error.to_string();
        assert!(message.contains("semantic signal unavailable"));
        assert!(message.contains("connection refused"));
        assert!(message.contains("graph signal unavailable: scorer timed out after 250 ms"));
    }

    #[test]
    fn not_found_lists_missing_ids() {
        let error = StoreError::NotFound {
            missing: vec!["c-1".to_string(), "c-9".to_string()],
        };
        assert_eq!(error.to_string(), "chunks not found: c-1, c-9");
    }
}
