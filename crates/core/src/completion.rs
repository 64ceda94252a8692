use crate::error::CompletionError;
use crate::traits::CompletionClient;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// Client for OpenAI-compatible `/chat/completions` endpoints (Groq, OpenAI,
/// vLLM, Ollama's compatibility layer).
pub struct ChatCompletionClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    client: Client,
}

impl ChatCompletionClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            temperature: 0.2,
            client: Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, CompletionError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .timeout(timeout)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": [
                    { "role": "system", "content": prompt }
                ]
            }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) if error.is_timeout() => return Err(CompletionError::Timeout(timeout)),
            Err(error) => return Err(CompletionError::Http(error)),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited(format!(
                "{} returned {status}",
                self.endpoint
            )));
        }
        if !status.is_success() {
            return Err(CompletionError::Backend(format!(
                "{} returned {status}",
                self.endpoint
            )));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(error) if error.is_timeout() => return Err(CompletionError::Timeout(timeout)),
            Err(error) => return Err(CompletionError::Http(error)),
        };
        message_content(&body)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn message_content(body: &Value) -> Result<String, CompletionError> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| CompletionError::Backend("response has no message content".to_string()))?;

    if content.trim().is_empty() {
        return Err(CompletionError::EmptyResponse);
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_read_from_first_choice() {
        let body = json!({
            "choices": [
                { "message": { "role": "assistant", "content": "Plans start at $10." } }
            ]
        });
        assert_eq!(message_content(&body).ok().as_deref(), Some("Plans start at $10."));
    }

    #[test]
    fn blank_content_is_an_empty_response() {
        let body = json!({ "choices": [ { "message": { "content": "  \n" } } ] });
        assert!(matches!(message_content(&body), Err(CompletionError::EmptyResponse)));
    }

    #[test]
    fn missing_choices_is_a_backend_error() {
        let body = json!({ "error": "overloaded" });
        assert!(matches!(message_content(&body), Err(CompletionError::Backend(_))));
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let client = ChatCompletionClient::new("http://localhost:8080/v1/", "llama3", Some(" ".into()));
        assert!(client.api_key.is_none());
        assert_eq!(client.endpoint, "http://localhost:8080/v1");
    }

    #[test]
    fn client_reports_its_model_and_temperature() {
        let client = ChatCompletionClient::new("http://localhost:8080/v1", "llama3-70b-8192", None)
            .with_temperature(0.0);
        assert_eq!(client.name(), "llama3-70b-8192");
        assert_eq!(client.temperature, 0.0);
    }
}
