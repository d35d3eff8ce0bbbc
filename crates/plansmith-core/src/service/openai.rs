//! Client for OpenAI-compatible `/chat/completions` endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CompletionError, CompletionService};
use crate::message::ChatMessage;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Completion service backed by an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct OpenAiCompletion {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
}

impl OpenAiCompletion {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            temperature: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for OpenAiCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompletion")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(model = %self.model, messages = messages.len(), "sending completion request");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        extract_content(parsed)
    }
}

fn extract_content(response: CompletionResponse) -> Result<String, CompletionError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(CompletionError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = OpenAiCompletion::new("http://localhost:8080/v1/", "m");
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn request_body_uses_lowercase_roles() {
        let messages = [ChatMessage::system("rules"), ChatMessage::user("hi")];
        let body = CompletionRequest {
            model: "m",
            messages: &messages,
            temperature: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn extracts_first_choice() {
        let response: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"reply\":\"ok\"}"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(response).unwrap(), r#"{"reply":"ok"}"#);
    }

    #[test]
    fn empty_choices_is_an_error() {
        let response: CompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_content(response),
            Err(CompletionError::EmptyResponse)
        ));
    }

    #[test]
    fn debug_redacts_api_key() {
        let client = OpenAiCompletion::new(DEFAULT_BASE_URL, DEFAULT_MODEL).with_api_key("sk-secret");
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("sk-secret"));
    }
}
