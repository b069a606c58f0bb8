//! OpenAI-compatible chat completion client shared by text cleaning and
//! question generation.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::auth::service_account::truncate_body;
use crate::error::LlmError;
use crate::retry::{is_transient_status, with_retry, RetryPolicy};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature,
            max_tokens: None,
            response_format: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Asks the provider to constrain output to a JSON object.
    pub fn json_object(mut self) -> Self {
        self.response_format = Some(ResponseFormat {
            kind: "json_object",
        });
        self
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        api_key: SecretString,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            retry,
        }
    }

    /// Sends `request` and returns the first choice's content.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        with_retry(self.retry, "chat completion", || self.send_once(request)).await
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = truncate_body(&response.text().await.unwrap_or_default());
            return Err(if is_transient_status(code) {
                LlmError::Transient { status: code, body }
            } else {
                LlmError::Api { status: code, body }
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("response has no choices".to_string()))
    }
}

/// Strips a surrounding Markdown code fence (```` ```json ... ``` ````) if present.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest::new(
            "llama-3.3-70b-versatile",
            vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            0.1,
        )
        .json_object();
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "llama-3.3-70b-versatile");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn test_max_tokens_serialized_when_set() {
        let request = ChatRequest::new("m", vec![], 0.7).max_tokens(3000);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["max_tokens"], 3000);
        assert!(value.get("response_format").is_none());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fences("  [3]  "), "[3]");
    }
}
