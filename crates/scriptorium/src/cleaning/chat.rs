//! Cleanup through a chat completion model constrained to JSON output.

use async_trait::async_trait;
use serde::Deserialize;

use super::{is_too_short, CleanedText, LanguageHint, TextCleaner, TOO_SHORT_SUMMARY};
use crate::error::CleaningError;
use crate::llm::{ChatClient, ChatMessage, ChatRequest};

const SYSTEM_PROMPT: &str = "You output strictly valid JSON.";
const TEMPERATURE: f32 = 0.1;

pub struct ChatTextCleaner {
    client: ChatClient,
    model: String,
    min_length: usize,
}

#[derive(Debug, Deserialize)]
struct CleaningReply {
    #[serde(default)]
    clean_text: Option<String>,
    #[serde(default)]
    changes_summary: Option<String>,
}

impl ChatTextCleaner {
    pub fn new(client: ChatClient, model: impl Into<String>, min_length: usize) -> Self {
        Self {
            client,
            model: model.into(),
            min_length,
        }
    }
}

fn build_prompt(text: &str, hint: LanguageHint) -> String {
    format!(
        "You are a meticulous OCR text cleaner.\n\
         Fix scanning errors, broken hyphenation and erratic line breaks in the text below.\n\
         LANGUAGE HINT: {hint}.\n\n\
         RULES:\n\
         1. Do not add information, facts or commentary.\n\
         2. Only fix typos, whitespace and formatting.\n\
         3. Return only a JSON object of the form \
         {{\"clean_text\": \"...\", \"changes_summary\": \"one sentence on what was fixed\"}}.\n\n\
         RAW OCR INPUT:\n\"\"\"\n{text}\n\"\"\""
    )
}

/// Reads the model's JSON reply. An empty `clean_text` falls back to the input.
fn parse_reply(reply: &str, original: &str) -> Result<CleanedText, CleaningError> {
    let parsed: CleaningReply = serde_json::from_str(reply.trim())
        .map_err(|e| CleaningError::Malformed(format!("reply is not the expected JSON: {}", e)))?;

    Ok(CleanedText {
        clean_text: parsed
            .clean_text
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| original.to_string()),
        changes_summary: parsed.changes_summary.filter(|s| !s.is_empty()),
    })
}

#[async_trait]
impl TextCleaner for ChatTextCleaner {
    async fn clean(&self, text: &str, hint: LanguageHint) -> Result<CleanedText, CleaningError> {
        if is_too_short(text, self.min_length) {
            return Ok(CleanedText::passthrough(text, Some(TOO_SHORT_SUMMARY)));
        }

        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_prompt(text, hint)),
            ],
            TEMPERATURE,
        )
        .json_object();

        let started = std::time::Instant::now();
        let reply = self.client.complete(&request).await?;
        tracing::debug!(
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cleaned page"
        );

        parse_reply(&reply, text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
