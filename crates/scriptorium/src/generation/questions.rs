//! Question generation parameters and the LLM-backed generator.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::llm::{strip_code_fences, ChatClient, ChatMessage, ChatRequest};

pub const MAX_QUESTION_COUNT: u32 = 50;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    Mcq,
    OpenEnded,
    TrueFalse,
    FillInBlank,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Mcq => "mcq",
            QuestionType::OpenEnded => "open_ended",
            QuestionType::TrueFalse => "true_false",
            QuestionType::FillInBlank => "fill_in_blank",
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            QuestionType::Mcq => {
                "Çoxdan seçməli (4 variantlı) test sualları yarat.\n\
                 Format: [{\"question\":\"...\",\"options\":[\"A\",\"B\",\"C\",\"D\"],\"correctIndex\":0,\"answer\":\"düzgün cavab\"}]"
            }
            QuestionType::OpenEnded => {
                "Açıq suallar yarat. Cavab 1-3 cümlə olsun.\n\
                 Format: [{\"question\":\"...\",\"answer\":\"gözlənilən cavab\"}]"
            }
            QuestionType::TrueFalse => {
                "Doğru/Yanlış sualları yarat.\n\
                 Format: [{\"question\":\"...ifadə...\",\"answer\":\"Doğru\" yaxud \"Yanlış\"}]"
            }
            QuestionType::FillInBlank => {
                "Boşluq doldurun sualları yarat. Sualda ___ işarəsi ilə boşluq göstər.\n\
                 Format: [{\"question\":\"___ bu ideyanın əsas prinsipidir.\",\"answer\":\"düzgün söz/ifadə\"}]"
            }
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Level name used in the prompt.
    fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Asan",
            Difficulty::Medium => "Orta",
            Difficulty::Hard => "Çətin",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_count() -> u32 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionParams {
    #[serde(default)]
    pub question_type: QuestionType,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub difficulty: Difficulty,
}

impl Default for QuestionParams {
    fn default() -> Self {
        Self {
            question_type: QuestionType::default(),
            count: default_count(),
            difficulty: Difficulty::default(),
        }
    }
}

impl QuestionParams {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.count == 0 || self.count > MAX_QUESTION_COUNT {
            return Err(GenerationError::InvalidParams(format!(
                "count must be between 1 and {}, got {}",
                MAX_QUESTION_COUNT, self.count
            )));
        }
        Ok(())
    }
}

/// One generated question. Accepts both the short field names models tend
/// to emit and the stored names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "question", default)]
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(alias = "answer", default)]
    pub answer_key: String,
    #[serde(alias = "correctIndex", default, skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<u32>,
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(
        &self,
        source_text: &str,
        params: &QuestionParams,
    ) -> Result<Vec<Question>, GenerationError>;
}

pub struct LlmQuestionGenerator {
    client: ChatClient,
    model: String,
    max_source_chars: usize,
    max_tokens: u32,
}

impl LlmQuestionGenerator {
    pub fn new(
        client: ChatClient,
        model: impl Into<String>,
        max_source_chars: usize,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            max_source_chars,
            max_tokens,
        }
    }
}

fn system_prompt(difficulty: Difficulty) -> String {
    format!(
        "Sən təhsil mütəxəssisisən. Azərbaycan dilində suallar yarat. \
         Yalnız JSON array qaytar, başqa heç nə yazma. Səviyyə: {}.",
        difficulty.label()
    )
}

fn user_prompt(text: &str, params: &QuestionParams, max_chars: usize) -> String {
    let excerpt: String = text.chars().take(max_chars).collect();
    format!(
        "Aşağıdakı mətnə əsasən {} ədəd sual yarat.\n\n{}\n\nMətn:\n{}",
        params.count,
        params.question_type.instructions(),
        excerpt
    )
}

/// Reads the JSON array of questions out of a model reply.
fn parse_questions(reply: &str) -> Result<Vec<Question>, GenerationError> {
    serde_json::from_str(strip_code_fences(reply))
        .map_err(|e| GenerationError::Malformed(format!("expected a JSON array of questions: {}", e)))
}

#[async_trait]
impl QuestionGenerator for LlmQuestionGenerator {
    async fn generate(
        &self,
        source_text: &str,
        params: &QuestionParams,
    ) -> Result<Vec<Question>, GenerationError> {
        params.validate()?;
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(system_prompt(params.difficulty)),
                ChatMessage::user(user_prompt(source_text, params, self.max_source_chars)),
            ],
            TEMPERATURE,
        )
        .max_tokens(self.max_tokens);

        let reply = self.client.complete(&request).await?;
        let questions = parse_questions(&reply)?;
        tracing::info!(
            count = questions.len(),
            question_type = %params.question_type,
            "questions generated"
        );
        Ok(questions)
    }
}
