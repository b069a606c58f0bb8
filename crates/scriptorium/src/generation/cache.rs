//! Memoization of generation calls by source-text fingerprint.
//!
//! The key is a SHA-256 over the normalized source text and the generation
//! parameters, looked up per owner. Nothing is ever evicted: an edited text
//! hashes differently and simply gets its own entry.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::questions::{Question, QuestionGenerator, QuestionParams};
use crate::db::artifact_repo::{self, ArtifactRow};
use crate::db::{format_timestamp, Database};
use crate::error::GenerationError;

/// Questions for one request and whether they came from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedQuestions {
    pub source_text_hash: String,
    pub questions: Vec<Question>,
    pub cache_hit: bool,
}

/// Collapses whitespace runs so layout-only differences share a key.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache key for `text` generated with `params`.
pub fn fingerprint(text: &str, params: &QuestionParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    hasher.update(params.question_type.as_str().as_bytes());
    hasher.update(params.count.to_string().as_bytes());
    hasher.update(params.difficulty.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct GenerationCache {
    db: Database,
}

impl GenerationCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the owner's stored questions for this text and parameters,
    /// or generates and stores them.
    pub async fn get_or_generate(
        &self,
        owner_id: &str,
        document_id: Option<&str>,
        source_text: &str,
        params: &QuestionParams,
        generator: &dyn QuestionGenerator,
    ) -> Result<CachedQuestions, GenerationError> {
        params.validate()?;
        if source_text.trim().is_empty() {
            return Err(GenerationError::InvalidParams(
                "no source text to generate from".to_string(),
            ));
        }

        let hash = fingerprint(source_text, params);
        let cached = self
            .db
            .with_conn(|conn| artifact_repo::find_by_hash(conn, owner_id, &hash))?;
        if !cached.is_empty() {
            tracing::info!(hash = %hash, count = cached.len(), "generation cache hit");
            let questions = cached
                .into_iter()
                .map(|row| serde_json::from_value(row.payload))
                .collect::<Result<Vec<Question>, _>>()
                .map_err(|e| GenerationError::Malformed(format!("cached question: {}", e)))?;
            return Ok(CachedQuestions {
                source_text_hash: hash,
                questions,
                cache_hit: true,
            });
        }

        let questions = generator.generate(source_text, params).await?;

        let created_at = format_timestamp(Utc::now());
        let rows = questions
            .iter()
            .map(|q| {
                Ok(ArtifactRow {
                    id: uuid::Uuid::new_v4().to_string(),
                    owner_id: owner_id.to_string(),
                    document_id: document_id.map(String::from),
                    source_text_hash: hash.clone(),
                    kind: params.question_type.as_str().to_string(),
                    payload: serde_json::to_value(q)
                        .map_err(|e| GenerationError::Malformed(e.to_string()))?,
                    created_at: created_at.clone(),
                })
            })
            .collect::<Result<Vec<_>, GenerationError>>()?;
        self.db.with_tx(|tx| artifact_repo::insert_many(tx, &rows))?;
        tracing::info!(hash = %hash, count = rows.len(), "generation cached");

        Ok(CachedQuestions {
            source_text_hash: hash,
            questions,
            cache_hit: false,
        })
    }
}
